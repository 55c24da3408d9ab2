//! JSON-RPC method handlers.
//!
//! Implements the handlers for all supported JSON-RPC methods. `generate`
//! and `subscribe` hand back the job's progress stream; once the response is
//! written the server starts a forwarding thread that turns it into
//! `loop_progress`, `loop_complete` and `loop_error` notifications.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, warn};

use crate::cache::LoopStore;
use crate::error::{DaemonError, ErrorCode};
use crate::generation::{JobOrchestrator, Subscription};
use crate::types::{FailureReason, Job, Stage};

use super::server::{Outbox, ServerState};
use super::types::{
    GenerateParams, GenerateResult, JobIdParams, JobStatusResult, JsonRpcError, LoopCompleteParams,
    LoopErrorParams,
};

/// Successful method call.
pub struct Reply {
    pub result: serde_json::Value,
    /// Events to relay as notifications after `result` is sent.
    pub follow: Option<Subscription>,
}

impl From<serde_json::Value> for Reply {
    fn from(result: serde_json::Value) -> Self {
        Self { result, follow: None }
    }
}

/// Handles a JSON-RPC method call.
pub fn handle_request(
    method: &str,
    params: serde_json::Value,
    state: &ServerState,
) -> Result<Reply, JsonRpcError> {
    match method {
        "generate" => handle_generate(params, state),
        "subscribe" => handle_subscribe(params, state),
        "cancel" => handle_cancel(params, state).map(Reply::from),
        "status" => handle_status(params, state).map(Reply::from),
        "ping" => handle_ping(state).map(Reply::from),
        "shutdown" => handle_shutdown(state).map(Reply::from),
        _ => Err(JsonRpcError::method_not_found(method)),
    }
}

/// Handles the ping method for health checks.
fn handle_ping(state: &ServerState) -> Result<serde_json::Value, JsonRpcError> {
    Ok(serde_json::json!({
        "status": "ok",
        "generator": state.orchestrator.generator_name(),
        "queued": state.orchestrator.queue_len(),
    }))
}

/// Handles the shutdown method.
fn handle_shutdown(state: &ServerState) -> Result<serde_json::Value, JsonRpcError> {
    state.shutdown();
    Ok(serde_json::json!({ "status": "shutting_down" }))
}

/// Submits a job and subscribes the client to it.
fn handle_generate(params: serde_json::Value, state: &ServerState) -> Result<Reply, JsonRpcError> {
    let params: GenerateParams = serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?;
    let job_params = params.into_job_params()?;

    let job_id = state.orchestrator.submit(job_params)?;
    // Subscribe now so no event can be missed; relaying waits for the reply.
    let subscription = state.orchestrator.subscribe(&job_id)?;
    let job = lookup(&state.orchestrator, &job_id)?;

    let result = GenerateResult {
        job_id: job_id.clone(),
        loop_id: job.loop_id.clone(),
        state: job.state(),
        position: state.orchestrator.queue_position(&job_id),
        seed: job.params.constraints.seed.unwrap_or_default(),
    };
    Ok(Reply {
        result: to_value(result)?,
        follow: Some(subscription),
    })
}

/// Streams a job's events (replay first, then live) as notifications.
fn handle_subscribe(params: serde_json::Value, state: &ServerState) -> Result<Reply, JsonRpcError> {
    let params = job_id_params(params)?;
    let subscription = state.orchestrator.subscribe(&params.job_id)?;
    let result = status_of(state, &params.job_id)?;
    Ok(Reply {
        result: to_value(result)?,
        follow: Some(subscription),
    })
}

fn handle_cancel(
    params: serde_json::Value,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    let params = job_id_params(params)?;
    state.orchestrator.cancel(&params.job_id)?;
    to_value(status_of(state, &params.job_id)?)
}

fn handle_status(
    params: serde_json::Value,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    let params = job_id_params(params)?;
    to_value(status_of(state, &params.job_id)?)
}

fn job_id_params(params: serde_json::Value) -> Result<JobIdParams, JsonRpcError> {
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<serde_json::Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

fn lookup(orchestrator: &JobOrchestrator, job_id: &str) -> Result<Job, DaemonError> {
    orchestrator
        .job(job_id)
        .ok_or_else(|| DaemonError::job_not_found(job_id))
}

fn status_of(state: &ServerState, job_id: &str) -> Result<JobStatusResult, DaemonError> {
    let job = lookup(&state.orchestrator, job_id)?;
    let path = state
        .store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(job_id)
        .map(|stored| stored.path.to_string_lossy().to_string());

    Ok(JobStatusResult {
        job_id: job.id.clone(),
        loop_id: job.loop_id.clone(),
        state: job.state(),
        position: state.orchestrator.queue_position(job_id),
        failure: job.failure().cloned(),
        metadata: job.result().map(|r| r.metadata()),
        path,
    })
}

/// Relays `subscription` on a background thread tracked by `state`.
pub(crate) fn spawn_forwarder(state: &ServerState, subscription: Subscription) {
    let orchestrator = Arc::clone(&state.orchestrator);
    let store = Arc::clone(&state.store);
    let outbox = state.outbox.clone();

    let spawned = thread::Builder::new()
        .name("loopgen-notify".to_string())
        .spawn(move || forward(&orchestrator, &store, &outbox, subscription));
    match spawned {
        Ok(handle) => state.track_forwarder(handle),
        Err(e) => warn!(error = %e, "failed to start notification forwarder"),
    }
}

/// Relays one subscription until the job's terminal event.
fn forward(
    orchestrator: &JobOrchestrator,
    store: &Mutex<LoopStore>,
    outbox: &Outbox,
    subscription: Subscription,
) {
    for event in subscription {
        let job_id = event.job_id.clone();
        let stage = event.stage;
        outbox.notify("loop_progress", &event);

        match stage {
            Stage::Completed => deliver(orchestrator, store, outbox, &job_id),
            Stage::Failed => {
                let reason = orchestrator
                    .job(&job_id)
                    .and_then(|job| job.failure().cloned())
                    .unwrap_or_else(|| FailureReason {
                        code: ErrorCode::JobNotFound,
                        message: event.detail.clone(),
                    });
                outbox.notify("loop_error", LoopErrorParams::new(job_id, &reason));
            }
            Stage::Cancelled => {
                let reason = FailureReason::from(DaemonError::cancelled());
                outbox.notify("loop_error", LoopErrorParams::new(job_id, &reason));
            }
            _ => {}
        }
    }
    debug!("subscription ended");
}

/// Writes a completed loop (once per job) and announces it.
fn deliver(orchestrator: &JobOrchestrator, store: &Mutex<LoopStore>, outbox: &Outbox, job_id: &str) {
    let Some(job) = orchestrator.job(job_id) else {
        let reason = FailureReason::from(DaemonError::job_not_found(job_id));
        outbox.notify("loop_error", LoopErrorParams::new(job_id, &reason));
        return;
    };
    let Some(result) = job.result() else {
        return;
    };

    let stored = store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .store(job_id, &job.loop_id, result);
    match stored {
        Ok(stored) => outbox.notify(
            "loop_complete",
            LoopCompleteParams {
                job_id: job_id.to_string(),
                loop_id: stored.loop_id,
                path: stored.path.to_string_lossy().to_string(),
                prompt: job.params.prompt.clone(),
                metadata: stored.metadata,
            },
        ),
        Err(err) => {
            warn!(job_id, error = %err, "failed to store loop");
            outbox.notify("loop_error", LoopErrorParams::new(job_id, &FailureReason::from(err)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::generation::{GenerationRequest, Generator, SyntheticGenerator};
    use crate::rpc::server::test_support::{state, state_with, Captured};
    use crate::types::AudioBuffer;

    /// Calls a method the way `serve` does: reply first, then relay.
    fn call(
        state: &ServerState,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let reply = handle_request(method, params, state)?;
        if let Some(subscription) = reply.follow {
            spawn_forwarder(state, subscription);
        }
        Ok(reply.result)
    }

    fn wait_for(
        captured: &Captured,
        what: &str,
        matches: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        let deadline = Instant::now() + Duration::from_secs(60);
        while Instant::now() < deadline {
            if let Some(line) = captured.lines().into_iter().find(|l| matches(l)) {
                return line;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("no {} notification", what);
    }

    /// Synthetic generator that waits for a release before each clip.
    struct HeldGenerator {
        inner: SyntheticGenerator,
        release: Mutex<Receiver<()>>,
    }

    impl HeldGenerator {
        fn new() -> (Arc<Self>, Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let generator = Self {
                inner: SyntheticGenerator::new(22_050),
                release: Mutex::new(rx),
            };
            (Arc::new(generator), tx)
        }
    }

    impl Generator for HeldGenerator {
        fn name(&self) -> &str {
            "held"
        }

        fn generate(
            &self,
            request: &GenerationRequest,
            on_progress: &mut dyn FnMut(usize, usize),
        ) -> crate::error::Result<AudioBuffer> {
            self.release.lock().unwrap().recv().ok();
            self.inner.generate(request, on_progress)
        }
    }

    fn generate_params(prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "prompt": prompt,
            "bpm": 120,
            "min_duration": 8,
            "max_duration": 10,
            "seed": 11
        })
    }

    #[test]
    fn handle_ping() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path());
        let result = call(&state, "ping", serde_json::Value::Null).unwrap();
        assert_eq!(result["status"], "ok");
        assert_eq!(result["generator"], "synthetic");
    }

    #[test]
    fn handle_unknown_method() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path());
        let err = call(&state, "get_backends", serde_json::Value::Null).unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn handle_generate_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path());
        let err = call(&state, "generate", serde_json::json!({ "prompt": 5 })).unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[test]
    fn handle_generate_empty_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path());
        let err = call(&state, "generate", generate_params("")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt.rpc_code());
    }

    #[test]
    fn handle_status_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path());
        let err = call(&state, "status", serde_json::json!({ "job_id": "nope" })).unwrap_err();
        assert_eq!(err.data.unwrap().error_code, "JOB_NOT_FOUND");
    }

    #[test]
    fn handle_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path());
        let result = call(&state, "shutdown", serde_json::Value::Null).unwrap();
        assert_eq!(result["status"], "shutting_down");
        assert!(state.is_shutdown());
    }

    #[test]
    fn generate_streams_progress_and_writes_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (state, captured) = state(dir.path());
        let result = call(&state, "generate", generate_params("dusty drums")).unwrap();
        let job_id = result["job_id"].as_str().unwrap().to_string();
        assert_eq!(result["seed"], 11);
        assert_eq!(result["loop_id"].as_str().unwrap().len(), 16);

        let complete = wait_for(&captured, "loop_complete", |l| {
            l["method"] == "loop_complete" || l["method"] == "loop_error"
        });
        assert_eq!(complete["method"], "loop_complete", "{}", complete);
        assert_eq!(complete["params"]["job_id"], job_id.as_str());
        let path = complete["params"]["path"].as_str().unwrap();
        assert!(std::path::Path::new(path).exists());
        assert!(path.ends_with(&format!("{}.wav", result["loop_id"].as_str().unwrap())));

        let progress: Vec<_> = captured
            .lines()
            .into_iter()
            .filter(|l| l["method"] == "loop_progress")
            .collect();
        assert_eq!(progress.first().unwrap()["params"]["stage"], "queued");
        assert_eq!(progress.last().unwrap()["params"]["stage"], "completed");

        let status = call(&state, "status", serde_json::json!({ "job_id": job_id })).unwrap();
        assert_eq!(status["state"], "completed");
        assert_eq!(status["path"], path);
        state.finish();
    }

    #[test]
    fn cancelling_queued_job_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, release) = HeldGenerator::new();
        let (state, captured) = state_with(generator, dir.path());

        call(&state, "generate", generate_params("running")).unwrap();
        let queued = call(&state, "generate", generate_params("waiting")).unwrap();
        let job_id = queued["job_id"].as_str().unwrap().to_string();

        let cancelled = call(&state, "cancel", serde_json::json!({ "job_id": job_id })).unwrap();
        assert_eq!(cancelled["state"], "cancelled");

        let error = wait_for(&captured, "loop_error", |l| {
            l["method"] == "loop_error" && l["params"]["job_id"] == job_id.as_str()
        });
        assert_eq!(error["params"]["code"], "CANCELLED");

        release.send(()).unwrap();
        state.finish();
        let status = call(&state, "status", serde_json::json!({ "job_id": job_id })).unwrap();
        assert_eq!(status["state"], "cancelled");
    }
}
