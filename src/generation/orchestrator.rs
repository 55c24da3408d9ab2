//! Job orchestrator: bounded worker lanes over a FIFO queue.
//!
//! All bookkeeping (job table, queue, event logs, subscriber channels) sits
//! behind one mutex. Workers take the lock only to pop a job, publish an
//! event or finalize; generation and every engine stage run outside it.
//!
//! Cancellation of a running job is cooperative: `cancel` raises the job's
//! flag and the worker observes it at the next checkpoint (before the engine
//! starts, at each engine stage, and when finalizing). The flag is always
//! read under the table lock, so a cancel that loses to a completion leaves
//! the terminal state untouched.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::backend::{GenerationRequest, Generator};
use super::queue::{JobQueue, DEFAULT_MAX_QUEUE};
use crate::engine::{EngineStage, LoopError, LoopProcessor};
use crate::error::{DaemonError, ErrorCode, Result};
use crate::types::{FailureReason, Job, JobEvent, JobParams, JobState, ProgressEvent, Stage};

/// Sizing for [`JobOrchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker threads running jobs concurrently.
    pub lanes: usize,
    /// Queued jobs accepted before `submit` refuses with QUEUE_FULL.
    pub max_queue: usize,
    /// Finished jobs kept for `job`/`subscribe` lookups.
    pub retain_jobs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lanes: 1,
            max_queue: DEFAULT_MAX_QUEUE,
            retain_jobs: 64,
        }
    }
}

struct JobEntry {
    job: Job,
    events: Vec<ProgressEvent>,
    subscribers: Vec<Sender<ProgressEvent>>,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct Table {
    jobs: HashMap<String, JobEntry>,
    queue: JobQueue,
    finished: VecDeque<String>,
    retain: usize,
    shutting_down: bool,
}

impl Table {
    /// Appends an event to the job's log and fans it out.
    ///
    /// Subscribers whose receiver is gone are dropped; after a terminal
    /// event every sender is dropped so subscriptions end.
    fn emit(&mut self, job_id: &str, stage: Stage, progress: Option<f32>, detail: impl Into<String>) {
        let Some(entry) = self.jobs.get_mut(job_id) else {
            return;
        };
        let event = ProgressEvent::new(job_id, entry.events.len() as u32, stage, progress, detail);
        entry
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        if stage.is_terminal() {
            entry.subscribers.clear();
        }
        entry.events.push(event);
    }

    /// Applies a state machine event, logging rejected transitions.
    fn apply(&mut self, job_id: &str, event: JobEvent) -> Option<JobState> {
        let entry = self.jobs.get_mut(job_id)?;
        match entry.job.apply(event) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(job_id, %err, "ignored state transition");
                None
            }
        }
    }

    /// Moves a job to a terminal state, emits the terminal event and evicts
    /// the oldest finished jobs beyond the retention limit.
    fn finish(&mut self, job_id: &str, event: JobEvent) {
        let (stage, progress, detail) = match &event {
            JobEvent::ModelFailed(reason) | JobEvent::EngineFailed(reason) => {
                (Stage::Failed, None, reason.to_string())
            }
            JobEvent::EngineSucceeded(result) => (
                Stage::Completed,
                Some(1.0),
                format!("{:.2}s loop, {} beats", result.duration, result.beats),
            ),
            _ => (Stage::Cancelled, None, "cancelled".to_string()),
        };

        if self.apply(job_id, event).is_none() {
            return;
        }
        self.emit(job_id, stage, progress, detail);

        self.finished.push_back(job_id.to_string());
        while self.finished.len() > self.retain.max(1) {
            if let Some(old) = self.finished.pop_front() {
                self.jobs.remove(&old);
                debug!(job_id = %old, "evicted finished job");
            }
        }
    }

    fn cancel_requested(&self, job_id: &str) -> bool {
        self.jobs
            .get(job_id)
            .map(|entry| entry.cancel.load(Ordering::SeqCst))
            .unwrap_or(true)
    }
}

struct Shared {
    table: Mutex<Table>,
    work_ready: Condvar,
    generator: Arc<dyn Generator>,
    engine: Box<dyn LoopProcessor>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Schedules generation plus loop post-processing on a fixed set of lanes.
pub struct JobOrchestrator {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobOrchestrator {
    /// Starts `config.lanes` worker threads.
    pub fn new<P>(generator: Arc<dyn Generator>, engine: P, config: OrchestratorConfig) -> Self
    where
        P: LoopProcessor + 'static,
    {
        let shared = Arc::new(Shared {
            table: Mutex::new(Table {
                queue: JobQueue::new(config.max_queue),
                retain: config.retain_jobs,
                ..Table::default()
            }),
            work_ready: Condvar::new(),
            generator,
            engine: Box::new(engine),
        });

        let workers = (0..config.lanes.max(1))
            .map(|lane| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("loopgen-lane-{}", lane))
                    .spawn(move || worker_loop(lane, &shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    error!(%err, "failed to spawn lane thread");
                    None
                }
            })
            .collect();

        info!(lanes = config.lanes.max(1), max_queue = config.max_queue, "orchestrator started");
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Name of the generator jobs run against.
    pub fn generator_name(&self) -> &str {
        self.shared.generator.name()
    }

    /// Validates `params` and enqueues a new job. Never waits for a lane.
    ///
    /// A missing seed is filled in with a random one so the job is
    /// reproducible from its recorded parameters.
    pub fn submit(&self, mut params: JobParams) -> Result<String> {
        params.validate()?;
        if params.constraints.seed.is_none() {
            params.constraints = params.constraints.with_seed(rand::thread_rng().gen());
        }
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.shared.generator.name().to_string());

        let mut table = self.shared.lock();
        if table.shutting_down {
            return Err(DaemonError::shutting_down());
        }
        if table.queue.is_full() {
            return Err(DaemonError::queue_full(table.queue.capacity()));
        }

        let job = Job::new(params, &model);
        let job_id = job.id.clone();
        let position = table
            .queue
            .add(job_id.clone())
            .map_err(|e| DaemonError::queue_full(e.capacity))?;
        table.jobs.insert(
            job_id.clone(),
            JobEntry {
                job,
                events: Vec::new(),
                subscribers: Vec::new(),
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        table.emit(&job_id, Stage::Queued, None, format!("queue position {}", position));
        drop(table);

        self.shared.work_ready.notify_one();
        info!(job_id = %job_id, position, "job queued");
        Ok(job_id)
    }

    /// Opens an event stream for a job: every event so far, then live ones.
    ///
    /// The stream ends after the job's terminal event.
    pub fn subscribe(&self, job_id: &str) -> Result<Subscription> {
        let mut table = self.shared.lock();
        let entry = table
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| DaemonError::job_not_found(job_id))?;

        let (tx, rx) = mpsc::channel();
        for event in &entry.events {
            // The receiver is alive; it is returned below.
            let _ = tx.send(event.clone());
        }
        if !entry.job.state().is_terminal() {
            entry.subscribers.push(tx);
        }
        Ok(Subscription { rx, done: false })
    }

    /// Requests cancellation.
    ///
    /// Terminal jobs are left alone. Queued jobs are cancelled at once;
    /// running jobs stop at their next checkpoint. Returns the job's state
    /// after the call.
    pub fn cancel(&self, job_id: &str) -> Result<JobState> {
        let mut table = self.shared.lock();
        let entry = table
            .jobs
            .get(job_id)
            .ok_or_else(|| DaemonError::job_not_found(job_id))?;

        match entry.job.state() {
            JobState::Queued => {
                table.queue.remove(job_id);
                table.finish(job_id, JobEvent::Cancel);
                info!(job_id, "queued job cancelled");
                Ok(JobState::Cancelled)
            }
            state if state.is_active() => {
                entry.cancel.store(true, Ordering::SeqCst);
                info!(job_id, %state, "cancellation requested");
                Ok(state)
            }
            state => {
                debug!(job_id, %state, "cancel ignored for finished job");
                Ok(state)
            }
        }
    }

    /// Snapshot of a job, if it is still retained.
    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.shared.lock().jobs.get(job_id).map(|entry| entry.job.clone())
    }

    /// Events emitted so far for a job.
    pub fn events(&self, job_id: &str) -> Option<Vec<ProgressEvent>> {
        self.shared.lock().jobs.get(job_id).map(|entry| entry.events.clone())
    }

    /// Position in the queue (0 = next), or `None` when not queued.
    pub fn queue_position(&self, job_id: &str) -> Option<usize> {
        self.shared.lock().queue.position(job_id)
    }

    /// Number of jobs waiting for a lane.
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Cancels everything still queued, flags running jobs and joins the lanes.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut table = self.shared.lock();
            if !table.shutting_down {
                table.shutting_down = true;
                for job_id in table.queue.drain() {
                    table.finish(&job_id, JobEvent::Cancel);
                }
                for entry in table.jobs.values() {
                    if entry.job.state().is_active() {
                        entry.cancel.store(true, Ordering::SeqCst);
                    }
                }
                info!("orchestrator shutting down");
            }
        }
        self.shared.work_ready.notify_all();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("lane thread panicked");
            }
        }
    }
}

impl Drop for JobOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Live view of one job's events. Iteration blocks until the next event and
/// stops after the terminal one.
pub struct Subscription {
    rx: Receiver<ProgressEvent>,
    done: bool,
}

impl Iterator for Subscription {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(event) => {
                self.done = event.stage.is_terminal();
                Some(event)
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

fn worker_loop(lane: usize, shared: &Shared) {
    debug!(lane, "lane started");
    loop {
        let claimed = {
            let mut table = shared.lock();
            loop {
                if table.shutting_down {
                    debug!(lane, "lane stopped");
                    return;
                }
                if let Some(job_id) = table.queue.pop_next() {
                    break claim(&mut table, job_id);
                }
                table = shared
                    .work_ready
                    .wait(table)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        if let Some((job_id, params)) = claimed {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_job(shared, &job_id, &params)));
            if outcome.is_err() {
                error!(lane, job_id = %job_id, "job panicked");
                fail_panicked(shared, &job_id);
            }
        }
    }
}

/// Fails a job whose run panicked, unless it already reached a terminal state.
fn fail_panicked(shared: &Shared, job_id: &str) {
    let mut table = shared.lock();
    let event = match table.jobs.get(job_id).map(|entry| entry.job.state()) {
        Some(JobState::Generating) => JobEvent::ModelFailed(FailureReason::from(
            DaemonError::upstream_model_failed("generator panicked"),
        )),
        Some(JobState::PostProcessing) => JobEvent::EngineFailed(FailureReason::from(
            DaemonError::new(ErrorCode::RenderFailed, "loop processing panicked"),
        )),
        _ => return,
    };
    table.finish(job_id, event);
}

/// Moves a popped job into Generating. Returns what the lane needs to run it.
fn claim(table: &mut Table, job_id: String) -> Option<(String, JobParams)> {
    table.apply(&job_id, JobEvent::LaneAcquired)?;
    table.emit(&job_id, Stage::Generating, Some(0.0), "generating audio");
    let params = table.jobs.get(&job_id)?.job.params.clone();
    Some((job_id, params))
}

fn run_job(shared: &Shared, job_id: &str, params: &JobParams) {
    info!(job_id, seed = ?params.constraints.seed, "job started");
    let request = GenerationRequest::for_constraints(&params.prompt, &params.constraints);

    let generated = shared.generator.generate(&request, &mut |current, total| {
        if total == 0 {
            return;
        }
        let fraction = current as f32 / total as f32;
        let mut table = shared.lock();
        if table.jobs.get(job_id).is_some_and(|e| e.job.state() == JobState::Generating) {
            table.emit(job_id, Stage::Generating, Some(fraction), format!("{}/{}", current, total));
        }
    });

    let buffer = {
        let mut table = shared.lock();
        if table.cancel_requested(job_id) {
            table.finish(job_id, JobEvent::Cancel);
            info!(job_id, "job cancelled after generation");
            return;
        }
        match generated {
            Ok(buffer) => {
                table.apply(job_id, JobEvent::ModelSucceeded);
                buffer
            }
            Err(err) => {
                warn!(job_id, error = %err, "generation failed");
                table.finish(job_id, JobEvent::ModelFailed(FailureReason::from(err)));
                return;
            }
        }
    };

    let outcome = shared.engine.run(&buffer, &params.constraints, &mut |stage: EngineStage| {
        let mut table = shared.lock();
        if table.cancel_requested(job_id) {
            return false;
        }
        table.emit(job_id, Stage::from(stage), None, stage.as_str());
        true
    });
    drop(buffer);

    let mut table = shared.lock();
    if table.cancel_requested(job_id) {
        table.finish(job_id, JobEvent::Cancel);
        info!(job_id, "job cancelled");
        return;
    }
    match outcome {
        Ok(result) => {
            table.finish(job_id, JobEvent::EngineSucceeded(Arc::new(result)));
            info!(job_id, "job completed");
        }
        Err(LoopError::Cancelled) => table.finish(job_id, JobEvent::Cancel),
        Err(err) => {
            if matches!(err, LoopError::Render(_)) {
                error!(job_id, error = %err, "render defect");
            } else {
                warn!(job_id, error = %err, "loop processing failed");
            }
            table.finish(job_id, JobEvent::EngineFailed(FailureReason::from(DaemonError::from(err))));
        }
    }
}
