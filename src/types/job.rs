//! Job lifecycle for loop requests.
//!
//! A Job tracks one request from submission through completion. State only
//! moves through [`Job::apply`], which enforces the transition table:
//!
//! | from           | event            | to             |
//! |----------------|------------------|----------------|
//! | Queued         | LaneAcquired     | Generating     |
//! | Queued         | Cancel           | Cancelled      |
//! | Generating     | ModelSucceeded   | PostProcessing |
//! | Generating     | ModelFailed      | Failed         |
//! | Generating     | Cancel           | Cancelled      |
//! | PostProcessing | EngineSucceeded  | Completed      |
//! | PostProcessing | EngineFailed     | Failed         |
//! | PostProcessing | Cancel           | Cancelled      |
//!
//! Completed, Failed and Cancelled accept nothing.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::constraints::LoopConstraints;
use super::loop_result::{compute_loop_id, LoopResult};
use crate::error::{DaemonError, ErrorCode, Result};

/// Maximum prompt length in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, waiting for a free lane.
    Queued,
    /// Holding a lane, waiting on the music model.
    Generating,
    /// Model audio received, Loop Engine running.
    PostProcessing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Returns true if the job currently holds a lane.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Generating | JobState::PostProcessing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Generating => "generating",
            JobState::PostProcessing => "post_processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&DaemonError> for FailureReason {
    fn from(err: &DaemonError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<DaemonError> for FailureReason {
    fn from(err: DaemonError) -> Self {
        Self::from(&err)
    }
}

/// Inputs that drive a job's state machine.
#[derive(Debug, Clone)]
pub enum JobEvent {
    LaneAcquired,
    ModelSucceeded,
    ModelFailed(FailureReason),
    EngineSucceeded(Arc<LoopResult>),
    EngineFailed(FailureReason),
    Cancel,
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            JobEvent::LaneAcquired => "lane_acquired",
            JobEvent::ModelSucceeded => "model_succeeded",
            JobEvent::ModelFailed(_) => "model_failed",
            JobEvent::EngineSucceeded(_) => "engine_succeeded",
            JobEvent::EngineFailed(_) => "engine_failed",
            JobEvent::Cancel => "cancel",
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobState,
    pub event: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {} not allowed in state {}", self.event, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    /// Text description of the desired music (1-1000 characters).
    pub prompt: String,
    pub constraints: LoopConstraints,
    /// Generator selection; `None` uses the daemon default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl JobParams {
    pub fn new(prompt: impl Into<String>, constraints: LoopConstraints) -> Self {
        Self {
            prompt: prompt.into(),
            constraints,
            model: None,
        }
    }

    /// Validates the prompt and constraints.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(DaemonError::empty_prompt());
        }
        let chars = self.prompt.chars().count();
        if chars > MAX_PROMPT_CHARS {
            return Err(DaemonError::prompt_too_long(chars));
        }
        self.constraints.validate()?;
        Ok(())
    }
}

/// One loop request, tracked from submission through completion.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier (UUID v4 format).
    pub id: String,
    /// Deterministic id of the loop this job produces.
    pub loop_id: String,
    pub params: JobParams,
    state: JobState,
    result: Option<Arc<LoopResult>>,
    failure: Option<FailureReason>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl Job {
    /// Creates a new Queued job.
    ///
    /// `params` should already carry a seed; the loop id is derived from it.
    pub fn new(params: JobParams, model: &str) -> Self {
        let loop_id = compute_loop_id(&params.prompt, &params.constraints, model);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            loop_id,
            params,
            state: JobState::Queued,
            result: None,
            failure: None,
            created_at: SystemTime::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Present iff the job is Completed.
    pub fn result(&self) -> Option<&Arc<LoopResult>> {
        self.result.as_ref()
    }

    /// Present iff the job is Failed.
    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    /// Applies one event, returning the new state.
    pub fn apply(&mut self, event: JobEvent) -> std::result::Result<JobState, InvalidTransition> {
        let next = match (self.state, &event) {
            (JobState::Queued, JobEvent::LaneAcquired) => JobState::Generating,
            (JobState::Generating, JobEvent::ModelSucceeded) => JobState::PostProcessing,
            (JobState::Generating, JobEvent::ModelFailed(_)) => JobState::Failed,
            (JobState::PostProcessing, JobEvent::EngineSucceeded(_)) => JobState::Completed,
            (JobState::PostProcessing, JobEvent::EngineFailed(_)) => JobState::Failed,
            (state, JobEvent::Cancel) if !state.is_terminal() => JobState::Cancelled,
            (from, event) => {
                return Err(InvalidTransition {
                    from,
                    event: event.name(),
                })
            }
        };

        match event {
            JobEvent::LaneAcquired => self.started_at = Some(SystemTime::now()),
            JobEvent::ModelFailed(reason) | JobEvent::EngineFailed(reason) => {
                self.failure = Some(reason)
            }
            JobEvent::EngineSucceeded(result) => self.result = Some(result),
            JobEvent::ModelSucceeded | JobEvent::Cancel => {}
        }
        if next.is_terminal() {
            self.finished_at = Some(SystemTime::now());
        }
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioBuffer;

    fn job() -> Job {
        let constraints = LoopConstraints::new(120.0, 16.0, 32.0, Some(7)).unwrap();
        Job::new(JobParams::new("lofi", constraints), "synthetic")
    }

    fn result() -> Arc<LoopResult> {
        Arc::new(LoopResult {
            buffer: AudioBuffer::from_mono(vec![0.0; 8], 8).unwrap(),
            duration: 1.0,
            tempo_lock_error: 0.0,
            seed: Some(7),
            start_sample: 0,
            end_sample: 8,
            beats: 2,
            detected_bpm: 120.0,
            discontinuity: 0.0,
            crossfade_samples: 0,
        })
    }

    fn failure() -> FailureReason {
        FailureReason {
            code: ErrorCode::AnalysisFailed,
            message: "silent".into(),
        }
    }

    #[test]
    fn happy_path() {
        let mut job = job();
        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.apply(JobEvent::LaneAcquired), Ok(JobState::Generating));
        assert!(job.started_at.is_some());
        assert_eq!(job.apply(JobEvent::ModelSucceeded), Ok(JobState::PostProcessing));
        assert_eq!(
            job.apply(JobEvent::EngineSucceeded(result())),
            Ok(JobState::Completed)
        );
        assert!(job.result().is_some());
        assert!(job.failure().is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn failure_paths_record_reason() {
        let mut job = job();
        job.apply(JobEvent::LaneAcquired).unwrap();
        assert_eq!(job.apply(JobEvent::ModelFailed(failure())), Ok(JobState::Failed));
        assert_eq!(job.failure(), Some(&failure()));
        assert!(job.result().is_none());

        let mut job = self::job();
        job.apply(JobEvent::LaneAcquired).unwrap();
        job.apply(JobEvent::ModelSucceeded).unwrap();
        assert_eq!(job.apply(JobEvent::EngineFailed(failure())), Ok(JobState::Failed));
    }

    #[test]
    fn cancel_from_every_live_state() {
        let mut queued = job();
        assert_eq!(queued.apply(JobEvent::Cancel), Ok(JobState::Cancelled));

        let mut generating = job();
        generating.apply(JobEvent::LaneAcquired).unwrap();
        assert_eq!(generating.apply(JobEvent::Cancel), Ok(JobState::Cancelled));

        let mut post = job();
        post.apply(JobEvent::LaneAcquired).unwrap();
        post.apply(JobEvent::ModelSucceeded).unwrap();
        assert_eq!(post.apply(JobEvent::Cancel), Ok(JobState::Cancelled));
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut job = job();
        job.apply(JobEvent::Cancel).unwrap();
        let err = job.apply(JobEvent::LaneAcquired).unwrap_err();
        assert_eq!(err.from, JobState::Cancelled);
        assert!(job.apply(JobEvent::Cancel).is_err());
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut job = job();
        assert!(job.apply(JobEvent::ModelSucceeded).is_err());
        assert!(job.apply(JobEvent::EngineSucceeded(result())).is_err());
        assert_eq!(job.state(), JobState::Queued);
    }

    #[test]
    fn params_validation() {
        let constraints = LoopConstraints::new(120.0, 16.0, 32.0, None).unwrap();
        assert!(JobParams::new("lofi", constraints).validate().is_ok());

        let err = JobParams::new("   ", constraints).validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt);

        let err = JobParams::new("x".repeat(1001), constraints).validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt);

        let bad = LoopConstraints {
            min_duration: 64.0,
            max_duration: 32.0,
            ..constraints
        };
        let err = JobParams::new("lofi", bad).validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConstraints);
    }

    #[test]
    fn job_ids_are_uuids() {
        let a = job();
        let b = job();
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
        assert_eq!(a.loop_id, b.loop_id);
    }
}
