//! Error types for the loopgen-daemon.
//!
//! Engine stages fail with [`LoopError`](crate::engine::LoopError); everything
//! that crosses the daemon boundary (RPC responses, failed jobs, CLI output)
//! is a [`DaemonError`] carrying a stable [`ErrorCode`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::LoopError;

/// Error codes returned by the daemon in error responses and failed jobs.
///
/// These codes are used in JSON-RPC error responses and allow clients
/// to programmatically handle specific error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Prompt text is invalid.
    /// Trigger: Empty prompt or exceeds 1000 characters.
    InvalidPrompt,

    /// Loop constraints are out of range or inconsistent.
    /// Trigger: BPM outside 24-240, durations outside 8-128, min > max.
    InvalidConstraints,

    /// Job queue is at maximum capacity.
    QueueFull,

    /// No job with the given id is known to the orchestrator.
    JobNotFound,

    /// The music model (or the program wrapping it) failed to produce audio.
    UpstreamModelFailed,

    /// Beat/tempo analysis could not produce a usable grid.
    /// Trigger: clip too short for two beats, mostly silent, no clear onsets.
    AnalysisFailed,

    /// No loop window satisfies the duration and tempo-lock constraints.
    NoValidLoopPoint,

    /// Rendering was asked to do something impossible. Indicates a bug.
    RenderFailed,

    /// The job was cancelled by the caller.
    Cancelled,

    /// Reading or writing audio files failed.
    AudioIoFailed,

    /// The daemon is stopping and accepts no new jobs.
    ShuttingDown,
}

/// What a caller should do after a failure with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAdvice {
    /// Submit again with different constraints or prompt.
    ChangeRequest,
    /// Submitting the same request again may succeed.
    RetryAsIs,
    /// Retrying will not help.
    DoNotRetry,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPrompt => "INVALID_PROMPT",
            ErrorCode::InvalidConstraints => "INVALID_CONSTRAINTS",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::UpstreamModelFailed => "UPSTREAM_MODEL_FAILED",
            ErrorCode::AnalysisFailed => "ANALYSIS_FAILED",
            ErrorCode::NoValidLoopPoint => "NO_VALID_LOOP_POINT",
            ErrorCode::RenderFailed => "RENDER_FAILED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::AudioIoFailed => "AUDIO_IO_FAILED",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPrompt => "Prompt must be non-empty and at most 1000 characters",
            ErrorCode::InvalidConstraints => {
                "Tempo must be 24-240 BPM and durations 8-128 seconds with min <= max"
            }
            ErrorCode::QueueFull => "Job queue is at maximum capacity",
            ErrorCode::JobNotFound => "No job with this id",
            ErrorCode::UpstreamModelFailed => "Music model failed to produce audio",
            ErrorCode::AnalysisFailed => "Could not detect a usable beat grid",
            ErrorCode::NoValidLoopPoint => "No loop window satisfies the constraints",
            ErrorCode::RenderFailed => "Loop rendering failed",
            ErrorCode::Cancelled => "Job was cancelled",
            ErrorCode::AudioIoFailed => "Failed to read or write audio",
            ErrorCode::ShuttingDown => "Daemon is shutting down",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPrompt => {
                "Provide a descriptive prompt between 1 and 1000 characters \
                 (e.g., 'dusty boom bap, warm rhodes, vinyl crackle')"
            }
            ErrorCode::InvalidConstraints => {
                "Use bpm between 24 and 240 and min_duration <= max_duration, \
                 both between 8 and 128 seconds"
            }
            ErrorCode::QueueFull => {
                "Wait for pending jobs to finish before submitting new requests"
            }
            ErrorCode::JobNotFound => {
                "Check the job_id; finished jobs are forgotten after the retention limit"
            }
            ErrorCode::UpstreamModelFailed => {
                "Retry the request; if it keeps failing check the generator command \
                 and its logs (LOOPGEN_GENERATOR_COMMAND)"
            }
            ErrorCode::AnalysisFailed => {
                "Generate again with a prompt that has a clear rhythmic pulse, \
                 or request a longer clip"
            }
            ErrorCode::NoValidLoopPoint => {
                "Widen the duration window (min_duration/max_duration) or generate a longer clip"
            }
            ErrorCode::RenderFailed => {
                "This is a bug in loop rendering; please report it with the daemon log"
            }
            ErrorCode::Cancelled => "Submit the request again if the result is still needed",
            ErrorCode::AudioIoFailed => {
                "Check that the output directory exists and is writable (LOOPGEN_OUTPUT_PATH)"
            }
            ErrorCode::ShuttingDown => "Restart the daemon and submit the request again",
        }
    }

    /// Returns whether and how a caller should retry after this error.
    pub fn retry_advice(&self) -> RetryAdvice {
        match self {
            ErrorCode::InvalidPrompt
            | ErrorCode::InvalidConstraints
            | ErrorCode::AnalysisFailed
            | ErrorCode::NoValidLoopPoint => RetryAdvice::ChangeRequest,
            ErrorCode::QueueFull
            | ErrorCode::UpstreamModelFailed
            | ErrorCode::Cancelled
            | ErrorCode::AudioIoFailed => RetryAdvice::RetryAsIs,
            ErrorCode::JobNotFound | ErrorCode::RenderFailed | ErrorCode::ShuttingDown => {
                RetryAdvice::DoNotRetry
            }
        }
    }

    /// Application-defined JSON-RPC error code (-32000 to -32099 range).
    pub fn rpc_code(&self) -> i32 {
        match self {
            ErrorCode::InvalidPrompt => -32000,
            ErrorCode::InvalidConstraints => -32001,
            ErrorCode::QueueFull => -32002,
            ErrorCode::JobNotFound => -32003,
            ErrorCode::UpstreamModelFailed => -32004,
            ErrorCode::AnalysisFailed => -32005,
            ErrorCode::NoValidLoopPoint => -32006,
            ErrorCode::RenderFailed => -32007,
            ErrorCode::Cancelled => -32008,
            ErrorCode::AudioIoFailed => -32009,
            ErrorCode::ShuttingDown => -32010,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for daemon operations.
#[derive(Debug)]
pub struct DaemonError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DaemonError {
    /// Creates a new DaemonError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new DaemonError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an INVALID_PROMPT error for empty prompts.
    pub fn empty_prompt() -> Self {
        Self::new(ErrorCode::InvalidPrompt, "Prompt cannot be empty")
    }

    /// Creates an INVALID_PROMPT error for prompts that are too long.
    pub fn prompt_too_long(len: usize) -> Self {
        Self::new(
            ErrorCode::InvalidPrompt,
            format!("Prompt too long: {} characters (maximum 1000)", len),
        )
    }

    /// Creates an INVALID_CONSTRAINTS error.
    pub fn invalid_constraints(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConstraints, reason)
    }

    /// Creates a QUEUE_FULL error.
    pub fn queue_full(capacity: usize) -> Self {
        Self::new(
            ErrorCode::QueueFull,
            format!("Job queue is full (maximum {} pending jobs)", capacity),
        )
    }

    /// Creates a JOB_NOT_FOUND error.
    pub fn job_not_found(job_id: &str) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Unknown job: {}", job_id))
    }

    /// Creates an UPSTREAM_MODEL_FAILED error.
    pub fn upstream_model_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::UpstreamModelFailed,
            format!("Generation failed: {}", reason.into()),
        )
    }

    /// Creates an AUDIO_IO_FAILED error.
    pub fn audio_io(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::AudioIoFailed, reason)
    }

    /// Creates a SHUTTING_DOWN error.
    pub fn shutting_down() -> Self {
        Self::new(ErrorCode::ShuttingDown, "Daemon is shutting down")
    }

    /// Creates a CANCELLED error.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Job was cancelled")
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<LoopError> for DaemonError {
    fn from(err: LoopError) -> Self {
        let code = match &err {
            LoopError::InvalidConstraints(_) => ErrorCode::InvalidConstraints,
            LoopError::Analysis(_) => ErrorCode::AnalysisFailed,
            LoopError::NoValidLoopPoint(_) => ErrorCode::NoValidLoopPoint,
            LoopError::Render(_) => ErrorCode::RenderFailed,
            LoopError::UpstreamModel(_) => ErrorCode::UpstreamModelFailed,
            LoopError::Cancelled => ErrorCode::Cancelled,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hound::Error> for DaemonError {
    fn from(err: hound::Error) -> Self {
        let message = format!("WAV I/O failed: {}", err);
        Self::with_source(ErrorCode::AudioIoFailed, message, err)
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;
