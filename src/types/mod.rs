//! Core types for the loopgen-daemon.
//!
//! - [`AudioBuffer`]: immutable planar PCM audio
//! - [`LoopConstraints`]: target tempo, duration window and seed
//! - [`LoopResult`]: a rendered loop plus its metadata
//! - [`Job`]: one request and its lifecycle state
//! - [`ProgressEvent`]: one entry in a job's event stream

mod audio;
mod constraints;
mod job;
mod loop_result;
mod progress;

pub use audio::AudioBuffer;
pub use constraints::{LoopConstraints, MAX_BPM, MAX_LOOP_SECS, MIN_BPM, MIN_LOOP_SECS};
pub use job::{FailureReason, InvalidTransition, Job, JobEvent, JobParams, JobState, MAX_PROMPT_CHARS};
pub use loop_result::{compute_loop_id, LoopMetadata, LoopResult};
pub use progress::{ProgressEvent, Stage};
