//! loopgen-daemon: seamless, tempo-locked loops from generated music.
//!
//! The crate turns a raw generated waveform into a clip that repeats without
//! an audible seam and stays locked to a target tempo, and schedules that
//! work for many clients with live progress and cancellation.
//!
//! # Modules
//!
//! - [`engine`]: Loop Engine (tempo analysis, loop-point search, crossfade)
//! - [`generation`]: Job orchestrator and the generator seam
//! - [`types`]: Core data types (AudioBuffer, LoopConstraints, Job, ProgressEvent)
//! - [`audio`]: WAV I/O and resampling
//! - [`cache`]: Storage for rendered loops
//! - [`rpc`]: JSON-RPC server over stdio
//! - [`config`]: Runtime configuration (DaemonConfig)
//! - [`error`]: Error types and codes (DaemonError, ErrorCode)
//!
//! # Example
//!
//! ```rust,ignore
//! use loopgen_daemon::{
//!     engine::LoopEngine,
//!     types::LoopConstraints,
//! };
//!
//! let constraints = LoopConstraints::new(120.0, 16.0, 32.0, Some(42))?;
//! let result = LoopEngine::default().process(&raw_clip, &constraints)?;
//! println!("{:.2}s loop, {} beats", result.duration, result.beats);
//! ```

pub mod audio;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod rpc;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use config::DaemonConfig;
pub use engine::{LoopEngine, LoopError};
pub use error::{DaemonError, ErrorCode, Result};
pub use generation::{JobOrchestrator, OrchestratorConfig};
pub use types::{AudioBuffer, Job, JobParams, JobState, LoopConstraints, LoopResult, ProgressEvent, Stage};
