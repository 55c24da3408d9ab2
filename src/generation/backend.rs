//! Generator abstraction for the music model seam.
//!
//! The orchestrator only needs "prompt and tempo in, PCM out". Concrete
//! generators are selected by [`GeneratorKind`]:
//! - **Synthetic**: built-in drum-and-pad pattern, deterministic per seed
//! - **Command**: external program (e.g. a MusicGen script) writing a WAV file

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::command::CommandGenerator;
use super::synthetic::SyntheticGenerator;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::types::{AudioBuffer, LoopConstraints};

/// Available generator implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    /// Built-in pattern synthesizer. Needs no model files.
    #[default]
    Synthetic,

    /// External program invoked once per job.
    Command,
}

impl GeneratorKind {
    /// Returns the string representation of the generator kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorKind::Synthetic => "synthetic",
            GeneratorKind::Command => "command",
        }
    }

    /// Parses a generator kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "synthetic" | "synth" => Some(GeneratorKind::Synthetic),
            "command" | "cmd" | "external" => Some(GeneratorKind::Command),
            _ => None,
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the generator is asked to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Target tempo in BPM.
    pub bpm: f64,
    /// Requested clip length in seconds.
    pub duration_secs: f64,
    pub seed: u64,
}

impl GenerationRequest {
    /// Builds a request covering the constraints' duration window plus headroom.
    pub fn for_constraints(prompt: &str, constraints: &LoopConstraints) -> Self {
        Self {
            prompt: prompt.to_string(),
            bpm: constraints.bpm,
            duration_secs: constraints.generation_duration(),
            seed: constraints.seed.unwrap_or_default(),
        }
    }
}

/// A text-to-music model behind a uniform interface.
pub trait Generator: Send + Sync {
    /// Identifier used in logs and loop ids.
    fn name(&self) -> &str;

    /// Produces raw audio for `request`.
    ///
    /// `on_progress(current, total)` may be called any number of times.
    /// Failures should use [`ErrorCode::UpstreamModelFailed`](crate::error::ErrorCode).
    fn generate(
        &self,
        request: &GenerationRequest,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<AudioBuffer>;
}

/// Creates the generator selected by `kind`.
pub fn create_generator(kind: GeneratorKind, config: &DaemonConfig) -> Result<Arc<dyn Generator>> {
    match kind {
        GeneratorKind::Synthetic => Ok(Arc::new(SyntheticGenerator::new(config.sample_rate))),
        GeneratorKind::Command => {
            let command = config.generator_command.as_deref().ok_or_else(|| {
                DaemonError::upstream_model_failed(
                    "command generator selected but LOOPGEN_GENERATOR_COMMAND is not set",
                )
            })?;
            Ok(Arc::new(CommandGenerator::parse(command)?))
        }
    }
}
