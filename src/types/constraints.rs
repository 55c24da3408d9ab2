//! Loop constraints supplied with every request.

use serde::{Deserialize, Serialize};

use crate::engine::LoopError;

/// Slowest accepted target tempo.
pub const MIN_BPM: f64 = 24.0;
/// Fastest accepted target tempo.
pub const MAX_BPM: f64 = 240.0;
/// Shortest accepted loop duration bound, in seconds.
pub const MIN_LOOP_SECS: f64 = 8.0;
/// Longest accepted loop duration bound, in seconds.
pub const MAX_LOOP_SECS: f64 = 128.0;

/// Beats of headroom requested from the generator beyond `max_duration`.
const GENERATION_HEADROOM_BEATS: f64 = 4.0;

/// Target tempo, duration window and optional seed for one loop.
///
/// Construct with [`LoopConstraints::new`] to get validation up front; values
/// arriving through serde are checked again by [`LoopConstraints::validate`]
/// before any analysis runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopConstraints {
    /// Target tempo in beats per minute (24-240).
    pub bpm: f64,
    /// Shortest acceptable loop, in seconds (8-128).
    pub min_duration: f64,
    /// Longest acceptable loop, in seconds (8-128, >= `min_duration`).
    pub max_duration: f64,
    /// Seed for generation and candidate tie-breaking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl LoopConstraints {
    /// Creates validated constraints.
    pub fn new(
        bpm: f64,
        min_duration: f64,
        max_duration: f64,
        seed: Option<u64>,
    ) -> Result<Self, LoopError> {
        let constraints = Self {
            bpm,
            min_duration,
            max_duration,
            seed,
        };
        constraints.validate()?;
        Ok(constraints)
    }

    /// Checks ranges and ordering.
    pub fn validate(&self) -> Result<(), LoopError> {
        if !self.bpm.is_finite() || !(MIN_BPM..=MAX_BPM).contains(&self.bpm) {
            return Err(LoopError::InvalidConstraints(format!(
                "bpm {} outside {}-{}",
                self.bpm, MIN_BPM, MAX_BPM
            )));
        }
        for (name, value) in [
            ("min_duration", self.min_duration),
            ("max_duration", self.max_duration),
        ] {
            if !value.is_finite() || !(MIN_LOOP_SECS..=MAX_LOOP_SECS).contains(&value) {
                return Err(LoopError::InvalidConstraints(format!(
                    "{} {}s outside {}-{}s",
                    name, value, MIN_LOOP_SECS, MAX_LOOP_SECS
                )));
            }
        }
        if self.min_duration > self.max_duration {
            return Err(LoopError::InvalidConstraints(format!(
                "min_duration {}s exceeds max_duration {}s",
                self.min_duration, self.max_duration
            )));
        }
        Ok(())
    }

    /// Length of one beat at the target tempo, in seconds.
    pub fn beat_period(&self) -> f64 {
        60.0 / self.bpm
    }

    /// How much audio to ask the generator for.
    ///
    /// A loop of `max_duration` needs a little material on either side of the
    /// seam for the crossfade and for beat tracking to settle.
    pub fn generation_duration(&self) -> f64 {
        self.max_duration + GENERATION_HEADROOM_BEATS * self.beat_period()
    }

    /// Returns a copy with the seed filled in.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }
}
