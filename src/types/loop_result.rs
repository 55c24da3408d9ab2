//! Finished loop plus the metadata describing where it came from.
//!
//! Loops are identified by a deterministic `loop_id` computed from the
//! request parameters, so identical requests land on the same file name.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::audio::AudioBuffer;
use super::constraints::LoopConstraints;

/// Output of a successful Loop Engine run.
#[derive(Debug, Clone)]
pub struct LoopResult {
    /// Rendered loop, ready for gapless repeat.
    pub buffer: AudioBuffer,
    /// Realized loop duration in seconds.
    pub duration: f64,
    /// Relative deviation of the realized tempo from the target tempo.
    pub tempo_lock_error: f64,
    /// Seed the job ran with.
    pub seed: Option<u64>,
    /// Loop start in the engine's input buffer, in frames.
    pub start_sample: usize,
    /// Loop end (exclusive) in the engine's input buffer, in frames.
    pub end_sample: usize,
    /// Whole beats spanned by the loop.
    pub beats: usize,
    /// Tempo reported by analysis, in BPM.
    pub detected_bpm: f64,
    /// Seam discontinuity score of the chosen candidate (lower is smoother).
    pub discontinuity: f64,
    /// Crossfade length actually applied, in frames.
    pub crossfade_samples: usize,
}

impl LoopResult {
    /// Serializable summary without the audio payload.
    pub fn metadata(&self) -> LoopMetadata {
        LoopMetadata {
            duration_sec: self.duration,
            tempo_lock_error: self.tempo_lock_error,
            seed: self.seed,
            sample_rate: self.buffer.sample_rate(),
            channels: self.buffer.channel_count(),
            start_sample: self.start_sample,
            end_sample: self.end_sample,
            beats: self.beats,
            detected_bpm: self.detected_bpm,
            discontinuity: self.discontinuity,
            crossfade_samples: self.crossfade_samples,
        }
    }
}

/// Wire form of [`LoopResult`] used in notifications and status replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopMetadata {
    pub duration_sec: f64,
    pub tempo_lock_error: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub sample_rate: u32,
    pub channels: usize,
    pub start_sample: usize,
    pub end_sample: usize,
    pub beats: usize,
    pub detected_bpm: f64,
    pub discontinuity: f64,
    pub crossfade_samples: usize,
}

/// Computes a deterministic loop ID from request parameters.
///
/// The loop ID is the first 16 hex characters of the SHA256 hash of:
/// `{prompt}:{seed}:{bpm}:{min_duration}:{max_duration}:{model}`
pub fn compute_loop_id(prompt: &str, constraints: &LoopConstraints, model: &str) -> String {
    let input = format!(
        "{}:{}:{}:{}:{}:{}",
        prompt,
        constraints.seed.unwrap_or_default(),
        constraints.bpm,
        constraints.min_duration,
        constraints.max_duration,
        model
    );
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(seed: u64) -> LoopConstraints {
        LoopConstraints::new(90.0, 16.0, 32.0, Some(seed)).unwrap()
    }

    #[test]
    fn loop_id_deterministic() {
        let id1 = compute_loop_id("boom bap", &constraints(42), "synthetic");
        let id2 = compute_loop_id("boom bap", &constraints(42), "synthetic");
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 16);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn loop_id_varies_with_params() {
        let base = compute_loop_id("boom bap", &constraints(42), "synthetic");
        assert_ne!(base, compute_loop_id("boom bap", &constraints(43), "synthetic"));
        assert_ne!(base, compute_loop_id("jazz", &constraints(42), "synthetic"));
        assert_ne!(base, compute_loop_id("boom bap", &constraints(42), "command"));
    }

    #[test]
    fn metadata_reflects_buffer() {
        let buffer = AudioBuffer::new(vec![vec![0.0; 100], vec![0.0; 100]], 1000).unwrap();
        let result = LoopResult {
            buffer,
            duration: 0.1,
            tempo_lock_error: 0.0,
            seed: None,
            start_sample: 10,
            end_sample: 110,
            beats: 1,
            detected_bpm: 600.0,
            discontinuity: 0.0,
            crossfade_samples: 5,
        };
        let meta = result.metadata();
        assert_eq!(meta.channels, 2);
        assert_eq!(meta.sample_rate, 1000);
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("seed").is_none());
    }
}
