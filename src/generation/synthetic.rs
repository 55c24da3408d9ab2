//! Built-in pattern synthesizer.
//!
//! Stands in for a neural model: a kick on every beat, seeded hi-hats on
//! the off-beats and a quiet two-note pad. Output is stereo at the
//! configured sample rate and fully determined by the request.

use std::f32::consts::TAU;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::backend::{GenerationRequest, Generator};
use crate::error::{DaemonError, Result};
use crate::types::AudioBuffer;

const KICK_DECAY_SECS: f32 = 0.12;
const HAT_DECAY_SECS: f32 = 0.03;
const PAD_GAIN: f32 = 0.08;

pub struct SyntheticGenerator {
    sample_rate: u32,
}

impl SyntheticGenerator {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Pad root frequency, picked from the prompt so different prompts sound different.
    fn pad_root(prompt: &str) -> f32 {
        const ROOTS: [f32; 6] = [110.0, 123.47, 130.81, 146.83, 164.81, 174.61];
        let sum = prompt.bytes().fold(0usize, |acc, b| acc.wrapping_add(b as usize));
        ROOTS[sum % ROOTS.len()]
    }
}

impl Generator for SyntheticGenerator {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<AudioBuffer> {
        if !(request.bpm.is_finite() && request.bpm > 0.0) {
            return Err(DaemonError::upstream_model_failed(format!(
                "synthetic generator cannot render at {} BPM",
                request.bpm
            )));
        }

        let sr = self.sample_rate as f32;
        let total = (request.duration_secs.max(0.0) * self.sample_rate as f64).round() as usize;
        let period = ((60.0 / request.bpm) * self.sample_rate as f64).round().max(1.0) as usize;
        let half = period / 2;
        let root = Self::pad_root(&request.prompt);
        let mut rng = ChaCha8Rng::seed_from_u64(request.seed);

        let seconds = total.div_ceil(self.sample_rate as usize).max(1);
        let mut left = Vec::with_capacity(total);
        let mut right = Vec::with_capacity(total);
        let mut hat_gain = 0.0f32;
        let mut reported = 0;

        for i in 0..total {
            let n = i % period;
            let t = n as f32 / sr;

            let kick = (TAU * (50.0 + 60.0 * (-t * 30.0).exp()) * t).sin()
                * (-t / KICK_DECAY_SECS).exp()
                * 0.7;

            if n == half {
                hat_gain = rng.gen_range(0.1..0.3);
            }
            let hat = if n >= half {
                let th = (n - half) as f32 / sr;
                rng.gen_range(-1.0f32..1.0) * hat_gain * (-th / HAT_DECAY_SECS).exp()
            } else {
                0.0
            };

            let abs_t = i as f32 / sr;
            let pad = ((TAU * root * abs_t).sin() + (TAU * root * 1.5 * abs_t).sin()) * PAD_GAIN;

            left.push(kick + hat * 0.8 + pad);
            right.push(kick + hat + pad * 0.9);

            let second = i / self.sample_rate as usize;
            if second > reported {
                reported = second;
                on_progress(reported, seconds);
            }
        }
        on_progress(seconds, seconds);

        debug!(
            frames = total,
            bpm = request.bpm,
            seed = request.seed,
            "synthetic clip rendered"
        );

        AudioBuffer::new(vec![left, right], self.sample_rate).map_err(DaemonError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(seed: u64) -> GenerationRequest {
        GenerationRequest {
            prompt: "dusty lofi drums".to_string(),
            bpm: 120.0,
            duration_secs: 4.0,
            seed,
        }
    }

    #[test]
    fn renders_requested_length_in_stereo() {
        let generator = SyntheticGenerator::new(32_000);
        let buffer = generator.generate(&request(1), &mut |_, _| {}).unwrap();
        assert_eq!(buffer.len(), 128_000);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.sample_rate(), 32_000);
        assert!(buffer.channels()[0].iter().all(|s| s.is_finite() && s.abs() <= 1.5));
    }

    #[test]
    fn same_seed_same_audio() {
        let generator = SyntheticGenerator::new(16_000);
        let a = generator.generate(&request(9), &mut |_, _| {}).unwrap();
        let b = generator.generate(&request(9), &mut |_, _| {}).unwrap();
        let c = generator.generate(&request(10), &mut |_, _| {}).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn progress_reaches_total() {
        let generator = SyntheticGenerator::new(8_000);
        let mut calls = Vec::new();
        generator
            .generate(&request(0), &mut |current, total| calls.push((current, total)))
            .unwrap();
        assert_eq!(calls.last(), Some(&(4, 4)));
        assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn rejects_non_positive_tempo() {
        let generator = SyntheticGenerator::new(8_000);
        let mut bad = request(0);
        bad.bpm = 0.0;
        let err = generator.generate(&bad, &mut |_, _| {}).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UpstreamModelFailed);
    }
}
