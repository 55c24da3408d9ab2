//! Audio resampling utilities.
//!
//! Tempo analysis runs at a fixed rate regardless of what the model produced,
//! so mono mixdowns are brought to [`ANALYSIS_SAMPLE_RATE`] first.

use rubato::{FftFixedIn, Resampler};

use crate::error::{DaemonError, Result};

/// Sample rate used for onset analysis.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22050;

/// Resamples mono audio from one sample rate to another.
///
/// The resampler's output delay is removed so that sample `n` of the output
/// lines up with time `n / to_rate` of the input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        1024,
        2,
        1, // mono
    )
    .map_err(|e| DaemonError::audio_io(format!("Failed to create resampler: {}", e)))?;

    let delay = resampler.output_delay();
    let expected_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let mut output = Vec::with_capacity(expected_len + delay);

    let input_frames = resampler.input_frames_next();
    let mut position = 0;

    // Keep feeding silence until the delayed tail has been flushed out.
    while output.len() < expected_len + delay {
        let end = (position + input_frames).min(samples.len());
        let mut chunk = if position < samples.len() {
            samples[position..end].to_vec()
        } else {
            Vec::new()
        };
        chunk.resize(input_frames, 0.0);

        let input = vec![chunk];
        let resampled = resampler
            .process(&input, None)
            .map_err(|e| DaemonError::audio_io(format!("Resampling failed: {}", e)))?;

        output.extend_from_slice(&resampled[0]);
        position += input_frames;
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected_len);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_returns_copy() {
        let samples = vec![0.0, 0.5, 1.0, 0.5, 0.0];
        let result = resample(&samples, 44100, 44100).unwrap();
        assert_eq!(result, samples);
    }

    #[test]
    fn downsample_to_analysis_rate_halves_length() {
        let samples: Vec<f32> = (0..44100)
            .map(|i| (i as f32 / 44100.0 * 2.0 * std::f32::consts::PI * 5.0).sin())
            .collect();

        let result = resample(&samples, 44100, ANALYSIS_SAMPLE_RATE).unwrap();
        assert_eq!(result.len(), 22050);
    }

    #[test]
    fn output_is_time_aligned() {
        // A single impulse at 0.5 s should come out near 0.5 s.
        let mut samples = vec![0.0f32; 48000];
        samples[24000] = 1.0;

        let result = resample(&samples, 48000, ANALYSIS_SAMPLE_RATE).unwrap();
        let peak = result
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        let expected = ANALYSIS_SAMPLE_RATE as usize / 2;
        assert!(
            peak.abs_diff(expected) <= 8,
            "impulse landed at {}, expected ~{}",
            peak,
            expected
        );
    }

    #[test]
    fn empty_input() {
        let result = resample(&[], 44100, ANALYSIS_SAMPLE_RATE).unwrap();
        assert!(result.is_empty());
    }
}
