//! Silence measurement on RMS frames.
//!
//! A frame is silent when its RMS sits more than `top_db` below the loudest
//! frame of the clip.

use std::ops::Range;

/// RMS frame length in samples.
pub const FRAME_LENGTH: usize = 2048;
/// RMS hop in samples.
pub const HOP_LENGTH: usize = 512;

/// Default threshold below the clip's peak RMS.
pub const DEFAULT_TOP_DB: f32 = 45.0;

fn frame_rms(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut rms = Vec::with_capacity(samples.len() / HOP_LENGTH + 1);
    let mut start = 0;
    loop {
        let end = (start + FRAME_LENGTH).min(samples.len());
        let frame = &samples[start..end];
        let energy: f32 = frame.iter().map(|s| s * s).sum();
        rms.push((energy / frame.len() as f32).sqrt());
        if end == samples.len() {
            break;
        }
        start += HOP_LENGTH;
    }
    rms
}

fn threshold(rms: &[f32], top_db: f32) -> Option<f32> {
    let peak = rms.iter().copied().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return None;
    }
    Some(peak * 10f32.powf(-top_db / 20.0))
}

/// Fraction of frames that are silent, in `[0, 1]`.
///
/// Digital silence counts as fully silent.
pub fn silent_fraction(samples: &[f32], top_db: f32) -> f64 {
    let rms = frame_rms(samples);
    let Some(threshold) = threshold(&rms, top_db) else {
        return 1.0;
    };
    let silent = rms.iter().filter(|&&r| r < threshold).count();
    silent as f64 / rms.len() as f64
}

/// Sample range left after cutting leading and trailing silence.
///
/// Returns `None` when the whole clip is digital silence. Internal gaps are
/// never removed.
pub fn trim_bounds(samples: &[f32], top_db: f32) -> Option<Range<usize>> {
    let rms = frame_rms(samples);
    let threshold = threshold(&rms, top_db)?;
    let first = rms.iter().position(|&r| r >= threshold)?;
    let last = rms.iter().rposition(|&r| r >= threshold)?;
    let start = first * HOP_LENGTH;
    let end = (last * HOP_LENGTH + FRAME_LENGTH).min(samples.len());
    Some(start..end)
}
