//! Spectral flux onset detection.
//!
//! The onset function measures the half-wave rectified change in magnitude
//! spectrum between consecutive frames. Transients (kicks, snares) cause large
//! positive flux values. Value `j` describes the frame starting at
//! `(j + 1) * hop_size`.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

pub struct OnsetDetector {
    fft_size: usize,
    hop_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl OnsetDetector {
    pub fn new(fft_size: usize, hop_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Pre-compute Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Self {
            fft_size,
            hop_size,
            fft,
            window,
        }
    }

    /// Sample offset of the centre of the frame behind onset value `index`.
    pub fn frame_center(&self, index: f64) -> f64 {
        (index + 1.0) * self.hop_size as f64 + self.fft_size as f64 / 2.0
    }

    /// Computes the onset function, normalized so its maximum is 1.
    pub fn onset_function(&self, mono: &[f32]) -> Vec<f32> {
        let mut onset_fn = Vec::new();
        let mut prev_spectrum: Option<Vec<f32>> = None;
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.fft_size];

        let mut frame_start = 0;
        while frame_start + self.fft_size <= mono.len() {
            let frame = &mono[frame_start..frame_start + self.fft_size];
            for ((slot, s), w) in buffer.iter_mut().zip(frame).zip(&self.window) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process(&mut buffer);

            let spectrum: Vec<f32> = buffer[..self.fft_size / 2]
                .iter()
                .map(|c| c.norm())
                .collect();

            if let Some(ref prev) = prev_spectrum {
                let flux: f32 = spectrum
                    .iter()
                    .zip(prev.iter())
                    .map(|(curr, prev)| (curr - prev).max(0.0))
                    .sum();
                onset_fn.push(flux);
            }

            prev_spectrum = Some(spectrum);
            frame_start += self.hop_size;
        }

        let max = onset_fn.iter().cloned().fold(0.0f32, f32::max);
        if max > 0.0 {
            for v in &mut onset_fn {
                *v /= max;
            }
        }

        onset_fn
    }
}

/// Adaptive peak threshold: mean + 0.5 * std_dev, never below 0.1.
pub fn peak_threshold(onset_fn: &[f32]) -> f32 {
    if onset_fn.is_empty() {
        return 0.1;
    }
    let mean: f32 = onset_fn.iter().sum::<f32>() / onset_fn.len() as f32;
    let variance: f32 =
        onset_fn.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / onset_fn.len() as f32;
    (mean + 0.5 * variance.sqrt()).max(0.1)
}

/// Local maxima above `threshold`, at least `min_distance` values apart.
pub fn find_peaks(onset_fn: &[f32], threshold: f32, min_distance: usize) -> Vec<usize> {
    let min_distance = min_distance.max(1) as isize;
    let mut peaks = Vec::new();
    let mut last_peak: isize = -min_distance;

    for i in 1..onset_fn.len().saturating_sub(1) {
        if onset_fn[i] > threshold
            && onset_fn[i] > onset_fn[i - 1]
            && onset_fn[i] >= onset_fn[i + 1]
            && (i as isize - last_peak) >= min_distance
        {
            peaks.push(i);
            last_peak = i as isize;
        }
    }

    peaks
}

/// Normalized autocorrelation of the onset function at an integer lag.
pub fn correlation_at_lag(onset_fn: &[f32], lag: usize) -> f32 {
    if lag == 0 || lag >= onset_fn.len() {
        return 0.0;
    }

    let mut correlation: f32 = 0.0;
    let mut norm_a: f32 = 0.0;
    let mut norm_b: f32 = 0.0;

    for i in 0..(onset_fn.len() - lag) {
        correlation += onset_fn[i] * onset_fn[i + lag];
        norm_a += onset_fn[i] * onset_fn[i];
        norm_b += onset_fn[i + lag] * onset_fn[i + lag];
    }

    let norm = (norm_a * norm_b).sqrt();
    if norm > 0.0 {
        correlation / norm
    } else {
        0.0
    }
}

/// Sub-frame offset of a peak from its neighbours, in `[-0.5, 0.5]`.
pub fn parabolic_offset(left: f32, centre: f32, right: f32) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5) as f64
}
