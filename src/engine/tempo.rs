//! Beat and tempo analysis.
//!
//! Tempo comes from autocorrelation of a spectral flux onset function computed
//! at [`ANALYSIS_SAMPLE_RATE`]. Beats are then tracked along that period,
//! snapping each prediction to the strongest nearby onset, and finally refined
//! to sample accuracy on the full-rate signal.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::onset::{self, OnsetDetector};
use super::silence;
use super::LoopError;
use crate::audio::{resample, ANALYSIS_SAMPLE_RATE};
use crate::types::{AudioBuffer, MAX_BPM, MIN_BPM};

/// Fraction of the beat period searched around each prediction.
const SNAP_WINDOW: f64 = 0.15;
/// Window of the energy rise used for sample-accurate refinement, in seconds.
const REFINE_WINDOW_SECS: f64 = 0.001;

/// What to do when onsets are too weak to track beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridFallback {
    /// Fail with an analysis error.
    Never,
    /// Lay a fixed grid at the hinted (or estimated) tempo.
    #[default]
    WhenUnreliable,
    /// Always use a fixed grid, even when tracking would work.
    Always,
}

impl GridFallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridFallback::Never => "never",
            GridFallback::WhenUnreliable => "when_unreliable",
            GridFallback::Always => "always",
        }
    }

    /// Parses a policy name. Accepts both `when_unreliable` and `when-unreliable`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "never" => Some(GridFallback::Never),
            "when_unreliable" => Some(GridFallback::WhenUnreliable),
            "always" => Some(GridFallback::Always),
            _ => None,
        }
    }
}

impl fmt::Display for GridFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a grid's beat positions were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSource {
    /// Beats follow detected onsets.
    Tracked,
    /// Beats are evenly spaced at a fixed tempo.
    Fixed,
}

/// Beat timestamps plus the tempo estimate they imply.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatGrid {
    beats: Vec<f64>,
    bpm: f64,
    confidence: f32,
    source: GridSource,
}

impl BeatGrid {
    /// Builds a grid, keeping only strictly increasing, non-negative timestamps.
    pub fn new(beats: Vec<f64>, bpm: f64, confidence: f32, source: GridSource) -> Self {
        let mut kept: Vec<f64> = Vec::with_capacity(beats.len());
        for t in beats {
            if t.is_finite() && t >= 0.0 && kept.last().map_or(true, |&last| t > last) {
                kept.push(t);
            }
        }
        Self {
            beats: kept,
            bpm,
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }

    /// Evenly spaced beats from `offset` up to and including `duration`.
    pub fn fixed(bpm: f64, offset: f64, duration: f64, confidence: f32) -> Self {
        let period = 60.0 / bpm;
        let count = ((duration - offset) / period + 1e-9).floor().max(-1.0) as i64 + 1;
        let beats = (0..count.max(0)).map(|k| offset + k as f64 * period).collect();
        Self::new(beats, bpm, confidence, GridSource::Fixed)
    }

    /// Beat timestamps in seconds, strictly increasing.
    pub fn beats(&self) -> &[f64] {
        &self.beats
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn beat_period(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn source(&self) -> GridSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    /// Returns the same grid with every beat moved by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            beats: self.beats.iter().map(|t| t + offset).collect(),
            ..self.clone()
        }
    }
}

/// Tuning for [`TempoAnalyzer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub analysis_rate: u32,
    pub fft_size: usize,
    pub hop_size: usize,
    /// Relative width of the period search around a tempo hint.
    pub hint_tolerance: f64,
    /// Largest silent fraction of the clip that is still analyzed.
    pub max_silence_fraction: f64,
    pub silence_top_db: f32,
    /// Autocorrelation strength below which tracking is considered unreliable.
    pub min_confidence: f32,
    pub fallback: GridFallback,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            analysis_rate: ANALYSIS_SAMPLE_RATE,
            fft_size: 1024,
            hop_size: 256,
            hint_tolerance: 0.05,
            max_silence_fraction: 0.5,
            silence_top_db: silence::DEFAULT_TOP_DB,
            min_confidence: 0.2,
            fallback: GridFallback::WhenUnreliable,
        }
    }
}

/// Period estimate in onset frames.
#[derive(Debug, Clone, Copy)]
struct PeriodEstimate {
    period: f64,
    confidence: f32,
}

pub struct TempoAnalyzer {
    config: TempoConfig,
    detector: OnsetDetector,
}

impl TempoAnalyzer {
    pub fn new(config: TempoConfig) -> Self {
        let detector = OnsetDetector::new(config.fft_size, config.hop_size);
        Self { config, detector }
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    /// Detects beats and tempo, biased towards `hint_bpm` when given.
    pub fn analyze(&self, buffer: &AudioBuffer, hint_bpm: Option<f64>) -> Result<BeatGrid, LoopError> {
        if let Some(hint) = hint_bpm {
            if !hint.is_finite() || hint <= 0.0 {
                return Err(LoopError::Analysis(format!("invalid tempo hint {}", hint)));
            }
        }

        let duration = buffer.duration_secs();
        let needed = 2.0 * 60.0 / hint_bpm.unwrap_or(MIN_BPM);
        if duration < needed {
            return Err(LoopError::Analysis(format!(
                "clip is {:.2}s, need at least {:.2}s for two beats",
                duration, needed
            )));
        }

        let mono = buffer.mono();
        let silent = silence::silent_fraction(&mono, self.config.silence_top_db);
        if silent > self.config.max_silence_fraction {
            return Err(LoopError::Analysis(format!(
                "{:.0}% of the clip is silent (limit {:.0}%)",
                silent * 100.0,
                self.config.max_silence_fraction * 100.0
            )));
        }

        let analysis = resample(&mono, buffer.sample_rate(), self.config.analysis_rate)
            .map_err(|e| LoopError::Analysis(e.message))?;
        let onset_fn = self.detector.onset_function(&analysis);
        let frames_per_second = self.config.analysis_rate as f64 / self.config.hop_size as f64;

        let estimate = self.estimate_period(&onset_fn, frames_per_second, hint_bpm);
        let threshold = onset::peak_threshold(&onset_fn);
        let min_distance = (frames_per_second * 0.05) as usize;
        let peak_count = onset::find_peaks(&onset_fn, threshold, min_distance).len();

        let reliable = estimate
            .map(|e| e.confidence >= self.config.min_confidence)
            .unwrap_or(false)
            && peak_count >= 2;

        debug!(
            duration,
            silent,
            peak_count,
            confidence = estimate.map(|e| e.confidence),
            reliable,
            "onset analysis finished"
        );

        if !reliable || self.config.fallback == GridFallback::Always {
            return self.fixed_grid(duration, hint_bpm, estimate, frames_per_second, reliable);
        }

        // `reliable` implies an estimate exists.
        let Some(estimate) = estimate else {
            return Err(LoopError::Analysis("no tempo estimate".into()));
        };

        let beat_frames = self.track_beats(&onset_fn, estimate.period, threshold);
        let beats = self.refine_beats(&mono, buffer.sample_rate(), &beat_frames);
        let grid_bpm = median_bpm(&beats)
            .unwrap_or(60.0 * frames_per_second / estimate.period);
        let grid = BeatGrid::new(beats, grid_bpm, estimate.confidence, GridSource::Tracked);

        if grid.len() < 2 {
            return self.fixed_grid(duration, hint_bpm, Some(estimate), frames_per_second, false);
        }

        debug!(bpm = grid.bpm(), beats = grid.len(), "beat grid tracked");
        Ok(grid)
    }

    fn fixed_grid(
        &self,
        duration: f64,
        hint_bpm: Option<f64>,
        estimate: Option<PeriodEstimate>,
        frames_per_second: f64,
        reliable: bool,
    ) -> Result<BeatGrid, LoopError> {
        if !reliable && self.config.fallback == GridFallback::Never {
            return Err(LoopError::Analysis(
                "onsets too weak to track a beat grid".into(),
            ));
        }

        let bpm = match (hint_bpm, estimate) {
            (Some(hint), _) => hint,
            (None, Some(e)) => 60.0 * frames_per_second / e.period,
            (None, None) => {
                return Err(LoopError::Analysis(
                    "no tempo hint and no detectable pulse".into(),
                ))
            }
        };

        if !reliable {
            warn!(bpm, "onsets unreliable, falling back to a fixed beat grid");
        }
        let confidence = estimate.map(|e| e.confidence).unwrap_or(0.0);
        Ok(BeatGrid::fixed(bpm, 0.0, duration, confidence))
    }

    /// Finds the beat period in onset frames.
    ///
    /// Correlation runs on a smoothed, mean-removed copy of the onset function
    /// so that a flat or noisy clip scores near zero.
    fn estimate_period(
        &self,
        onset_fn: &[f32],
        frames_per_second: f64,
        hint_bpm: Option<f64>,
    ) -> Option<PeriodEstimate> {
        let lag_for = |bpm: f64| frames_per_second * 60.0 / bpm;
        let (fastest, slowest) = match hint_bpm {
            Some(hint) => (
                hint * (1.0 + self.config.hint_tolerance),
                hint * (1.0 - self.config.hint_tolerance),
            ),
            None => (MAX_BPM, MIN_BPM),
        };

        let min_lag = (lag_for(fastest).floor() as usize).max(1);
        let max_lag = (lag_for(slowest).ceil() as usize).min(onset_fn.len() / 2);
        if min_lag > max_lag {
            return None;
        }

        let novelty = centered(&smoothed(onset_fn));
        let correlations: Vec<f32> = (min_lag..=max_lag)
            .map(|lag| onset::correlation_at_lag(&novelty, lag))
            .collect();
        let best_correlation = correlations.iter().copied().fold(0.0f32, f32::max);
        if best_correlation <= 0.0 {
            return None;
        }

        // Autocorrelation also peaks at multiples of the period, so take the
        // shortest lag whose local peak is nearly as strong as the best one.
        let floor = 0.7 * best_correlation;
        let best_index = (0..correlations.len())
            .find(|&i| {
                let c = correlations[i];
                let left = if i > 0 { correlations[i - 1] } else { f32::MIN };
                let right = correlations.get(i + 1).copied().unwrap_or(f32::MIN);
                c >= floor && c >= left && c >= right
            })
            .unwrap_or(0);
        let best_lag = min_lag + best_index;
        let centre = correlations[best_index];

        let mut period = best_lag as f64;
        if best_lag > 1 {
            let left = onset::correlation_at_lag(&novelty, best_lag - 1);
            let right = onset::correlation_at_lag(&novelty, best_lag + 1);
            if centre >= left && centre >= right {
                period += onset::parabolic_offset(left, centre, right);
            }
        }

        Some(PeriodEstimate {
            period,
            confidence: centre.clamp(0.0, 1.0),
        })
    }

    /// Walks the onset function one period at a time, returning beat positions
    /// as fractional onset-frame indices.
    fn track_beats(&self, onset_fn: &[f32], period: f64, threshold: f32) -> Vec<(f64, bool)> {
        let phase = best_phase(onset_fn, period);
        let radius = SNAP_WINDOW * period;
        let last = onset_fn.len() as f64 - 1.0;

        let mut beats = Vec::new();
        let mut predicted = phase;
        while predicted <= last {
            let lo = (predicted - radius).ceil().max(0.0) as usize;
            let hi = ((predicted + radius).floor().min(last)) as usize;

            let mut best: Option<(usize, f32)> = None;
            for i in lo..=hi {
                if best.map_or(true, |(_, v)| onset_fn[i] > v) {
                    best = Some((i, onset_fn[i]));
                }
            }

            match best {
                Some((i, value)) if value >= threshold => {
                    let left = if i > 0 { onset_fn[i - 1] } else { value };
                    let right = onset_fn.get(i + 1).copied().unwrap_or(value);
                    let position = i as f64 + onset::parabolic_offset(left, value, right);
                    beats.push((position, true));
                    predicted = position + period;
                }
                _ => {
                    beats.push((predicted, false));
                    predicted += period;
                }
            }
        }

        // Predictions are only trusted between two detected onsets.
        while beats.last().is_some_and(|&(_, snapped)| !snapped) {
            beats.pop();
        }
        let leading = beats.iter().take_while(|&&(_, snapped)| !snapped).count();
        beats.drain(..leading);
        beats
    }

    /// Converts onset-frame positions to seconds, moving snapped beats onto the
    /// steepest local energy rise of the full-rate signal.
    fn refine_beats(&self, mono: &[f32], sample_rate: u32, frames: &[(f64, bool)]) -> Vec<f64> {
        let scale = sample_rate as f64 / self.config.analysis_rate as f64;
        let radius = ((self.config.fft_size / 2 + self.config.hop_size) as f64 * scale) as usize;
        let window = ((REFINE_WINDOW_SECS * sample_rate as f64).round() as usize).max(1);
        let energy = EnergyProfile::new(mono);

        frames
            .iter()
            .map(|&(frame, snapped)| {
                let centre = self.detector.frame_center(frame) * scale;
                if !snapped {
                    return centre / sample_rate as f64;
                }
                let centre = centre.round() as usize;
                let lo = centre.saturating_sub(radius);
                let hi = (centre + radius).min(mono.len().saturating_sub(1));
                let sample = energy.steepest_rise(lo, hi, window).unwrap_or(centre);
                sample as f64 / sample_rate as f64
            })
            .collect()
    }
}

/// Comb search for the beat phase: the offset whose period-spaced onset
/// values sum highest.
fn best_phase(onset_fn: &[f32], period: f64) -> f64 {
    let mut best_phase = 0.0;
    let mut best_score = f32::MIN;
    let steps = period.ceil() as usize;
    for phase in 0..steps {
        let mut score = 0.0f32;
        let mut position = phase as f64;
        while (position.round() as usize) < onset_fn.len() {
            score += onset_fn[position.round() as usize];
            position += period;
        }
        if score > best_score {
            best_score = score;
            best_phase = phase as f64;
        }
    }
    best_phase
}

/// Five-tap binomial smoothing.
fn smoothed(values: &[f32]) -> Vec<f32> {
    const KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
    (0..values.len())
        .map(|i| {
            KERNEL
                .iter()
                .enumerate()
                .filter_map(|(k, w)| (i + k).checked_sub(2).and_then(|j| values.get(j)).map(|v| v * w))
                .sum()
        })
        .collect()
}

fn centered(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| v - mean).collect()
}

/// Median inter-beat interval expressed as BPM.
fn median_bpm(beats: &[f64]) -> Option<f64> {
    let mut intervals: Vec<f64> = beats.windows(2).map(|w| w[1] - w[0]).collect();
    if intervals.is_empty() {
        return None;
    }
    intervals.sort_by(|a, b| a.total_cmp(b));
    let median = intervals[intervals.len() / 2];
    (median > 0.0).then(|| 60.0 / median)
}

/// Prefix sums of squared samples for constant-time window energies.
struct EnergyProfile {
    prefix: Vec<f64>,
}

impl EnergyProfile {
    fn new(samples: &[f32]) -> Self {
        let mut prefix = Vec::with_capacity(samples.len() + 1);
        let mut acc = 0.0f64;
        prefix.push(acc);
        for &s in samples {
            acc += (s as f64) * (s as f64);
            prefix.push(acc);
        }
        Self { prefix }
    }

    fn energy(&self, start: usize, end: usize) -> f64 {
        let len = self.prefix.len() - 1;
        let (start, end) = (start.min(len), end.min(len));
        self.prefix[end] - self.prefix[start]
    }

    /// Sample in `[lo, hi]` where energy after it most exceeds energy before it.
    fn steepest_rise(&self, lo: usize, hi: usize, window: usize) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for i in lo..=hi {
            let rise = self.energy(i, i + window) - self.energy(i.saturating_sub(window), i);
            if best.map_or(true, |(_, r)| rise > r) {
                best = Some((i, rise));
            }
        }
        best.map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{click_track, noise};

    fn analyzer() -> TempoAnalyzer {
        TempoAnalyzer::new(TempoConfig::default())
    }

    #[test]
    fn tracks_click_track_at_hint() {
        let buffer = click_track(44100, 120.0, 12.0, 1);
        let grid = analyzer().analyze(&buffer, Some(120.0)).unwrap();

        assert_eq!(grid.source(), GridSource::Tracked);
        assert!((grid.bpm() - 120.0).abs() < 0.5, "bpm {}", grid.bpm());
        assert!(grid.len() >= 20, "only {} beats", grid.len());

        // Every tracked beat sits on the same offset from a click.
        let offsets: Vec<f64> = grid.beats().iter().map(|t| (t * 2.0).fract()).collect();
        for pair in offsets[1..].windows(2) {
            assert!((pair[0] - pair[1]).abs() < 1e-9, "offsets drift: {:?}", pair);
        }
    }

    #[test]
    fn estimates_tempo_without_hint() {
        let buffer = click_track(44100, 100.0, 12.0, 1);
        let grid = analyzer().analyze(&buffer, None).unwrap();
        assert!((grid.bpm() - 100.0).abs() < 2.0, "bpm {}", grid.bpm());
    }

    #[test]
    fn rejects_clip_shorter_than_two_beats() {
        let buffer = click_track(44100, 60.0, 1.5, 1);
        let err = analyzer().analyze(&buffer, Some(60.0)).unwrap_err();
        assert!(matches!(err, LoopError::Analysis(_)));
    }

    #[test]
    fn rejects_mostly_silent_clip() {
        let mut samples = vec![0.0f32; 44100 * 10];
        for s in samples.iter_mut().take(44100 * 2) {
            *s = 0.5;
        }
        let buffer = AudioBuffer::from_mono(samples, 44100).unwrap();
        let err = analyzer().analyze(&buffer, Some(120.0)).unwrap_err();
        assert!(err.to_string().contains("silent"));
    }

    #[test]
    fn unreliable_onsets_fall_back_to_fixed_grid() {
        let config = TempoConfig {
            fallback: GridFallback::WhenUnreliable,
            min_confidence: 1.1,
            ..TempoConfig::default()
        };
        let buffer = noise(44100, 8.0, 3);
        let grid = TempoAnalyzer::new(config).analyze(&buffer, Some(90.0)).unwrap();

        assert_eq!(grid.source(), GridSource::Fixed);
        assert_eq!(grid.bpm(), 90.0);
        assert_eq!(grid.beats()[0], 0.0);
        assert_eq!(grid.len(), 13);
        assert!((grid.beats()[1] - 60.0 / 90.0).abs() < 1e-9);
    }

    #[test]
    fn never_policy_refuses_weak_onsets() {
        let config = TempoConfig {
            fallback: GridFallback::Never,
            min_confidence: 1.1,
            ..TempoConfig::default()
        };
        let buffer = click_track(44100, 120.0, 8.0, 1);
        let err = TempoAnalyzer::new(config)
            .analyze(&buffer, Some(120.0))
            .unwrap_err();
        assert!(matches!(err, LoopError::Analysis(_)));
    }

    #[test]
    fn always_policy_uses_fixed_grid() {
        let config = TempoConfig {
            fallback: GridFallback::Always,
            ..TempoConfig::default()
        };
        let buffer = click_track(44100, 120.0, 8.0, 1);
        let grid = TempoAnalyzer::new(config).analyze(&buffer, Some(120.0)).unwrap();
        assert_eq!(grid.source(), GridSource::Fixed);
        assert_eq!(grid.len(), 17);
    }

    #[test]
    fn fixed_grid_includes_end() {
        let grid = BeatGrid::fixed(120.0, 0.0, 2.0, 0.0);
        assert_eq!(grid.beats(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn grid_drops_non_increasing_beats() {
        let grid = BeatGrid::new(vec![0.0, 0.5, 0.5, 0.4, 1.0], 120.0, 1.0, GridSource::Tracked);
        assert_eq!(grid.beats(), &[0.0, 0.5, 1.0]);
        assert_eq!(grid.shifted(1.0).beats(), &[1.0, 1.5, 2.0]);
    }

    #[test]
    fn fallback_policy_parse() {
        assert_eq!(GridFallback::parse("never"), Some(GridFallback::Never));
        assert_eq!(GridFallback::parse("When-Unreliable"), Some(GridFallback::WhenUnreliable));
        assert_eq!(GridFallback::parse("sometimes"), None);
        assert_eq!(GridFallback::Always.to_string(), "always");
    }
}
