//! Loop Engine: turns a generated clip into a seamless, tempo-locked loop.
//!
//! The engine runs three stages in order:
//!
//! 1. **Analyzing**: [`TempoAnalyzer`] finds beats and tempo
//! 2. **SearchingLoopPoint**: [`LoopPointSearch`] picks the smoothest beat pair
//! 3. **Rendering**: [`Crossfader`] cuts the loop and blends the seam
//!
//! A [`StageListener`] hears about each stage as it starts and can stop the
//! run there. A failing stage aborts the run; no partial result is returned.

pub mod crossfade;
mod onset;
pub mod search;
pub mod silence;
pub mod tempo;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{AudioBuffer, LoopConstraints, LoopResult};

pub use crossfade::{CrossfadeConfig, Crossfader, FadeCurve, Rendered, SeamMode};
pub use search::{LoopCandidate, LoopPointSearch, SearchConfig};
pub use tempo::{BeatGrid, GridFallback, GridSource, TempoAnalyzer, TempoConfig};

/// Failures of a Loop Engine run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoopError {
    #[error("invalid constraints: {0}")]
    InvalidConstraints(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("no valid loop point: {0}")]
    NoValidLoopPoint(String),

    /// Contract violation inside rendering; indicates a bug.
    #[error("render failed: {0}")]
    Render(String),

    #[error("upstream model failed: {0}")]
    UpstreamModel(String),

    #[error("cancelled")]
    Cancelled,
}

/// Engine stage announced to a [`StageListener`] on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStage {
    Analyzing,
    SearchingLoopPoint,
    Rendering,
}

impl EngineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStage::Analyzing => "analyzing",
            EngineStage::SearchingLoopPoint => "searching_loop_point",
            EngineStage::Rendering => "rendering",
        }
    }
}

impl fmt::Display for EngineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of engine progress, doubling as the cancellation checkpoint.
pub trait StageListener {
    /// Called once on entry to each stage. Returning `false` stops the run
    /// with [`LoopError::Cancelled`].
    fn on_stage(&mut self, stage: EngineStage) -> bool;
}

impl<F> StageListener for F
where
    F: FnMut(EngineStage) -> bool,
{
    fn on_stage(&mut self, stage: EngineStage) -> bool {
        self(stage)
    }
}

/// Post-processing a lane applies to each generated clip.
pub trait LoopProcessor: Send + Sync {
    fn run(
        &self,
        buffer: &AudioBuffer,
        constraints: &LoopConstraints,
        listener: &mut dyn StageListener,
    ) -> Result<LoopResult, LoopError>;
}

impl LoopProcessor for LoopEngine {
    fn run(
        &self,
        buffer: &AudioBuffer,
        constraints: &LoopConstraints,
        listener: &mut dyn StageListener,
    ) -> Result<LoopResult, LoopError> {
        LoopEngine::run(self, buffer, constraints, listener)
    }
}

/// Settings for all three engine stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tempo: TempoConfig,
    pub search: SearchConfig,
    pub crossfade: CrossfadeConfig,
    /// Cut leading and trailing silence before analysis.
    pub trim_silence: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tempo: TempoConfig::default(),
            search: SearchConfig::default(),
            crossfade: CrossfadeConfig::default(),
            trim_silence: true,
        }
    }
}

/// Stateless composition of analysis, search and rendering.
pub struct LoopEngine {
    analyzer: TempoAnalyzer,
    search: LoopPointSearch,
    crossfader: Crossfader,
    trim_silence: bool,
}

impl LoopEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            analyzer: TempoAnalyzer::new(config.tempo),
            search: LoopPointSearch::new(config.search),
            crossfader: Crossfader::new(config.crossfade),
            trim_silence: config.trim_silence,
        }
    }

    /// Runs the engine with no listener.
    pub fn process(&self, buffer: &AudioBuffer, constraints: &LoopConstraints) -> Result<LoopResult, LoopError> {
        self.run(buffer, constraints, &mut |_: EngineStage| true)
    }

    /// Runs all stages, announcing each to `listener` before it starts.
    ///
    /// Loop positions in the result refer to `buffer` as given, even when
    /// edge silence was trimmed for analysis.
    pub fn run(
        &self,
        buffer: &AudioBuffer,
        constraints: &LoopConstraints,
        listener: &mut dyn StageListener,
    ) -> Result<LoopResult, LoopError> {
        constraints.validate()?;
        if buffer.duration_secs() < constraints.min_duration {
            return Err(LoopError::NoValidLoopPoint(format!(
                "clip is {:.2}s, shorter than min_duration {:.2}s",
                buffer.duration_secs(),
                constraints.min_duration
            )));
        }

        enter(listener, EngineStage::Analyzing)?;
        let lead = self.lead_in(buffer, constraints)?;
        let grid = if lead.start == 0 && lead.end == buffer.len() {
            self.analyzer.analyze(buffer, Some(constraints.bpm))?
        } else {
            let trimmed = buffer.slice(lead.clone())?;
            self.analyzer
                .analyze(&trimmed, Some(constraints.bpm))?
                .shifted(lead.start as f64 / buffer.sample_rate() as f64)
        };
        debug!(
            bpm = grid.bpm(),
            beats = grid.len(),
            source = ?grid.source(),
            "analysis complete"
        );

        enter(listener, EngineStage::SearchingLoopPoint)?;
        let candidate = self.search.search(buffer, &grid, constraints)?;

        enter(listener, EngineStage::Rendering)?;
        let rendered = self.crossfader.render(buffer, &candidate)?;

        let duration = candidate.duration_secs(buffer.sample_rate());
        info!(
            duration,
            beats = candidate.beats,
            tempo_lock_error = candidate.tempo_lock_error,
            discontinuity = candidate.discontinuity,
            "loop rendered"
        );

        Ok(LoopResult {
            buffer: rendered.buffer,
            duration,
            tempo_lock_error: candidate.tempo_lock_error,
            seed: constraints.seed,
            start_sample: candidate.start_sample,
            end_sample: candidate.end_sample,
            beats: candidate.beats,
            detected_bpm: grid.bpm(),
            discontinuity: candidate.discontinuity,
            crossfade_samples: rendered.crossfade_samples,
        })
    }

    /// Frame range left after trimming edge silence.
    fn lead_in(
        &self,
        buffer: &AudioBuffer,
        constraints: &LoopConstraints,
    ) -> Result<std::ops::Range<usize>, LoopError> {
        if !self.trim_silence {
            return Ok(0..buffer.len());
        }
        let top_db = self.analyzer.config().silence_top_db;
        let range = silence::trim_bounds(&buffer.mono(), top_db)
            .ok_or_else(|| LoopError::Analysis("clip is silent".into()))?;

        let kept = (range.end - range.start) as f64 / buffer.sample_rate() as f64;
        if kept < constraints.min_duration {
            return Err(LoopError::NoValidLoopPoint(format!(
                "only {:.2}s of non-silent audio, shorter than min_duration {:.2}s",
                kept, constraints.min_duration
            )));
        }
        Ok(range)
    }
}

impl Default for LoopEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn enter(listener: &mut dyn StageListener, stage: EngineStage) -> Result<(), LoopError> {
    debug!(%stage, "entering stage");
    if listener.on_stage(stage) {
        Ok(())
    } else {
        Err(LoopError::Cancelled)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::click_track;
    use super::*;

    fn constraints(bpm: f64, min: f64, max: f64) -> LoopConstraints {
        LoopConstraints::new(bpm, min, max, Some(42)).unwrap()
    }

    #[test]
    fn click_track_loops_on_whole_beats() {
        let buffer = click_track(44100, 120.0, 50.0, 2);
        let result = LoopEngine::default()
            .process(&buffer, &constraints(120.0, 40.0, 60.0))
            .unwrap();

        assert!((40.0..=60.0).contains(&result.duration), "duration {}", result.duration);
        let half_beats = result.duration * 2.0;
        assert!((half_beats - half_beats.round()).abs() < 1e-9, "duration {}", result.duration);
        assert!(result.discontinuity < 1e-6, "discontinuity {}", result.discontinuity);
        assert!(result.tempo_lock_error < 1e-6);
        assert_eq!(result.buffer.len(), result.end_sample - result.start_sample);
        assert_eq!(result.buffer.channel_count(), 2);
        assert!((result.detected_bpm - 120.0).abs() < 0.5);
        assert_eq!(result.seed, Some(42));
    }

    #[test]
    fn short_clip_has_no_loop_point() {
        let buffer = click_track(44100, 120.0, 10.0, 1);
        let err = LoopEngine::default()
            .process(&buffer, &constraints(120.0, 40.0, 60.0))
            .unwrap_err();
        assert!(matches!(err, LoopError::NoValidLoopPoint(_)));
    }

    #[test]
    fn min_above_max_rejected_before_analysis() {
        let buffer = click_track(44100, 120.0, 50.0, 1);
        let bad = LoopConstraints {
            bpm: 120.0,
            min_duration: 40.0,
            max_duration: 20.0,
            seed: None,
        };
        let mut stages = Vec::new();
        let err = LoopEngine::default()
            .run(&buffer, &bad, &mut |stage: EngineStage| {
                stages.push(stage);
                true
            })
            .unwrap_err();
        assert!(matches!(err, LoopError::InvalidConstraints(_)));
        assert!(stages.is_empty());
    }

    #[test]
    fn stages_announced_in_order() {
        let buffer = click_track(44100, 120.0, 20.0, 1);
        let mut stages = Vec::new();
        LoopEngine::default()
            .run(&buffer, &constraints(120.0, 8.0, 12.0), &mut |stage: EngineStage| {
                stages.push(stage);
                true
            })
            .unwrap();
        assert_eq!(
            stages,
            vec![
                EngineStage::Analyzing,
                EngineStage::SearchingLoopPoint,
                EngineStage::Rendering
            ]
        );
    }

    #[test]
    fn listener_can_stop_the_run() {
        let buffer = click_track(44100, 120.0, 20.0, 1);
        let mut seen = 0;
        let err = LoopEngine::default()
            .run(&buffer, &constraints(120.0, 8.0, 12.0), &mut |stage: EngineStage| {
                seen += 1;
                stage != EngineStage::SearchingLoopPoint
            })
            .unwrap_err();
        assert_eq!(err, LoopError::Cancelled);
        assert_eq!(seen, 2);
    }

    #[test]
    fn leading_silence_keeps_positions_in_input_frames() {
        let clicks = click_track(44100, 120.0, 20.0, 1);
        let mut samples = vec![0.0f32; 44100 * 3];
        samples.extend_from_slice(&clicks.channels()[0]);
        let buffer = AudioBuffer::from_mono(samples, 44100).unwrap();

        let result = LoopEngine::default()
            .process(&buffer, &constraints(120.0, 8.0, 12.0))
            .unwrap();
        assert!(result.start_sample >= 44100 * 3);
        assert!(result.end_sample <= buffer.len());
        assert!(result.discontinuity < 1e-6, "discontinuity {}", result.discontinuity);
    }

    #[test]
    fn silent_clip_fails_analysis() {
        let buffer = AudioBuffer::from_mono(vec![0.0; 44100 * 20], 44100).unwrap();
        let err = LoopEngine::default()
            .process(&buffer, &constraints(120.0, 8.0, 12.0))
            .unwrap_err();
        assert!(matches!(err, LoopError::Analysis(_)));
    }

    #[test]
    fn engine_is_deterministic() {
        let buffer = click_track(44100, 120.0, 30.0, 1);
        let engine = LoopEngine::default();
        let c = constraints(120.0, 10.0, 20.0);
        let a = engine.process(&buffer, &c).unwrap();
        let b = engine.process(&buffer, &c).unwrap();
        assert_eq!(a.start_sample, b.start_sample);
        assert_eq!(a.end_sample, b.end_sample);
        assert_eq!(a.buffer, b.buffer);
    }
}
