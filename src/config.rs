//! Daemon configuration module.
//!
//! Contains the runtime configuration for the loopgen-daemon: output
//! location, lane and queue sizing, generator selection and the Loop Engine
//! tuning knobs that are worth exposing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::{EngineConfig, GridFallback};
use crate::generation::{GeneratorKind, OrchestratorConfig};

/// Runtime configuration for the daemon.
///
/// This configuration is typically loaded from environment variables at
/// startup, then overridden by command-line arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for rendered loops.
    /// If None, uses the platform-specific default cache location.
    pub output_path: Option<PathBuf>,

    /// Number of jobs processed concurrently.
    pub lanes: usize,

    /// Pending jobs accepted before submissions are refused.
    pub max_queue: usize,

    /// Finished jobs kept in memory for status lookups.
    pub retain_jobs: usize,

    /// Which generator produces raw audio.
    pub generator: GeneratorKind,

    /// Command line for the `command` generator.
    pub generator_command: Option<String>,

    /// Output sample rate of the synthetic generator.
    pub sample_rate: u32,

    /// Largest accepted relative tempo deviation of a loop.
    pub tempo_tolerance: f64,

    /// Seam crossfade length as a fraction of one beat.
    pub crossfade_beats: f64,

    /// Upper bound on the seam crossfade, in milliseconds.
    pub max_crossfade_ms: f64,

    /// Largest silent fraction of a clip that is still analyzed.
    pub max_silence: f64,

    /// When to fall back to a fixed beat grid.
    pub grid_fallback: GridFallback,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let orchestrator = OrchestratorConfig::default();
        Self {
            output_path: None,
            lanes: orchestrator.lanes,
            max_queue: orchestrator.max_queue,
            retain_jobs: orchestrator.retain_jobs,
            generator: GeneratorKind::default(),
            generator_command: None,
            sample_rate: 32_000,
            tempo_tolerance: engine.search.tempo_tolerance,
            crossfade_beats: engine.crossfade.beats,
            max_crossfade_ms: engine.crossfade.max_secs * 1000.0,
            max_silence: engine.tempo.max_silence_fraction,
            grid_fallback: engine.tempo.fallback,
        }
    }
}

impl DaemonConfig {
    /// Creates a new DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a DaemonConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `LOOPGEN_OUTPUT_PATH` - Directory for rendered loops
    /// - `LOOPGEN_LANES` - Concurrent jobs
    /// - `LOOPGEN_MAX_QUEUE` - Pending job limit
    /// - `LOOPGEN_RETAIN_JOBS` - Finished jobs kept for status lookups
    /// - `LOOPGEN_GENERATOR` - Generator (synthetic, command)
    /// - `LOOPGEN_GENERATOR_COMMAND` - Command line for the command generator
    /// - `LOOPGEN_SAMPLE_RATE` - Synthetic generator sample rate
    /// - `LOOPGEN_TEMPO_TOLERANCE` - Relative tempo tolerance
    /// - `LOOPGEN_CROSSFADE_BEATS` - Crossfade length in beats
    /// - `LOOPGEN_MAX_CROSSFADE_MS` - Crossfade cap in milliseconds
    /// - `LOOPGEN_MAX_SILENCE` - Silent fraction limit
    /// - `LOOPGEN_GRID_FALLBACK` - never, when_unreliable, always
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());
        let count = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());

        if let Some(path) = lookup("LOOPGEN_OUTPUT_PATH") {
            if !path.is_empty() {
                config.output_path = Some(PathBuf::from(path));
            }
        }

        if let Some(lanes) = count("LOOPGEN_LANES").filter(|n| *n > 0) {
            config.lanes = lanes;
        }
        if let Some(max_queue) = count("LOOPGEN_MAX_QUEUE").filter(|n| *n > 0) {
            config.max_queue = max_queue;
        }
        if let Some(retain) = count("LOOPGEN_RETAIN_JOBS").filter(|n| *n > 0) {
            config.retain_jobs = retain;
        }

        if let Some(kind) = lookup("LOOPGEN_GENERATOR").and_then(|v| GeneratorKind::parse(&v)) {
            config.generator = kind;
        }
        if let Some(command) = lookup("LOOPGEN_GENERATOR_COMMAND") {
            if !command.trim().is_empty() {
                config.generator_command = Some(command);
            }
        }

        if let Some(rate) = lookup("LOOPGEN_SAMPLE_RATE").and_then(|v| v.trim().parse::<u32>().ok()) {
            config.sample_rate = rate;
        }
        if let Some(tolerance) = parsed("LOOPGEN_TEMPO_TOLERANCE") {
            config.tempo_tolerance = tolerance;
        }
        if let Some(beats) = parsed("LOOPGEN_CROSSFADE_BEATS") {
            config.crossfade_beats = beats;
        }
        if let Some(ms) = parsed("LOOPGEN_MAX_CROSSFADE_MS") {
            config.max_crossfade_ms = ms;
        }
        if let Some(fraction) = parsed("LOOPGEN_MAX_SILENCE") {
            config.max_silence = fraction;
        }
        if let Some(policy) = lookup("LOOPGEN_GRID_FALLBACK").and_then(|v| GridFallback::parse(&v)) {
            config.grid_fallback = policy;
        }

        config
    }

    /// Returns the effective output path, using platform defaults if not specified.
    pub fn effective_output_path(&self) -> PathBuf {
        if let Some(ref path) = self.output_path {
            path.clone()
        } else {
            default_output_path()
        }
    }

    /// Loop Engine settings derived from this config.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        engine.search.tempo_tolerance = self.tempo_tolerance;
        engine.crossfade.beats = self.crossfade_beats;
        engine.crossfade.max_secs = self.max_crossfade_ms / 1000.0;
        engine.tempo.max_silence_fraction = self.max_silence;
        engine.tempo.fallback = self.grid_fallback;
        engine
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            lanes: self.lanes,
            max_queue: self.max_queue,
            retain_jobs: self.retain_jobs,
        }
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if self.lanes == 0 || self.lanes > 64 {
            return Some(format!("lanes must be in 1..=64, got {}", self.lanes));
        }
        if self.max_queue == 0 {
            return Some("max_queue must be > 0".to_string());
        }
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Some(format!(
                "sample_rate out of range: {} (8000-192000)",
                self.sample_rate
            ));
        }
        if !(self.tempo_tolerance > 0.0 && self.tempo_tolerance < 0.5) {
            return Some(format!(
                "tempo_tolerance must be in (0, 0.5), got {}",
                self.tempo_tolerance
            ));
        }
        if !(self.crossfade_beats >= 0.0 && self.crossfade_beats <= 4.0) {
            return Some(format!(
                "crossfade_beats must be in [0, 4], got {}",
                self.crossfade_beats
            ));
        }
        if !(self.max_crossfade_ms >= 0.0 && self.max_crossfade_ms <= 2000.0) {
            return Some(format!(
                "max_crossfade_ms must be in [0, 2000], got {}",
                self.max_crossfade_ms
            ));
        }
        if !(self.max_silence > 0.0 && self.max_silence <= 1.0) {
            return Some(format!(
                "max_silence must be in (0, 1], got {}",
                self.max_silence
            ));
        }
        if self.generator == GeneratorKind::Command && self.generator_command.is_none() {
            return Some("generator 'command' needs LOOPGEN_GENERATOR_COMMAND".to_string());
        }

        None
    }
}

/// Returns the platform-specific default output path.
///
/// Uses the `directories` crate to find appropriate locations:
/// - macOS: ~/Library/Caches/loopgen/loops
/// - Linux: ~/.cache/loopgen/loops
/// - Windows: C:\Users\<user>\AppData\Local\loopgen\cache\loops
fn default_output_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "loopgen") {
        proj_dirs.cache_dir().join("loops")
    } else {
        // Fallback to current directory
        PathBuf::from("./loops")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = DaemonConfig::new();
        assert!(config.validate().is_none());
        assert_eq!(config.lanes, 1);
        assert_eq!(config.generator, GeneratorKind::Synthetic);
        assert_eq!(config.grid_fallback, GridFallback::WhenUnreliable);
    }

    #[test]
    fn config_validation() {
        let mut config = DaemonConfig::new();

        config.lanes = 0;
        assert!(config.validate().is_some());
        config.lanes = 2;
        assert!(config.validate().is_none());

        config.tempo_tolerance = 0.0;
        assert!(config.validate().is_some());
        config.tempo_tolerance = 0.03;

        config.generator = GeneratorKind::Command;
        assert!(config.validate().is_some());
        config.generator_command = Some("gen.sh".into());
        assert!(config.validate().is_none());
    }

    #[test]
    fn from_lookup_reads_every_variable() {
        let config = DaemonConfig::from_lookup(lookup(&[
            ("LOOPGEN_OUTPUT_PATH", "/tmp/loops"),
            ("LOOPGEN_LANES", "2"),
            ("LOOPGEN_MAX_QUEUE", "5"),
            ("LOOPGEN_RETAIN_JOBS", "7"),
            ("LOOPGEN_GENERATOR", "command"),
            ("LOOPGEN_GENERATOR_COMMAND", "gen.sh {output}"),
            ("LOOPGEN_SAMPLE_RATE", "44100"),
            ("LOOPGEN_TEMPO_TOLERANCE", "0.01"),
            ("LOOPGEN_CROSSFADE_BEATS", "0.5"),
            ("LOOPGEN_MAX_CROSSFADE_MS", "50"),
            ("LOOPGEN_MAX_SILENCE", "0.3"),
            ("LOOPGEN_GRID_FALLBACK", "always"),
        ]));

        assert_eq!(config.output_path, Some(PathBuf::from("/tmp/loops")));
        assert_eq!(config.lanes, 2);
        assert_eq!(config.max_queue, 5);
        assert_eq!(config.retain_jobs, 7);
        assert_eq!(config.generator, GeneratorKind::Command);
        assert_eq!(config.generator_command.as_deref(), Some("gen.sh {output}"));
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.tempo_tolerance, 0.01);
        assert_eq!(config.crossfade_beats, 0.5);
        assert_eq!(config.max_crossfade_ms, 50.0);
        assert_eq!(config.max_silence, 0.3);
        assert_eq!(config.grid_fallback, GridFallback::Always);
    }

    #[test]
    fn from_lookup_ignores_garbage() {
        let config = DaemonConfig::from_lookup(lookup(&[
            ("LOOPGEN_LANES", "0"),
            ("LOOPGEN_GENERATOR", "musicgen"),
            ("LOOPGEN_TEMPO_TOLERANCE", "tight"),
        ]));
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn engine_config_carries_overrides() {
        let config = DaemonConfig {
            tempo_tolerance: 0.05,
            max_crossfade_ms: 40.0,
            grid_fallback: GridFallback::Never,
            ..DaemonConfig::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.search.tempo_tolerance, 0.05);
        assert!((engine.crossfade.max_secs - 0.04).abs() < 1e-12);
        assert_eq!(engine.tempo.fallback, GridFallback::Never);
        assert!(engine.trim_silence);
    }

    #[test]
    fn effective_output_path_prefers_override() {
        let config = DaemonConfig::new();
        assert!(!config.effective_output_path().as_os_str().is_empty());

        let config = DaemonConfig {
            output_path: Some(PathBuf::from("/data/loops")),
            ..DaemonConfig::default()
        };
        assert_eq!(config.effective_output_path(), PathBuf::from("/data/loops"));
    }
}
