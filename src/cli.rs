//! CLI argument parser.
//!
//! Two modes: `--daemon` serves JSON-RPC over stdio; otherwise the Loop
//! Engine runs once on a WAV file (`--input`) or on a synthetic clip
//! (`--synthetic`) and writes the loop to `--output`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::DaemonConfig;
use crate::engine::GridFallback;
use crate::generation::GeneratorKind;

/// Generator choices exposed on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum GeneratorArg {
    /// Built-in drum-and-pad pattern
    #[default]
    Synthetic,
    /// External program from LOOPGEN_GENERATOR_COMMAND or --generator-command
    Command,
}

impl From<GeneratorArg> for GeneratorKind {
    fn from(arg: GeneratorArg) -> Self {
        match arg {
            GeneratorArg::Synthetic => GeneratorKind::Synthetic,
            GeneratorArg::Command => GeneratorKind::Command,
        }
    }
}

/// Beat grid fallback choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackArg {
    /// Fail when beats cannot be tracked
    Never,
    /// Use a fixed grid at the target tempo when tracking is unreliable
    WhenUnreliable,
    /// Always use a fixed grid
    Always,
}

impl From<FallbackArg> for GridFallback {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Never => GridFallback::Never,
            FallbackArg::WhenUnreliable => GridFallback::WhenUnreliable,
            FallbackArg::Always => GridFallback::Always,
        }
    }
}

/// loopgen-daemon: seamless, tempo-locked loops from generated music
#[derive(Parser, Debug)]
#[command(name = "loopgen-daemon")]
#[command(about = "Turns generated music into seamless, tempo-locked loops")]
#[command(version)]
pub struct Cli {
    /// Run in daemon mode (JSON-RPC over stdio)
    #[arg(long)]
    pub daemon: bool,

    /// WAV file to loop
    #[arg(short, long, conflicts_with = "synthetic")]
    pub input: Option<PathBuf>,

    /// Loop a clip from the synthetic generator instead of a file
    #[arg(long)]
    pub synthetic: bool,

    /// Prompt passed to the generator (synthetic mode)
    #[arg(short, long, default_value = "lofi drums")]
    pub prompt: String,

    /// Target tempo in BPM (24-240)
    #[arg(short, long)]
    pub bpm: Option<f64>,

    /// Shortest acceptable loop in seconds (8-128)
    #[arg(long, default_value = "8")]
    pub min_duration: f64,

    /// Longest acceptable loop in seconds (8-128)
    #[arg(long, default_value = "16")]
    pub max_duration: f64,

    /// Seed for generation and tie-breaking
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Output WAV file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for loops written in daemon mode
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Generator used in daemon mode
    #[arg(long, value_enum)]
    pub generator: Option<GeneratorArg>,

    /// Command line for the command generator
    #[arg(long)]
    pub generator_command: Option<String>,

    /// Concurrent jobs in daemon mode
    #[arg(long)]
    pub lanes: Option<usize>,

    /// Pending job limit in daemon mode
    #[arg(long)]
    pub max_queue: Option<usize>,

    /// Largest accepted relative tempo deviation (e.g. 0.02)
    #[arg(long)]
    pub tempo_tolerance: Option<f64>,

    /// Seam crossfade length in beats
    #[arg(long)]
    pub crossfade_beats: Option<f64>,

    /// Beat grid fallback policy
    #[arg(long, value_enum)]
    pub grid_fallback: Option<FallbackArg>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Returns true if running in daemon mode.
    pub fn is_daemon_mode(&self) -> bool {
        self.daemon
    }

    /// Returns true if running the engine once on a file or synthetic clip.
    pub fn is_cli_mode(&self) -> bool {
        !self.daemon && (self.input.is_some() || self.synthetic)
    }

    /// Returns the effective output path.
    ///
    /// Defaults to "loop.wav" in the current directory if not specified.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from("loop.wav"))
    }

    /// Layers command-line flags over `config`.
    pub fn apply_to(&self, config: &mut DaemonConfig) {
        if let Some(ref dir) = self.output_dir {
            config.output_path = Some(dir.clone());
        }
        if let Some(generator) = self.generator {
            config.generator = generator.into();
        }
        if let Some(ref command) = self.generator_command {
            config.generator_command = Some(command.clone());
        }
        if let Some(lanes) = self.lanes {
            config.lanes = lanes;
        }
        if let Some(max_queue) = self.max_queue {
            config.max_queue = max_queue;
        }
        if let Some(tolerance) = self.tempo_tolerance {
            config.tempo_tolerance = tolerance;
        }
        if let Some(beats) = self.crossfade_beats {
            config.crossfade_beats = beats;
        }
        if let Some(policy) = self.grid_fallback {
            config.grid_fallback = policy.into();
        }
    }
}
