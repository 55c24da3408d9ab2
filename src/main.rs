//! loopgen-daemon: seamless, tempo-locked loops from generated music.
//!
//! This binary can run in two modes:
//! - CLI mode: run the Loop Engine once on a WAV file or a synthetic clip
//! - Daemon mode: JSON-RPC server over stdio

use std::time::Instant;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use loopgen_daemon::audio::{read_wav, write_wav};
use loopgen_daemon::cli::Cli;
use loopgen_daemon::config::DaemonConfig;
use loopgen_daemon::engine::{EngineStage, LoopEngine};
use loopgen_daemon::generation::{
    create_generator, GenerationRequest, Generator, JobOrchestrator, SyntheticGenerator,
};
use loopgen_daemon::rpc::{run_server, Outbox, ServerState};
use loopgen_daemon::types::LoopConstraints;

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries JSON-RPC in daemon mode.
fn init_logging() {
    let filter = std::env::var("LOOPGEN_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let mut config = DaemonConfig::from_env();
    cli.apply_to(&mut config);
    if let Some(problem) = config.validate() {
        bail!("invalid configuration: {}", problem);
    }

    if cli.is_daemon_mode() {
        run_daemon_mode(config)
    } else if cli.is_cli_mode() {
        run_cli_mode(&cli, &config)
    } else {
        print_usage();
        Ok(())
    }
}

/// Runs the Loop Engine once and writes the loop.
fn run_cli_mode(cli: &Cli, config: &DaemonConfig) -> anyhow::Result<()> {
    let bpm = cli.bpm.context("--bpm is required")?;
    let constraints = LoopConstraints::new(bpm, cli.min_duration, cli.max_duration, cli.seed)
        .map_err(loopgen_daemon::DaemonError::from)
        .context("invalid loop constraints")?;
    let output_path = cli.output_path();

    let source = match cli.input {
        Some(ref input) => {
            info!(input = %input.display(), "reading clip");
            read_wav(input).with_context(|| format!("failed to read {}", input.display()))?
        }
        None => {
            let generator = SyntheticGenerator::new(config.sample_rate);
            let request = GenerationRequest::for_constraints(&cli.prompt, &constraints);
            info!(prompt = %cli.prompt, seconds = request.duration_secs, "generating synthetic clip");
            generator.generate(&request, &mut |_, _| {})?
        }
    };

    let engine = LoopEngine::new(config.engine_config());
    let start_time = Instant::now();
    let result = engine
        .run(&source, &constraints, &mut |stage: EngineStage| {
            info!(%stage, "stage");
            true
        })
        .map_err(loopgen_daemon::DaemonError::from)?;

    write_wav(&result.buffer, &output_path)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    info!(
        output = %output_path.display(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "loop saved"
    );

    println!("{}", serde_json::to_string_pretty(&result.metadata())?);
    Ok(())
}

/// Runs the daemon mode (JSON-RPC server).
fn run_daemon_mode(config: DaemonConfig) -> anyhow::Result<()> {
    let generator = create_generator(config.generator, &config)?;
    let orchestrator = JobOrchestrator::new(
        generator,
        LoopEngine::new(config.engine_config()),
        config.orchestrator_config(),
    );
    info!(
        output = %config.effective_output_path().display(),
        generator = %config.generator,
        lanes = config.lanes,
        "daemon starting"
    );

    let state = ServerState::new(orchestrator, config, Outbox::stdout());
    run_server(state)?;
    Ok(())
}

/// Prints usage information.
fn print_usage() {
    eprintln!("loopgen-daemon: seamless, tempo-locked loops from generated music");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  Loop a file:");
    eprintln!("    loopgen-daemon --input raw.wav --bpm 120 --min-duration 16 --max-duration 32 --output loop.wav");
    eprintln!();
    eprintln!("  Loop a synthetic clip:");
    eprintln!("    loopgen-daemon --synthetic --bpm 90 --output loop.wav");
    eprintln!();
    eprintln!("  Daemon mode (JSON-RPC server):");
    eprintln!("    loopgen-daemon --daemon");
    eprintln!();
    eprintln!("Run 'loopgen-daemon --help' for full options.");
}
