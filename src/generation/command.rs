//! External-program generator.
//!
//! Runs a user-supplied command once per job. The command receives the
//! request both as `{placeholder}` arguments and as `LOOPGEN_*` environment
//! variables, and must write a WAV file to the output path it is given.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::backend::{GenerationRequest, Generator};
use crate::audio::read_wav;
use crate::error::{DaemonError, Result};
use crate::types::AudioBuffer;

/// Bytes of stderr kept in failure messages.
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line on whitespace. The first word is the program.
    pub fn parse(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| DaemonError::upstream_model_failed("generator command is empty"))?;
        Ok(Self::new(program, words.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders substituted for `request`.
    fn substituted_args(&self, request: &GenerationRequest, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{prompt}", &request.prompt)
                    .replace("{bpm}", &request.bpm.to_string())
                    .replace("{duration}", &format!("{:.3}", request.duration_secs))
                    .replace("{seed}", &request.seed.to_string())
                    .replace("{output}", &output)
            })
            .collect()
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((idx, _)) => format!("...{}", &text[idx..]),
        None => text.to_string(),
    }
}

impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        "command"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<AudioBuffer> {
        let workdir = tempfile::tempdir().map_err(|e| {
            DaemonError::upstream_model_failed(format!("failed to create scratch directory: {}", e))
        })?;
        let output = workdir.path().join("clip.wav");

        let mut cmd = Command::new(&self.program);
        cmd.args(self.substituted_args(request, &output))
            .env("LOOPGEN_PROMPT", &request.prompt)
            .env("LOOPGEN_BPM", request.bpm.to_string())
            .env("LOOPGEN_DURATION", format!("{:.3}", request.duration_secs))
            .env("LOOPGEN_SEED", request.seed.to_string())
            .env("LOOPGEN_OUTPUT", &output)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        info!(program = %self.program, seed = request.seed, "starting generator command");
        let started = Instant::now();
        on_progress(0, 1);

        let result = cmd.output().map_err(|e| {
            DaemonError::upstream_model_failed(format!("failed to spawn '{}': {}", self.program, e))
        })?;

        if !result.status.success() {
            let tail = stderr_tail(&result.stderr);
            warn!(program = %self.program, status = %result.status, "generator command failed");
            return Err(DaemonError::upstream_model_failed(format!(
                "'{}' exited with {}: {}",
                self.program, result.status, tail
            )));
        }

        if !output.exists() {
            return Err(DaemonError::upstream_model_failed(format!(
                "'{}' did not write {}",
                self.program,
                output.display()
            )));
        }

        let buffer = read_wav(&output).map_err(|e| {
            DaemonError::upstream_model_failed(format!("unreadable generator output: {}", e.message))
        })?;
        if buffer.is_empty() {
            return Err(DaemonError::upstream_model_failed("generator produced an empty clip"));
        }
        on_progress(1, 1);

        debug!(
            frames = buffer.len(),
            sample_rate = buffer.sample_rate(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generator command finished"
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "warm rhodes".to_string(),
            bpm: 84.0,
            duration_secs: 20.0,
            seed: 7,
        }
    }

    #[test]
    fn parse_splits_program_and_args() {
        let generator = CommandGenerator::parse("python gen.py --out {output}").unwrap();
        assert_eq!(generator.program(), "python");
        assert_eq!(generator.args, vec!["gen.py", "--out", "{output}"]);
    }

    #[test]
    fn parse_rejects_blank_command() {
        let err = CommandGenerator::parse("   ").unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamModelFailed);
    }

    #[test]
    fn placeholders_are_substituted() {
        let generator =
            CommandGenerator::parse("gen --bpm {bpm} --seed {seed} --len {duration} {output}").unwrap();
        let args = generator.substituted_args(&request(), Path::new("/tmp/x.wav"));
        assert_eq!(args, vec!["--bpm", "84", "--seed", "7", "--len", "20.000", "/tmp/x.wav"]);
    }

    #[test]
    fn stderr_tail_truncates_from_the_front() {
        let long = "x".repeat(STDERR_TAIL + 50);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with("..."));
        assert!(tail.len() <= STDERR_TAIL + 4);
        assert_eq!(stderr_tail(b"  boom \n"), "boom");
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_upstream_failure() {
        let generator = CommandGenerator::parse("false").unwrap();
        let err = generator.generate(&request(), &mut |_, _| {}).unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamModelFailed);
    }

    #[cfg(unix)]
    #[test]
    fn missing_output_is_upstream_failure() {
        let generator = CommandGenerator::parse("true").unwrap();
        let err = generator.generate(&request(), &mut |_, _| {}).unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamModelFailed);
        assert!(err.message.contains("did not write"));
    }

    #[test]
    fn missing_program_is_upstream_failure() {
        let generator = CommandGenerator::parse("loopgen-no-such-program-xyz").unwrap();
        let err = generator.generate(&request(), &mut |_, _| {}).unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamModelFailed);
    }
}
