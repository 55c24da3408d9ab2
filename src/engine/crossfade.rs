//! Loop rendering with a seam crossfade.
//!
//! The loop is `[start, end)` of the source. Its last `L` frames are blended
//! with the `L` frames leading into `start` (pre-roll), so the loop's tail
//! flows into its own head. When there is no audio before `start` the first
//! `L` frames are blended with the audio following `end` instead (post-roll).

use std::f32::consts::FRAC_PI_2;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::search::LoopCandidate;
use super::LoopError;
use crate::types::AudioBuffer;

/// Complementary gain curves for the crossfade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// `sin`/`cos` gains; constant power for uncorrelated material.
    #[default]
    EqualPower,
    /// Gains sum to one; constant amplitude for identical material.
    Linear,
}

impl FadeCurve {
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::EqualPower => "equal_power",
            FadeCurve::Linear => "linear",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "equal_power" => Some(FadeCurve::EqualPower),
            "linear" => Some(FadeCurve::Linear),
            _ => None,
        }
    }

    /// `(fade_out, fade_in)` gains at position `t` in `[0, 1]`.
    fn gains(&self, t: f32) -> (f32, f32) {
        match self {
            FadeCurve::EqualPower => ((t * FRAC_PI_2).cos(), (t * FRAC_PI_2).sin()),
            FadeCurve::Linear => (1.0 - t, t),
        }
    }
}

impl fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for [`Crossfader`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossfadeConfig {
    /// Crossfade length as a fraction of one beat.
    pub beats: f64,
    /// Upper bound on the crossfade length, in seconds.
    pub max_secs: f64,
    pub curve: FadeCurve,
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            beats: 0.25,
            max_secs: 0.1,
            curve: FadeCurve::EqualPower,
        }
    }
}

/// Where the crossfade material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeamMode {
    PreRoll,
    PostRoll,
    /// No surrounding audio; plain slice.
    Cut,
}

/// A rendered loop and how its seam was made.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub buffer: AudioBuffer,
    pub crossfade_samples: usize,
    pub mode: SeamMode,
}

pub struct Crossfader {
    config: CrossfadeConfig,
}

impl Crossfader {
    pub fn new(config: CrossfadeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CrossfadeConfig {
        &self.config
    }

    /// Renders `[start, end)` of `buffer` with a seam crossfade.
    ///
    /// The output is exactly `end - start` frames long.
    pub fn render(&self, buffer: &AudioBuffer, candidate: &LoopCandidate) -> Result<Rendered, LoopError> {
        let (start, end) = (candidate.start_sample, candidate.end_sample);
        let len = buffer.len();
        if start >= end || end > len {
            let message = format!("loop {}..{} invalid for {} frames", start, end, len);
            error!(start, end, len, "render contract violated");
            return Err(LoopError::Render(message));
        }

        let loop_len = end - start;
        let wanted = (self.config.beats * candidate.beat_period_samples())
            .min(self.config.max_secs * buffer.sample_rate() as f64)
            .max(0.0)
            .round() as usize;
        if wanted > loop_len {
            error!(wanted, loop_len, "crossfade longer than loop");
            return Err(LoopError::Render(format!(
                "crossfade of {} frames exceeds loop of {} frames",
                wanted, loop_len
            )));
        }

        let post_room = len - end;
        let (mode, fade) = if start >= wanted {
            (SeamMode::PreRoll, wanted)
        } else if post_room >= wanted {
            (SeamMode::PostRoll, wanted)
        } else if start >= post_room && start > 0 {
            (SeamMode::PreRoll, start)
        } else if post_room > 0 {
            (SeamMode::PostRoll, post_room)
        } else {
            (SeamMode::Cut, 0)
        };

        if fade == 0 && wanted > 0 {
            warn!(start, end, "no audio around the loop, rendering without crossfade");
        } else if fade < wanted {
            warn!(wanted, fade, "crossfade shortened to the available audio");
        }

        let channels = buffer
            .channels()
            .iter()
            .map(|channel| {
                let mut out = channel[start..end].to_vec();
                match mode {
                    SeamMode::PreRoll => {
                        for k in 0..fade {
                            let t = (k + 1) as f32 / fade as f32;
                            let (g_out, g_in) = self.config.curve.gains(t);
                            out[loop_len - fade + k] =
                                channel[end - fade + k] * g_out + channel[start - fade + k] * g_in;
                        }
                    }
                    SeamMode::PostRoll => {
                        for k in 0..fade {
                            let t = k as f32 / fade as f32;
                            let (g_out, g_in) = self.config.curve.gains(t);
                            out[k] = channel[end + k] * g_out + channel[start + k] * g_in;
                        }
                    }
                    SeamMode::Cut => {}
                }
                out
            })
            .collect();

        Ok(Rendered {
            buffer: AudioBuffer::new(channels, buffer.sample_rate())?,
            crossfade_samples: fade,
            mode,
        })
    }
}
