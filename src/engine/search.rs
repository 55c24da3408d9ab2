//! Loop point search.
//!
//! Candidates are beat pairs `(start, end)` whose span lies inside the
//! duration window and whose beat count matches the target tempo. Each is
//! scored by how different the audio around `end` is from the audio around
//! `start`; the loop plays `start` right after `end`, so equal material means
//! an inaudible seam.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tempo::BeatGrid;
use super::LoopError;
use crate::types::{AudioBuffer, LoopConstraints};

/// Guards the normalized difference against all-zero windows.
const ENERGY_FLOOR: f64 = 1e-12;

/// Tuning for [`LoopPointSearch`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Largest accepted relative deviation from the target tempo.
    pub tempo_tolerance: f64,
    /// Length of each seam comparison window, in seconds.
    pub seam_window_secs: f64,
    /// Scores closer than this to the best one count as ties.
    pub tie_epsilon: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tempo_tolerance: 0.02,
            seam_window_secs: 0.02,
            tie_epsilon: 1e-6,
        }
    }
}

/// A scored `(start, end)` pair, in frames of the searched buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCandidate {
    pub start_sample: usize,
    /// Exclusive.
    pub end_sample: usize,
    /// Seam discontinuity in `[0, 2]`; lower is smoother.
    pub discontinuity: f64,
    /// `|realized_bpm - target_bpm| / target_bpm`.
    pub tempo_lock_error: f64,
    /// Beats spanned by the loop.
    pub beats: usize,
}

impl LoopCandidate {
    pub fn len(&self) -> usize {
        self.end_sample - self.start_sample
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.len() as f64 / sample_rate as f64
    }

    /// Realized beat period of the loop, in frames.
    pub fn beat_period_samples(&self) -> f64 {
        self.len() as f64 / self.beats.max(1) as f64
    }
}

pub struct LoopPointSearch {
    config: SearchConfig,
}

impl LoopPointSearch {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Finds the smoothest tempo-locked loop inside the duration window.
    ///
    /// Deterministic: the same buffer, grid and constraints (seed included)
    /// always give the same candidate.
    pub fn search(
        &self,
        buffer: &AudioBuffer,
        grid: &BeatGrid,
        constraints: &LoopConstraints,
    ) -> Result<LoopCandidate, LoopError> {
        constraints.validate()?;

        let sample_rate = buffer.sample_rate() as f64;
        if buffer.duration_secs() < constraints.min_duration {
            return Err(LoopError::NoValidLoopPoint(format!(
                "clip is {:.2}s, shorter than min_duration {:.2}s",
                buffer.duration_secs(),
                constraints.min_duration
            )));
        }

        let beats = beat_samples(grid, sample_rate, buffer.len());
        if beats.len() < 2 {
            return Err(LoopError::NoValidLoopPoint(format!(
                "only {} usable beats",
                beats.len()
            )));
        }

        let min_frames = (constraints.min_duration * sample_rate - 1e-6).ceil() as usize;
        let max_frames = (constraints.max_duration * sample_rate + 1e-6).floor() as usize;

        let mut candidates = Vec::new();
        for (i, &start) in beats.iter().enumerate() {
            // Only ends inside the duration window are ever scored.
            let lo = beats.partition_point(|&b| b < start + min_frames).max(i + 1);
            let hi = beats.partition_point(|&b| b <= start + max_frames);
            for (j, &end) in beats.iter().enumerate().take(hi).skip(lo) {
                let count = j - i;
                let elapsed = (end - start) as f64 / sample_rate;
                let realized = count as f64 * 60.0 / elapsed;
                let tempo_lock_error = (realized - constraints.bpm).abs() / constraints.bpm;
                if tempo_lock_error > self.config.tempo_tolerance {
                    continue;
                }
                candidates.push(LoopCandidate {
                    start_sample: start,
                    end_sample: end,
                    discontinuity: self.discontinuity(buffer, start, end),
                    tempo_lock_error,
                    beats: count,
                });
            }
        }

        let chosen = self
            .select(&candidates, constraints.seed.unwrap_or_default())
            .ok_or_else(|| {
                LoopError::NoValidLoopPoint(format!(
                    "no beat pair spans {:.1}-{:.1}s within {:.1}% of {:.1} BPM",
                    constraints.min_duration,
                    constraints.max_duration,
                    self.config.tempo_tolerance * 100.0,
                    constraints.bpm
                ))
            })?;

        debug!(
            candidates = candidates.len(),
            start = chosen.start_sample,
            end = chosen.end_sample,
            discontinuity = chosen.discontinuity,
            "loop point selected"
        );
        Ok(chosen)
    }

    /// Lowest score wins; scores within `tie_epsilon` of it are decided by a
    /// hash of the seed and the candidate's position in enumeration order.
    fn select(&self, candidates: &[LoopCandidate], seed: u64) -> Option<LoopCandidate> {
        let best = candidates
            .iter()
            .map(|c| c.discontinuity)
            .min_by(|a, b| a.total_cmp(b))?;
        candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.discontinuity <= best + self.config.tie_epsilon)
            .min_by_key(|(index, _)| tie_break_hash(seed, *index as u64))
            .map(|(_, c)| c.clone())
    }

    /// Seam discontinuity of looping `[start, end)`, in `[0, 2]`.
    ///
    /// Averages two normalized squared differences: the audio just after
    /// `end` against the audio just after `start`, and the audio just before
    /// `end` against the audio just before `start`. Windows are clipped at the
    /// buffer edges; with nothing to compare the score is 1.
    pub fn discontinuity(&self, buffer: &AudioBuffer, start: usize, end: usize) -> f64 {
        let window = (self.config.seam_window_secs * buffer.sample_rate() as f64).round() as usize;
        let len = buffer.len();
        let mut total = 0.0;
        let mut terms = 0;

        let after = window.min(len.saturating_sub(end)).min(len.saturating_sub(start));
        if after > 0 {
            total += normalized_difference(buffer, end, start, after);
            terms += 1;
        }
        let before = window.min(start).min(end);
        if before > 0 {
            total += normalized_difference(buffer, end - before, start - before, before);
            terms += 1;
        }

        if terms == 0 {
            1.0
        } else {
            total / terms as f64
        }
    }
}

/// Beat timestamps as strictly increasing frame indices no later than `len`.
fn beat_samples(grid: &BeatGrid, sample_rate: f64, len: usize) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::with_capacity(grid.len());
    for &t in grid.beats() {
        let sample = (t * sample_rate).round() as usize;
        if sample > len {
            break;
        }
        if out.last().map_or(true, |&last| sample > last) {
            out.push(sample);
        }
    }
    out
}

/// `sum((a - b)^2) / (sum(a^2) + sum(b^2))` over all channels, in `[0, 2]`.
fn normalized_difference(buffer: &AudioBuffer, a: usize, b: usize, n: usize) -> f64 {
    let mut diff = 0.0f64;
    let mut energy = 0.0f64;
    for channel in buffer.channels() {
        for (&x, &y) in channel[a..a + n].iter().zip(&channel[b..b + n]) {
            let (x, y) = (x as f64, y as f64);
            diff += (x - y) * (x - y);
            energy += x * x + y * y;
        }
    }
    if energy <= ENERGY_FLOOR {
        0.0
    } else {
        diff / energy
    }
}

/// SplitMix64 over the seed and candidate index.
fn tie_break_hash(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tempo::GridSource;
    use crate::engine::test_support::click_track;

    fn search() -> LoopPointSearch {
        LoopPointSearch::new(SearchConfig::default())
    }

    fn constraints(bpm: f64, min: f64, max: f64, seed: Option<u64>) -> LoopConstraints {
        LoopConstraints::new(bpm, min, max, seed).unwrap()
    }

    #[test]
    fn clean_clicks_give_seamless_whole_beat_loop() {
        let buffer = click_track(44100, 120.0, 50.0, 1);
        let grid = BeatGrid::fixed(120.0, 0.0, 50.0, 1.0);
        let candidate = search()
            .search(&buffer, &grid, &constraints(120.0, 40.0, 60.0, Some(9)))
            .unwrap();

        let duration = candidate.duration_secs(44100);
        assert!((40.0..=60.0).contains(&duration), "duration {}", duration);
        assert!(((duration * 2.0).round() - duration * 2.0).abs() < 1e-9);
        assert_eq!(candidate.discontinuity, 0.0);
        assert!(candidate.tempo_lock_error < 1e-9);
        assert_eq!(candidate.beats, (duration * 2.0).round() as usize);
    }

    #[test]
    fn search_is_deterministic() {
        let buffer = click_track(44100, 120.0, 30.0, 2);
        let grid = BeatGrid::fixed(120.0, 0.0, 30.0, 1.0);
        let c = constraints(120.0, 10.0, 20.0, Some(1234));
        let first = search().search(&buffer, &grid, &c).unwrap();
        for _ in 0..3 {
            assert_eq!(search().search(&buffer, &grid, &c).unwrap(), first);
        }
    }

    #[test]
    fn missing_seed_behaves_like_zero() {
        let buffer = click_track(44100, 120.0, 30.0, 1);
        let grid = BeatGrid::fixed(120.0, 0.0, 30.0, 1.0);
        let unseeded = search()
            .search(&buffer, &grid, &constraints(120.0, 10.0, 20.0, None))
            .unwrap();
        let zero = search()
            .search(&buffer, &grid, &constraints(120.0, 10.0, 20.0, Some(0)))
            .unwrap();
        assert_eq!(unseeded, zero);
    }

    #[test]
    fn buffer_shorter_than_min_duration_has_no_loop() {
        let buffer = click_track(44100, 120.0, 10.0, 1);
        let grid = BeatGrid::fixed(120.0, 0.0, 10.0, 1.0);
        let err = search()
            .search(&buffer, &grid, &constraints(120.0, 40.0, 60.0, None))
            .unwrap_err();
        assert!(matches!(err, LoopError::NoValidLoopPoint(_)));
    }

    #[test]
    fn tempo_mismatch_has_no_loop() {
        let buffer = click_track(44100, 100.0, 40.0, 1);
        let grid = BeatGrid::fixed(100.0, 0.0, 40.0, 1.0);
        let err = search()
            .search(&buffer, &grid, &constraints(120.0, 10.0, 20.0, None))
            .unwrap_err();
        assert!(matches!(err, LoopError::NoValidLoopPoint(_)));
    }

    #[test]
    fn smoother_seam_wins_over_misaligned_beats() {
        // Beats every 0.5 s, except that one is nudged off its click. Loops
        // touching it keep whole-beat length only by chance, and score worse.
        let buffer = click_track(44100, 120.0, 24.0, 1);
        let mut beats: Vec<f64> = (0..=48).map(|k| k as f64 * 0.5).collect();
        beats[20] += 0.01;
        let grid = BeatGrid::new(beats, 120.0, 1.0, GridSource::Tracked);
        let candidate = search()
            .search(&buffer, &grid, &constraints(120.0, 8.0, 10.0, Some(5)))
            .unwrap();
        assert_eq!(candidate.discontinuity, 0.0);
        assert_ne!(candidate.start_sample, 441441);
        assert_ne!(candidate.end_sample, 441441);
    }

    #[test]
    fn discontinuity_is_bounded_and_zero_for_periodic_audio() {
        let buffer = click_track(8000, 120.0, 4.0, 1);
        let s = search();
        assert_eq!(s.discontinuity(&buffer, 4000, 20000), 0.0);

        let off = s.discontinuity(&buffer, 4000, 20400);
        assert!(off > 0.0 && off <= 2.0, "score {}", off);
    }

    #[test]
    fn discontinuity_of_opposite_polarity_is_maximal() {
        let mut samples = vec![0.5f32; 1000];
        samples.extend(vec![-0.5f32; 1000]);
        let buffer = AudioBuffer::from_mono(samples, 1000).unwrap();
        // After `end` the signal is -0.5, after `start` it is +0.5.
        let score = search().discontinuity(&buffer, 100, 1000);
        assert!(score > 0.9, "score {}", score);
    }

    #[test]
    fn tie_break_hash_is_pure() {
        assert_eq!(tie_break_hash(7, 3), tie_break_hash(7, 3));
        assert_ne!(tie_break_hash(7, 3), tie_break_hash(7, 4));
        assert_ne!(tie_break_hash(7, 3), tie_break_hash(8, 3));
    }
}
