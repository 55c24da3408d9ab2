//! Planar PCM audio buffer.

use std::ops::Range;

use crate::engine::LoopError;

/// Immutable multi-channel PCM audio.
///
/// Samples are stored planar (one `Vec` per channel). Every transform
/// returns a new buffer; nothing mutates in place.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Creates a buffer from planar channel data.
    ///
    /// Fails when there are no channels, the sample rate is zero, or the
    /// channels have different lengths.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, LoopError> {
        if channels.is_empty() {
            return Err(LoopError::Render("audio buffer needs at least one channel".into()));
        }
        if sample_rate == 0 {
            return Err(LoopError::Render("sample rate must be non-zero".into()));
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(LoopError::Render("channels have different lengths".into()));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Creates a single-channel buffer.
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, LoopError> {
        Self::new(vec![samples], sample_rate)
    }

    /// Creates a buffer from interleaved samples (`L R L R ...`).
    ///
    /// A trailing partial frame is dropped.
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, LoopError> {
        if channel_count == 0 {
            return Err(LoopError::Render("audio buffer needs at least one channel".into()));
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Returns the samples interleaved frame by frame.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len() * self.channel_count());
        for i in 0..self.len() {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }

    /// Averages all channels into one.
    pub fn mono(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let scale = 1.0 / self.channels.len() as f32;
        (0..self.len())
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect()
    }

    /// Number of frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    /// Returns true if the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Planar channel data.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Converts a time in seconds to the nearest frame index.
    pub fn seconds_to_frames(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate as f64).round().max(0.0) as usize
    }

    /// Copies a frame range into a new buffer.
    pub fn slice(&self, range: Range<usize>) -> Result<Self, LoopError> {
        if range.start > range.end || range.end > self.len() {
            return Err(LoopError::Render(format!(
                "slice {}..{} out of bounds for {} frames",
                range.start,
                range.end,
                self.len()
            )));
        }
        let channels = self
            .channels
            .iter()
            .map(|c| c[range.clone()].to_vec())
            .collect();
        Self::new(channels, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ragged_channels() {
        assert!(AudioBuffer::new(vec![vec![0.0; 4], vec![0.0; 3]], 44100).is_err());
        assert!(AudioBuffer::new(vec![], 44100).is_err());
        assert!(AudioBuffer::new(vec![vec![0.0; 4]], 0).is_err());
    }

    #[test]
    fn interleave_roundtrip_keeps_channel_order() {
        let buffer = AudioBuffer::from_interleaved(&[1.0, -1.0, 2.0, -2.0, 3.0], 2, 8000).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.channels()[0], vec![1.0, 2.0]);
        assert_eq!(buffer.channels()[1], vec![-1.0, -2.0]);
        assert_eq!(buffer.to_interleaved(), vec![1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn mono_averages_channels() {
        let buffer = AudioBuffer::new(vec![vec![1.0, 0.0], vec![0.0, 0.5]], 8000).unwrap();
        assert_eq!(buffer.mono(), vec![0.5, 0.25]);
    }

    #[test]
    fn slice_copies_range() {
        let buffer = AudioBuffer::from_mono((0..10).map(|i| i as f32).collect(), 10).unwrap();
        let part = buffer.slice(2..5).unwrap();
        assert_eq!(part.channels()[0], vec![2.0, 3.0, 4.0]);
        assert_eq!(part.sample_rate(), 10);
        assert!(buffer.slice(5..11).is_err());
    }

    #[test]
    fn duration_from_frames() {
        let buffer = AudioBuffer::from_mono(vec![0.0; 22050], 44100).unwrap();
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-12);
        assert_eq!(buffer.seconds_to_frames(0.25), 11025);
    }
}
