//! WAV file reading and writing.
//!
//! Loops are written as 32-bit float WAV. Reading accepts float and integer
//! PCM of any bit depth hound supports.

use std::io::{Read, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{DaemonError, Result};
use crate::types::AudioBuffer;

/// Writes a buffer to a 32-bit float WAV file.
///
/// # Example
///
/// ```ignore
/// use loopgen_daemon::audio::write_wav;
///
/// write_wav(&result.buffer, Path::new("/tmp/loop.wav"))?;
/// ```
pub fn write_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let writer = WavWriter::create(path, wav_spec(buffer)).map_err(|e| {
        DaemonError::audio_io(format!("Failed to create {}: {}", path.display(), e))
    })?;
    write_samples(writer, buffer)
}

/// Writes a buffer to an in-memory WAV file.
pub fn write_wav_to_buffer(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut bytes);
        let writer = WavWriter::new(std::io::BufWriter::new(cursor), wav_spec(buffer))?;
        write_samples(writer, buffer)?;
    }
    Ok(bytes)
}

/// Reads a WAV file into a buffer, normalizing samples to `[-1, 1]`.
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)
        .map_err(|e| DaemonError::audio_io(format!("Failed to open {}: {}", path.display(), e)))?;
    read_samples(reader)
}

/// Reads WAV data from any seekable source.
pub fn read_wav_from<R: Read + Seek>(source: R) -> Result<AudioBuffer> {
    read_samples(WavReader::new(source)?)
}

fn wav_spec(buffer: &AudioBuffer) -> WavSpec {
    WavSpec {
        channels: buffer.channel_count() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

fn write_samples<W: Write + Seek>(mut writer: WavWriter<W>, buffer: &AudioBuffer) -> Result<()> {
    for sample in buffer.to_interleaved() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

fn read_samples<R: Read>(mut reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    AudioBuffer::from_interleaved(&interleaved, spec.channels as usize, spec.sample_rate)
        .map_err(|e| DaemonError::audio_io(format!("Malformed WAV data: {}", e)))
}

/// Calculates the duration of audio in seconds from frame count.
pub fn frames_to_duration(frames: usize, sample_rate: u32) -> f32 {
    frames as f32 / sample_rate as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stereo() -> AudioBuffer {
        AudioBuffer::new(vec![vec![0.0, 0.5, -0.5], vec![0.25, -0.25, 1.0]], 32000).unwrap()
    }

    #[test]
    fn write_then_read_preserves_channels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop.wav");

        write_wav(&stereo(), &path).unwrap();
        assert!(path.exists());

        let spec = hound::WavReader::open(&path).unwrap().spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 32000);
        assert_eq!(spec.sample_format, SampleFormat::Float);

        let back = read_wav(&path).unwrap();
        assert_eq!(back, stereo());
    }

    #[test]
    fn in_memory_wav_has_riff_header() {
        let bytes = write_wav_to_buffer(&stereo()).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        let back = read_wav_from(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(back.len(), 3);
    }

    #[test]
    fn reads_16_bit_pcm_normalized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pcm16.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(i16::MAX).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.write_sample(i16::MIN).unwrap();
        writer.finalize().unwrap();

        let buffer = read_wav(&path).unwrap();
        let samples = &buffer.channels()[0];
        assert!((samples[0] - 1.0).abs() < 1e-3);
        assert_eq!(samples[1], 0.0);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn missing_file_is_audio_io_error() {
        let err = read_wav(Path::new("/nonexistent/loop.wav")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::AudioIoFailed);
    }

    #[test]
    fn frames_to_duration_calculation() {
        assert_eq!(frames_to_duration(32000, 32000), 1.0);
        assert_eq!(frames_to_duration(16000, 32000), 0.5);
    }
}
