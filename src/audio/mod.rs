//! Audio I/O and sample-rate conversion.

pub mod resample;
pub mod wav;

pub use resample::{resample, ANALYSIS_SAMPLE_RATE};
pub use wav::{frames_to_duration, read_wav, read_wav_from, write_wav, write_wav_to_buffer};
