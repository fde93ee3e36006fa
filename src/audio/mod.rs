//! Audio capture, buffering, and format conversion.
//!
//! Everything upstream of the processing pipeline lives here: the
//! [`AudioSource`] abstraction over live and file-backed capture, the
//! bounded [`AudioQueue`] that decouples capture cadence from processing
//! cadence, the resampler that normalizes arbitrary input rates to 16kHz,
//! and a WAV sink for optionally recording the captured stream.

pub mod capture;
pub mod file;
pub mod queue;
pub mod resample;
pub mod source;
pub mod writer;

pub use capture::{enumerate_devices, open_source, CpalAudioSource};
pub use file::WavFileSource;
pub use queue::{AudioQueue, PushOutcome};
pub use resample::{resample, resample_to_16k};
pub use source::{
    AudioChunk, AudioDeviceInfo, AudioSource, MockAudioSource, SourceConfig, TimeLimitedSource,
    FILE_DEVICE_ID,
};
pub use writer::CaptureWriter;
