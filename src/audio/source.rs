//! Audio source abstraction.
//!
//! A source produces a monotonic sequence of [`AudioChunk`]s from either a
//! live capture device or a file. Implementations downmix to mono; the
//! reported sample rate may differ from the requested one and is carried on
//! every chunk.

use crate::defaults;
use crate::error::{Result, SottoError};

/// Device id of the built-in file-backed source.
pub const FILE_DEVICE_ID: &str = "file";

/// A short run of captured mono audio.
///
/// Chunks within one session carry monotonically non-decreasing sequence
/// numbers and represent a contiguous prefix of the stream: silent fills are
/// allowed, reordering is not.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Monotonic sequence number within the session.
    pub sequence: u64,
    /// Actual sample rate of `samples`, in Hz.
    pub sample_rate: u32,
    /// Channel count (always 1 here; downmix happens in the source).
    pub channels: u16,
    /// Signed 16-bit PCM samples.
    pub samples: Vec<i16>,
}

impl AudioChunk {
    /// Returns the duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Metadata about an audio input device.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    /// Unique device identifier (platform-specific; `"file"` for the
    /// file-backed source).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Driver/API name ("ALSA", "CoreAudio", "File").
    pub driver: String,
    /// Native sample rate in Hz.
    pub native_rate_hz: u32,
    /// Maximum supported channels.
    pub max_channels: u16,
    /// Is this the system default device?
    pub is_default: bool,
}

/// Configuration for opening an audio source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Device to use (empty = system default).
    pub device_id: String,
    /// Requested sample rate; the actual rate may differ.
    pub preferred_rate_hz: u32,
    /// Requested channels (1 or 2; output is always downmixed to mono).
    pub channels: u16,
    /// Capture buffer size hint in milliseconds.
    pub buffer_hint_ms: u32,
    /// File path for the file-backed source.
    pub file_path: Option<std::path::PathBuf>,
    /// Loop file playback instead of ending at EOF.
    pub loop_playback: bool,
    /// Pace file reads at real time, as if the file were playing aloud.
    pub playback_to_output: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            preferred_rate_hz: defaults::SAMPLE_RATE,
            channels: 1,
            buffer_hint_ms: 100,
            file_path: None,
            loop_playback: false,
            playback_to_output: false,
        }
    }
}

/// Trait for audio capture sources.
///
/// This trait allows swapping implementations (live device, file, mock).
/// `read_chunk` blocks until a chunk is available and returns `None` once
/// the source is exhausted (file sources at EOF, live sources after `stop`).
pub trait AudioSource: Send {
    /// Start producing chunks.
    ///
    /// Device-open failures are reported here, synchronously, as
    /// [`SottoError::DeviceUnavailable`].
    fn start(&mut self) -> Result<()>;

    /// Stop production. Any partially filled chunk may be discarded.
    fn stop(&mut self) -> Result<()>;

    /// True while the source is producing chunks.
    fn is_active(&self) -> bool;

    /// Read the next chunk, blocking until one is available.
    ///
    /// Returns `Ok(None)` at end of source. Transient glitches surface as
    /// [`SottoError::TransientRead`]; the caller may keep reading.
    fn read_chunk(&mut self) -> Result<Option<AudioChunk>>;
}

/// Forwarding impl so boxed sources compose with wrappers.
impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn read_chunk(&mut self) -> Result<Option<AudioChunk>> {
        (**self).read_chunk()
    }
}

/// Wraps a source and ends it after a fixed duration of audio has been
/// read, independent of the source's sample rate.
///
/// Backs the CLI `--limit-seconds` flag.
pub struct TimeLimitedSource<S: AudioSource> {
    inner: S,
    remaining_ms: u64,
}

impl<S: AudioSource> TimeLimitedSource<S> {
    pub fn new(inner: S, limit_seconds: u64) -> Self {
        Self {
            inner,
            remaining_ms: limit_seconds * 1000,
        }
    }
}

impl<S: AudioSource> AudioSource for TimeLimitedSource<S> {
    fn start(&mut self) -> Result<()> {
        self.inner.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.inner.stop()
    }

    fn is_active(&self) -> bool {
        self.remaining_ms > 0 && self.inner.is_active()
    }

    fn read_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if self.remaining_ms == 0 {
            return Ok(None);
        }
        match self.inner.read_chunk()? {
            Some(mut chunk) => {
                let duration = chunk.duration_ms();
                if duration >= self.remaining_ms {
                    let keep =
                        (self.remaining_ms * chunk.sample_rate as u64 / 1000) as usize;
                    chunk.samples.truncate(keep);
                    self.remaining_ms = 0;
                } else {
                    self.remaining_ms -= duration;
                }
                Ok(Some(chunk))
            }
            None => Ok(None),
        }
    }
}

/// Mock audio source for testing.
///
/// Emits a scripted series of chunks, then reports end-of-source. Failures
/// can be injected at start or read time.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    chunks: Vec<Vec<i16>>,
    position: usize,
    sequence: u64,
    sample_rate: u32,
    active: bool,
    chunk_delay: Option<std::time::Duration>,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a mock that emits nothing and immediately ends.
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            position: 0,
            sequence: 0,
            sample_rate: defaults::SAMPLE_RATE,
            active: false,
            chunk_delay: None,
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Script an explicit list of chunks.
    pub fn with_chunks(mut self, chunks: Vec<Vec<i16>>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Script a single contiguous buffer, split into 20ms chunks.
    pub fn with_samples(self, samples: Vec<i16>) -> Self {
        let rate = self.sample_rate;
        let n = defaults::chunk_samples(rate).max(1);
        let chunks = samples.chunks(n).map(|c| c.to_vec()).collect();
        self.with_chunks(chunks)
    }

    /// Override the sample rate reported on every chunk.
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Sleep this long before each read, simulating capture cadence.
    pub fn with_chunk_delay_ms(mut self, delay_ms: u64) -> Self {
        self.chunk_delay = Some(std::time::Duration::from_millis(delay_ms));
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on the first read.
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for injected failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(SottoError::DeviceUnavailable {
                device: self.error_message.clone(),
            });
        }
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active && self.position < self.chunks.len()
    }

    fn read_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if self.should_fail_read {
            self.should_fail_read = false;
            return Err(SottoError::TransientRead {
                message: self.error_message.clone(),
            });
        }
        if self.position >= self.chunks.len() {
            self.active = false;
            return Ok(None);
        }
        if let Some(delay) = self.chunk_delay {
            std::thread::sleep(delay);
        }
        let samples = self.chunks[self.position].clone();
        self.position += 1;
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(Some(AudioChunk {
            sequence,
            sample_rate: self.sample_rate,
            channels: 1,
            samples,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk {
            sequence: 0,
            sample_rate: 16_000,
            channels: 1,
            samples: vec![0i16; 16_000],
        };
        assert_eq!(chunk.duration_ms(), 1000);
    }

    #[test]
    fn test_chunk_duration_zero_rate() {
        let chunk = AudioChunk {
            sequence: 0,
            sample_rate: 0,
            channels: 1,
            samples: vec![0i16; 100],
        };
        assert_eq!(chunk.duration_ms(), 0);
    }

    #[test]
    fn test_mock_emits_scripted_chunks_in_order() {
        let mut source = MockAudioSource::new().with_chunks(vec![vec![1i16; 320], vec![2i16; 320]]);
        source.start().unwrap();

        let first = source.read_chunk().unwrap().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.samples[0], 1);

        let second = source.read_chunk().unwrap().unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.samples[0], 2);

        assert!(source.read_chunk().unwrap().is_none());
        assert!(!source.is_active());
    }

    #[test]
    fn test_mock_with_samples_splits_into_20ms_chunks() {
        let mut source = MockAudioSource::new().with_samples(vec![7i16; 960]);
        source.start().unwrap();

        // 960 samples at 16kHz = three 320-sample chunks
        let mut total = 0;
        let mut count = 0;
        while let Some(chunk) = source.read_chunk().unwrap() {
            total += chunk.samples.len();
            count += 1;
        }
        assert_eq!(total, 960);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_mock_start_failure() {
        let mut source = MockAudioSource::new().with_start_failure();
        let result = source.start();
        assert!(matches!(
            result,
            Err(SottoError::DeviceUnavailable { .. })
        ));
        assert!(!source.is_active());
    }

    #[test]
    fn test_mock_read_failure_is_transient() {
        let mut source = MockAudioSource::new()
            .with_samples(vec![5i16; 320])
            .with_read_failure();
        source.start().unwrap();

        assert!(matches!(
            source.read_chunk(),
            Err(SottoError::TransientRead { .. })
        ));
        // Source recovers after the transient error
        assert!(source.read_chunk().unwrap().is_some());
    }

    #[test]
    fn test_mock_sample_rate_override() {
        let mut source = MockAudioSource::new()
            .with_sample_rate(48_000)
            .with_chunks(vec![vec![0i16; 960]]);
        source.start().unwrap();

        let chunk = source.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.sample_rate, 48_000);
    }

    #[test]
    fn test_time_limited_source_truncates() {
        let source =
            MockAudioSource::new().with_chunks(vec![vec![0i16; 16_000], vec![0i16; 16_000]]);
        let mut limited = TimeLimitedSource::new(source, 1);
        limited.start().unwrap();

        let first = limited.read_chunk().unwrap().unwrap();
        assert_eq!(first.samples.len(), 16_000);
        assert!(limited.read_chunk().unwrap().is_none());
    }

    #[test]
    fn test_time_limited_source_partial_chunk() {
        // 1.5s chunk against a 1s limit: truncated to 1s
        let source = MockAudioSource::new().with_chunks(vec![vec![0i16; 24_000]]);
        let mut limited = TimeLimitedSource::new(source, 1);
        limited.start().unwrap();

        let chunk = limited.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.samples.len(), 16_000);
        assert!(limited.read_chunk().unwrap().is_none());
    }

    #[test]
    fn test_time_limited_respects_source_rate() {
        // 48kHz source: one second is 48000 samples
        let source = MockAudioSource::new()
            .with_sample_rate(48_000)
            .with_chunks(vec![vec![0i16; 96_000]]);
        let mut limited = TimeLimitedSource::new(source, 1);
        limited.start().unwrap();

        let chunk = limited.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.samples.len(), 48_000);
        assert!(limited.read_chunk().unwrap().is_none());
    }

    #[test]
    fn test_boxed_source_forwards() {
        let boxed: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_samples(vec![2i16; 320]));
        let mut limited = TimeLimitedSource::new(boxed, 10);
        limited.start().unwrap();
        assert!(limited.read_chunk().unwrap().is_some());
    }

    #[test]
    fn test_source_config_default() {
        let config = SourceConfig::default();
        assert_eq!(config.preferred_rate_hz, 16_000);
        assert_eq!(config.channels, 1);
        assert!(config.device_id.is_empty());
        assert!(config.file_path.is_none());
        assert!(!config.loop_playback);
    }

    #[test]
    fn test_source_trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_samples(vec![1i16; 320]));
        source.start().unwrap();
        assert!(source.read_chunk().unwrap().is_some());
        source.stop().unwrap();
    }
}
