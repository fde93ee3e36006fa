//! Live audio capture using CPAL (Cross-Platform Audio Library).

use crate::audio::file::WavFileSource;
use crate::audio::source::{
    AudioChunk, AudioDeviceInfo, AudioSource, SourceConfig, FILE_DEVICE_ID,
};
use crate::defaults;
use crate::error::{Result, SottoError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to
/// users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2
/// (stderr). Safe as long as no other thread is concurrently manipulating
/// fd 2.
#[cfg(unix)]
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

#[cfg(not(unix))]
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

/// Device name patterns to filter out (not useful for voice input).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// Enumerate audio input devices.
///
/// Always includes the file-backed source descriptor, so callers can offer
/// file transcription alongside live capture. Obviously unusable devices
/// (surround channels, HDMI outputs) are filtered out.
pub fn enumerate_devices() -> Result<Vec<AudioDeviceInfo>> {
    let mut devices = Vec::new();

    with_suppressed_stderr(|| -> Result<()> {
        let host = cpal::default_host();
        let default_name = host
            .default_input_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_default();

        if let Ok(inputs) = host.input_devices() {
            for device in inputs {
                let Ok(name) = device.name() else { continue };
                if should_filter_device(&name) {
                    continue;
                }
                let config = device.default_input_config().ok();
                devices.push(AudioDeviceInfo {
                    id: name.clone(),
                    name: name.clone(),
                    driver: host.id().name().to_string(),
                    native_rate_hz: config
                        .as_ref()
                        .map(|c| c.sample_rate().0)
                        .unwrap_or(defaults::SAMPLE_RATE),
                    max_channels: config.as_ref().map(|c| c.channels()).unwrap_or(1),
                    is_default: name == default_name,
                });
            }
        }
        Ok(())
    })?;

    devices.push(AudioDeviceInfo {
        id: FILE_DEVICE_ID.to_string(),
        name: "WAV file playback".to_string(),
        driver: "File".to_string(),
        native_rate_hz: defaults::SAMPLE_RATE,
        max_channels: 2,
        is_default: false,
    });

    Ok(devices)
}

/// Open an audio source for the given configuration.
///
/// `device_id` of `"file"` (or a configured `file_path`) selects the WAV
/// file source; anything else opens a live capture device, with the empty
/// string meaning the system default.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn AudioSource>> {
    if config.device_id == FILE_DEVICE_ID || config.file_path.is_some() {
        let path = config
            .file_path
            .as_deref()
            .ok_or_else(|| SottoError::InvalidConfig {
                key: "file_path".to_string(),
                message: "file source selected but no path given".to_string(),
            })?;
        return Ok(Box::new(WavFileSource::open(path, config)?));
    }
    Ok(Box::new(CpalAudioSource::open(config)?))
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched from the thread that owns the
/// enclosing `CpalAudioSource`; stream methods are called synchronously and
/// never cross thread boundaries.
struct SendableStream(cpal::Stream);
unsafe impl Send for SendableStream {}

struct SharedBuffer {
    samples: Mutex<VecDeque<i16>>,
    available: Condvar,
}

/// Live capture source backed by a cpal input stream.
///
/// The device callback downmixes to mono and appends into a shared buffer;
/// `read_chunk` drains 20ms slices from it.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Option<SendableStream>,
    buffer: Arc<SharedBuffer>,
    failed: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    chunk_samples: usize,
    sequence: u64,
    active: bool,
}

impl CpalAudioSource {
    /// Resolve the configured device without starting a stream.
    pub fn open(config: &SourceConfig) -> Result<Self> {
        let device = with_suppressed_stderr(|| -> Result<cpal::Device> {
            let host = cpal::default_host();
            if config.device_id.is_empty() || config.device_id == "default" {
                return host
                    .default_input_device()
                    .ok_or_else(|| SottoError::DeviceUnavailable {
                        device: "default".to_string(),
                    });
            }
            let mut inputs =
                host.input_devices()
                    .map_err(|e| SottoError::DeviceUnavailable {
                        device: format!("{} ({})", config.device_id, e),
                    })?;
            inputs
                .find(|d| d.name().map(|n| n == config.device_id).unwrap_or(false))
                .ok_or_else(|| SottoError::DeviceUnavailable {
                    device: config.device_id.clone(),
                })
        })?;

        let supported =
            device
                .default_input_config()
                .map_err(|e| SottoError::DeviceUnavailable {
                    device: format!("{} ({})", config.device_id, e),
                })?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        Ok(Self {
            device,
            stream: None,
            buffer: Arc::new(SharedBuffer {
                samples: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
            }),
            failed: Arc::new(AtomicBool::new(false)),
            sample_rate,
            channels,
            chunk_samples: defaults::chunk_samples(sample_rate).max(1),
            sequence: 0,
            active: false,
        })
    }

    /// The device's actual capture rate (may differ from the requested one).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn push_mono(buffer: &SharedBuffer, mono: impl Iterator<Item = i16>) {
        let mut samples = buffer.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.extend(mono);
        drop(samples);
        buffer.available.notify_one();
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let supported =
            self.device
                .default_input_config()
                .map_err(|e| SottoError::DeviceUnavailable {
                    device: format!("input config: {}", e),
                })?;
        let stream_config: cpal::StreamConfig = supported.config();
        let channels = self.channels as usize;
        let buffer = self.buffer.clone();
        let failed = self.failed.clone();
        let err_buffer = self.buffer.clone();
        let err_fn = move |err: cpal::StreamError| {
            log::warn!("capture stream error: {}", err);
            failed.store(true, Ordering::SeqCst);
            err_buffer.available.notify_all();
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _| {
                        Self::push_mono(
                            &buffer,
                            data.chunks(channels).map(|frame| {
                                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                                (sum / channels as i32) as i16
                            }),
                        );
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| SottoError::DeviceUnavailable {
                    device: format!("build stream: {}", e),
                })?,
            cpal::SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _| {
                        Self::push_mono(
                            &buffer,
                            data.chunks(channels).map(|frame| {
                                let sum: f32 = frame.iter().sum();
                                let v = (sum / channels as f32).clamp(-1.0, 1.0);
                                (v * 32767.0) as i16
                            }),
                        );
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| SottoError::DeviceUnavailable {
                    device: format!("build stream: {}", e),
                })?,
            other => {
                return Err(SottoError::AudioCapture {
                    message: format!("unsupported capture sample format: {:?}", other),
                })
            }
        };
        Ok(stream)
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        let stream = self.build_stream()?;
        stream.play().map_err(|e| SottoError::DeviceUnavailable {
            device: format!("play: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        self.failed.store(false, Ordering::SeqCst);
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stream = None;
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active && !self.failed.load(Ordering::SeqCst)
    }

    fn read_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if !self.active {
            return Ok(None);
        }

        let mut samples = self
            .buffer
            .samples
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut waits = 0u32;
        while samples.len() < self.chunk_samples {
            if self.failed.load(Ordering::SeqCst) {
                self.active = false;
                return Err(SottoError::AudioCapture {
                    message: "capture device lost".to_string(),
                });
            }
            let (guard, result) = self
                .buffer
                .available
                .wait_timeout(samples, Duration::from_millis(200))
                .unwrap_or_else(|e| e.into_inner());
            samples = guard;
            if result.timed_out() {
                waits += 1;
                // A healthy device delivers continuously. Surface a stall
                // as a transient error so the caller can re-check
                // cancellation instead of blocking here indefinitely.
                if waits >= 25 {
                    return Err(SottoError::TransientRead {
                        message: "no audio from capture device for 5s".to_string(),
                    });
                }
            }
        }

        let chunk: Vec<i16> = samples.drain(..self.chunk_samples).collect();
        drop(samples);

        let sequence = self.sequence;
        self.sequence += 1;
        Ok(Some(AudioChunk {
            sequence,
            sample_rate: self.sample_rate,
            channels: 1,
            samples: chunk,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_patterns() {
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("surround51:CARD=PCH"));
        assert!(should_filter_device("front:CARD=PCH,DEV=0"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Microphone"));
    }

    #[test]
    fn test_enumerate_always_includes_file_source() {
        // Device enumeration may find nothing in CI, but the file descriptor
        // is always present.
        let devices = enumerate_devices().unwrap();
        assert!(devices.iter().any(|d| d.id == FILE_DEVICE_ID));
    }

    #[test]
    fn test_open_source_file_without_path_is_invalid() {
        let config = SourceConfig {
            device_id: FILE_DEVICE_ID.to_string(),
            ..SourceConfig::default()
        };
        assert!(matches!(
            open_source(&config),
            Err(SottoError::InvalidConfig { .. })
        ));
    }
}
