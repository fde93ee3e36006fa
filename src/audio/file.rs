//! WAV file audio source.
//!
//! Reads a WAV file, downmixes to mono at the file's native rate, and emits
//! 20ms chunks. Reads are paced at real time when `playback_to_output` is
//! set (one second of wall time per second of audio); otherwise pacing is
//! best-effort but never runs ahead of real time, so downstream behavior
//! matches a live device.

use crate::audio::source::{AudioChunk, AudioSource, SourceConfig};
use crate::defaults;
use crate::error::{Result, SottoError};
use std::path::Path;
use std::time::{Duration, Instant};

/// Audio source backed by a WAV file.
pub struct WavFileSource {
    samples: Vec<i16>,
    sample_rate: u32,
    cursor: usize,
    sequence: u64,
    chunk_samples: usize,
    loop_playback: bool,
    paced: bool,
    active: bool,
    started_at: Option<Instant>,
    delivered_samples: u64,
}

impl WavFileSource {
    /// Open a WAV file and prepare it for chunked reading.
    ///
    /// Stereo content is downmixed by channel averaging. Both 16-bit PCM and
    /// 32-bit float sample formats are accepted.
    pub fn open(path: &Path, config: &SourceConfig) -> Result<Self> {
        let mut reader = hound::WavReader::open(path).map_err(|e| SottoError::AudioCapture {
            message: format!("Failed to open WAV file {}: {}", path.display(), e),
        })?;

        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SottoError::AudioCapture {
                    message: format!("Failed to read WAV samples: {}", e),
                })?,
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .map(|s| {
                    s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0).round() as i16)
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SottoError::AudioCapture {
                    message: format!("Failed to read WAV samples: {}", e),
                })?,
        };

        // Downmix by averaging channels
        let samples: Vec<i16> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        let sample_rate = spec.sample_rate;
        Ok(Self {
            samples,
            sample_rate,
            cursor: 0,
            sequence: 0,
            chunk_samples: defaults::chunk_samples(sample_rate).max(1),
            loop_playback: config.loop_playback,
            paced: true,
            active: false,
            started_at: None,
            delivered_samples: 0,
        })
    }

    /// Disable real-time pacing (reads return as fast as the caller asks).
    ///
    /// Only for offline tooling and tests; the processing pipeline assumes
    /// sources do not run ahead of real time.
    pub fn without_pacing(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Duration of the file in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    /// The file's native sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total sample count after downmixing.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn pace(&self) {
        let Some(started) = self.started_at else {
            return;
        };
        // Sleep until wall time catches up with the audio already delivered.
        let audio_elapsed =
            Duration::from_micros(self.delivered_samples * 1_000_000 / self.sample_rate as u64);
        let wall_elapsed = started.elapsed();
        if audio_elapsed > wall_elapsed {
            std::thread::sleep(audio_elapsed - wall_elapsed);
        }
    }
}

impl AudioSource for WavFileSource {
    fn start(&mut self) -> Result<()> {
        if self.samples.is_empty() {
            return Err(SottoError::DeviceUnavailable {
                device: "file (empty WAV)".to_string(),
            });
        }
        self.active = true;
        self.started_at = Some(Instant::now());
        self.delivered_samples = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active && (self.loop_playback || self.cursor < self.samples.len())
    }

    fn read_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if !self.active {
            return Ok(None);
        }
        if self.cursor >= self.samples.len() {
            if self.loop_playback {
                self.cursor = 0;
            } else {
                self.active = false;
                return Ok(None);
            }
        }

        if self.paced {
            self.pace();
        }

        let end = (self.cursor + self.chunk_samples).min(self.samples.len());
        let samples = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        self.delivered_samples += samples.len() as u64;

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
