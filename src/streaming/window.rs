//! Sliding-window accumulator for streaming transcription.

use crate::defaults;
use crate::error::{Result, SottoError};

/// A full window ready for transcription.
#[derive(Debug)]
pub struct WindowView<'a> {
    /// The whole buffer, oldest sample first.
    pub samples: &'a [i16],
    /// Absolute time of `samples[0]`, ms since session start.
    pub buffer_start_ms: u64,
    /// Division between emit zone and hold zone, ms relative to the buffer
    /// start. Segments ending at or past this line are deferred.
    pub emit_boundary_ms: u64,
    /// Offset of audio not covered by any previous window, in samples
    /// relative to the buffer start (0 on the first window).
    pub new_audio_offset: usize,
}

/// Fixed-duration sliding buffer of 16kHz mono audio.
///
/// Samples accumulate until the buffer holds `window_ms`; after the window
/// is processed, [`StreamingWindow::slide`] discards the emit-zone prefix
/// and keeps the trailing `overlap_ms` as context for the next window.
/// `buffer_start_ms` only moves forward, and the buffer never exceeds
/// `window_ms` of audio.
#[derive(Debug)]
pub struct StreamingWindow {
    samples: Vec<i16>,
    buffer_start_ms: u64,
    window_samples: usize,
    overlap_samples: usize,
    emit_boundary_ms: u64,
    windows_produced: u64,
}

impl StreamingWindow {
    /// Create a window. Requires `0 < overlap_ms < window_ms`.
    pub fn new(window_ms: u32, overlap_ms: u32) -> Result<Self> {
        if overlap_ms == 0 || overlap_ms >= window_ms {
            return Err(SottoError::InvalidConfig {
                key: "overlap_ms".to_string(),
                message: format!(
                    "overlap ({overlap_ms}ms) must be positive and less than the window ({window_ms}ms)"
                ),
            });
        }
        Ok(Self {
            samples: Vec::with_capacity(defaults::ms_to_samples(window_ms)),
            buffer_start_ms: 0,
            window_samples: defaults::ms_to_samples(window_ms),
            overlap_samples: defaults::ms_to_samples(overlap_ms),
            emit_boundary_ms: (window_ms - overlap_ms) as u64,
            windows_produced: 0,
        })
    }

    /// Append samples, consuming at most up to the window boundary.
    ///
    /// Returns the number of samples consumed; the caller re-offers the
    /// remainder after processing and sliding the full window.
    pub fn append(&mut self, samples: &[i16]) -> usize {
        let room = self.window_samples - self.samples.len();
        let take = room.min(samples.len());
        self.samples.extend_from_slice(&samples[..take]);
        take
    }

    /// True once a full window of audio has accumulated.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.window_samples
    }

    /// The full window, if ready.
    pub fn ready_window(&self) -> Option<WindowView<'_>> {
        if !self.is_full() {
            return None;
        }
        Some(WindowView {
            samples: &self.samples,
            buffer_start_ms: self.buffer_start_ms,
            emit_boundary_ms: self.emit_boundary_ms,
            new_audio_offset: if self.windows_produced == 0 {
                0
            } else {
                self.overlap_samples
            },
        })
    }

    /// Discard the emit-zone prefix, keep the overlap tail, and advance
    /// `buffer_start_ms` by `window_ms - overlap_ms`.
    pub fn slide(&mut self) {
        if self.samples.len() > self.overlap_samples {
            let discard = self.samples.len() - self.overlap_samples;
            self.buffer_start_ms += defaults::samples_to_ms(discard);
            self.samples.drain(..discard);
        } else {
            self.buffer_start_ms += defaults::samples_to_ms(self.samples.len());
            self.samples.clear();
        }
        self.windows_produced += 1;
    }

    /// Take whatever remains for the end-of-stream flush.
    ///
    /// Returns the residual samples, the absolute time of their first
    /// sample, and the offset of audio no previous window covered.
    pub fn drain(&mut self) -> (Vec<i16>, u64, usize) {
        let new_audio_offset = if self.windows_produced == 0 {
            0
        } else {
            self.overlap_samples.min(self.samples.len())
        };
        let start_ms = self.buffer_start_ms;
        let samples = std::mem::take(&mut self.samples);
        self.buffer_start_ms += defaults::samples_to_ms(samples.len());
        (samples, start_ms, new_audio_offset)
    }

    /// Absolute time of the first buffered sample.
    pub fn buffer_start_ms(&self) -> u64 {
        self.buffer_start_ms
    }

    /// Samples currently buffered.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Full windows produced so far.
    pub fn windows_produced(&self) -> u64 {
        self.windows_produced
    }
}
