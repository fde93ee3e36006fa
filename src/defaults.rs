//! Default tuning constants for sotto.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Audio sample rate the processing pipeline operates at, in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
/// Capture sources may run at other rates; audio is resampled to this rate
/// before it reaches the streaming window.
pub const SAMPLE_RATE: u32 = 16_000;

/// Capture chunk cadence in milliseconds.
///
/// 20ms chunks are standard for audio streaming and keep timing jitter low
/// on both live and file-backed sources.
pub const CHUNK_MS: u32 = 20;

/// Sliding-window buffer size in milliseconds.
pub const WINDOW_MS: u32 = 10_000;

/// Overlap retained between consecutive windows, in milliseconds.
///
/// Also the size of the hold zone: segments that end past
/// `WINDOW_MS - OVERLAP_MS` are deferred to the next window.
pub const OVERLAP_MS: u32 = 5_000;

/// Bounded audio queue capacity, in chunks (about one second at 20ms chunks).
pub const QUEUE_CAPACITY: usize = 50;

/// Windows whose new audio is at or below this RMS level are skipped.
pub const SILENCE_GATE_DBFS: f32 = -55.0;

/// Minimum new audio required before a window is worth transcribing (1s).
pub const MIN_WINDOW_SAMPLES: usize = SAMPLE_RATE as usize;

/// Minimum samples for the end-of-stream flush pass (0.5s).
pub const MIN_FLUSH_SAMPLES: usize = SAMPLE_RATE as usize / 2;

/// Minimum segment length for a reliable speaker embedding (0.5s).
pub const MIN_EMBED_SAMPLES: usize = SAMPLE_RATE as usize / 2;

/// Hop between consecutive speaker-embedding frames, in milliseconds.
pub const FRAME_HOP_MS: u32 = 250;

/// Analysis window for each speaker-embedding frame, in milliseconds.
pub const FRAME_WINDOW_MS: u32 = 1_000;

/// How much frame history the analyzer retains, in seconds (0 = unbounded).
pub const FRAME_HISTORY_SEC: u32 = 60;

/// Default maximum number of speakers to track.
pub const MAX_SPEAKERS: usize = 2;

/// Default cosine similarity threshold for speaker assignment.
///
/// Tuned for the built-in log-mel embedder. Neural embedders separate
/// speakers more sharply and typically want 0.45-0.60; see the
/// `SpeakerEmbedder` docs in [`crate::diar`].
pub const SPEAKER_THRESHOLD: f32 = 0.35;

/// Extra similarity an existing competitor needs before the clusterer
/// switches away from the current speaker.
pub const SWITCH_MARGIN: f32 = 0.15;

/// Margin above the base threshold below which a new speaker may still be
/// created instead of joining a weak match.
pub const NEW_SPEAKER_MARGIN: f32 = 0.10;

/// Minimum frames the clusterer must dwell on a speaker before switching.
pub const MIN_FRAMES_BEFORE_SWITCH: u32 = 3;

/// Learning rate for the online centroid running average.
pub const CENTROID_LEARNING_RATE: f32 = 0.05;

/// Chunk history retention cap.
pub const HISTORY_CAP: usize = 10_000;

/// Default ASR model identifier.
pub const DEFAULT_ASR_MODEL: &str = "tiny.en";

/// Default language code for transcription.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Number of samples per capture chunk at the given rate.
pub const fn chunk_samples(sample_rate: u32) -> usize {
    (sample_rate as usize * CHUNK_MS as usize) / 1000
}

/// Convert a millisecond duration to a sample count at the pipeline rate.
pub const fn ms_to_samples(ms: u32) -> usize {
    (ms as usize * SAMPLE_RATE as usize) / 1000
}

/// Convert a sample count at the pipeline rate to milliseconds.
pub const fn samples_to_ms(samples: usize) -> u64 {
    (samples as u64 * 1000) / SAMPLE_RATE as u64
}
