//! sotto - real-time streaming speech-to-text with speaker diarization.
//!
//! Captures audio from a live device or WAV file, transcribes it through a
//! sliding-window streaming pipeline, and tags every emitted chunk with a
//! stable session-local speaker label (S0, S1, ...) that is retroactively
//! corrected as evidence accumulates.
//!
//! ```text
//! AudioSource ──▶ AudioQueue ──▶ processing thread
//!                                    ├─▶ StreamingWindow ─▶ AsrEngine ─▶ HoldEmitArbiter ─▶ chunks
//!                                    └─▶ FrameAnalyzer ─▶ SpeakerEmbedder ─▶ SpeakerClusterer
//! ```
//!
//! The entry point is [`controller::TranscriptionController`].

pub mod asr;
pub mod audio;
pub mod cli;
pub mod config;
pub mod controller;
pub mod defaults;
pub mod diar;
pub mod error;
pub mod streaming;

pub use config::TranscriptionConfig;
pub use controller::TranscriptionController;
pub use error::{Result, SottoError};
