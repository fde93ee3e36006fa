//! ASR engine adapters.
//!
//! The pipeline is engine-agnostic: it consumes [`AsrEngine`], which maps a
//! 16kHz mono buffer to time-ordered, non-overlapping segments with
//! buffer-relative millisecond timings. The whisper.cpp adapter lives behind
//! the `whisper` cargo feature; tests use the scripted [`MockAsrEngine`].

pub mod engine;
pub mod whisper;

pub use engine::{AsrEngine, AsrSegment, AsrWord, MockAsrEngine};
pub use whisper::{WhisperConfig, WhisperEngine};
