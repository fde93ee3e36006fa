//! Speaker diarization: embeddings, frame analysis, and clustering.
//!
//! Two cooperating pathways track who is speaking:
//!
//! - the **online** path assigns a speaker to each ASR segment as it is
//!   emitted, using [`SpeakerClusterer::assign`] with hysteresis so labels
//!   stay stable under noisy embeddings;
//! - the **frame** path ([`FrameAnalyzer`]) extracts embeddings at a fixed
//!   hop independent of ASR segmentation, and feeds the terminal offline
//!   re-clustering pass that retroactively corrects early labels.

pub mod cluster;
pub mod embedder;
pub mod frames;
pub mod spectral;

pub use cluster::{cosine_similarity, Assignment, SpeakerClusterer};
pub use embedder::{MockSpeakerEmbedder, SpeakerEmbedder};
pub use frames::{FrameAnalyzer, FrameAnalyzerConfig, SpeakerFrame};
pub use spectral::SpectralEmbedder;
