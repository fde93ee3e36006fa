//! Session configuration.

use crate::defaults;
use crate::error::{Result, SottoError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for one transcription session.
///
/// All fields have working defaults; a session started with
/// `TranscriptionConfig::default()` transcribes the default capture device
/// with the built-in spectral embedder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// ASR model identifier, interpreted by the engine adapter.
    pub asr_model: String,
    /// Speaker-embedding model identifier; empty selects the built-in
    /// spectral embedder.
    pub embedder_model: String,
    /// Language code for transcription ("auto" = detect).
    pub language: String,
    /// Inference threads (0 = engine default).
    pub threads: usize,

    /// Run the ASR engine (disabling leaves only diarization frames).
    pub enable_asr: bool,
    /// Run speaker diarization.
    pub enable_diarization: bool,
    /// Maximum number of speakers to track (1-10).
    pub max_speakers: usize,
    /// Cosine similarity threshold for speaker assignment.
    pub speaker_threshold: f32,

    /// Reserved for the engine's voice-activity detector.
    pub vad_silence_ms: u32,
    /// Emit chunks before the terminal recluster confirms their labels.
    /// When false, chunk events are withheld until they are finalized.
    pub enable_partial_results: bool,
    /// Hint for how often status updates are published, milliseconds.
    pub chunk_emission_interval_ms: u32,
    /// Allow retroactive speaker reassignment. When false, chunks are
    /// emitted with `finalized = true` and never updated.
    pub enable_reclassification: bool,
    /// How far back reclassification may reach, milliseconds from the end
    /// of the session (0 = unbounded).
    pub reclassification_window_ms: u64,

    /// Streaming window size, milliseconds.
    pub window_ms: u32,
    /// Streaming window overlap, milliseconds.
    pub overlap_ms: u32,
    /// Windows whose new audio is at or below this dBFS level are skipped.
    pub silence_gate_dbfs: f32,

    /// Record the resampled 16kHz capture stream to this WAV file.
    pub save_audio_path: Option<PathBuf>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            asr_model: defaults::DEFAULT_ASR_MODEL.to_string(),
            embedder_model: String::new(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: 0,
            enable_asr: true,
            enable_diarization: true,
            max_speakers: defaults::MAX_SPEAKERS,
            speaker_threshold: defaults::SPEAKER_THRESHOLD,
            vad_silence_ms: 1000,
            enable_partial_results: true,
            chunk_emission_interval_ms: 250,
            enable_reclassification: true,
            reclassification_window_ms: 0,
            window_ms: defaults::WINDOW_MS,
            overlap_ms: defaults::OVERLAP_MS,
            silence_gate_dbfs: defaults::SILENCE_GATE_DBFS,
            save_audio_path: None,
        }
    }
}

impl TranscriptionConfig {
    /// Validate the configuration, rejecting it whole on the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.max_speakers < 1 || self.max_speakers > 10 {
            return Err(SottoError::InvalidConfig {
                key: "max_speakers".to_string(),
                message: format!("{} is outside 1..=10", self.max_speakers),
            });
        }
        if !(-1.0..=1.0).contains(&self.speaker_threshold) {
            return Err(SottoError::InvalidConfig {
                key: "speaker_threshold".to_string(),
                message: format!("{} is outside -1.0..=1.0", self.speaker_threshold),
            });
        }
        if self.overlap_ms == 0 || self.overlap_ms >= self.window_ms {
            return Err(SottoError::InvalidConfig {
                key: "overlap_ms".to_string(),
                message: format!(
                    "overlap ({}ms) must be positive and less than window ({}ms)",
                    self.overlap_ms, self.window_ms
                ),
            });
        }
        if self.window_ms < 1000 {
            return Err(SottoError::InvalidConfig {
                key: "window_ms".to_string(),
                message: format!("{}ms is too small; minimum is 1000ms", self.window_ms),
            });
        }
        if self.enable_asr && self.asr_model.is_empty() {
            return Err(SottoError::InvalidConfig {
                key: "asr_model".to_string(),
                message: "ASR is enabled but no model is configured".to_string(),
            });
        }
        Ok(())
    }

    /// True when switching to `other` requires restarting the session.
    ///
    /// Model, engine, and windowing changes cannot be applied live; speaker
    /// tuning and event behavior can.
    pub fn requires_restart(&self, other: &Self) -> bool {
        self.asr_model != other.asr_model
            || self.embedder_model != other.embedder_model
            || self.language != other.language
            || self.threads != other.threads
            || self.enable_asr != other.enable_asr
            || self.enable_diarization != other.enable_diarization
            || self.window_ms != other.window_ms
            || self.overlap_ms != other.overlap_ms
            || self.silence_gate_dbfs != other.silence_gate_dbfs
            || self.save_audio_path != other.save_audio_path
    }

    /// Copy the live-tunable fields from `other`.
    pub fn apply_live_fields(&mut self, other: &Self) {
        self.max_speakers = other.max_speakers;
        self.speaker_threshold = other.speaker_threshold;
        self.enable_reclassification = other.enable_reclassification;
        self.reclassification_window_ms = other.reclassification_window_ms;
        self.enable_partial_results = other.enable_partial_results;
        self.chunk_emission_interval_ms = other.chunk_emission_interval_ms;
        self.vad_silence_ms = other.vad_silence_ms;
    }

    /// Load configuration from a TOML file.
    ///
    /// Missing fields take default values; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: TranscriptionConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, or fall back to defaults if the file
    /// does not exist. Invalid content is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: TranscriptionConfig = toml::from_str(&contents)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - `SOTTO_MODEL` -> `asr_model`
    /// - `SOTTO_LANGUAGE` -> `language`
    /// - `SOTTO_EMBEDDER` -> `embedder_model`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("SOTTO_MODEL") {
            if !model.is_empty() {
                self.asr_model = model;
            }
        }
        if let Ok(language) = std::env::var("SOTTO_LANGUAGE") {
            if !language.is_empty() {
                self.language = language;
            }
        }
        if let Ok(embedder) = std::env::var("SOTTO_EMBEDDER") {
            if !embedder.is_empty() {
                self.embedder_model = embedder;
            }
        }
        self
    }

    /// Default configuration file path (`~/.config/sotto/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sotto")
            .join("config.toml")
    }
}
