//! whisper.cpp adapter for the [`AsrEngine`] trait.
//!
//! # Feature Gate
//!
//! This module requires the `whisper` feature to be enabled and cmake to be
//! installed. To build with Whisper support:
//!
//! ```bash
//! cargo build --features whisper
//! ```
//!
//! Without the feature a stub type is exported that fails at construction,
//! so downstream code can compile and run against mock engines.

use crate::asr::engine::AsrEngine;
use crate::defaults;
use crate::error::{Result, SottoError};
use std::path::{Path, PathBuf};

#[cfg(feature = "whisper")]
use crate::asr::engine::{AsrSegment, AsrWord};
#[cfg(feature = "whisper")]
use std::sync::Once;
#[cfg(feature = "whisper")]
use whisper_rs::{
    install_logging_hooks, FullParams, SamplingStrategy, WhisperContext,
    WhisperContextParameters,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for the Whisper engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Model identifier: a file path, or a short name resolved under
    /// `models/ggml-<name>.bin`.
    pub model: String,
    /// Language code (e.g. "en"); "auto" enables detection.
    pub language: String,
    /// Inference threads (0 = whisper.cpp default).
    pub threads: usize,
    /// Beam width for decoding. Beam search gives noticeably better segment
    /// boundaries on streaming windows than greedy sampling.
    pub beam_size: usize,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_ASR_MODEL.to_string(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: 0,
            beam_size: 5,
        }
    }
}

/// Resolve a model identifier to a file path.
///
/// An identifier that names an existing file is used as-is; otherwise it is
/// looked up as `models/ggml-<name>.bin` relative to the working directory.
pub fn resolve_model_path(identifier: &str) -> PathBuf {
    let direct = Path::new(identifier);
    if direct.exists() {
        return direct.to_path_buf();
    }
    PathBuf::from("models").join(format!("ggml-{}.bin", identifier))
}

/// Whisper-based ASR engine.
///
/// Wraps a `whisper.cpp` context; each transcription call creates a fresh
/// decoding state, so one engine serves a whole session.
#[cfg(feature = "whisper")]
pub struct WhisperEngine {
    context: WhisperContext,
    config: WhisperConfig,
    model_name: String,
}

/// Whisper-based ASR engine placeholder (without the `whisper` feature).
#[cfg(not(feature = "whisper"))]
pub struct WhisperEngine {
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl WhisperEngine {
    /// Load a model and construct the engine.
    ///
    /// # Errors
    /// Returns [`SottoError::ModelLoadFailed`] if the model file does not
    /// exist or whisper.cpp rejects it.
    pub fn load(config: WhisperConfig) -> Result<Self> {
        // Install logging hooks to silence whisper.cpp output (only once)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        let model_path = resolve_model_path(&config.model);
        if !model_path.exists() {
            return Err(SottoError::ModelLoadFailed {
                model: config.model.clone(),
                message: format!("model file not found at {}", model_path.display()),
            });
        }

        let model_name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let context_params = WhisperContextParameters::default();
        let context = WhisperContext::new_with_params(
            model_path.to_str().ok_or_else(|| SottoError::ModelLoadFailed {
                model: config.model.clone(),
                message: "invalid UTF-8 in model path".to_string(),
            })?,
            context_params,
        )
        .map_err(|e| SottoError::ModelLoadFailed {
            model: config.model.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            context,
            config,
            model_name,
        })
    }

    /// Convert i16 audio samples to f32 normalized to [-1.0, 1.0].
    fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples.iter().map(|&s| s as f32 / 32768.0).collect()
    }

    fn run(&mut self, samples: &[i16], with_words: bool) -> Result<Vec<AsrSegment>> {
        let audio = Self::convert_audio(samples);

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: self.config.beam_size as i32,
            patience: -1.0,
        });
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_special(false);
        params.set_print_timestamps(false);
        params.set_suppress_blank(true);
        params.set_token_timestamps(with_words);
        if self.config.threads > 0 {
            params.set_n_threads(self.config.threads as i32);
        }
        if self.config.language == "auto" {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.config.language));
        }

        let mut state = self
            .context
            .create_state()
            .map_err(|e| SottoError::EngineFailure {
                message: format!("create state: {}", e),
            })?;
        state
            .full(params, &audio)
            .map_err(|e| SottoError::EngineFailure {
                message: format!("inference: {}", e),
            })?;

        let n_segments = state.full_n_segments().map_err(|e| SottoError::EngineFailure {
            message: e.to_string(),
        })?;

        let mut segments = Vec::with_capacity(n_segments as usize);
        for i in 0..n_segments {
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| SottoError::EngineFailure {
                    message: e.to_string(),
                })?
                .trim()
                .to_string();
            if text.is_empty() {
                continue;
            }
            // whisper timestamps are in 10ms units
            let t0_ms = state.full_get_segment_t0(i).unwrap_or(0).max(0) as u64 * 10;
            let t1_ms = state.full_get_segment_t1(i).unwrap_or(0).max(0) as u64 * 10;

            let mut words = Vec::new();
            if with_words {
                let n_tokens = state.full_n_tokens(i).unwrap_or(0);
                for j in 0..n_tokens {
                    let Ok(token_text) = state.full_get_token_text(i, j) else {
                        continue;
                    };
                    // Skip special tokens like [_BEG_]
                    if token_text.starts_with('[') || token_text.starts_with("<|") {
                        continue;
                    }
                    if let Ok(data) = state.full_get_token_data(i, j) {
                        words.push(AsrWord {
                            text: token_text,
                            t0_ms: data.t0.max(0) as u64 * 10,
                            t1_ms: data.t1.max(0) as u64 * 10,
                            probability: data.p,
                        });
                    }
                }
            }

            segments.push(AsrSegment {
                text,
                t0_ms,
                t1_ms,
                words,
            });
        }

        Ok(segments)
    }
}

#[cfg(feature = "whisper")]
impl AsrEngine for WhisperEngine {
    fn transcribe(&mut self, samples: &[i16]) -> Result<Vec<AsrSegment>> {
        self.run(samples, false)
    }

    fn transcribe_with_words(&mut self, samples: &[i16]) -> Result<Vec<AsrSegment>> {
        self.run(samples, true)
    }

    fn set_threads(&mut self, n: usize) {
        self.config.threads = n;
    }

    fn set_language(&mut self, code: &str) {
        self.config.language = code.to_string();
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperEngine {
    /// Stub constructor: always fails, pointing at the missing feature.
    pub fn load(config: WhisperConfig) -> Result<Self> {
        Err(SottoError::ModelLoadFailed {
            model: config.model,
            message: "sotto was built without the `whisper` feature".to_string(),
        })
    }
}

#[cfg(not(feature = "whisper"))]
impl AsrEngine for WhisperEngine {
    fn transcribe(&mut self, _samples: &[i16]) -> Result<Vec<crate::asr::engine::AsrSegment>> {
        Err(SottoError::EngineFailure {
            message: "whisper feature not enabled".to_string(),
        })
    }

    fn transcribe_with_words(
        &mut self,
        _samples: &[i16],
    ) -> Result<Vec<crate::asr::engine::AsrSegment>> {
        Err(SottoError::EngineFailure {
            message: "whisper feature not enabled".to_string(),
        })
    }

    fn set_threads(&mut self, _n: usize) {}

    fn set_language(&mut self, code: &str) {
        self.config.language = code.to_string();
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        false
    }
}
