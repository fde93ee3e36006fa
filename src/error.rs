//! Error types for sotto.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SottoError {
    // Capture errors
    #[error("Audio device unavailable: {device}")]
    DeviceUnavailable { device: String },

    #[error("Transient read error: {message}")]
    TransientRead { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Engine errors
    #[error("Failed to load model {model}: {message}")]
    ModelLoadFailed { model: String, message: String },

    #[error("Engine failure: {message}")]
    EngineFailure { message: String },

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Lifecycle errors
    #[error("Lifecycle violation: {message}")]
    LifecycleViolation { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl SottoError {
    /// True if this error should tear down the session rather than be
    /// reported as a warning and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SottoError::DeviceUnavailable { .. }
                | SottoError::ModelLoadFailed { .. }
                | SottoError::InvalidConfig { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SottoError>;
