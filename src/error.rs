//! Error types for longform.

use crate::pipeline::error::PipelineError;
use crate::segment::SegmentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LongformError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Unknown configuration key: {key}")]
    ConfigUnknownKey { key: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Credential errors
    #[error("API credential not set (expected environment variable {var})")]
    CredentialMissing { var: String },

    // Input errors
    #[error("Segmentation failed: {0}")]
    Segment(#[from] SegmentError),

    #[error("HTTP client setup failed: {message}")]
    HttpClient { message: String },

    // Pipeline errors
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LongformError>;
