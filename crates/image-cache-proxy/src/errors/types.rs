//! Error type definitions for the image cache proxy
//!
//! Every error here is recoverable from the client's point of view: request
//! paths turn them into the best response still available and the conversion
//! pipeline turns them into "no conversion".

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Disk store errors
    #[error("Storage error: {0}")]
    Storage(#[from] sandboxed_file_manager::SandboxedFileError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while talking to an origin or external proxy
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u128 },

    #[error("Response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] http::Error),
}

/// Reasons a cached image is not converted
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("Source is {size} bytes, limit is {limit}")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("Declared dimensions {width}x{height} exceed the limit")]
    DimensionsExceeded { width: u32, height: u32 },

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    /// The blocking codec task panicked or was cancelled
    #[error("Codec task failed: {0}")]
    TaskFailed(String),
}

/// Errors on the external-proxy fallback path
#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("External proxy returned status {0}")]
    Status(u16),

    #[error("External proxy returned non-image content type: {0}")]
    NotAnImage(String),

    #[error("Could not build external proxy URL for {0}")]
    InvalidTarget(String),

    #[error("External proxy fetch failed: {0}")]
    Transport(#[from] TransportError),
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl ConversionError {
    /// Size and dimension guards, as opposed to codec failures.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Self::SourceTooLarge { .. } | Self::DimensionsExceeded { .. } | Self::UnsupportedFormat(_)
        )
    }
}
