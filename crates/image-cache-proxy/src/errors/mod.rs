//! Centralized error handling for the image cache proxy
//!
//! # Error Categories
//!
//! - **Transport Errors**: origin and external proxy fetches
//! - **Conversion Errors**: guards and codec failures during transcoding
//! - **Fallback Errors**: external proxy responses that cannot be served
//! - **Storage Errors**: the sandboxed disk store

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for transport Results
pub type TransportResult<T> = Result<T, TransportError>;

/// Convenience type alias for conversion Results
pub type ConversionResult<T> = Result<T, ConversionError>;
