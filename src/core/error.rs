//! Structured error handling for the VQ-CPC core
//!
//! Every failure in this crate is synchronous and fatal: a call either
//! returns well-formed tensors or fails outright. There are no retry or
//! partial-failure paths.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias with VqcpcError
pub type Result<T> = std::result::Result<T, VqcpcError>;

/// Main error type for the VQ-CPC core
#[derive(Error, Debug)]
pub enum VqcpcError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Tensor shape errors
    #[error("Shape error in {operation}: {message}")]
    Shape {
        operation: &'static str,
        message: String,
    },

    /// Negative sampling errors
    #[error("Negative sampling error: {message}")]
    Sampling { message: String },

    /// Tensor backend errors
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    /// I/O errors (config loading, checkpoint save)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config deserialization errors
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl VqcpcError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with the offending file path
    pub fn config_with_path(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create a shape error
    pub fn shape(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Shape {
            operation,
            message: message.into(),
        }
    }

    /// Create a sampling error
    pub fn sampling(message: impl Into<String>) -> Self {
        Self::Sampling {
            message: message.into(),
        }
    }
}
