//! Error types for decoding operations.

use std::fmt;

/// Errors that can occur while decoding hierarchy pages or payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input buffer is too small for the expected data.
    BufferTooSmall { expected: usize, actual: usize },
    /// Invalid data format or structure.
    InvalidFormat {
        context: &'static str,
        detail: String,
    },
    /// A node key string could not be parsed.
    InvalidKey { key: String },
    /// The record layout does not fit inside the record stride.
    LayoutOutOfBounds { offset: usize, stride: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { expected, actual } => {
                write!(
                    f,
                    "buffer too small: expected {expected} bytes, got {actual}"
                )
            }
            Self::InvalidFormat { context, detail } => {
                write!(f, "invalid format in {context}: {detail}")
            }
            Self::InvalidKey { key } => write!(f, "invalid node key '{key}'"),
            Self::LayoutOutOfBounds { offset, stride } => {
                write!(f, "attribute at offset {offset} exceeds record stride {stride}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
