//! Error types for the lodtree crate.

use std::fmt;

use lodtree_decode::{DecodeError, NodeKey};

/// Result type for lodtree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lodtree operations.
///
/// Errors are `Clone` so a single failed fetch or build can be handed to
/// every caller waiting on it.
#[derive(Debug, Clone)]
pub enum Error {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// Source metadata is missing required fields or names an unsupported
    /// format.
    MalformedSource {
        /// Description of what was wrong.
        detail: String,
    },
    /// A hierarchy chunk decoded but lacks the entry of the requesting node.
    IllFormedData {
        /// The node whose load failed.
        key: NodeKey,
        /// Description of what was missing.
        detail: String,
    },
    /// Hierarchy or payload decoding failed.
    Decode(DecodeError),
    /// A JSON document could not be parsed.
    Json {
        /// Context for where the error occurred.
        context: &'static str,
        /// The error message.
        message: String,
    },
    /// The node handle does not refer to a live node.
    UnknownNode,
    /// An API was used out of order, such as counting a reference on a
    /// cache entry that was never initialized.
    Logic {
        /// Description of the misuse.
        detail: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::MalformedSource { detail } => write!(f, "malformed source: {detail}"),
            Error::IllFormedData { key, detail } => {
                write!(f, "ill-formed hierarchy for node {key}: {detail}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Json { context, message } => {
                write!(f, "failed to parse {context}: {message}")
            }
            Error::UnknownNode => write!(f, "node does not exist"),
            Error::Logic { detail } => write!(f, "logic error: {detail}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json {
            context: "json",
            message: e.to_string(),
        }
    }
}

impl Error {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Error::MalformedSource {
            detail: detail.into(),
        }
    }
}
