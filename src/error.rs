//! Error taxonomy for attachment interception
//!
//! None of these ever reach the host framework: the hook boundary turns
//! every variant into a log entry and passes the request through.

use thiserror::Error;

/// Errors that can occur while detecting, decoding or forwarding an attachment
#[derive(Debug, Error)]
pub enum InterceptError {
    /// Content part or attachment entry does not match any known encoding
    #[error("Unrecognized shape: {0}")]
    UnrecognizedShape(String),
    /// Base64 or data-URL parsing failed
    #[error("Decode error: {0}")]
    Decode(String),
    /// Upload endpoint unreachable or timed out
    #[error("Network error: {0}")]
    Network(String),
    /// Upload endpoint answered with something other than 200
    #[error("Upstream error: {status} - {body}")]
    Upstream {
        /// HTTP status code returned by the endpoint
        status: u16,
        /// Response body, truncated
        body: String,
    },
    /// Staging the temporary file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<base64::DecodeError> for InterceptError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for InterceptError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}
