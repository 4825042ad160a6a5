//! Error types for the queue client

use regress_core::protocol::CodecError;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the queue
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code without an `Error:` body
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The queue answered with an `Error:` body
    #[error("{request} rejected: {message}")]
    Rejected {
        /// The request that was refused
        request: String,
        /// The error text, prefix included
        message: String,
    },

    /// A POST came back with something other than its success literal
    #[error("unexpected response to {request}: {body:?}")]
    UnexpectedResponse { request: String, body: String },

    /// Encoding the request or decoding the response failed
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if the queue refused the request with an `Error:` body
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
