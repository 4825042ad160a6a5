//! Error types for the wire codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding requests or decoding queue text
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not a canonical decimal job id
    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),

    /// A `%` escape was cut short by the end of the input
    #[error("incomplete percent escape at byte {offset} of {input:?}")]
    IncompletePercent { offset: usize, input: String },

    /// A `%` escape was followed by something other than two hex digits
    #[error("invalid percent escape at byte {offset} of {input:?}")]
    InvalidPercent { offset: usize, input: String },

    /// A decoded form value was not UTF-8
    #[error("decoded form field is not UTF-8: {0:?}")]
    InvalidUtf8(String),

    /// Uploaded file names end up inside a form body
    #[error("file name {0:?} cannot be uploaded")]
    InvalidFileName(String),

    /// Job description did not follow the snapshot layout
    #[error("malformed job snapshot: {0}")]
    Snapshot(String),

    /// Reading a file to attach to a request failed
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
