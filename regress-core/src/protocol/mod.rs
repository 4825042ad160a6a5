//! Wire protocol codec
//!
//! Requests and their encoding, the success literals the queue answers
//! with, percent-coding for form bodies, and parsers for response text.

pub mod error;
pub mod parse;
pub mod percent;
pub mod request;

pub use error::{CodecError, Result};
pub use parse::{parse_snapshot, parse_waiting};
pub use percent::{parse_form, percent_decode, percent_encode};
pub use request::{Encoded, Method, Request, split_upload};

/// Prefix of every failure body the queue sends
pub const ERROR_PREFIX: &str = "Error:";
