//! Percent-encoding for form bodies
//!
//! Byte-oriented: `%XY` decodes to exactly one byte and every
//! other byte is copied through untouched, so non-ASCII text survives as
//! its UTF-8 bytes.

use super::error::{CodecError, Result};

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Encodes bytes for use as a form value
pub fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Decodes `%XY` escapes
///
/// A `%` that is not followed by two hex digits is an error, including one
/// at the very end of the input.
pub fn percent_decode(input: &str) -> Result<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        if i + 2 >= bytes.len() {
            return Err(CodecError::IncompletePercent {
                offset: i,
                input: input.to_string(),
            });
        }

        match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
            (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
            _ => {
                return Err(CodecError::InvalidPercent {
                    offset: i,
                    input: input.to_string(),
                });
            }
        }
        i += 3;
    }

    Ok(out)
}

/// Splits a `key=value&key=value` body into decoded pairs
pub fn parse_form(body: &str) -> Result<Vec<(String, String)>> {
    let mut fields = Vec::new();

    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        fields.push((decode_utf8(key)?, decode_utf8(value)?));
    }

    Ok(fields)
}

fn decode_utf8(input: &str) -> Result<String> {
    String::from_utf8(percent_decode(input)?).map_err(|_| CodecError::InvalidUtf8(input.to_string()))
}
