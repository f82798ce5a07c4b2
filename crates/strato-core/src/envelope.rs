//! Runtime output envelope.
//!
//! Guests emit their HTTP response as `<status-code>\n<body>`: a decimal
//! status code on the first line, the raw body after it. Anything else is
//! a parse failure and surfaces to the client as a 500.

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("runtime produced no output")]
    Empty,

    #[error("runtime output has no status line")]
    MissingStatusLine,

    #[error("invalid status code: {0:?}")]
    InvalidStatus(String),
}

/// Split runtime output into `(status_code, body)`.
pub fn parse_response(out: &[u8]) -> Result<(i32, Bytes), EnvelopeError> {
    if out.is_empty() {
        return Err(EnvelopeError::Empty);
    }
    let nl = out
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(EnvelopeError::MissingStatusLine)?;

    let line = std::str::from_utf8(&out[..nl])
        .map_err(|_| EnvelopeError::InvalidStatus(String::from_utf8_lossy(&out[..nl]).into_owned()))?;
    let status: i32 = line
        .trim()
        .parse()
        .map_err(|_| EnvelopeError::InvalidStatus(line.to_string()))?;
    if !(100..=599).contains(&status) {
        return Err(EnvelopeError::InvalidStatus(line.to_string()));
    }

    Ok((status, Bytes::copy_from_slice(&out[nl + 1..])))
}
