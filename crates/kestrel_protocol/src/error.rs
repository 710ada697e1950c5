//! Error types for the wire codec and HTTP plumbing.

use thiserror::Error;

/// Errors raised while encoding, decoding, or transporting messages.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Truncated input: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("Unknown message tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("Invalid UTF-8 in field '{field}'")]
    InvalidUtf8 { field: &'static str },

    #[error("Trailing bytes after message: {remaining}")]
    TrailingBytes { remaining: usize },

    #[error("Corrupt payload: {0}")]
    Corruption(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Gzip error: {0}")]
    Gzip(String),

    #[error("Malformed HTTP: {0}")]
    HttpMalformed(String),

    #[error("Request body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
