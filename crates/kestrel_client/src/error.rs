//! Client-side error taxonomy.
//!
//! Transport I/O failures, protocol-level failures (framing, content
//! types, response kinds) and application-level `ErrorResponse`
//! payloads are distinct: only the last carries business error codes,
//! and it is returned as a value, not through this type.

use thiserror::Error;

use kestrel_common::error::codes;
use kestrel_protocol::types::ResponseKind;
use kestrel_protocol::WireError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Server returned HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Content type mismatch: expected {expected}, received {received}")]
    ContentTypeMismatch { expected: String, received: String },

    #[error("Unexpected response type: expected {expected:?}, received {received:?}")]
    UnexpectedResponseKind {
        expected: ResponseKind,
        received: ResponseKind,
    },

    #[error("No supported protocols: server offered {offered:?}")]
    NoSupportedProtocols { offered: Vec<String> },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Connection failed: {message} ({error_code})")]
    ConnectFailed { error_code: String, message: String },

    #[error("No login command has been recorded; cannot re-authenticate")]
    NoStoredLogin,

    #[error("Hash mismatch ({algorithm}): expected {expected}, received {received}")]
    HashMismatch {
        algorithm: String,
        expected: String,
        received: String,
    },

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl ClientError {
    /// The stable error code for this failure.
    pub fn error_code(&self) -> &'static str {
        match self {
            ClientError::Io(_) | ClientError::Timeout(_) => codes::ERROR_IO,
            ClientError::HttpStatus { .. } => codes::ERROR_HTTP_METHOD,
            ClientError::Protocol(_)
            | ClientError::ContentTypeMismatch { .. }
            | ClientError::UnexpectedResponseKind { .. } => codes::ERROR_PROTOCOL,
            ClientError::NoSupportedProtocols { .. } => codes::ERROR_NO_SUPPORTED_PROTOCOLS,
            ClientError::NotLoggedIn | ClientError::NoStoredLogin => codes::ERROR_NOT_LOGGED_IN,
            ClientError::ConnectFailed { .. } => codes::ERROR_AUTHENTICATION,
            ClientError::HashMismatch { .. } => codes::ERROR_RESOURCE_MISMATCH,
            ClientError::UnsupportedAlgorithm(_) => codes::ERROR_VALIDITY,
        }
    }
}

impl From<WireError> for ClientError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io) => ClientError::Io(io.to_string()),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}
