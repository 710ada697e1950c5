//! Error taxonomy shared by every layer.
//!
//! The classification rule is fixed: client-caused failures (validity,
//! protocol, authentication, permission, nonexistent, duplicate) map to
//! 4xx statuses and `Blame::Client`; server-caused failures (I/O,
//! storage, unexpected) map to 5xx and `Blame::Server`. Blame is always
//! derived from the HTTP status, never stored alongside it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, wire-visible error code strings.
pub mod codes {
    pub const ERROR_AUTHENTICATION: &str = "error-authentication";
    pub const ERROR_DUPLICATE: &str = "error-duplicate";
    pub const ERROR_HTTP_METHOD: &str = "error-http-method";
    pub const ERROR_IO: &str = "error-io";
    pub const ERROR_NONEXISTENT: &str = "error-nonexistent";
    pub const ERROR_NO_SUPPORTED_PROTOCOLS: &str = "error-no-supported-protocols";
    pub const ERROR_NOT_LOGGED_IN: &str = "error-not-logged-in";
    pub const ERROR_OPERATION_NOT_PERMITTED: &str = "error-operation-not-permitted";
    pub const ERROR_PROTOCOL: &str = "error-protocol";
    pub const ERROR_RESOURCE_MISMATCH: &str = "error-resource-mismatch";
    pub const ERROR_SECURITY_POLICY_DENIED: &str = "error-security-policy-denied";
    pub const ERROR_SQL: &str = "error-sql";
    pub const ERROR_VALIDITY: &str = "error-validity";
}

/// Which side caused a failure. Determines the HTTP status class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Blame {
    Client,
    Server,
}

impl Blame {
    /// Derive blame from an HTTP status code: `[500,600)` is the server's
    /// fault, everything else is the client's.
    pub fn from_http_status(status: u16) -> Self {
        if (500..600).contains(&status) {
            Blame::Server
        } else {
            Blame::Client
        }
    }
}

/// Low-level store errors, shaped like the underlying driver reports
/// them: an SQLSTATE-style code plus the violated constraint where one
/// is known. Translation to domain error codes happens in exactly one
/// place (`kestrel_store::translate`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unique constraint violation: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Foreign key violation: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transaction has no acting user bound")]
    NoActingUser,

    #[error("Transaction already committed")]
    AlreadyCommitted,

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// The driver-level error code for this failure.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            StoreError::UniqueViolation { .. } => "23505",
            StoreError::ForeignKeyViolation { .. } => "23503",
            StoreError::ConnectionFailed(_) => "08006",
            StoreError::NoActingUser => "XX000",
            StoreError::AlreadyCommitted => "25000",
            StoreError::Io(_) => "58030",
        }
    }

    /// The violated constraint name, where the driver reported one.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            StoreError::UniqueViolation { constraint }
            | StoreError::ForeignKeyViolation { constraint } => Some(constraint),
            _ => None,
        }
    }
}
