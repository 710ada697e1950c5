//! Command execution failures.
//!
//! Every checked failure inside a command handler is funnelled through
//! [`CommandFailure`]: one struct carrying the wire error code, the
//! HTTP status, and the attribute map. Blame is derived from the
//! status, never stored. Unexpected panics are not caught here and
//! propagate as server faults.

use std::collections::BTreeMap;

use thiserror::Error;

use kestrel_common::error::{codes, Blame, StoreError};
use kestrel_common::ids::RequestId;
use kestrel_protocol::codec::encode_message;
use kestrel_protocol::http::HttpResponse;
use kestrel_protocol::types::{ErrorResponse, Message, Response, CONTENT_TYPE_MESSAGE};
use kestrel_store::translate::translate_store_error;

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct CommandFailure {
    pub message: String,
    pub cause: Option<String>,
    pub error_code: String,
    pub attributes: BTreeMap<String, String>,
    pub remediating_action: Option<String>,
    pub request_id: RequestId,
    pub http_status: u16,
}

impl CommandFailure {
    /// Blame is derived from the HTTP status class.
    pub fn blame(&self) -> Blame {
        Blame::from_http_status(self.http_status)
    }

    fn new(
        request_id: RequestId,
        http_status: u16,
        error_code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            cause: None,
            error_code: error_code.to_string(),
            attributes: BTreeMap::new(),
            remediating_action: None,
            request_id,
            http_status,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_remediation(mut self, action: impl Into<String>) -> Self {
        self.remediating_action = Some(action.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    // ── Constructors, one per failure family ─────────────────────────

    pub fn validity(request_id: RequestId, message: impl Into<String>) -> Self {
        Self::new(request_id, 400, codes::ERROR_VALIDITY, message)
    }

    pub fn protocol(request_id: RequestId, message: impl Into<String>) -> Self {
        Self::new(request_id, 400, codes::ERROR_PROTOCOL, message)
    }

    pub fn oversized(request_id: RequestId, size: usize, cap: usize) -> Self {
        Self::new(
            request_id,
            413,
            codes::ERROR_PROTOCOL,
            format!("request body of {size} bytes exceeds the {cap} byte limit"),
        )
        .with_attribute("size", size.to_string())
        .with_attribute("limit", cap.to_string())
    }

    pub fn authentication(request_id: RequestId, message: impl Into<String>) -> Self {
        Self::new(request_id, 401, codes::ERROR_AUTHENTICATION, message)
            .with_remediation("log in and retry the request")
    }

    pub fn security_denied(request_id: RequestId, object: &str, action: &str) -> Self {
        Self::new(
            request_id,
            400,
            codes::ERROR_SECURITY_POLICY_DENIED,
            "security policy denied the operation",
        )
        .with_attribute("object", object)
        .with_attribute("action", action)
    }

    pub fn not_permitted(request_id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            400,
            codes::ERROR_OPERATION_NOT_PERMITTED,
            message,
        )
    }

    pub fn nonexistent(request_id: RequestId, entity: &str) -> Self {
        Self::new(
            request_id,
            400,
            codes::ERROR_NONEXISTENT,
            format!("{entity} does not exist"),
        )
        .with_attribute("object", entity)
    }

    pub fn resource_mismatch(
        request_id: RequestId,
        algorithm: &str,
        expected: &str,
        received: &str,
    ) -> Self {
        Self::new(
            request_id,
            400,
            codes::ERROR_RESOURCE_MISMATCH,
            "content hash does not match the declared value",
        )
        .with_attribute("hash_algorithm", algorithm)
        .with_attribute("hash_expected", expected)
        .with_attribute("hash_received", received)
    }

    pub fn io(request_id: RequestId, message: impl Into<String>) -> Self {
        Self::new(request_id, 500, codes::ERROR_IO, message)
    }

    /// Translate a store error through the central lookup table.
    pub fn from_store(request_id: RequestId, error: &StoreError) -> Self {
        let translated = translate_store_error(error);
        Self {
            message: translated.message,
            cause: Some(error.to_string()),
            error_code: translated.error_code.to_string(),
            attributes: translated.attributes,
            remediating_action: None,
            request_id,
            http_status: translated.http_status,
        }
    }

    // ── Wire rendering ───────────────────────────────────────────────

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            request_id: self.request_id,
            message: self.message.clone(),
            error_code: self.error_code.clone(),
            attributes: self.attributes.clone(),
            remediating_action: self.remediating_action.clone(),
            blame: self.blame(),
            extras: Vec::new(),
        }
    }

    /// Render as an HTTP response carrying one encoded error message.
    pub fn to_http_response(&self) -> HttpResponse {
        let body = encode_message(&Message::Response(Response::Error(self.to_error_response())));
        HttpResponse::with_body(self.http_status, CONTENT_TYPE_MESSAGE, body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_protocol::codec::decode_response;

    #[test]
    fn test_blame_follows_status() {
        let rid = RequestId::generate();
        assert_eq!(CommandFailure::validity(rid, "bad").blame(), Blame::Client);
        assert_eq!(
            CommandFailure::authentication(rid, "no").blame(),
            Blame::Client
        );
        assert_eq!(CommandFailure::io(rid, "disk").blame(), Blame::Server);
    }

    #[test]
    fn test_store_translation_sets_status_and_code() {
        let rid = RequestId::generate();
        let failure = CommandFailure::from_store(
            rid,
            &StoreError::UniqueViolation {
                constraint: "assets_name_unique".into(),
            },
        );
        assert_eq!(failure.http_status, 400);
        assert_eq!(failure.error_code, codes::ERROR_DUPLICATE);
        assert!(failure.cause.is_some());

        let failure =
            CommandFailure::from_store(rid, &StoreError::ConnectionFailed("refused".into()));
        assert_eq!(failure.http_status, 500);
        assert_eq!(failure.error_code, codes::ERROR_SQL);
        assert_eq!(failure.blame(), Blame::Server);
    }

    #[test]
    fn test_http_rendering_roundtrips() {
        let rid = RequestId::generate();
        let failure = CommandFailure::security_denied(rid, "asset", "create");
        let http = failure.to_http_response();
        assert_eq!(http.status, 400);
        assert_eq!(http.content_type(), Some(CONTENT_TYPE_MESSAGE));

        let decoded = decode_response(&http.body).unwrap();
        let error = decoded.as_error().unwrap();
        assert_eq!(error.error_code, codes::ERROR_SECURITY_POLICY_DENIED);
        assert_eq!(error.request_id, rid);
        assert_eq!(error.attributes.get("object").unwrap(), "asset");
        assert_eq!(error.blame, Blame::Client);
    }

    #[test]
    fn test_oversized_carries_limits() {
        let rid = RequestId::generate();
        let failure = CommandFailure::oversized(rid, 2_000_000, 1_048_576);
        assert_eq!(failure.http_status, 413);
        assert_eq!(failure.attributes.get("limit").unwrap(), "1048576");
    }
}
