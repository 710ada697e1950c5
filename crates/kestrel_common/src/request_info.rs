//! Per-request context propagated through every pipeline stage.

use std::time::Instant;

use crate::ids::RequestId;

/// Context attached to one inbound request. The request id is assigned
/// server-side and echoed back in every response so that log lines and
/// wire traffic can be correlated.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_id: RequestId,
    pub remote_addr: String,
    pub received_at: Instant,
}

impl RequestInfo {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::generate(),
            remote_addr: remote_addr.into(),
            received_at: Instant::now(),
        }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.received_at.elapsed().as_micros() as u64
    }

    /// Structured context string for log and error messages.
    pub fn as_context_str(&self) -> String {
        format!("request_id={}, remote={}", self.request_id.0, self.remote_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestInfo::new("127.0.0.1:1");
        let b = RequestInfo::new("127.0.0.1:1");
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_context_str_contains_fields() {
        let info = RequestInfo::new("10.0.0.7:5000");
        let s = info.as_context_str();
        assert!(s.contains("request_id="));
        assert!(s.contains("remote=10.0.0.7:5000"));
    }
}
