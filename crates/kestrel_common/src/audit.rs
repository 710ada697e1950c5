//! Audit record model.
//!
//! Audit records are written by mutating command handlers inside the
//! same store transaction as the mutation itself, so the record and the
//! change commit or roll back together.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Fixed audit event-type strings.
pub mod events {
    pub const USER_LOGGED_IN: &str = "USER_LOGGED_IN";
    pub const USER_LOGGED_OUT: &str = "USER_LOGGED_OUT";
    pub const ASSET_CREATED: &str = "ASSET_CREATED";
    pub const FILE_STORED: &str = "FILE_STORED";
    pub const ROLES_ASSIGNED: &str = "ROLES_ASSIGNED";
    pub const ROLES_REVOKED: &str = "ROLES_REVOKED";
}

/// A single audit record. The sequence id is assigned by the store at
/// insert time; the timestamp is wall-clock unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    pub timestamp_ms: u64,
    pub user_id: UserId,
    pub event_type: String,
    pub attributes: BTreeMap<String, String>,
}
