//! Database exception translation.
//!
//! Low-level store errors carry driver-style SQLSTATE codes and, where
//! known, the violated constraint name. This module is the single
//! point that maps them to wire-visible domain error codes; anything
//! unrecognized collapses to the generic storage code rather than
//! leaking driver internals.

use std::collections::BTreeMap;

use kestrel_common::error::{codes, StoreError};

/// The domain-level rendering of a store failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedError {
    pub error_code: &'static str,
    pub http_status: u16,
    pub message: String,
    pub attributes: BTreeMap<String, String>,
}

/// Known constraints: `(constraint name, domain code, attribute name)`.
static CONSTRAINT_TABLE: &[(&str, &str, &str)] = &[
    ("users_name_unique", codes::ERROR_DUPLICATE, "user name"),
    ("assets_name_unique", codes::ERROR_DUPLICATE, "asset name"),
    (
        "asset_content_asset_fk",
        codes::ERROR_NONEXISTENT,
        "asset",
    ),
];

/// Translate a store error into a domain error code, HTTP status, and
/// attribute map.
pub fn translate_store_error(error: &StoreError) -> TranslatedError {
    let mut attributes = BTreeMap::new();

    match error.sqlstate() {
        // Integrity violations are the client's fault.
        "23505" | "23503" => {
            let constraint = error.constraint().unwrap_or("");
            attributes.insert("constraint".to_string(), constraint.to_string());
            let known = CONSTRAINT_TABLE.iter().find(|(name, _, _)| *name == constraint);
            match known {
                Some((_, code, attribute)) => {
                    attributes.insert("object".to_string(), (*attribute).to_string());
                    TranslatedError {
                        error_code: code,
                        http_status: 400,
                        message: error.to_string(),
                        attributes,
                    }
                }
                None => TranslatedError {
                    error_code: if error.sqlstate() == "23505" {
                        codes::ERROR_DUPLICATE
                    } else {
                        codes::ERROR_NONEXISTENT
                    },
                    http_status: 400,
                    message: error.to_string(),
                    attributes,
                },
            }
        }
        // Everything else is a server-side storage failure.
        sqlstate => {
            attributes.insert("sqlstate".to_string(), sqlstate.to_string());
            TranslatedError {
                error_code: codes::ERROR_SQL,
                http_status: 500,
                message: error.to_string(),
                attributes,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_unique_constraint() {
        let e = StoreError::UniqueViolation {
            constraint: "users_name_unique".into(),
        };
        let t = translate_store_error(&e);
        assert_eq!(t.error_code, codes::ERROR_DUPLICATE);
        assert_eq!(t.http_status, 400);
        assert_eq!(t.attributes.get("object").unwrap(), "user name");
        assert_eq!(t.attributes.get("constraint").unwrap(), "users_name_unique");
    }

    #[test]
    fn test_known_foreign_key_constraint() {
        let e = StoreError::ForeignKeyViolation {
            constraint: "asset_content_asset_fk".into(),
        };
        let t = translate_store_error(&e);
        assert_eq!(t.error_code, codes::ERROR_NONEXISTENT);
        assert_eq!(t.http_status, 400);
        assert_eq!(t.attributes.get("object").unwrap(), "asset");
    }

    #[test]
    fn test_unknown_constraint_still_maps_by_class() {
        let e = StoreError::UniqueViolation {
            constraint: "mystery_constraint".into(),
        };
        let t = translate_store_error(&e);
        assert_eq!(t.error_code, codes::ERROR_DUPLICATE);
        assert_eq!(t.http_status, 400);
        assert!(t.attributes.get("object").is_none());
    }

    #[test]
    fn test_connection_failure_is_server_fault() {
        let e = StoreError::ConnectionFailed("refused".into());
        let t = translate_store_error(&e);
        assert_eq!(t.error_code, codes::ERROR_SQL);
        assert_eq!(t.http_status, 500);
        assert_eq!(t.attributes.get("sqlstate").unwrap(), "08006");
    }

    #[test]
    fn test_internal_errors_do_not_leak_driver_details() {
        let e = StoreError::NoActingUser;
        let t = translate_store_error(&e);
        assert_eq!(t.error_code, codes::ERROR_SQL);
        assert_eq!(t.http_status, 500);
    }
}
