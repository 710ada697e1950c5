//! Identity provider boundary.
//!
//! Login authenticates against an identity provider before any session
//! is established. The default provider checks the password hash in
//! the user store; tests substitute their own implementations.

use thiserror::Error;

use kestrel_common::hash::{hash_buffer_hex, HashAlgorithm};
use kestrel_store::engine::{StoreTransaction, User};

#[derive(Error, Debug)]
pub enum AuthenticationFault {
    /// Wrong name or password. Deliberately carries no detail.
    #[error("authentication rejected")]
    Rejected,

    /// The provider itself failed (storage, network).
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

pub trait IdentityProvider: Send + Sync {
    fn authenticate(
        &self,
        txn: &StoreTransaction,
        user_name: &str,
        password: &str,
    ) -> Result<User, AuthenticationFault>;
}

/// Hash a password for storage.
pub fn password_hash(password: &str) -> String {
    hash_buffer_hex(HashAlgorithm::Sha256, password.as_bytes())
}

/// Default provider: user record lookup plus password hash comparison.
pub struct StoreIdentityProvider;

impl IdentityProvider for StoreIdentityProvider {
    fn authenticate(
        &self,
        txn: &StoreTransaction,
        user_name: &str,
        password: &str,
    ) -> Result<User, AuthenticationFault> {
        let user = txn
            .user_get_by_name(user_name)
            .map_err(|e| AuthenticationFault::Unavailable(e.to_string()))?
            .ok_or(AuthenticationFault::Rejected)?;
        if user.password_hash != password_hash(password) {
            return Err(AuthenticationFault::Rejected);
        }
        Ok(user)
    }
}
