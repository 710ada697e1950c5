//! In-memory storage engine with explicit connections and transactions.
//!
//! A transaction stages every write and applies nothing until
//! `commit()` is called; dropping an uncommitted transaction discards
//! the staged writes. Constraint violations surface at statement time
//! with driver-style error codes, translated to domain codes in
//! `crate::translate`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use kestrel_common::audit::AuditRecord;
use kestrel_common::error::StoreError;
use kestrel_common::ids::{AssetId, UserId};
use kestrel_common::security::RoleName;

/// A user account row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Lowercase hex SHA-256 of the password.
    pub password_hash: String,
    pub roles: BTreeSet<RoleName>,
}

/// An asset record row. Content bytes live in a separate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    pub media_type: String,
    pub description: String,
    pub size: u64,
    pub hash_algorithm: String,
    pub hash_value: String,
}

/// Deterministic sort key for asset search: `(name, id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AssetKey {
    pub name: String,
    pub id: AssetId,
}

impl Asset {
    pub fn key(&self) -> AssetKey {
        AssetKey {
            name: self.name.clone(),
            id: self.id,
        }
    }
}

/// Search filter applied to asset rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetFilter {
    pub name_contains: Option<String>,
    pub media_type: Option<String>,
}

impl AssetFilter {
    fn matches(&self, asset: &Asset) -> bool {
        if let Some(needle) = &self.name_contains {
            if !asset.name.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(mt) = &self.media_type {
            if &asset.media_type != mt {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    assets: BTreeMap<AssetId, Asset>,
    content: BTreeMap<AssetId, Vec<u8>>,
    audit: Vec<AuditRecord>,
    audit_seq: u64,
}

struct Inner {
    tables: RwLock<Tables>,
    commit_count: AtomicU64,
    fail_connections: AtomicBool,
}

/// Handle to the storage engine. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    pub fn new_in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                commit_count: AtomicU64::new(0),
                fail_connections: AtomicBool::new(false),
            }),
        }
    }

    /// Open a connection. Fails when connection faults are injected.
    pub fn connect(&self) -> Result<StoreConnection, StoreError> {
        if self.inner.fail_connections.load(Ordering::Relaxed) {
            return Err(StoreError::ConnectionFailed(
                "connection fault injected".into(),
            ));
        }
        Ok(StoreConnection {
            inner: self.inner.clone(),
        })
    }

    /// Inject connection failures (tests and fault drills).
    pub fn set_fail_connections(&self, fail: bool) {
        self.inner.fail_connections.store(fail, Ordering::Relaxed);
    }

    /// Number of committed transactions since startup.
    pub fn commit_count(&self) -> u64 {
        self.inner.commit_count.load(Ordering::Relaxed)
    }

    /// Snapshot of all committed audit records, oldest first.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.inner.tables.read().audit.clone()
    }
}

/// One connection to the engine. Transactions are scoped to it.
pub struct StoreConnection {
    inner: Arc<Inner>,
}

impl StoreConnection {
    pub fn begin(&self) -> StoreTransaction {
        StoreTransaction {
            inner: self.inner.clone(),
            staged: Staged::default(),
            acting_user: None,
            committed: false,
        }
    }
}

#[derive(Default)]
struct Staged {
    users: BTreeMap<UserId, User>,
    user_deletes: BTreeSet<UserId>,
    assets: BTreeMap<AssetId, Asset>,
    content: BTreeMap<AssetId, Vec<u8>>,
    audit: Vec<(UserId, String, BTreeMap<String, String>)>,
}

/// One open transaction. All writes are staged; `commit()` applies them
/// atomically. Dropping without commit rolls back.
pub struct StoreTransaction {
    inner: Arc<Inner>,
    staged: Staged,
    acting_user: Option<UserId>,
    committed: bool,
}

impl StoreTransaction {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.committed {
            return Err(StoreError::AlreadyCommitted);
        }
        Ok(())
    }

    /// Bind the user this transaction acts on behalf of. Audit records
    /// are attributed to this user.
    pub fn set_acting_user(&mut self, user: UserId) {
        self.acting_user = Some(user);
    }

    pub fn acting_user(&self) -> Option<UserId> {
        self.acting_user
    }

    // ── Users ────────────────────────────────────────────────────────

    pub fn user_get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.check_open()?;
        if self.staged.user_deletes.contains(&id) {
            return Ok(None);
        }
        if let Some(user) = self.staged.users.get(&id) {
            return Ok(Some(user.clone()));
        }
        Ok(self.inner.tables.read().users.get(&id).cloned())
    }

    pub fn user_get_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        self.check_open()?;
        if let Some(user) = self.staged.users.values().find(|u| u.name == name) {
            return Ok(Some(user.clone()));
        }
        let tables = self.inner.tables.read();
        Ok(tables
            .users
            .values()
            .find(|u| u.name == name && !self.staged.user_deletes.contains(&u.id))
            .cloned())
    }

    pub fn user_put(&mut self, user: User) -> Result<(), StoreError> {
        self.check_open()?;
        let conflict = {
            let tables = self.inner.tables.read();
            tables
                .users
                .values()
                .chain(self.staged.users.values())
                .any(|existing| {
                    existing.name == user.name
                        && existing.id != user.id
                        && !self.staged.user_deletes.contains(&existing.id)
                })
        };
        if conflict {
            return Err(StoreError::UniqueViolation {
                constraint: "users_name_unique".into(),
            });
        }
        self.staged.user_deletes.remove(&user.id);
        self.staged.users.insert(user.id, user);
        Ok(())
    }

    pub fn user_remove(&mut self, id: UserId) -> Result<(), StoreError> {
        self.check_open()?;
        self.staged.users.remove(&id);
        self.staged.user_deletes.insert(id);
        Ok(())
    }

    // ── Assets ───────────────────────────────────────────────────────

    pub fn asset_get(&self, id: AssetId) -> Result<Option<Asset>, StoreError> {
        self.check_open()?;
        if let Some(asset) = self.staged.assets.get(&id) {
            return Ok(Some(asset.clone()));
        }
        Ok(self.inner.tables.read().assets.get(&id).cloned())
    }

    pub fn asset_put(&mut self, asset: Asset) -> Result<(), StoreError> {
        self.check_open()?;
        let conflict = {
            let tables = self.inner.tables.read();
            tables
                .assets
                .values()
                .chain(self.staged.assets.values())
                .any(|existing| existing.name == asset.name && existing.id != asset.id)
        };
        if conflict {
            return Err(StoreError::UniqueViolation {
                constraint: "assets_name_unique".into(),
            });
        }
        self.staged.assets.insert(asset.id, asset);
        Ok(())
    }

    pub fn asset_content_put(&mut self, id: AssetId, content: Vec<u8>) -> Result<(), StoreError> {
        self.check_open()?;
        if self.asset_get(id)?.is_none() {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "asset_content_asset_fk".into(),
            });
        }
        self.staged.content.insert(id, content);
        Ok(())
    }

    pub fn asset_content_get(&self, id: AssetId) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        if let Some(content) = self.staged.content.get(&id) {
            return Ok(Some(content.clone()));
        }
        Ok(self.inner.tables.read().content.get(&id).cloned())
    }

    // ── Asset search (keyset) ────────────────────────────────────────

    /// All sort keys matching the filter, in `(name, id)` order.
    /// Executed once at search-begin to plan the page boundaries.
    pub fn asset_search_keys(&self, filter: &AssetFilter) -> Result<Vec<AssetKey>, StoreError> {
        self.check_open()?;
        let mut keys: Vec<AssetKey> = self
            .merged_assets()
            .into_iter()
            .filter(|a| filter.matches(a))
            .map(|a| a.key())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Rows strictly after `lower_bound` in key order, up to `limit`.
    pub fn assets_seek(
        &self,
        lower_bound: Option<&AssetKey>,
        limit: usize,
        filter: &AssetFilter,
    ) -> Result<Vec<Asset>, StoreError> {
        self.check_open()?;
        let mut rows: Vec<Asset> = self
            .merged_assets()
            .into_iter()
            .filter(|a| filter.matches(a))
            .filter(|a| match lower_bound {
                Some(bound) => &a.key() > bound,
                None => true,
            })
            .collect();
        rows.sort_by_key(|a| a.key());
        rows.truncate(limit);
        Ok(rows)
    }

    fn merged_assets(&self) -> Vec<Asset> {
        let tables = self.inner.tables.read();
        let mut merged: BTreeMap<AssetId, Asset> = tables.assets.clone();
        for (id, asset) in &self.staged.assets {
            merged.insert(*id, asset.clone());
        }
        merged.into_values().collect()
    }

    // ── Audit ────────────────────────────────────────────────────────

    /// Stage one audit record attributed to the bound acting user. The
    /// sequence id and timestamp are assigned at commit, so the record
    /// becomes visible if and only if the mutation does.
    pub fn audit_put(
        &mut self,
        event_type: &str,
        attributes: BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.check_open()?;
        let user = self.acting_user.ok_or(StoreError::NoActingUser)?;
        self.staged
            .audit
            .push((user, event_type.to_string(), attributes));
        Ok(())
    }

    // ── Commit ───────────────────────────────────────────────────────

    /// Apply all staged writes atomically. Calling any method after a
    /// successful commit is an error.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.check_open()?;
        let mut tables = self.inner.tables.write();
        for id in &self.staged.user_deletes {
            tables.users.remove(id);
        }
        for (id, user) in std::mem::take(&mut self.staged.users) {
            tables.users.insert(id, user);
        }
        for (id, asset) in std::mem::take(&mut self.staged.assets) {
            tables.assets.insert(id, asset);
        }
        for (id, content) in std::mem::take(&mut self.staged.content) {
            tables.content.insert(id, content);
        }
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        for (user_id, event_type, attributes) in std::mem::take(&mut self.staged.audit) {
            tables.audit_seq += 1;
            let audit_id = tables.audit_seq;
            tables.audit.push(AuditRecord {
                id: audit_id,
                timestamp_ms: now_ms,
                user_id,
                event_type,
                attributes,
            });
        }
        drop(tables);
        self.committed = true;
        self.inner.commit_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!("transaction dropped without commit; staged writes discarded");
        }
    }
}
