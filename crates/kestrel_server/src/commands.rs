//! Command handlers.
//!
//! Every state-mutating handler writes one audit record inside the same
//! transaction as its mutation; the caller commits only when the
//! handler returns success.

use std::collections::BTreeMap;

use kestrel_common::audit::events;
use kestrel_common::ids::AssetId;
use kestrel_common::security::RoleName;
use kestrel_protocol::types::{
    AssetSummary, CommandAssetCreate, CommandAssetGet, CommandAssetSearchBegin,
    CommandFileInfoGet, CommandRolesAssign, CommandRolesGet, CommandRolesRevoke, Response,
    ResponseAssetCreate, ResponseAssetGet, ResponseAssetPage, ResponseFileInfo, ResponseLogout,
    ResponseRolesAssign, ResponseRolesGet, ResponseRolesRevoke,
};
use kestrel_store::engine::{Asset, AssetFilter};
use kestrel_store::pagination::KeysetSearch;

use crate::error::CommandFailure;
use crate::executor::CommandContext;
use crate::sessions::AssetSearchState;

fn summary(asset: &Asset) -> AssetSummary {
    AssetSummary {
        id: asset.id,
        name: asset.name.clone(),
        media_type: asset.media_type.clone(),
        description: asset.description.clone(),
        size: asset.size,
        hash_algorithm: asset.hash_algorithm.clone(),
        hash_value: asset.hash_value.clone(),
    }
}

pub(crate) fn logout(ctx: &mut CommandContext<'_>) -> Result<Response, CommandFailure> {
    ctx.registry.remove(ctx.session.secret.as_str());
    ctx.txn
        .audit_put(events::USER_LOGGED_OUT, BTreeMap::new())
        .map_err(|e| ctx.store_failure(&e))?;
    Ok(Response::Logout(ResponseLogout {
        request_id: ctx.request_id,
    }))
}

pub(crate) fn asset_create(
    ctx: &mut CommandContext<'_>,
    cmd: CommandAssetCreate,
) -> Result<Response, CommandFailure> {
    ctx.require("asset", "create")?;
    if cmd.name.is_empty() {
        return Err(CommandFailure::validity(
            ctx.request_id,
            "asset name must not be empty",
        ));
    }
    let asset = Asset {
        id: AssetId::generate(),
        name: cmd.name,
        media_type: cmd.media_type,
        description: cmd.description,
        size: 0,
        hash_algorithm: String::new(),
        hash_value: String::new(),
    };
    ctx.txn
        .asset_put(asset.clone())
        .map_err(|e| ctx.store_failure(&e))?;
    ctx.txn
        .audit_put(
            events::ASSET_CREATED,
            BTreeMap::from([
                ("asset_id".to_string(), asset.id.0.to_string()),
                ("asset_name".to_string(), asset.name.clone()),
            ]),
        )
        .map_err(|e| ctx.store_failure(&e))?;
    Ok(Response::AssetCreate(ResponseAssetCreate {
        request_id: ctx.request_id,
        asset: summary(&asset),
    }))
}

pub(crate) fn asset_get(
    ctx: &mut CommandContext<'_>,
    cmd: CommandAssetGet,
) -> Result<Response, CommandFailure> {
    ctx.require("asset", "read")?;
    let asset = ctx
        .txn
        .asset_get(cmd.asset_id)
        .map_err(|e| ctx.store_failure(&e))?
        .ok_or_else(|| CommandFailure::nonexistent(ctx.request_id, "asset"))?;
    Ok(Response::AssetGet(ResponseAssetGet {
        request_id: ctx.request_id,
        asset: summary(&asset),
    }))
}

// ── Search ───────────────────────────────────────────────────────────────

fn run_page(
    ctx: &mut CommandContext<'_>,
    state: &AssetSearchState,
) -> Result<Response, CommandFailure> {
    let request_id = ctx.request_id;
    let page = state
        .search
        .page_current(|definition, page_size| {
            ctx.txn.assets_seek(
                definition.lower_bound.as_ref(),
                page_size as usize,
                &state.filter,
            )
        })
        .map_err(|e| CommandFailure::from_store(request_id, &e))?;
    Ok(Response::AssetPage(ResponseAssetPage {
        request_id,
        items: page.items.iter().map(summary).collect(),
        page_index: page.page_index,
        page_count: page.page_count,
        first_offset: page.first_offset,
    }))
}

pub(crate) fn asset_search_begin(
    ctx: &mut CommandContext<'_>,
    cmd: CommandAssetSearchBegin,
) -> Result<Response, CommandFailure> {
    ctx.require("asset", "read")?;
    let filter = AssetFilter {
        name_contains: cmd.query.name_contains,
        media_type: cmd.query.media_type,
    };
    let keys = ctx
        .txn
        .asset_search_keys(&filter)
        .map_err(|e| ctx.store_failure(&e))?;
    let state = AssetSearchState {
        search: KeysetSearch::plan(&keys, u64::from(cmd.query.page_size)),
        filter,
    };
    let response = run_page(ctx, &state)?;
    *ctx.session.search.lock() = Some(state);
    Ok(response)
}

pub(crate) fn asset_search_next(ctx: &mut CommandContext<'_>) -> Result<Response, CommandFailure> {
    ctx.require("asset", "read")?;
    let mut guard = ctx.session.search.lock();
    let state = guard.as_mut().ok_or_else(|| {
        CommandFailure::validity(ctx.request_id, "no search is in progress")
            .with_remediation("begin a search first")
    })?;
    state.search.next();
    run_page(ctx, state)
}

pub(crate) fn asset_search_previous(
    ctx: &mut CommandContext<'_>,
) -> Result<Response, CommandFailure> {
    ctx.require("asset", "read")?;
    let mut guard = ctx.session.search.lock();
    let state = guard.as_mut().ok_or_else(|| {
        CommandFailure::validity(ctx.request_id, "no search is in progress")
            .with_remediation("begin a search first")
    })?;
    state.search.previous();
    run_page(ctx, state)
}

// ── Roles ────────────────────────────────────────────────────────────────

/// The extra rule on role mutation: a non-administrator may only grant
/// or revoke roles it already holds, checked before storage is touched.
fn require_role_authority(
    ctx: &CommandContext<'_>,
    roles: &[RoleName],
) -> Result<(), CommandFailure> {
    let subject = ctx.subject();
    if subject.is_administrator() || subject.holds_all(roles.iter()) {
        Ok(())
    } else {
        Err(CommandFailure::not_permitted(
            ctx.request_id,
            "the acting user must hold every role being granted or revoked",
        ))
    }
}

pub(crate) fn roles_assign(
    ctx: &mut CommandContext<'_>,
    cmd: CommandRolesAssign,
) -> Result<Response, CommandFailure> {
    ctx.require("user", "write")?;
    if cmd.roles.is_empty() {
        return Err(CommandFailure::validity(
            ctx.request_id,
            "no roles were given",
        ));
    }
    let roles: Vec<RoleName> = cmd.roles.iter().map(RoleName::new).collect();
    require_role_authority(ctx, &roles)?;

    let mut target = ctx
        .txn
        .user_get(cmd.user_id)
        .map_err(|e| ctx.store_failure(&e))?
        .ok_or_else(|| CommandFailure::nonexistent(ctx.request_id, "user"))?;
    target.roles.extend(roles.iter().cloned());
    ctx.txn
        .user_put(target)
        .map_err(|e| ctx.store_failure(&e))?;
    ctx.txn
        .audit_put(
            events::ROLES_ASSIGNED,
            BTreeMap::from([
                ("user_id".to_string(), cmd.user_id.0.to_string()),
                ("roles".to_string(), cmd.roles.join(",")),
            ]),
        )
        .map_err(|e| ctx.store_failure(&e))?;
    Ok(Response::RolesAssign(ResponseRolesAssign {
        request_id: ctx.request_id,
    }))
}

pub(crate) fn roles_revoke(
    ctx: &mut CommandContext<'_>,
    cmd: CommandRolesRevoke,
) -> Result<Response, CommandFailure> {
    ctx.require("user", "write")?;
    if cmd.roles.is_empty() {
        return Err(CommandFailure::validity(
            ctx.request_id,
            "no roles were given",
        ));
    }
    let roles: Vec<RoleName> = cmd.roles.iter().map(RoleName::new).collect();
    require_role_authority(ctx, &roles)?;

    let mut target = ctx
        .txn
        .user_get(cmd.user_id)
        .map_err(|e| ctx.store_failure(&e))?
        .ok_or_else(|| CommandFailure::nonexistent(ctx.request_id, "user"))?;
    for role in &roles {
        target.roles.remove(role);
    }
    ctx.txn
        .user_put(target)
        .map_err(|e| ctx.store_failure(&e))?;
    ctx.txn
        .audit_put(
            events::ROLES_REVOKED,
            BTreeMap::from([
                ("user_id".to_string(), cmd.user_id.0.to_string()),
                ("roles".to_string(), cmd.roles.join(",")),
            ]),
        )
        .map_err(|e| ctx.store_failure(&e))?;
    Ok(Response::RolesRevoke(ResponseRolesRevoke {
        request_id: ctx.request_id,
    }))
}

pub(crate) fn roles_get(
    ctx: &mut CommandContext<'_>,
    cmd: CommandRolesGet,
) -> Result<Response, CommandFailure> {
    // Reading your own roles needs no grant.
    if cmd.user_id != ctx.user.id {
        ctx.require("user", "read")?;
    }
    let target = ctx
        .txn
        .user_get(cmd.user_id)
        .map_err(|e| ctx.store_failure(&e))?
        .ok_or_else(|| CommandFailure::nonexistent(ctx.request_id, "user"))?;
    Ok(Response::RolesGet(ResponseRolesGet {
        request_id: ctx.request_id,
        roles: target.roles.iter().map(|r| r.as_str().to_string()).collect(),
    }))
}

// ── Files ────────────────────────────────────────────────────────────────

pub(crate) fn file_info_get(
    ctx: &mut CommandContext<'_>,
    cmd: CommandFileInfoGet,
) -> Result<Response, CommandFailure> {
    ctx.require("asset", "read")?;
    let asset = ctx
        .txn
        .asset_get(cmd.asset_id)
        .map_err(|e| ctx.store_failure(&e))?
        .ok_or_else(|| CommandFailure::nonexistent(ctx.request_id, "asset"))?;
    Ok(Response::FileInfo(ResponseFileInfo {
        request_id: ctx.request_id,
        asset_id: asset.id,
        media_type: asset.media_type,
        size: asset.size,
        hash_algorithm: asset.hash_algorithm,
        hash_value: asset.hash_value,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use kestrel_common::error::codes;
    use kestrel_common::ids::{RequestId, SessionSecret, UserId};
    use kestrel_common::security::{PolicyRule, SecurityPolicy};
    use kestrel_protocol::types::{AssetQuery, Command};
    use kestrel_store::engine::{Database, User};

    use crate::executor::{execute_command, CommandContext};
    use crate::sessions::{Session, SessionRegistry};

    struct Fixture {
        db: Database,
        registry: SessionRegistry,
        policy: SecurityPolicy,
        session: Session,
        user: User,
    }

    fn fixture(roles: &[&str], policy: SecurityPolicy) -> Fixture {
        let db = Database::new_in_memory();
        let role_set: BTreeSet<RoleName> = roles.iter().map(|r| RoleName::new(*r)).collect();
        let user = User {
            id: UserId::generate(),
            name: "actor".into(),
            password_hash: "h".into(),
            roles: role_set.clone(),
        };
        {
            let conn = db.connect().unwrap();
            let mut tx = conn.begin();
            tx.user_put(user.clone()).unwrap();
            tx.commit().unwrap();
        }
        let now = Instant::now();
        let session = Session {
            secret: SessionSecret::generate(),
            user_id: user.id,
            roles: role_set,
            created_at: now,
            expires_at: now + Duration::from_secs(60),
            search: Mutex::new(None),
        };
        Fixture {
            db,
            registry: SessionRegistry::new(Duration::from_secs(60), 0),
            policy,
            session,
            user,
        }
    }

    fn policy_allow_all_to(role: &str) -> SecurityPolicy {
        SecurityPolicy::new(vec![PolicyRule {
            role: RoleName::new(role),
            object: "*".into(),
            action: "*".into(),
        }])
    }

    /// Run one command in its own transaction, committing on success
    /// (mirrors the command core's contract).
    fn run(f: &Fixture, command: Command) -> Result<Response, CommandFailure> {
        let conn = f.db.connect().unwrap();
        let mut txn = conn.begin();
        txn.set_acting_user(f.user.id);
        let result = {
            let mut ctx = CommandContext {
                request_id: RequestId::generate(),
                session: &f.session,
                user: &f.user,
                policy: &f.policy,
                registry: &f.registry,
                txn: &mut txn,
            };
            execute_command(&mut ctx, command)
        };
        if result.is_ok() {
            txn.commit().unwrap();
        }
        result
    }

    fn create_asset(f: &Fixture, name: &str) -> AssetId {
        let response = run(
            f,
            Command::AssetCreate(CommandAssetCreate {
                name: name.into(),
                media_type: "application/octet-stream".into(),
                description: String::new(),
            }),
        )
        .unwrap();
        match response {
            Response::AssetCreate(r) => r.asset.id,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_asset_create_and_get() {
        let f = fixture(&["editor"], policy_allow_all_to("editor"));
        let id = create_asset(&f, "manual.pdf");

        let response = run(&f, Command::AssetGet(CommandAssetGet { asset_id: id })).unwrap();
        match response {
            Response::AssetGet(r) => assert_eq!(r.asset.name, "manual.pdf"),
            other => panic!("unexpected response: {other:?}"),
        }

        // Audit record committed alongside.
        let records = f.db.audit_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, events::ASSET_CREATED);
        assert_eq!(records[0].user_id, f.user.id);
    }

    #[test]
    fn test_asset_create_denied_without_policy() {
        let f = fixture(&["reader"], SecurityPolicy::deny_all());
        let err = run(
            &f,
            Command::AssetCreate(CommandAssetCreate {
                name: "x".into(),
                media_type: "m".into(),
                description: String::new(),
            }),
        )
        .unwrap_err();
        assert_eq!(err.error_code, codes::ERROR_SECURITY_POLICY_DENIED);
        assert_eq!(err.http_status, 400);
        assert!(f.db.audit_records().is_empty());
    }

    #[test]
    fn test_asset_get_nonexistent() {
        let f = fixture(&["editor"], policy_allow_all_to("editor"));
        let err = run(
            &f,
            Command::AssetGet(CommandAssetGet {
                asset_id: AssetId::generate(),
            }),
        )
        .unwrap_err();
        assert_eq!(err.error_code, codes::ERROR_NONEXISTENT);
    }

    #[test]
    fn test_duplicate_asset_translated() {
        let f = fixture(&["editor"], policy_allow_all_to("editor"));
        create_asset(&f, "manual.pdf");
        let err = run(
            &f,
            Command::AssetCreate(CommandAssetCreate {
                name: "manual.pdf".into(),
                media_type: "m".into(),
                description: String::new(),
            }),
        )
        .unwrap_err();
        assert_eq!(err.error_code, codes::ERROR_DUPLICATE);
        assert_eq!(err.http_status, 400);
    }

    #[test]
    fn test_login_on_command_endpoint_is_protocol_error() {
        let f = fixture(&["editor"], policy_allow_all_to("editor"));
        let err = run(
            &f,
            Command::Login(kestrel_protocol::types::CommandLogin {
                user_name: "x".into(),
                password: "y".into(),
                metadata: BTreeMap::new(),
            }),
        )
        .unwrap_err();
        assert_eq!(err.error_code, codes::ERROR_PROTOCOL);
    }

    #[test]
    fn test_search_pages_and_clamps() {
        let f = fixture(&["editor"], policy_allow_all_to("editor"));
        for i in 0..25 {
            create_asset(&f, &format!("asset-{i:02}"));
        }

        let begin = run(
            &f,
            Command::AssetSearchBegin(CommandAssetSearchBegin {
                query: AssetQuery {
                    name_contains: None,
                    media_type: None,
                    page_size: 10,
                },
            }),
        )
        .unwrap();
        let page = match begin {
            Response::AssetPage(p) => p,
            other => panic!("unexpected response: {other:?}"),
        };
        assert_eq!(page.page_index, 0);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items[0].name, "asset-00");

        // Walk far past the end: index clamps at page_count - 1.
        let mut last_page = None;
        for _ in 0..(3 + 5) {
            let response = run(&f, Command::AssetSearchNext(Default::default())).unwrap();
            last_page = Some(match response {
                Response::AssetPage(p) => p,
                other => panic!("unexpected response: {other:?}"),
            });
        }
        let last = last_page.unwrap();
        assert_eq!(last.page_index, 2);
        assert_eq!(last.items.len(), 5);
        assert_eq!(last.first_offset, 20);

        // And far past the beginning: clamps at 0.
        let mut first_page = None;
        for _ in 0..(3 + 5) {
            let response = run(&f, Command::AssetSearchPrevious(Default::default())).unwrap();
            first_page = Some(match response {
                Response::AssetPage(p) => p,
                other => panic!("unexpected response: {other:?}"),
            });
        }
        let first = first_page.unwrap();
        assert_eq!(first.page_index, 0);
        assert_eq!(first.items[0].name, "asset-00");
    }

    #[test]
    fn test_search_next_without_begin_is_validity_error() {
        let f = fixture(&["editor"], policy_allow_all_to("editor"));
        let err = run(&f, Command::AssetSearchNext(Default::default())).unwrap_err();
        assert_eq!(err.error_code, codes::ERROR_VALIDITY);
    }

    #[test]
    fn test_roles_assign_requires_authority() {
        // The actor holds "reader" but not "writer": granting "writer"
        // must fail before storage is touched.
        let policy = SecurityPolicy::new(vec![PolicyRule {
            role: RoleName::new("reader"),
            object: "user".into(),
            action: "*".into(),
        }]);
        let f = fixture(&["reader"], policy);

        let target_id = {
            let conn = f.db.connect().unwrap();
            let mut tx = conn.begin();
            let target = User {
                id: UserId::generate(),
                name: "target".into(),
                password_hash: "h".into(),
                roles: BTreeSet::new(),
            };
            let id = target.id;
            tx.user_put(target).unwrap();
            tx.commit().unwrap();
            id
        };

        let err = run(
            &f,
            Command::RolesAssign(CommandRolesAssign {
                user_id: target_id,
                roles: vec!["writer".into()],
            }),
        )
        .unwrap_err();
        assert_eq!(err.error_code, codes::ERROR_OPERATION_NOT_PERMITTED);
        assert_eq!(err.http_status, 400);

        // Granting a role the actor holds succeeds.
        run(
            &f,
            Command::RolesAssign(CommandRolesAssign {
                user_id: target_id,
                roles: vec!["reader".into()],
            }),
        )
        .unwrap();

        let response = run(&f, Command::RolesGet(CommandRolesGet { user_id: target_id })).unwrap();
        match response {
            Response::RolesGet(r) => assert_eq!(r.roles, vec!["reader".to_string()]),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_roles_revoke_and_audit() {
        let f = fixture(&["administrator"], SecurityPolicy::deny_all());
        let target_id = {
            let conn = f.db.connect().unwrap();
            let mut tx = conn.begin();
            let target = User {
                id: UserId::generate(),
                name: "target".into(),
                password_hash: "h".into(),
                roles: BTreeSet::from([RoleName::new("reader"), RoleName::new("writer")]),
            };
            let id = target.id;
            tx.user_put(target).unwrap();
            tx.commit().unwrap();
            id
        };

        run(
            &f,
            Command::RolesRevoke(CommandRolesRevoke {
                user_id: target_id,
                roles: vec!["writer".into()],
            }),
        )
        .unwrap();

        let response = run(&f, Command::RolesGet(CommandRolesGet { user_id: target_id })).unwrap();
        match response {
            Response::RolesGet(r) => assert_eq!(r.roles, vec!["reader".to_string()]),
            other => panic!("unexpected response: {other:?}"),
        }

        let records = f.db.audit_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, events::ROLES_REVOKED);
    }

    #[test]
    fn test_roles_get_self_needs_no_grant() {
        let f = fixture(&["reader"], SecurityPolicy::deny_all());
        let response = run(
            &f,
            Command::RolesGet(CommandRolesGet { user_id: f.user.id }),
        )
        .unwrap();
        match response {
            Response::RolesGet(r) => assert_eq!(r.roles, vec!["reader".to_string()]),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_logout_destroys_session_and_audits() {
        let f = fixture(&["reader"], SecurityPolicy::deny_all());
        // Register a session under the fixture secret so logout has
        // something to destroy.
        let live = f
            .registry
            .create(f.user.id, f.session.roles.clone())
            .unwrap();
        let session = Session {
            secret: live.secret.clone(),
            user_id: f.user.id,
            roles: f.session.roles.clone(),
            created_at: Instant::now(),
            expires_at: Instant::now() + Duration::from_secs(60),
            search: Mutex::new(None),
        };
        let f2 = Fixture {
            db: f.db.clone(),
            registry: f.registry,
            policy: f.policy,
            session,
            user: f.user.clone(),
        };
        run(&f2, Command::Logout(Default::default())).unwrap();
        assert!(f2.registry.find(live.secret.as_str()).is_none());
        let records = f2.db.audit_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, events::USER_LOGGED_OUT);
    }

    #[test]
    fn test_file_info_get() {
        let f = fixture(&["editor"], policy_allow_all_to("editor"));
        let id = create_asset(&f, "data.bin");
        let response = run(&f, Command::FileInfoGet(CommandFileInfoGet { asset_id: id })).unwrap();
        match response {
            Response::FileInfo(r) => {
                assert_eq!(r.asset_id, id);
                assert_eq!(r.size, 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
