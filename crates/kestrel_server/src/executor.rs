//! Command executor dispatch.
//!
//! A total mapping from each public command type to its handler. Login
//! is not dispatchable here: it belongs to the login endpoint, and a
//! login command arriving on the command endpoint is a client protocol
//! error, not an internal fault.

use kestrel_common::ids::RequestId;
use kestrel_common::security::{SecurityPolicy, Subject};
use kestrel_protocol::types::{Command, Response};
use kestrel_store::engine::{StoreTransaction, User};

use crate::commands;
use crate::error::CommandFailure;
use crate::sessions::{Session, SessionRegistry};

/// Everything a command handler may touch. The transaction's acting
/// user has already been bound to the session's user id.
pub struct CommandContext<'a> {
    pub request_id: RequestId,
    pub session: &'a Session,
    pub user: &'a User,
    pub policy: &'a SecurityPolicy,
    pub registry: &'a SessionRegistry,
    pub txn: &'a mut StoreTransaction,
}

impl CommandContext<'_> {
    pub fn subject(&self) -> Subject {
        Subject::new(self.session.roles.clone())
    }

    /// Security check: raise the fixed policy-denied failure unless the
    /// subject may perform `action` on `object`.
    pub fn require(&self, object: &str, action: &str) -> Result<(), CommandFailure> {
        if self.policy.check(&self.subject(), object, action).is_allowed() {
            Ok(())
        } else {
            Err(CommandFailure::security_denied(
                self.request_id,
                object,
                action,
            ))
        }
    }

    pub fn store_failure(&self, error: &kestrel_common::error::StoreError) -> CommandFailure {
        CommandFailure::from_store(self.request_id, error)
    }
}

/// Dispatch one command to its handler.
pub fn execute_command(
    ctx: &mut CommandContext<'_>,
    command: Command,
) -> Result<Response, CommandFailure> {
    match command {
        Command::Login(_) => Err(CommandFailure::protocol(
            ctx.request_id,
            "login commands must be sent to the login endpoint",
        )),
        Command::Logout(_) => commands::logout(ctx),
        Command::AssetCreate(c) => commands::asset_create(ctx, c),
        Command::AssetGet(c) => commands::asset_get(ctx, c),
        Command::AssetSearchBegin(c) => commands::asset_search_begin(ctx, c),
        Command::AssetSearchNext(_) => commands::asset_search_next(ctx),
        Command::AssetSearchPrevious(_) => commands::asset_search_previous(ctx),
        Command::RolesAssign(c) => commands::roles_assign(ctx, c),
        Command::RolesRevoke(c) => commands::roles_revoke(ctx, c),
        Command::RolesGet(c) => commands::roles_get(ctx, c),
        Command::FileInfoGet(c) => commands::file_info_get(ctx, c),
    }
}
