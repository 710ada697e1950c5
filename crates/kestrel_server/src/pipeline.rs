//! The layered request pipeline.
//!
//! A request core is a pure function from `(request, info)` to a
//! response. Cross-cutting behaviour is added by explicit wrappers,
//! composed outermost-to-innermost:
//!
//! ```text
//! instrumented(authenticated(transactional(execute_command)))   authenticated endpoints
//! instrumented(transactional(login))                            login
//! instrumented(core)                                            version/health/discovery
//! ```
//!
//! Each wrapper is independently testable by substituting the wrapped
//! core.

use std::sync::Arc;

use kestrel_common::request_info::RequestInfo;
use kestrel_protocol::http::{HttpRequest, HttpResponse};
use kestrel_protocol::types::SESSION_COOKIE;
use kestrel_store::engine::{Database, StoreTransaction, User};

use crate::error::CommandFailure;
use crate::sessions::{Session, SessionRegistry};

/// A complete request handler.
pub trait HttpCore: Send + Sync {
    fn handle(&self, request: &HttpRequest, info: &RequestInfo) -> HttpResponse;
}

/// A handler that runs with a resolved session and its user.
pub trait SessionCore: Send + Sync {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
    ) -> HttpResponse;
}

/// A handler that runs inside one open store transaction (no session).
pub trait TxnCore: Send + Sync {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        txn: &mut StoreTransaction,
    ) -> HttpResponse;
}

/// A handler that runs with both a session and an open transaction.
pub trait AuthedTxnCore: Send + Sync {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
        txn: &mut StoreTransaction,
    ) -> HttpResponse;
}

// ── Instrumentation ──────────────────────────────────────────────────────

/// Logs every request with its id, outcome and latency, and records
/// request metrics.
pub struct Instrumented<C> {
    endpoint: &'static str,
    inner: C,
}

impl<C> Instrumented<C> {
    pub fn new(endpoint: &'static str, inner: C) -> Self {
        Self { endpoint, inner }
    }
}

impl<C: HttpCore> HttpCore for Instrumented<C> {
    fn handle(&self, request: &HttpRequest, info: &RequestInfo) -> HttpResponse {
        tracing::debug!(
            endpoint = self.endpoint,
            request_id = %info.request_id.0,
            method = %request.method,
            path = %request.path,
            "request received"
        );
        let response = self.inner.handle(request, info);
        let elapsed_us = info.elapsed_us();
        tracing::info!(
            endpoint = self.endpoint,
            request_id = %info.request_id.0,
            status = response.status,
            elapsed_us,
            "request handled"
        );
        kestrel_observability::record_request_metrics(self.endpoint, response.status, elapsed_us);
        response
    }
}

// ── Authentication ───────────────────────────────────────────────────────

/// Resolves the session cookie before invoking the wrapped core.
///
/// Absent or unknown cookies, expired sessions, and sessions whose user
/// no longer exists in storage all yield 401 without further
/// processing. The user existence check defends against
/// storage/session divergence.
pub struct Authenticated<C> {
    registry: Arc<SessionRegistry>,
    database: Database,
    inner: C,
}

impl<C> Authenticated<C> {
    pub fn new(registry: Arc<SessionRegistry>, database: Database, inner: C) -> Self {
        Self {
            registry,
            database,
            inner,
        }
    }
}

impl<C: SessionCore> HttpCore for Authenticated<C> {
    fn handle(&self, request: &HttpRequest, info: &RequestInfo) -> HttpResponse {
        let secret = match request.cookie(SESSION_COOKIE) {
            Some(secret) => secret,
            None => {
                return CommandFailure::authentication(info.request_id, "no session cookie")
                    .to_http_response()
            }
        };
        let session = match self.registry.find(&secret) {
            Some(session) => session,
            None => {
                return CommandFailure::authentication(
                    info.request_id,
                    "session unknown or expired",
                )
                .to_http_response()
            }
        };

        let user = match self.lookup_user(&session, info) {
            Ok(user) => user,
            Err(response) => return response,
        };

        self.inner.handle(request, info, &session, &user)
    }
}

impl<C> Authenticated<C> {
    fn lookup_user(
        &self,
        session: &Arc<Session>,
        info: &RequestInfo,
    ) -> Result<User, HttpResponse> {
        let conn = self
            .database
            .connect()
            .map_err(|e| CommandFailure::from_store(info.request_id, &e).to_http_response())?;
        let txn = conn.begin();
        match txn.user_get(session.user_id) {
            Ok(Some(user)) => Ok(user),
            Ok(None) => {
                // The session outlived its user; destroy it.
                self.registry.remove(session.secret.as_str());
                Err(
                    CommandFailure::authentication(info.request_id, "user no longer exists")
                        .to_http_response(),
                )
            }
            Err(e) => Err(CommandFailure::from_store(info.request_id, &e).to_http_response()),
        }
    }
}

// ── Transaction management ───────────────────────────────────────────────

/// Opens one connection and one transaction around the wrapped core.
/// The transaction is dropped (rolled back) on every exit path unless
/// the core committed it; commit is the core's explicit act.
pub struct Transactional<C> {
    database: Database,
    inner: C,
}

impl<C> Transactional<C> {
    pub fn new(database: Database, inner: C) -> Self {
        Self { database, inner }
    }
}

impl<C: TxnCore> HttpCore for Transactional<C> {
    fn handle(&self, request: &HttpRequest, info: &RequestInfo) -> HttpResponse {
        let conn = match self.database.connect() {
            Ok(conn) => conn,
            Err(e) => return CommandFailure::from_store(info.request_id, &e).to_http_response(),
        };
        let mut txn = conn.begin();
        self.inner.handle(request, info, &mut txn)
        // txn dropped here: rollback unless the core committed.
    }
}

/// Session-aware variant of [`Transactional`].
pub struct AuthedTransactional<C> {
    database: Database,
    inner: C,
}

impl<C> AuthedTransactional<C> {
    pub fn new(database: Database, inner: C) -> Self {
        Self { database, inner }
    }
}

impl<C: AuthedTxnCore> SessionCore for AuthedTransactional<C> {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
    ) -> HttpResponse {
        let conn = match self.database.connect() {
            Ok(conn) => conn,
            Err(e) => return CommandFailure::from_store(info.request_id, &e).to_http_response(),
        };
        let mut txn = conn.begin();
        self.inner.handle(request, info, session, user, &mut txn)
    }
}
