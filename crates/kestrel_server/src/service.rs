//! Endpoint routing and the TCP accept loop.
//!
//! Routes:
//! - `GET  /`                    version discovery (unauthenticated)
//! - `POST /v1/login`            login
//! - `POST /v1/command`          one command
//! - `POST /v1/transaction`      command transaction
//! - `GET  /v1/file/{asset-id}`  raw asset content download
//! - `PUT  /v1/file/{asset-id}`  raw asset content upload
//! - `GET  /version`, `GET /health`   plaintext probes
//!
//! Served over raw TCP with the in-crate HTTP plumbing; no HTTP
//! framework dependency.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use kestrel_common::audit::events;
use kestrel_common::config::KestrelConfig;
use kestrel_common::error::StoreError;
use kestrel_common::hash::{hash_buffer_hex, HashAlgorithm};
use kestrel_common::ids::{AssetId, UserId};
use kestrel_common::request_info::RequestInfo;
use kestrel_common::security::{role_administrator, SecurityPolicy, Subject};
use kestrel_protocol::codec::{
    decode_exactly_one, decode_message_sequence, encode_message, encode_message_sequence,
};
use kestrel_protocol::compress::gzip_encode;
use kestrel_protocol::discovery::encode_advertisements;
use kestrel_protocol::http::{
    read_request, write_response, HttpRequest, HttpResponse,
};
use kestrel_protocol::types::{
    Command, EndpointAdvertisement, Message, ProtocolIdentifier, Response, ResponseLogin,
    CONTENT_TYPE_DISCOVERY, CONTENT_TYPE_MESSAGE, CONTENT_TYPE_SEQUENCE, PROTOCOL_KESTREL_ID,
    SESSION_COOKIE,
};
use kestrel_protocol::WireError;
use kestrel_store::engine::{Database, StoreTransaction, User};

use crate::auth::{password_hash, AuthenticationFault, IdentityProvider};
use crate::error::CommandFailure;
use crate::executor::{execute_command, CommandContext};
use crate::pipeline::{
    Authenticated, AuthedTransactional, AuthedTxnCore, HttpCore, Instrumented, Transactional,
    TxnCore,
};
use crate::sessions::{Session, SessionRegistry};

const HEADER_HASH_ALGORITHM: &str = "X-Kestrel-Hash-Algorithm";
const HEADER_HASH_VALUE: &str = "X-Kestrel-Hash-Value";
const HEADER_DESCRIPTION: &str = "X-Kestrel-Description";

// ── Shared helpers ───────────────────────────────────────────────────────

fn require_content_type(
    request: &HttpRequest,
    expected: &str,
    info: &RequestInfo,
) -> Result<(), CommandFailure> {
    match request.content_type() {
        Some(ct) if ct == expected => Ok(()),
        other => Err(CommandFailure::protocol(
            info.request_id,
            format!("content type {other:?} does not match required {expected:?}"),
        )),
    }
}

fn require_cap(
    request: &HttpRequest,
    cap: usize,
    info: &RequestInfo,
) -> Result<(), CommandFailure> {
    if request.body.len() > cap {
        return Err(CommandFailure::oversized(
            info.request_id,
            request.body.len(),
            cap,
        ));
    }
    Ok(())
}

fn message_response(status: u16, response: Response) -> HttpResponse {
    let body = encode_message(&Message::Response(response));
    HttpResponse::with_body(status, CONTENT_TYPE_MESSAGE, body.to_vec())
}

/// Asset id from a `/v1/file/{uuid}` path.
fn file_asset_id(path: &str) -> Option<AssetId> {
    path.strip_prefix("/v1/file/").and_then(AssetId::parse)
}

// ── Discovery ────────────────────────────────────────────────────────────

struct DiscoveryCore;

impl DiscoveryCore {
    fn advertisements() -> Vec<EndpointAdvertisement> {
        vec![
            EndpointAdvertisement {
                protocol: ProtocolIdentifier::new(PROTOCOL_KESTREL_ID, 1, 0),
                endpoint_path: "/v1".into(),
            },
            EndpointAdvertisement {
                protocol: ProtocolIdentifier::new(PROTOCOL_KESTREL_ID, 1, 1),
                endpoint_path: "/v1".into(),
            },
        ]
    }
}

impl HttpCore for DiscoveryCore {
    fn handle(&self, _request: &HttpRequest, _info: &RequestInfo) -> HttpResponse {
        let body = encode_advertisements(&Self::advertisements());
        HttpResponse::with_body(200, CONTENT_TYPE_DISCOVERY, body.to_vec())
    }
}

// ── Login ────────────────────────────────────────────────────────────────

struct LoginCore {
    registry: Arc<SessionRegistry>,
    identity: Arc<dyn IdentityProvider>,
    session_expiry_secs: u64,
    command_cap: usize,
}

impl LoginCore {
    fn login(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        txn: &mut StoreTransaction,
    ) -> Result<HttpResponse, CommandFailure> {
        require_content_type(request, CONTENT_TYPE_MESSAGE, info)?;
        require_cap(request, self.command_cap, info)?;

        let message = decode_exactly_one(&request.body)
            .map_err(|e| CommandFailure::protocol(info.request_id, e.to_string()))?;
        let command = match message {
            Message::Command(Command::Login(c)) => c,
            _ => {
                return Err(CommandFailure::validity(
                    info.request_id,
                    "the login endpoint accepts only login commands",
                ))
            }
        };

        let user = self
            .identity
            .authenticate(txn, &command.user_name, &command.password)
            .map_err(|fault| match fault {
                AuthenticationFault::Rejected => {
                    CommandFailure::authentication(info.request_id, "invalid credentials")
                }
                AuthenticationFault::Unavailable(detail) => {
                    CommandFailure::io(info.request_id, detail)
                }
            })?;

        let session = self
            .registry
            .create(user.id, user.roles.clone())
            .ok_or_else(|| CommandFailure::io(info.request_id, "session capacity reached"))?;

        txn.set_acting_user(user.id);
        txn.audit_put(
            events::USER_LOGGED_IN,
            BTreeMap::from([("user_name".to_string(), command.user_name.clone())]),
        )
        .map_err(|e| CommandFailure::from_store(info.request_id, &e))?;
        txn.commit()
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?;

        tracing::info!(user = %command.user_name, "login succeeded");
        let response = message_response(
            200,
            Response::Login(ResponseLogin {
                request_id: info.request_id,
                user_id: user.id,
            }),
        );
        Ok(response.with_header(
            "Set-Cookie",
            format!(
                "{}={}; Max-Age={}; Path=/; HttpOnly",
                SESSION_COOKIE,
                session.secret.as_str(),
                self.session_expiry_secs
            ),
        ))
    }
}

impl TxnCore for LoginCore {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        txn: &mut StoreTransaction,
    ) -> HttpResponse {
        match self.login(request, info, txn) {
            Ok(response) => response,
            Err(failure) => failure.to_http_response(),
        }
    }
}

// ── Single command ───────────────────────────────────────────────────────

struct CommandEndpointCore {
    policy: Arc<SecurityPolicy>,
    registry: Arc<SessionRegistry>,
    command_cap: usize,
}

impl CommandEndpointCore {
    fn run(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
        txn: &mut StoreTransaction,
    ) -> Result<HttpResponse, CommandFailure> {
        require_content_type(request, CONTENT_TYPE_MESSAGE, info)?;
        require_cap(request, self.command_cap, info)?;

        let message = decode_exactly_one(&request.body)
            .map_err(|e| CommandFailure::protocol(info.request_id, e.to_string()))?;
        let command = message.into_command().ok_or_else(|| {
            CommandFailure::validity(info.request_id, "expected a command message")
        })?;

        txn.set_acting_user(user.id);
        let response = {
            let mut ctx = CommandContext {
                request_id: info.request_id,
                session,
                user,
                policy: &self.policy,
                registry: &self.registry,
                txn,
            };
            execute_command(&mut ctx, command)?
        };
        // Commit only after handler success; a handler error above
        // returns early and the transaction rolls back on drop.
        txn.commit()
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?;
        Ok(message_response(200, response))
    }
}

impl AuthedTxnCore for CommandEndpointCore {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
        txn: &mut StoreTransaction,
    ) -> HttpResponse {
        match self.run(request, info, session, user, txn) {
            Ok(response) => response,
            Err(failure) => failure.to_http_response(),
        }
    }
}

// ── Command transaction ──────────────────────────────────────────────────

struct TransactionEndpointCore {
    policy: Arc<SecurityPolicy>,
    registry: Arc<SessionRegistry>,
    command_cap: usize,
}

impl TransactionEndpointCore {
    fn run(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
        txn: &mut StoreTransaction,
    ) -> Result<HttpResponse, CommandFailure> {
        require_content_type(request, CONTENT_TYPE_SEQUENCE, info)?;
        require_cap(request, self.command_cap, info)?;

        let messages = decode_message_sequence(&request.body)
            .map_err(|e| CommandFailure::protocol(info.request_id, e.to_string()))?;

        txn.set_acting_user(user.id);

        // Strict submission order; the first error cancels the rest of
        // the batch and the transaction is never committed.
        let mut responses: Vec<Response> = Vec::with_capacity(messages.len());
        let mut error_status: Option<u16> = None;
        for message in messages {
            let command = match message.into_command() {
                Some(command) => command,
                None => {
                    let failure = CommandFailure::protocol(
                        info.request_id,
                        "transactions may contain only commands",
                    );
                    error_status = Some(failure.http_status);
                    responses.push(Response::Error(failure.to_error_response()));
                    break;
                }
            };
            let result = {
                let mut ctx = CommandContext {
                    request_id: info.request_id,
                    session,
                    user,
                    policy: &self.policy,
                    registry: &self.registry,
                    txn,
                };
                execute_command(&mut ctx, command)
            };
            match result {
                Ok(response) => responses.push(response),
                Err(failure) => {
                    error_status = Some(failure.http_status);
                    responses.push(Response::Error(failure.to_error_response()));
                    break;
                }
            }
        }

        if error_status.is_none() {
            if let Err(e) = txn.commit() {
                let failure = CommandFailure::from_store(info.request_id, &e);
                error_status = Some(failure.http_status);
                responses.push(Response::Error(failure.to_error_response()));
            }
        }

        let status = error_status.unwrap_or(200);
        let messages: Vec<Message> = responses.into_iter().map(Message::Response).collect();
        let body = encode_message_sequence(&messages);
        Ok(HttpResponse::with_body(
            status,
            CONTENT_TYPE_SEQUENCE,
            body.to_vec(),
        ))
    }
}

impl AuthedTxnCore for TransactionEndpointCore {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
        txn: &mut StoreTransaction,
    ) -> HttpResponse {
        match self.run(request, info, session, user, txn) {
            Ok(response) => response,
            Err(failure) => failure.to_http_response(),
        }
    }
}

// ── File content ─────────────────────────────────────────────────────────

struct FileGetCore {
    policy: Arc<SecurityPolicy>,
}

impl FileGetCore {
    fn run(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        txn: &mut StoreTransaction,
    ) -> Result<HttpResponse, CommandFailure> {
        let asset_id = file_asset_id(&request.path)
            .ok_or_else(|| CommandFailure::validity(info.request_id, "malformed asset id"))?;
        let subject = Subject::new(session.roles.clone());
        if !self.policy.check(&subject, "asset", "read").is_allowed() {
            return Err(CommandFailure::security_denied(
                info.request_id,
                "asset",
                "read",
            ));
        }
        let asset = txn
            .asset_get(asset_id)
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?
            .ok_or_else(|| CommandFailure::nonexistent(info.request_id, "asset"))?;
        let content = txn
            .asset_content_get(asset_id)
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?
            .ok_or_else(|| CommandFailure::nonexistent(info.request_id, "asset content"))?;
        kestrel_observability::record_transfer_octets("download", content.len() as u64);
        Ok(HttpResponse::with_body(200, &asset.media_type, content))
    }
}

impl AuthedTxnCore for FileGetCore {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        _user: &User,
        txn: &mut StoreTransaction,
    ) -> HttpResponse {
        match self.run(request, info, session, txn) {
            Ok(response) => response,
            Err(failure) => failure.to_http_response(),
        }
    }
}

struct FilePutCore {
    policy: Arc<SecurityPolicy>,
    file_cap: usize,
}

impl FilePutCore {
    fn run(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
        txn: &mut StoreTransaction,
    ) -> Result<HttpResponse, CommandFailure> {
        let asset_id = file_asset_id(&request.path)
            .ok_or_else(|| CommandFailure::validity(info.request_id, "malformed asset id"))?;
        require_cap(request, self.file_cap, info)?;

        let subject = Subject::new(session.roles.clone());
        if !self.policy.check(&subject, "asset", "write").is_allowed() {
            return Err(CommandFailure::security_denied(
                info.request_id,
                "asset",
                "write",
            ));
        }

        let media_type = request
            .content_type()
            .ok_or_else(|| CommandFailure::validity(info.request_id, "missing content type"))?
            .to_string();
        let algorithm_name = request
            .header(HEADER_HASH_ALGORITHM)
            .ok_or_else(|| {
                CommandFailure::validity(info.request_id, "missing hash algorithm header")
            })?
            .to_string();
        let declared = request
            .header(HEADER_HASH_VALUE)
            .ok_or_else(|| CommandFailure::validity(info.request_id, "missing hash value header"))?
            .to_string();
        let description = request
            .header(HEADER_DESCRIPTION)
            .unwrap_or_default()
            .to_string();

        let algorithm = HashAlgorithm::from_name(&algorithm_name)
            .map_err(|e| CommandFailure::validity(info.request_id, e.to_string()))?;

        // The asset record is only updated when the received content
        // hashes to the declared value.
        let computed = hash_buffer_hex(algorithm, &request.body);
        if computed != declared {
            return Err(CommandFailure::resource_mismatch(
                info.request_id,
                algorithm.name(),
                &declared,
                &computed,
            ));
        }

        let mut asset = txn
            .asset_get(asset_id)
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?
            .ok_or_else(|| CommandFailure::nonexistent(info.request_id, "asset"))?;
        asset.media_type = media_type;
        asset.size = request.body.len() as u64;
        asset.hash_algorithm = algorithm.name().to_string();
        asset.hash_value = computed;
        if !description.is_empty() {
            asset.description = description;
        }

        txn.set_acting_user(user.id);
        txn.asset_put(asset.clone())
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?;
        txn.asset_content_put(asset_id, request.body.clone())
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?;
        txn.audit_put(
            events::FILE_STORED,
            BTreeMap::from([
                ("asset_id".to_string(), asset_id.0.to_string()),
                ("size".to_string(), asset.size.to_string()),
                ("hash_algorithm".to_string(), asset.hash_algorithm.clone()),
            ]),
        )
        .map_err(|e| CommandFailure::from_store(info.request_id, &e))?;
        txn.commit()
            .map_err(|e| CommandFailure::from_store(info.request_id, &e))?;

        kestrel_observability::record_transfer_octets("upload", asset.size);
        Ok(HttpResponse::new(200))
    }
}

impl AuthedTxnCore for FilePutCore {
    fn handle(
        &self,
        request: &HttpRequest,
        info: &RequestInfo,
        session: &Arc<Session>,
        user: &User,
        txn: &mut StoreTransaction,
    ) -> HttpResponse {
        match self.run(request, info, session, user, txn) {
            Ok(response) => response,
            Err(failure) => failure.to_http_response(),
        }
    }
}

// ── Probes ───────────────────────────────────────────────────────────────

struct VersionCore;

impl HttpCore for VersionCore {
    fn handle(&self, _request: &HttpRequest, _info: &RequestInfo) -> HttpResponse {
        let body = format!("kestrel {}", env!("CARGO_PKG_VERSION"));
        HttpResponse::with_body(200, "text/plain", body.into_bytes())
    }
}

struct HealthCore;

impl HttpCore for HealthCore {
    fn handle(&self, _request: &HttpRequest, _info: &RequestInfo) -> HttpResponse {
        HttpResponse::with_body(200, "text/plain", b"ok".to_vec())
    }
}

// ── Service ──────────────────────────────────────────────────────────────

/// The assembled endpoint table. Wrapper chains are composed once, at
/// construction, outermost-to-innermost.
pub struct KestrelService {
    file_body_cap: usize,
    discovery: Instrumented<DiscoveryCore>,
    login: Instrumented<Transactional<LoginCore>>,
    command: Instrumented<Authenticated<AuthedTransactional<CommandEndpointCore>>>,
    transaction: Instrumented<Authenticated<AuthedTransactional<TransactionEndpointCore>>>,
    file_get: Instrumented<Authenticated<AuthedTransactional<FileGetCore>>>,
    file_put: Instrumented<Authenticated<AuthedTransactional<FilePutCore>>>,
    version: Instrumented<VersionCore>,
    health: Instrumented<HealthCore>,
}

impl KestrelService {
    pub fn new(
        config: &KestrelConfig,
        database: Database,
        policy: SecurityPolicy,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            Duration::from_secs(config.sessions.expiry_secs),
            config.sessions.max_sessions,
        ));
        let policy = Arc::new(policy);
        let command_cap = config.limits.command_body_cap_bytes;
        let file_cap = config.limits.file_body_cap_bytes;

        Self {
            file_body_cap: file_cap,
            discovery: Instrumented::new("discovery", DiscoveryCore),
            login: Instrumented::new(
                "login",
                Transactional::new(
                    database.clone(),
                    LoginCore {
                        registry: registry.clone(),
                        identity,
                        session_expiry_secs: config.sessions.expiry_secs,
                        command_cap,
                    },
                ),
            ),
            command: Instrumented::new(
                "command",
                Authenticated::new(
                    registry.clone(),
                    database.clone(),
                    AuthedTransactional::new(
                        database.clone(),
                        CommandEndpointCore {
                            policy: policy.clone(),
                            registry: registry.clone(),
                            command_cap,
                        },
                    ),
                ),
            ),
            transaction: Instrumented::new(
                "transaction",
                Authenticated::new(
                    registry.clone(),
                    database.clone(),
                    AuthedTransactional::new(
                        database.clone(),
                        TransactionEndpointCore {
                            policy: policy.clone(),
                            registry: registry.clone(),
                            command_cap,
                        },
                    ),
                ),
            ),
            file_get: Instrumented::new(
                "file-get",
                Authenticated::new(
                    registry.clone(),
                    database.clone(),
                    AuthedTransactional::new(
                        database.clone(),
                        FileGetCore {
                            policy: policy.clone(),
                        },
                    ),
                ),
            ),
            file_put: Instrumented::new(
                "file-put",
                Authenticated::new(
                    registry.clone(),
                    database.clone(),
                    AuthedTransactional::new(
                        database,
                        FilePutCore {
                            policy,
                            file_cap,
                        },
                    ),
                ),
            ),
            version: Instrumented::new("version", VersionCore),
            health: Instrumented::new("health", HealthCore),
        }
    }

    /// Route one request and apply transparent response compression.
    pub fn dispatch(&self, request: &HttpRequest, info: &RequestInfo) -> HttpResponse {
        let response = self.route(request, info);
        maybe_gzip(request, response)
    }

    fn route(&self, request: &HttpRequest, info: &RequestInfo) -> HttpResponse {
        let method = request.method.as_str();
        let path = request.path.as_str();
        match (method, path) {
            ("GET", "/") => self.discovery.handle(request, info),
            (_, "/") => method_not_allowed(),
            ("POST", "/v1/login") => self.login.handle(request, info),
            (_, "/v1/login") => method_not_allowed(),
            ("POST", "/v1/command") => self.command.handle(request, info),
            (_, "/v1/command") => method_not_allowed(),
            ("POST", "/v1/transaction") => self.transaction.handle(request, info),
            (_, "/v1/transaction") => method_not_allowed(),
            ("GET", p) if p.starts_with("/v1/file/") => self.file_get.handle(request, info),
            ("PUT", p) if p.starts_with("/v1/file/") => self.file_put.handle(request, info),
            (_, p) if p.starts_with("/v1/file/") => method_not_allowed(),
            ("GET", "/version") => self.version.handle(request, info),
            ("GET", "/health") => self.health.handle(request, info),
            _ => HttpResponse::with_body(404, "text/plain", b"not found".to_vec()),
        }
    }
}

fn method_not_allowed() -> HttpResponse {
    HttpResponse::with_body(405, "text/plain", b"method not allowed".to_vec())
}

/// Compress protocol-encoded bodies when the client accepts gzip. Raw
/// asset content is served as-is.
fn maybe_gzip(request: &HttpRequest, mut response: HttpResponse) -> HttpResponse {
    let compressible = matches!(
        response.content_type(),
        Some(CONTENT_TYPE_MESSAGE) | Some(CONTENT_TYPE_SEQUENCE) | Some(CONTENT_TYPE_DISCOVERY)
    );
    if compressible && request.accepts_gzip() && !response.body.is_empty() {
        response.body = gzip_encode(&response.body);
        response
            .headers
            .push(("Content-Encoding".into(), "gzip".into()));
    }
    response
}

// ── Bootstrap ────────────────────────────────────────────────────────────

/// Create the administrator account at startup if it does not exist.
pub fn bootstrap_admin(
    database: &Database,
    name: &str,
    password: &str,
) -> Result<UserId, StoreError> {
    let conn = database.connect()?;
    let mut txn = conn.begin();
    if let Some(existing) = txn.user_get_by_name(name)? {
        return Ok(existing.id);
    }
    let user = User {
        id: UserId::generate(),
        name: name.to_string(),
        password_hash: password_hash(password),
        roles: std::iter::once(role_administrator()).collect(),
    };
    let id = user.id;
    txn.user_put(user)?;
    txn.commit()?;
    tracing::info!(user = name, "bootstrapped administrator account");
    Ok(id)
}

// ── Accept loop ──────────────────────────────────────────────────────────

/// Serve connections until the shutdown future resolves.
pub async fn run(
    service: Arc<KestrelService>,
    listener: TcpListener,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(service, stream, addr.to_string()).await {
                                tracing::debug!("connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::debug!("accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("server shutting down");
                break;
            }
        }
    }
}

/// Bind and serve.
pub async fn serve(
    service: Arc<KestrelService>,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("kestrel listening on {}", addr);
    run(service, listener, shutdown).await;
    Ok(())
}

async fn handle_connection(
    service: Arc<KestrelService>,
    mut stream: TcpStream,
    remote: String,
) -> Result<(), WireError> {
    let request = match read_request(&mut stream, service.file_body_cap).await {
        Ok(request) => request,
        Err(WireError::BodyTooLarge { size, max }) => {
            let response = HttpResponse::with_body(
                413,
                "text/plain",
                format!("body of {size} bytes exceeds {max}").into_bytes(),
            );
            write_response(&mut stream, &response).await?;
            return Ok(());
        }
        Err(e) => {
            let response =
                HttpResponse::with_body(400, "text/plain", format!("bad request: {e}").into_bytes());
            write_response(&mut stream, &response).await?;
            return Ok(());
        }
    };

    let info = RequestInfo::new(remote);
    let response = service.dispatch(&request, &info);
    write_response(&mut stream, &response).await?;
    Ok(())
}
