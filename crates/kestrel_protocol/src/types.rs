//! Wire message types and protocol constants.
//!
//! Every command declares the response type it expects via
//! [`Command::expected_response`]; the transport rejects any decoded
//! response whose kind differs (error responses are exempt).

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use kestrel_common::error::Blame;
use kestrel_common::ids::{AssetId, RequestId, UserId};

/// The Kestrel protocol family identifier. A server may advertise
/// several versions of this protocol; other ids are foreign protocols.
pub const PROTOCOL_KESTREL_ID: Uuid = Uuid::from_u128(0x4b45_5354_5245_4c00_9e41_7c1a_23d8_66b0);

/// Protocol versions this client implementation supports, newest last.
pub fn client_supported_protocols() -> Vec<ProtocolIdentifier> {
    vec![
        ProtocolIdentifier::new(PROTOCOL_KESTREL_ID, 1, 0),
        ProtocolIdentifier::new(PROTOCOL_KESTREL_ID, 1, 1),
    ]
}

/// Maximum frame payload size: 1 MiB. Oversized input is rejected
/// before decoding.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Frame header size: 1 byte tag + 4 bytes length.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Content type for a single framed message.
pub const CONTENT_TYPE_MESSAGE: &str = "application/vnd.kestrel.message";
/// Content type for a zero-terminated sequence of framed messages.
pub const CONTENT_TYPE_SEQUENCE: &str = "application/vnd.kestrel.message-sequence";
/// Content type for raw asset content.
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
/// Content type for the version-discovery advertisement list.
pub const CONTENT_TYPE_DISCOVERY: &str = "application/vnd.kestrel.discovery";

/// Name of the session cookie set by the login endpoint.
pub const SESSION_COOKIE: &str = "KESTREL_SESSION";

// ── Message type tags ────────────────────────────────────────────────────

pub const MSG_CMD_LOGIN: u8 = 0x01;
pub const MSG_CMD_LOGOUT: u8 = 0x02;
pub const MSG_CMD_ASSET_CREATE: u8 = 0x10;
pub const MSG_CMD_ASSET_GET: u8 = 0x11;
pub const MSG_CMD_ASSET_SEARCH_BEGIN: u8 = 0x12;
pub const MSG_CMD_ASSET_SEARCH_NEXT: u8 = 0x13;
pub const MSG_CMD_ASSET_SEARCH_PREVIOUS: u8 = 0x14;
pub const MSG_CMD_ROLES_ASSIGN: u8 = 0x20;
pub const MSG_CMD_ROLES_REVOKE: u8 = 0x21;
pub const MSG_CMD_ROLES_GET: u8 = 0x22;
pub const MSG_CMD_FILE_INFO: u8 = 0x30;
pub const MSG_RESP_LOGIN: u8 = 0x81;
pub const MSG_RESP_LOGOUT: u8 = 0x82;
pub const MSG_RESP_ASSET_CREATE: u8 = 0x90;
pub const MSG_RESP_ASSET_GET: u8 = 0x91;
pub const MSG_RESP_ASSET_PAGE: u8 = 0x92;
pub const MSG_RESP_ROLES_ASSIGN: u8 = 0xA0;
pub const MSG_RESP_ROLES_REVOKE: u8 = 0xA1;
pub const MSG_RESP_ROLES_GET: u8 = 0xA2;
pub const MSG_RESP_FILE_INFO: u8 = 0xB0;
pub const MSG_RESP_ERROR: u8 = 0xF0;

// ── Negotiation model ────────────────────────────────────────────────────

/// One protocol the server speaks: an identifier plus a version pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolIdentifier {
    pub id: Uuid,
    pub version_major: u32,
    pub version_minor: u32,
}

impl ProtocolIdentifier {
    pub fn new(id: Uuid, version_major: u32, version_minor: u32) -> Self {
        Self {
            id,
            version_major,
            version_minor,
        }
    }

    pub fn version_pair(&self) -> (u32, u32) {
        (self.version_major, self.version_minor)
    }
}

impl fmt::Display for ProtocolIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.id, self.version_major, self.version_minor)
    }
}

/// One entry of the server's version-discovery response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAdvertisement {
    pub protocol: ProtocolIdentifier,
    pub endpoint_path: String,
}

// ── Command bodies ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLogin {
    pub user_name: String,
    pub password: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandLogout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAssetCreate {
    pub name: String,
    pub media_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAssetGet {
    pub asset_id: AssetId,
}

/// Search parameters. `page_size == 0` selects the server default.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetQuery {
    pub name_contains: Option<String>,
    pub media_type: Option<String>,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAssetSearchBegin {
    pub query: AssetQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandAssetSearchNext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandAssetSearchPrevious;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRolesAssign {
    pub user_id: UserId,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRolesRevoke {
    pub user_id: UserId,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRolesGet {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFileInfoGet {
    pub asset_id: AssetId,
}

// ── Response bodies ──────────────────────────────────────────────────────

/// Wire representation of one asset record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSummary {
    pub id: AssetId,
    pub name: String,
    pub media_type: String,
    pub description: String,
    pub size: u64,
    pub hash_algorithm: String,
    pub hash_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLogin {
    pub request_id: RequestId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLogout {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAssetCreate {
    pub request_id: RequestId,
    pub asset: AssetSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAssetGet {
    pub request_id: RequestId,
    pub asset: AssetSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAssetPage {
    pub request_id: RequestId,
    pub items: Vec<AssetSummary>,
    pub page_index: u32,
    pub page_count: u32,
    pub first_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseRolesAssign {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseRolesRevoke {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRolesGet {
    pub request_id: RequestId,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFileInfo {
    pub request_id: RequestId,
    pub asset_id: AssetId,
    pub media_type: String,
    pub size: u64,
    pub hash_algorithm: String,
    pub hash_value: String,
}

/// An error result. `blame` must agree with the transport HTTP status:
/// `Server` if and only if the status is in `[500,600)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub request_id: RequestId,
    pub message: String,
    pub error_code: String,
    pub attributes: BTreeMap<String, String>,
    pub remediating_action: Option<String>,
    pub blame: Blame,
    pub extras: Vec<ErrorResponse>,
}

// ── Unions ───────────────────────────────────────────────────────────────

/// The kind of response a command expects, used to validate decoded
/// responses against the issuing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Login,
    Logout,
    AssetCreate,
    AssetGet,
    AssetPage,
    RolesAssign,
    RolesRevoke,
    RolesGet,
    FileInfo,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login(CommandLogin),
    Logout(CommandLogout),
    AssetCreate(CommandAssetCreate),
    AssetGet(CommandAssetGet),
    AssetSearchBegin(CommandAssetSearchBegin),
    AssetSearchNext(CommandAssetSearchNext),
    AssetSearchPrevious(CommandAssetSearchPrevious),
    RolesAssign(CommandRolesAssign),
    RolesRevoke(CommandRolesRevoke),
    RolesGet(CommandRolesGet),
    FileInfoGet(CommandFileInfoGet),
}

impl Command {
    pub fn tag(&self) -> u8 {
        match self {
            Command::Login(_) => MSG_CMD_LOGIN,
            Command::Logout(_) => MSG_CMD_LOGOUT,
            Command::AssetCreate(_) => MSG_CMD_ASSET_CREATE,
            Command::AssetGet(_) => MSG_CMD_ASSET_GET,
            Command::AssetSearchBegin(_) => MSG_CMD_ASSET_SEARCH_BEGIN,
            Command::AssetSearchNext(_) => MSG_CMD_ASSET_SEARCH_NEXT,
            Command::AssetSearchPrevious(_) => MSG_CMD_ASSET_SEARCH_PREVIOUS,
            Command::RolesAssign(_) => MSG_CMD_ROLES_ASSIGN,
            Command::RolesRevoke(_) => MSG_CMD_ROLES_REVOKE,
            Command::RolesGet(_) => MSG_CMD_ROLES_GET,
            Command::FileInfoGet(_) => MSG_CMD_FILE_INFO,
        }
    }

    /// The response type this command expects on success.
    pub fn expected_response(&self) -> ResponseKind {
        match self {
            Command::Login(_) => ResponseKind::Login,
            Command::Logout(_) => ResponseKind::Logout,
            Command::AssetCreate(_) => ResponseKind::AssetCreate,
            Command::AssetGet(_) => ResponseKind::AssetGet,
            Command::AssetSearchBegin(_)
            | Command::AssetSearchNext(_)
            | Command::AssetSearchPrevious(_) => ResponseKind::AssetPage,
            Command::RolesAssign(_) => ResponseKind::RolesAssign,
            Command::RolesRevoke(_) => ResponseKind::RolesRevoke,
            Command::RolesGet(_) => ResponseKind::RolesGet,
            Command::FileInfoGet(_) => ResponseKind::FileInfo,
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login(_) => "login",
            Command::Logout(_) => "logout",
            Command::AssetCreate(_) => "asset-create",
            Command::AssetGet(_) => "asset-get",
            Command::AssetSearchBegin(_) => "asset-search-begin",
            Command::AssetSearchNext(_) => "asset-search-next",
            Command::AssetSearchPrevious(_) => "asset-search-previous",
            Command::RolesAssign(_) => "roles-assign",
            Command::RolesRevoke(_) => "roles-revoke",
            Command::RolesGet(_) => "roles-get",
            Command::FileInfoGet(_) => "file-info-get",
        }
    }

    pub fn is_login(&self) -> bool {
        matches!(self, Command::Login(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Login(ResponseLogin),
    Logout(ResponseLogout),
    AssetCreate(ResponseAssetCreate),
    AssetGet(ResponseAssetGet),
    AssetPage(ResponseAssetPage),
    RolesAssign(ResponseRolesAssign),
    RolesRevoke(ResponseRolesRevoke),
    RolesGet(ResponseRolesGet),
    FileInfo(ResponseFileInfo),
    Error(ErrorResponse),
}

impl Response {
    pub fn tag(&self) -> u8 {
        match self {
            Response::Login(_) => MSG_RESP_LOGIN,
            Response::Logout(_) => MSG_RESP_LOGOUT,
            Response::AssetCreate(_) => MSG_RESP_ASSET_CREATE,
            Response::AssetGet(_) => MSG_RESP_ASSET_GET,
            Response::AssetPage(_) => MSG_RESP_ASSET_PAGE,
            Response::RolesAssign(_) => MSG_RESP_ROLES_ASSIGN,
            Response::RolesRevoke(_) => MSG_RESP_ROLES_REVOKE,
            Response::RolesGet(_) => MSG_RESP_ROLES_GET,
            Response::FileInfo(_) => MSG_RESP_FILE_INFO,
            Response::Error(_) => MSG_RESP_ERROR,
        }
    }

    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Login(_) => ResponseKind::Login,
            Response::Logout(_) => ResponseKind::Logout,
            Response::AssetCreate(_) => ResponseKind::AssetCreate,
            Response::AssetGet(_) => ResponseKind::AssetGet,
            Response::AssetPage(_) => ResponseKind::AssetPage,
            Response::RolesAssign(_) => ResponseKind::RolesAssign,
            Response::RolesRevoke(_) => ResponseKind::RolesRevoke,
            Response::RolesGet(_) => ResponseKind::RolesGet,
            Response::FileInfo(_) => ResponseKind::FileInfo,
            Response::Error(_) => ResponseKind::Error,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Response::Login(r) => r.request_id,
            Response::Logout(r) => r.request_id,
            Response::AssetCreate(r) => r.request_id,
            Response::AssetGet(r) => r.request_id,
            Response::AssetPage(r) => r.request_id,
            Response::RolesAssign(r) => r.request_id,
            Response::RolesRevoke(r) => r.request_id,
            Response::RolesGet(r) => r.request_id,
            Response::FileInfo(r) => r.request_id,
            Response::Error(r) => r.request_id,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Response::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

/// Top-level wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Command(Command),
    Response(Response),
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Command(c) => c.tag(),
            Message::Response(r) => r.tag(),
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Message::Response(r) => Some(r),
            Message::Command(_) => None,
        }
    }

    pub fn into_command(self) -> Option<Command> {
        match self {
            Message::Command(c) => Some(c),
            Message::Response(_) => None,
        }
    }
}

/// The ordered result list of a command transaction: the successes in
/// submission order, terminated by the first error if one occurred.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionResponse {
    pub responses: Vec<Response>,
}

impl TransactionResponse {
    pub fn new(responses: Vec<Response>) -> Self {
        Self { responses }
    }

    /// The first (and, by fail-fast, only) error in the list.
    pub fn first_error(&self) -> Option<&ErrorResponse> {
        self.responses.iter().find_map(|r| r.as_error())
    }

    pub fn is_success(&self) -> bool {
        self.first_error().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_response_kinds() {
        let cmd = Command::AssetGet(CommandAssetGet {
            asset_id: AssetId::generate(),
        });
        assert_eq!(cmd.expected_response(), ResponseKind::AssetGet);

        let cmd = Command::AssetSearchNext(CommandAssetSearchNext);
        assert_eq!(cmd.expected_response(), ResponseKind::AssetPage);

        let cmd = Command::Login(CommandLogin {
            user_name: "u".into(),
            password: "p".into(),
            metadata: BTreeMap::new(),
        });
        assert!(cmd.is_login());
        assert_eq!(cmd.expected_response(), ResponseKind::Login);
    }

    #[test]
    fn test_command_tags_are_distinct() {
        let commands = [
            MSG_CMD_LOGIN,
            MSG_CMD_LOGOUT,
            MSG_CMD_ASSET_CREATE,
            MSG_CMD_ASSET_GET,
            MSG_CMD_ASSET_SEARCH_BEGIN,
            MSG_CMD_ASSET_SEARCH_NEXT,
            MSG_CMD_ASSET_SEARCH_PREVIOUS,
            MSG_CMD_ROLES_ASSIGN,
            MSG_CMD_ROLES_REVOKE,
            MSG_CMD_ROLES_GET,
            MSG_CMD_FILE_INFO,
            MSG_RESP_LOGIN,
            MSG_RESP_LOGOUT,
            MSG_RESP_ASSET_CREATE,
            MSG_RESP_ASSET_GET,
            MSG_RESP_ASSET_PAGE,
            MSG_RESP_ROLES_ASSIGN,
            MSG_RESP_ROLES_REVOKE,
            MSG_RESP_ROLES_GET,
            MSG_RESP_FILE_INFO,
            MSG_RESP_ERROR,
        ];
        let unique: std::collections::HashSet<u8> = commands.iter().copied().collect();
        assert_eq!(unique.len(), commands.len());
    }

    #[test]
    fn test_transaction_response_first_error() {
        let ok = Response::Logout(ResponseLogout {
            request_id: RequestId::generate(),
        });
        let err = Response::Error(ErrorResponse {
            request_id: RequestId::generate(),
            message: "nope".into(),
            error_code: "error-validity".into(),
            attributes: BTreeMap::new(),
            remediating_action: None,
            blame: Blame::Client,
            extras: Vec::new(),
        });
        let tr = TransactionResponse::new(vec![ok.clone(), err.clone()]);
        assert!(!tr.is_success());
        assert_eq!(tr.first_error().unwrap().error_code, "error-validity");

        let tr = TransactionResponse::new(vec![ok]);
        assert!(tr.is_success());
    }

    #[test]
    fn test_client_supported_protocols_are_kestrel() {
        let protos = client_supported_protocols();
        assert!(!protos.is_empty());
        assert!(protos.iter().all(|p| p.id == PROTOCOL_KESTREL_ID));
    }
}
