//! End-to-end pipeline tests: login, command, transaction and file
//! endpoints driven through the service dispatch table.

use std::collections::BTreeMap;
use std::sync::Arc;

use kestrel_common::audit::events;
use kestrel_common::config::KestrelConfig;
use kestrel_common::error::{codes, Blame};
use kestrel_common::hash::{hash_buffer_hex, HashAlgorithm};
use kestrel_common::ids::AssetId;
use kestrel_common::request_info::RequestInfo;
use kestrel_common::security::SecurityPolicy;
use kestrel_protocol::codec::{
    decode_response, decode_response_sequence, encode_message, encode_message_sequence,
};
use kestrel_protocol::compress::gzip_decode;
use kestrel_protocol::http::{HttpRequest, HttpResponse};
use kestrel_protocol::types::{
    Command, CommandAssetCreate, CommandAssetGet, CommandFileInfoGet, CommandLogin, Message,
    Response, CONTENT_TYPE_MESSAGE, CONTENT_TYPE_SEQUENCE, SESSION_COOKIE,
};
use kestrel_server::auth::StoreIdentityProvider;
use kestrel_server::{bootstrap_admin, KestrelService};
use kestrel_store::engine::Database;

const ADMIN: &str = "kestrel";
const ADMIN_PASSWORD: &str = "admin-secret";

struct Harness {
    service: KestrelService,
    database: Database,
}

fn harness() -> Harness {
    let config = KestrelConfig::default();
    let database = Database::new_in_memory();
    bootstrap_admin(&database, ADMIN, ADMIN_PASSWORD).unwrap();
    let service = KestrelService::new(
        &config,
        database.clone(),
        SecurityPolicy::deny_all(),
        Arc::new(StoreIdentityProvider),
    );
    Harness { service, database }
}

fn dispatch(h: &Harness, request: HttpRequest) -> HttpResponse {
    h.service.dispatch(&request, &RequestInfo::new("test"))
}

fn login_request(user: &str, password: &str) -> HttpRequest {
    let body = encode_message(&Message::Command(Command::Login(CommandLogin {
        user_name: user.into(),
        password: password.into(),
        metadata: BTreeMap::new(),
    })));
    HttpRequest::new("POST", "/v1/login").with_body(CONTENT_TYPE_MESSAGE, body.to_vec())
}

fn login(h: &Harness) -> String {
    let response = dispatch(h, login_request(ADMIN, ADMIN_PASSWORD));
    assert_eq!(response.status, 200, "login failed");
    response.set_cookie(SESSION_COOKIE).expect("session cookie")
}

fn command_request(cookie: &str, command: Command) -> HttpRequest {
    let body = encode_message(&Message::Command(command));
    HttpRequest::new("POST", "/v1/command")
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_body(CONTENT_TYPE_MESSAGE, body.to_vec())
}

fn create_command(name: &str) -> Command {
    Command::AssetCreate(CommandAssetCreate {
        name: name.into(),
        media_type: "application/octet-stream".into(),
        description: String::new(),
    })
}

fn created_asset_id(response: &HttpResponse) -> AssetId {
    match decode_response(&response.body).unwrap() {
        Response::AssetCreate(r) => r.asset.id,
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn test_login_and_command_flow() {
    let h = harness();
    let cookie = login(&h);
    assert_eq!(h.database.commit_count(), 2); // bootstrap + login

    let response = dispatch(&h, command_request(&cookie, create_command("manual.pdf")));
    assert_eq!(response.status, 200);
    let asset_id = created_asset_id(&response);
    assert_eq!(h.database.commit_count(), 3);

    let response = dispatch(
        &h,
        command_request(&cookie, Command::AssetGet(CommandAssetGet { asset_id })),
    );
    assert_eq!(response.status, 200);
    match decode_response(&response.body).unwrap() {
        Response::AssetGet(r) => assert_eq!(r.asset.name, "manual.pdf"),
        other => panic!("unexpected response: {other:?}"),
    }

    let audit: Vec<String> = h
        .database
        .audit_records()
        .iter()
        .map(|r| r.event_type.clone())
        .collect();
    assert_eq!(
        audit,
        vec![
            events::USER_LOGGED_IN.to_string(),
            events::ASSET_CREATED.to_string()
        ]
    );
}

#[test]
fn test_bad_credentials_rejected_without_commit() {
    let h = harness();
    let before = h.database.commit_count();
    let response = dispatch(&h, login_request(ADMIN, "wrong"));
    assert_eq!(response.status, 401);
    let error = decode_response(&response.body).unwrap();
    assert_eq!(
        error.as_error().unwrap().error_code,
        codes::ERROR_AUTHENTICATION
    );
    assert_eq!(h.database.commit_count(), before);
}

#[test]
fn test_command_without_cookie_rejected() {
    let h = harness();
    let body = encode_message(&Message::Command(create_command("x")));
    let request = HttpRequest::new("POST", "/v1/command")
        .with_body(CONTENT_TYPE_MESSAGE, body.to_vec());
    let response = dispatch(&h, request);
    assert_eq!(response.status, 401);
}

#[test]
fn test_command_content_type_mismatch_rejected() {
    let h = harness();
    let cookie = login(&h);
    let body = encode_message(&Message::Command(create_command("x")));
    let request = HttpRequest::new("POST", "/v1/command")
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_body("application/octet-stream", body.to_vec());
    let response = dispatch(&h, request);
    assert_eq!(response.status, 400);
    let error = decode_response(&response.body).unwrap();
    assert_eq!(error.as_error().unwrap().error_code, codes::ERROR_PROTOCOL);
}

#[test]
fn test_oversized_command_rejected_before_decode() {
    let h = harness();
    let cookie = login(&h);
    // Not even a valid frame; the cap must trip before decoding.
    let request = HttpRequest::new("POST", "/v1/command")
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_body(CONTENT_TYPE_MESSAGE, vec![0u8; 1024 * 1024 + 1]);
    let response = dispatch(&h, request);
    assert_eq!(response.status, 413);
}

#[test]
fn test_commit_on_success_only() {
    let h = harness();
    let cookie = login(&h);
    dispatch(&h, command_request(&cookie, create_command("manual.pdf")));
    let before = h.database.commit_count();

    // Duplicate name: the handler fails, the transaction must not commit.
    let response = dispatch(&h, command_request(&cookie, create_command("manual.pdf")));
    assert_eq!(response.status, 400);
    let error = decode_response(&response.body).unwrap();
    assert_eq!(error.as_error().unwrap().error_code, codes::ERROR_DUPLICATE);
    assert_eq!(h.database.commit_count(), before);
    // And no audit record leaked from the failed attempt.
    let audits = h.database.audit_records();
    assert_eq!(
        audits
            .iter()
            .filter(|r| r.event_type == events::ASSET_CREATED)
            .count(),
        1
    );
}

#[test]
fn test_transaction_fail_fast() {
    let h = harness();
    let cookie = login(&h);
    dispatch(&h, command_request(&cookie, create_command("dup.bin")));
    let commits_before = h.database.commit_count();

    // C1 ok, C2 duplicate (error), C3 would succeed but must never run.
    let batch = encode_message_sequence(&[
        Message::Command(create_command("first.bin")),
        Message::Command(create_command("dup.bin")),
        Message::Command(create_command("third.bin")),
    ]);
    let request = HttpRequest::new("POST", "/v1/transaction")
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_body(CONTENT_TYPE_SEQUENCE, batch.to_vec());
    let response = dispatch(&h, request);

    // Status derives from the first error's blame: client fault.
    assert_eq!(response.status, 400);
    assert_eq!(response.content_type(), Some(CONTENT_TYPE_SEQUENCE));

    let responses = decode_response_sequence(&response.body).unwrap();
    assert_eq!(responses.len(), 2, "successes so far plus the first error");
    assert!(matches!(responses[0], Response::AssetCreate(_)));
    let error = responses[1].as_error().unwrap();
    assert_eq!(error.error_code, codes::ERROR_DUPLICATE);
    assert_eq!(error.blame, Blame::Client);

    // Nothing committed: neither first.bin nor third.bin exists.
    assert_eq!(h.database.commit_count(), commits_before);
    let probe = dispatch(
        &h,
        command_request(
            &cookie,
            Command::AssetSearchBegin(kestrel_protocol::types::CommandAssetSearchBegin {
                query: kestrel_protocol::types::AssetQuery {
                    name_contains: Some("first".into()),
                    media_type: None,
                    page_size: 10,
                },
            }),
        ),
    );
    match decode_response(&probe.body).unwrap() {
        Response::AssetPage(p) => assert!(p.items.is_empty()),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn test_transaction_all_success_commits_once() {
    let h = harness();
    let cookie = login(&h);
    let commits_before = h.database.commit_count();

    let batch = encode_message_sequence(&[
        Message::Command(create_command("a.bin")),
        Message::Command(create_command("b.bin")),
    ]);
    let request = HttpRequest::new("POST", "/v1/transaction")
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_body(CONTENT_TYPE_SEQUENCE, batch.to_vec());
    let response = dispatch(&h, request);
    assert_eq!(response.status, 200);

    let responses = decode_response_sequence(&response.body).unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| !r.is_error()));
    assert_eq!(h.database.commit_count(), commits_before + 1);
}

#[test]
fn test_file_upload_and_download() {
    let h = harness();
    let cookie = login(&h);
    let response = dispatch(&h, command_request(&cookie, create_command("data.bin")));
    let asset_id = created_asset_id(&response);

    let content = b"kestrel file content".to_vec();
    let hash = hash_buffer_hex(HashAlgorithm::Sha256, &content);

    let request = HttpRequest::new("PUT", format!("/v1/file/{}", asset_id.0))
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_header("X-Kestrel-Hash-Algorithm", "SHA-256")
        .with_header("X-Kestrel-Hash-Value", hash.clone())
        .with_body("application/octet-stream", content.clone());
    let response = dispatch(&h, request);
    assert_eq!(response.status, 200);

    // File info reflects the stored content.
    let response = dispatch(
        &h,
        command_request(&cookie, Command::FileInfoGet(CommandFileInfoGet { asset_id })),
    );
    match decode_response(&response.body).unwrap() {
        Response::FileInfo(r) => {
            assert_eq!(r.size, content.len() as u64);
            assert_eq!(r.hash_algorithm, "SHA-256");
            assert_eq!(r.hash_value, hash);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    // Raw download returns the exact bytes.
    let request = HttpRequest::new("GET", format!("/v1/file/{}", asset_id.0))
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"));
    let response = dispatch(&h, request);
    assert_eq!(response.status, 200);
    assert_eq!(response.body, content);

    let audit: Vec<String> = h
        .database
        .audit_records()
        .iter()
        .map(|r| r.event_type.clone())
        .collect();
    assert!(audit.contains(&events::FILE_STORED.to_string()));
}

#[test]
fn test_file_upload_hash_mismatch_rejected() {
    let h = harness();
    let cookie = login(&h);
    let response = dispatch(&h, command_request(&cookie, create_command("data.bin")));
    let asset_id = created_asset_id(&response);
    let commits_before = h.database.commit_count();

    let request = HttpRequest::new("PUT", format!("/v1/file/{}", asset_id.0))
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_header("X-Kestrel-Hash-Algorithm", "SHA-256")
        .with_header("X-Kestrel-Hash-Value", "00".repeat(32))
        .with_body("application/octet-stream", b"actual bytes".to_vec());
    let response = dispatch(&h, request);
    assert_eq!(response.status, 400);
    let error = decode_response(&response.body).unwrap();
    let error = error.as_error().unwrap();
    assert_eq!(error.error_code, codes::ERROR_RESOURCE_MISMATCH);
    assert!(error.attributes.contains_key("hash_expected"));
    assert!(error.attributes.contains_key("hash_received"));

    // The asset record was not updated.
    assert_eq!(h.database.commit_count(), commits_before);
    let response = dispatch(
        &h,
        command_request(&cookie, Command::FileInfoGet(CommandFileInfoGet { asset_id })),
    );
    match decode_response(&response.body).unwrap() {
        Response::FileInfo(r) => assert_eq!(r.size, 0),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn test_gzip_command_response() {
    let h = harness();
    let cookie = login(&h);
    let body = encode_message(&Message::Command(create_command("zipped.bin")));
    let request = HttpRequest::new("POST", "/v1/command")
        .with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"))
        .with_header("Accept-Encoding", "gzip")
        .with_body(CONTENT_TYPE_MESSAGE, body.to_vec());
    let response = dispatch(&h, request);
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Encoding"), Some("gzip"));
    let decoded = gzip_decode(&response.body).unwrap();
    assert!(matches!(
        decode_response(&decoded).unwrap(),
        Response::AssetCreate(_)
    ));
}

#[test]
fn test_logout_invalidates_session() {
    let h = harness();
    let cookie = login(&h);
    let response = dispatch(
        &h,
        command_request(&cookie, Command::Logout(Default::default())),
    );
    assert_eq!(response.status, 200);

    // The session is gone: further commands are unauthenticated.
    let response = dispatch(&h, command_request(&cookie, create_command("late.bin")));
    assert_eq!(response.status, 401);
}
