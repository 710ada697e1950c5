//! The connected client transport.
//!
//! One transport is bound to one negotiated endpoint. Commands go to
//! the command URI, login commands to the login URI, batches to the
//! transaction URI, raw content to the file URI. `send_and_wait`
//! re-issues the stored login at most twice on authentication errors:
//! three total attempts, then the last error is returned as-is.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;

use kestrel_common::error::codes;
use kestrel_common::ids::AssetId;
use kestrel_protocol::codec::{
    decode_response, decode_response_sequence, encode_message, encode_message_sequence,
};
use kestrel_protocol::compress::gzip_decode;
use kestrel_protocol::http::{
    read_response, read_response_streaming, write_request, BodyReader, HttpRequest, HttpResponse,
    HttpResponseHead,
};
use kestrel_protocol::types::{
    Command, CommandLogin, Message, ProtocolIdentifier, Response, TransactionResponse,
    CONTENT_TYPE_MESSAGE, CONTENT_TYPE_SEQUENCE, SESSION_COOKIE,
};
use kestrel_protocol::WireError;

use crate::error::ClientError;

/// Total attempts for one logical send: the original plus two retries,
/// each preceded by a re-login.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Largest response body the client will buffer.
const MAX_RESPONSE_BODY: usize = 64 * 1024 * 1024;

/// Host and port of a Kestrel server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Endpoint paths resolved from the negotiated advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub command: String,
    pub transaction: String,
    pub file_base: String,
}

impl Endpoints {
    pub fn resolve(endpoint_path: &str) -> Self {
        let base = endpoint_path.trim_end_matches('/');
        Self {
            login: format!("{base}/login"),
            command: format!("{base}/command"),
            transaction: format!("{base}/transaction"),
            file_base: format!("{base}/file/"),
        }
    }
}

/// One HTTP exchange: connect, send, read the full response.
async fn tcp_exchange(
    address: &ServerAddress,
    request: &HttpRequest,
    timeout: Duration,
) -> Result<HttpResponse, ClientError> {
    let exchange = async {
        let mut stream = TcpStream::connect(address.authority()).await?;
        write_request(&mut stream, request).await?;
        read_response(&mut stream, MAX_RESPONSE_BODY).await
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ClientError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Unauthenticated GET, used by negotiation.
pub(crate) async fn http_get(
    address: &ServerAddress,
    path: &str,
    timeout: Duration,
) -> Result<HttpResponse, ClientError> {
    let request = HttpRequest::new("GET", path)
        .with_header("Host", address.authority())
        .with_header("Accept-Encoding", "gzip")
        .with_header("Connection", "close");
    tcp_exchange(address, &request, timeout).await
}

#[derive(Debug)]
pub struct Transport {
    address: ServerAddress,
    protocol: ProtocolIdentifier,
    endpoints: Endpoints,
    cookie: Mutex<Option<String>>,
    stored_login: Mutex<Option<CommandLogin>>,
}

impl Transport {
    pub(crate) fn new(
        address: ServerAddress,
        protocol: ProtocolIdentifier,
        endpoint_path: &str,
    ) -> Self {
        Self {
            address,
            protocol,
            endpoints: Endpoints::resolve(endpoint_path),
            cookie: Mutex::new(None),
            stored_login: Mutex::new(None),
        }
    }

    pub fn protocol(&self) -> &ProtocolIdentifier {
        &self.protocol
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn base_request(&self, method: &str, path: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, path)
            .with_header("Host", self.address.authority())
            .with_header("Accept-Encoding", "gzip")
            .with_header("Connection", "close");
        if let Some(cookie) = self.cookie.lock().as_ref() {
            request = request.with_header("Cookie", format!("{SESSION_COOKIE}={cookie}"));
        }
        request
    }

    /// Decompress and content-type-check a protocol response body.
    ///
    /// Error payloads are decoded regardless of status so that
    /// application errors travel end-to-end; a failure status without a
    /// decodable protocol body is a transport-level failure.
    fn checked_body(
        &self,
        response: &HttpResponse,
        expected_content_type: &str,
    ) -> Result<Vec<u8>, ClientError> {
        match response.content_type() {
            Some(ct) if ct == expected_content_type => {}
            other => {
                if response.status >= 400 {
                    return Err(ClientError::HttpStatus {
                        status: response.status,
                    });
                }
                return Err(ClientError::ContentTypeMismatch {
                    expected: expected_content_type.to_string(),
                    received: other.unwrap_or("").to_string(),
                });
            }
        }
        if response.is_gzip() {
            Ok(gzip_decode(&response.body)?)
        } else {
            Ok(response.body.clone())
        }
    }

    /// POST one command to the endpoint its shape selects and validate
    /// the decoded response against the command's declared kind.
    async fn post_command(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let path = if command.is_login() {
            &self.endpoints.login
        } else {
            &self.endpoints.command
        };
        let body = encode_message(&Message::Command(command.clone()));
        let request = self
            .base_request("POST", path)
            .with_body(CONTENT_TYPE_MESSAGE, body.to_vec());
        let http = tcp_exchange(&self.address, &request, timeout).await?;

        if let Some(cookie) = http.set_cookie(SESSION_COOKIE) {
            *self.cookie.lock() = Some(cookie);
        }

        let payload = self.checked_body(&http, CONTENT_TYPE_MESSAGE)?;
        let response = decode_response(&payload).map_err(ClientError::from)?;

        if response.is_error() {
            return Ok(response);
        }
        if http.status >= 400 {
            return Err(ClientError::Protocol(format!(
                "non-error response with failure status {}",
                http.status
            )));
        }
        let expected = command.expected_response();
        if response.kind() != expected {
            return Err(ClientError::UnexpectedResponseKind {
                expected,
                received: response.kind(),
            });
        }
        if command.is_login() {
            if let Command::Login(login) = command {
                *self.stored_login.lock() = Some(login.clone());
            }
        }
        Ok(response)
    }

    /// Re-issue the stored login against the login endpoint. Transport
    /// failures propagate; an application-level rejection is left for
    /// the retried original message to surface.
    async fn relogin(&self, timeout: Duration) -> Result<(), ClientError> {
        let login = self
            .stored_login
            .lock()
            .clone()
            .ok_or(ClientError::NoStoredLogin)?;
        let _ = self.post_command(&Command::Login(login), timeout).await?;
        Ok(())
    }

    /// Send one command and wait for its response.
    ///
    /// On an authentication-error response, transparently re-issues the
    /// stored login and retries, up to [`MAX_SEND_ATTEMPTS`] total
    /// attempts; the final authentication error is returned to the
    /// caller. Timeouts are not retried.
    pub async fn send_and_wait(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let mut attempt = 1;
        loop {
            let response = self.post_command(&command, timeout).await?;
            match response.as_error() {
                Some(error)
                    if error.error_code == codes::ERROR_AUTHENTICATION
                        && !command.is_login()
                        && attempt < MAX_SEND_ATTEMPTS =>
                {
                    tracing::debug!(attempt, "authentication error, re-issuing login");
                    self.relogin(timeout).await?;
                    attempt += 1;
                }
                _ => return Ok(response),
            }
        }
    }

    /// Send a command transaction. The same bounded login-retry applies
    /// when the batch's first error is an authentication error.
    pub async fn send_transaction(
        &self,
        commands: &[Command],
        timeout: Duration,
    ) -> Result<TransactionResponse, ClientError> {
        let messages: Vec<Message> = commands
            .iter()
            .cloned()
            .map(Message::Command)
            .collect();
        let body = encode_message_sequence(&messages);

        let mut attempt = 1;
        loop {
            let request = self
                .base_request("POST", &self.endpoints.transaction)
                .with_body(CONTENT_TYPE_SEQUENCE, body.to_vec());
            let http = tcp_exchange(&self.address, &request, timeout).await?;
            let payload = self.checked_body(&http, CONTENT_TYPE_SEQUENCE)?;
            let responses = decode_response_sequence(&payload).map_err(ClientError::from)?;
            let transaction = TransactionResponse::new(responses);

            match transaction.first_error() {
                Some(error)
                    if error.error_code == codes::ERROR_AUTHENTICATION
                        && attempt < MAX_SEND_ATTEMPTS =>
                {
                    self.relogin(timeout).await?;
                    attempt += 1;
                }
                _ => return Ok(transaction),
            }
        }
    }

    // ── File endpoint ────────────────────────────────────────────────

    fn file_path(&self, asset_id: &AssetId) -> String {
        format!("{}{}", self.endpoints.file_base, asset_id.0)
    }

    /// Open a streaming download of the asset's content. The timeout
    /// covers connection and response head; body reads are driven by
    /// the caller.
    pub async fn file_get_stream(
        &self,
        asset_id: &AssetId,
        timeout: Duration,
    ) -> Result<(HttpResponseHead, BodyReader<TcpStream>), ClientError> {
        let request = self.base_request("GET", &self.file_path(asset_id));
        let open = async {
            let mut stream = TcpStream::connect(self.address.authority()).await?;
            write_request(&mut stream, &request).await?;
            read_response_streaming(stream).await
        };
        let (head, body) = match tokio::time::timeout(timeout, open).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::Timeout(timeout.as_millis() as u64)),
        };
        if head.status != 200 {
            return Err(ClientError::HttpStatus {
                status: head.status,
            });
        }
        Ok((head, body))
    }

    /// Open a streaming upload: connect and send the request head. The
    /// caller writes exactly `content_length` body bytes, then calls
    /// [`Transport::finish_file_put`].
    #[allow(clippy::too_many_arguments)]
    pub async fn begin_file_put(
        &self,
        asset_id: &AssetId,
        media_type: &str,
        description: &str,
        hash_algorithm: &str,
        hash_value: &str,
        content_length: u64,
        timeout: Duration,
    ) -> Result<TcpStream, ClientError> {
        let open = async {
            let mut stream = TcpStream::connect(self.address.authority()).await?;
            let mut head = format!(
                "PUT {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
                self.file_path(asset_id),
                self.address.authority()
            );
            if let Some(cookie) = self.cookie.lock().clone() {
                head.push_str(&format!("Cookie: {SESSION_COOKIE}={cookie}\r\n"));
            }
            head.push_str(&format!("Content-Type: {media_type}\r\n"));
            if !description.is_empty() {
                head.push_str(&format!("X-Kestrel-Description: {description}\r\n"));
            }
            head.push_str(&format!("X-Kestrel-Hash-Algorithm: {hash_algorithm}\r\n"));
            head.push_str(&format!("X-Kestrel-Hash-Value: {hash_value}\r\n"));
            head.push_str(&format!("Content-Length: {content_length}\r\n\r\n"));
            use tokio::io::AsyncWriteExt;
            stream.write_all(head.as_bytes()).await?;
            Ok::<_, WireError>(stream)
        };
        match tokio::time::timeout(timeout, open).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Read the upload's response and require success.
    pub async fn finish_file_put(
        &self,
        mut stream: TcpStream,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        use tokio::io::AsyncWriteExt;
        let finish = async {
            stream.flush().await?;
            read_response(&mut stream, MAX_RESPONSE_BODY).await
        };
        let response = match tokio::time::timeout(timeout, finish).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::Timeout(timeout.as_millis() as u64)),
        };
        if response.status == 200 {
            return Ok(());
        }
        // Surface the server's error detail when it sent a protocol body.
        if let Ok(payload) = self.checked_body(&response, CONTENT_TYPE_MESSAGE) {
            if let Ok(decoded) = decode_response(&payload) {
                if let Some(error) = decoded.as_error() {
                    return Err(ClientError::Protocol(format!(
                        "upload rejected: {} ({})",
                        error.message, error.error_code
                    )));
                }
            }
        }
        Err(ClientError::HttpStatus {
            status: response.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_resolution() {
        let endpoints = Endpoints::resolve("/v1");
        assert_eq!(endpoints.login, "/v1/login");
        assert_eq!(endpoints.command, "/v1/command");
        assert_eq!(endpoints.transaction, "/v1/transaction");
        assert_eq!(endpoints.file_base, "/v1/file/");

        // A trailing slash in the advertisement does not double up.
        let endpoints = Endpoints::resolve("/v1/");
        assert_eq!(endpoints.login, "/v1/login");
    }

    #[test]
    fn test_server_address_authority() {
        let address = ServerAddress::new("127.0.0.1", 20210);
        assert_eq!(address.authority(), "127.0.0.1:20210");
    }
}
