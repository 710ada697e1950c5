//! Minimal HTTP/1.1 plumbing over raw tokio streams.
//!
//! Kestrel deliberately avoids an HTTP framework dependency: the
//! protocol needs only `GET`/`POST`/`PUT` with explicit
//! `Content-Length` bodies, one connection per exchange, and a handful
//! of headers. Chunked transfer encoding is not supported.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// Cap on the size of a request or response head (start line + headers).
const MAX_HEAD_SIZE: usize = 16 * 1024;

/// One parsed HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .push(("Content-Type".into(), content_type.into()));
        self.body = body;
        self
    }

    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Value of a named cookie from the `Cookie` header, if present.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let cookies = self.header("Cookie")?;
        for pair in cookies.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next()?.trim();
            if key == name {
                return parts.next().map(|v| v.trim().to_string());
            }
        }
        None
    }

    /// Whether the client accepts a gzip-encoded response body.
    pub fn accepts_gzip(&self) -> bool {
        self.header("Accept-Encoding")
            .map(|v| v.split(',').any(|e| e.trim().eq_ignore_ascii_case("gzip")))
            .unwrap_or(false)
    }
}

/// One parsed HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: vec![("Connection".into(), "close".into())],
            body: Vec::new(),
        }
    }

    pub fn with_body(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        let mut resp = Self::new(status);
        resp.headers
            .push(("Content-Type".into(), content_type.into()));
        resp.body = body;
        resp
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn is_gzip(&self) -> bool {
        self.header("Content-Encoding")
            .map(|v| v.eq_ignore_ascii_case("gzip"))
            .unwrap_or(false)
    }

    /// Value of the named cookie from a `Set-Cookie` header, if present.
    pub fn set_cookie(&self, name: &str) -> Option<String> {
        for (header_name, value) in &self.headers {
            if !header_name.eq_ignore_ascii_case("Set-Cookie") {
                continue;
            }
            let first = value.split(';').next()?.trim();
            let mut parts = first.splitn(2, '=');
            if parts.next()? == name {
                return parts.next().map(|v| v.to_string());
            }
        }
        None
    }
}

fn header_lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Standard reason phrase for the statuses Kestrel emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

// ── Head parsing ─────────────────────────────────────────────────────────

/// Read bytes until the blank line ending the head. Returns the head
/// lines and any body bytes that were read past the terminator.
async fn read_head<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(Vec<String>, Vec<u8>), WireError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let terminator_at = loop {
        if let Some(pos) = find_terminator(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(WireError::HttpMalformed("head exceeds size limit".into()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(WireError::HttpMalformed(
                "connection closed before end of head".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = &buf[..terminator_at];
    let leftover = buf[terminator_at + 4..].to_vec();
    let text = std::str::from_utf8(head)
        .map_err(|_| WireError::HttpMalformed("head is not valid UTF-8".into()))?;
    let lines = text.split("\r\n").map(|l| l.to_string()).collect();
    Ok((lines, leftover))
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_headers(lines: &[String]) -> Result<Vec<(String, String)>, WireError> {
    let mut headers = Vec::with_capacity(lines.len());
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WireError::HttpMalformed(format!("bad header line: {line}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

fn content_length(headers: &[(String, String)]) -> Result<usize, WireError> {
    match header_lookup(headers, "Content-Length") {
        None => Ok(0),
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| WireError::HttpMalformed(format!("bad Content-Length: {v}"))),
    }
}

async fn read_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    leftover: Vec<u8>,
    length: usize,
) -> Result<Vec<u8>, WireError> {
    let mut body = leftover;
    if body.len() > length {
        return Err(WireError::HttpMalformed(
            "body longer than Content-Length".into(),
        ));
    }
    let start = body.len();
    body.resize(length, 0);
    stream.read_exact(&mut body[start..]).await?;
    Ok(body)
}

// ── Request IO ───────────────────────────────────────────────────────────

/// Read one request from the stream. The declared `Content-Length` is
/// checked against `max_body` before any body byte is consumed.
pub async fn read_request<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_body: usize,
) -> Result<HttpRequest, WireError> {
    let (lines, leftover) = read_head(stream).await?;
    let start_line = lines
        .first()
        .ok_or_else(|| WireError::HttpMalformed("empty request head".into()))?;
    let mut parts = start_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| WireError::HttpMalformed("missing method".into()))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| WireError::HttpMalformed("missing path".into()))?
        .to_string();
    match parts.next() {
        Some("HTTP/1.1") | Some("HTTP/1.0") => {}
        other => {
            return Err(WireError::HttpMalformed(format!(
                "bad HTTP version: {other:?}"
            )))
        }
    }

    let headers = parse_headers(&lines[1..])?;
    let length = content_length(&headers)?;
    if length > max_body {
        return Err(WireError::BodyTooLarge {
            size: length,
            max: max_body,
        });
    }
    let body = read_body(stream, leftover, length).await?;
    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Write a request. `Content-Length` is added automatically.
pub async fn write_request<S: AsyncWrite + Unpin>(
    stream: &mut S,
    request: &HttpRequest,
) -> Result<(), WireError> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request.path);
    for (name, value) in &request.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", request.body.len()));
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&request.body).await?;
    stream.flush().await?;
    Ok(())
}

// ── Response IO ──────────────────────────────────────────────────────────

fn parse_status_line(line: &str) -> Result<(u16, String), WireError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| WireError::HttpMalformed("empty status line".into()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(WireError::HttpMalformed(format!(
            "bad HTTP version: {version}"
        )));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| WireError::HttpMalformed("bad status code".into()))?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((status, reason))
}

/// Read a full response, body included.
pub async fn read_response<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_body: usize,
) -> Result<HttpResponse, WireError> {
    let (lines, leftover) = read_head(stream).await?;
    let start_line = lines
        .first()
        .ok_or_else(|| WireError::HttpMalformed("empty response head".into()))?;
    let (status, reason) = parse_status_line(start_line)?;
    let headers = parse_headers(&lines[1..])?;
    let length = content_length(&headers)?;
    if length > max_body {
        return Err(WireError::BodyTooLarge {
            size: length,
            max: max_body,
        });
    }
    let body = read_body(stream, leftover, length).await?;
    Ok(HttpResponse {
        status,
        reason,
        headers,
        body,
    })
}

/// Write a response. `Content-Length` is added automatically.
pub async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    response: &HttpResponse,
) -> Result<(), WireError> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, response.reason);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await?;
    Ok(())
}

// ── Streaming response body ──────────────────────────────────────────────

/// The status line and headers of a response whose body is consumed
/// incrementally.
#[derive(Debug, Clone)]
pub struct HttpResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub content_length: u64,
}

impl HttpResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }
}

/// Reads a response body in caller-sized chunks. Bytes buffered while
/// parsing the head are served first.
pub struct BodyReader<S> {
    stream: S,
    buffered: Vec<u8>,
    buffered_pos: usize,
    remaining: u64,
}

impl<S: AsyncRead + Unpin> BodyReader<S> {
    /// Read up to `buf.len()` body bytes. Returns 0 at end of body.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, WireError> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;

        let buffered_left = self.buffered.len() - self.buffered_pos;
        if buffered_left > 0 {
            let n = want.min(buffered_left);
            buf[..n].copy_from_slice(&self.buffered[self.buffered_pos..self.buffered_pos + n]);
            self.buffered_pos += n;
            self.remaining -= n as u64;
            return Ok(n);
        }

        let n = self.stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(WireError::HttpMalformed(
                "connection closed before end of body".into(),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Read a response head and hand back a streaming body reader. Used for
/// file downloads, where the body must not be buffered whole.
pub async fn read_response_streaming<S: AsyncRead + Unpin>(
    mut stream: S,
) -> Result<(HttpResponseHead, BodyReader<S>), WireError> {
    let (lines, leftover) = read_head(&mut stream).await?;
    let start_line = lines
        .first()
        .ok_or_else(|| WireError::HttpMalformed("empty response head".into()))?;
    let (status, reason) = parse_status_line(start_line)?;
    let headers = parse_headers(&lines[1..])?;
    let length = content_length(&headers)? as u64;
    let head = HttpResponseHead {
        status,
        reason,
        headers,
        content_length: length,
    };
    let reader = BodyReader {
        stream,
        buffered: leftover,
        buffered_pos: 0,
        remaining: length,
    };
    Ok((head, reader))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = HttpRequest::new("POST", "/v1/command")
            .with_header("Cookie", "KESTREL_SESSION=abc123")
            .with_body("application/vnd.kestrel.message", vec![1, 2, 3]);
        write_request(&mut client, &request).await.unwrap();
        drop(client);

        let parsed = read_request(&mut server, 1024).await.unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.path, "/v1/command");
        assert_eq!(parsed.body, vec![1, 2, 3]);
        assert_eq!(
            parsed.content_type(),
            Some("application/vnd.kestrel.message")
        );
        assert_eq!(parsed.cookie("KESTREL_SESSION"), Some("abc123".to_string()));
        assert_eq!(parsed.cookie("OTHER"), None);
    }

    #[tokio::test]
    async fn test_response_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let response = HttpResponse::with_body(200, "text/plain", b"pong".to_vec())
            .with_header("Set-Cookie", "KESTREL_SESSION=s3cret; Max-Age=1800; Path=/");
        write_response(&mut server, &response).await.unwrap();
        drop(server);

        let parsed = read_response(&mut client, 1024).await.unwrap();
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.body, b"pong");
        assert_eq!(
            parsed.set_cookie("KESTREL_SESSION"),
            Some("s3cret".to_string())
        );
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_read() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        // Head declares a body far larger than the cap; only the head is
        // ever written, so the reject must come from the declaration.
        client
            .write_all(b"POST /v1/command HTTP/1.1\r\nContent-Length: 999999\r\n\r\n")
            .await
            .unwrap();
        let err = read_request(&mut server, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::BodyTooLarge {
                size: 999999,
                max: 1024
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_start_line_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(b"NONSENSE\r\n\r\n").await.unwrap();
        let err = read_request(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, WireError::HttpMalformed(_)));
    }

    #[tokio::test]
    async fn test_accepts_gzip() {
        let req = HttpRequest::new("GET", "/").with_header("Accept-Encoding", "gzip, identity");
        assert!(req.accepts_gzip());
        let req = HttpRequest::new("GET", "/").with_header("Accept-Encoding", "identity");
        assert!(!req.accepts_gzip());
        let req = HttpRequest::new("GET", "/");
        assert!(!req.accepts_gzip());
    }

    #[tokio::test]
    async fn test_streaming_body_reader() {
        let (client, server) = tokio::io::duplex(4096);
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let response = HttpResponse::with_body(200, "application/octet-stream", body.clone());
        let writer = tokio::spawn(async move {
            let mut client = client;
            write_response(&mut client, &response).await.unwrap();
            client
        });

        let (head, mut reader) = read_response_streaming(server).await.unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.content_length, body.len() as u64);

        let mut collected = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = reader.read_chunk(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(collected, body);
        let _ = writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_body_split_across_head_read() {
        // Force body bytes into the head buffer by writing everything at
        // once; the reader must not lose them.
        let (mut client, mut server) = tokio::io::duplex(65536);
        client
            .write_all(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        let parsed = read_request(&mut server, 1024).await.unwrap();
        assert_eq!(parsed.body, b"hello");
    }
}
