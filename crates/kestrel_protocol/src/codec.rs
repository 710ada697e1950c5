//! Encode/decode for the Kestrel wire protocol.
//!
//! All multi-byte integers are big-endian. Every message is framed as:
//! `[tag: u8][length: u32 BE][payload: length bytes]`
//!
//! A command transaction is a sequence of frames, each prefixed with a
//! `u32 BE` length and terminated by a zero-length record. The response
//! sequence uses the same framing.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use kestrel_common::error::Blame;
use kestrel_common::ids::{AssetId, RequestId, UserId};

use crate::error::WireError;
use crate::types::*;

type Result<T> = std::result::Result<T, WireError>;

// ── Read/write primitives ────────────────────────────────────────────────

fn ensure(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(WireError::Truncated {
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    let v = buf[0];
    *buf = &buf[1..];
    Ok(v)
}

fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    ensure(buf, 2)?;
    let v = u16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(v)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    let v = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

fn read_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[..8]);
    *buf = &buf[8..];
    Ok(u64::from_be_bytes(arr))
}

fn read_bytes(buf: &mut &[u8], n: usize) -> Result<Vec<u8>> {
    ensure(buf, n)?;
    let v = buf[..n].to_vec();
    *buf = &buf[n..];
    Ok(v)
}

fn read_uuid(buf: &mut &[u8]) -> Result<Uuid> {
    ensure(buf, 16)?;
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&buf[..16]);
    *buf = &buf[16..];
    Ok(Uuid::from_bytes(arr))
}

fn read_string(buf: &mut &[u8], field: &'static str) -> Result<String> {
    let len = read_u16(buf)? as usize;
    let bytes = read_bytes(buf, len)?;
    String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8 { field })
}

fn read_opt_string(buf: &mut &[u8], field: &'static str) -> Result<Option<String>> {
    match read_u8(buf)? {
        0 => Ok(None),
        _ => Ok(Some(read_string(buf, field)?)),
    }
}

fn read_map(buf: &mut &[u8]) -> Result<BTreeMap<String, String>> {
    let n = read_u16(buf)? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let key = read_string(buf, "map_key")?;
        let value = read_string(buf, "map_value")?;
        map.insert(key, value);
    }
    Ok(map)
}

fn read_string_list(buf: &mut &[u8], field: &'static str) -> Result<Vec<String>> {
    let n = read_u16(buf)? as usize;
    let mut items = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        items.push(read_string(buf, field)?);
    }
    Ok(items)
}

fn write_uuid(out: &mut BytesMut, id: &Uuid) {
    out.put_slice(id.as_bytes());
}

fn write_string(out: &mut BytesMut, s: &str) {
    out.put_u16(s.len() as u16);
    out.put_slice(s.as_bytes());
}

fn write_opt_string(out: &mut BytesMut, s: &Option<String>) {
    match s {
        None => out.put_u8(0),
        Some(v) => {
            out.put_u8(1);
            write_string(out, v);
        }
    }
}

fn write_map(out: &mut BytesMut, map: &BTreeMap<String, String>) {
    out.put_u16(map.len() as u16);
    for (k, v) in map {
        write_string(out, k);
        write_string(out, v);
    }
}

fn write_string_list(out: &mut BytesMut, items: &[String]) {
    out.put_u16(items.len() as u16);
    for s in items {
        write_string(out, s);
    }
}

// ── Asset summary ────────────────────────────────────────────────────────

fn encode_asset_summary(out: &mut BytesMut, a: &AssetSummary) {
    write_uuid(out, &a.id.0);
    write_string(out, &a.name);
    write_string(out, &a.media_type);
    write_string(out, &a.description);
    out.put_u64(a.size);
    write_string(out, &a.hash_algorithm);
    write_string(out, &a.hash_value);
}

fn decode_asset_summary(buf: &mut &[u8]) -> Result<AssetSummary> {
    Ok(AssetSummary {
        id: AssetId(read_uuid(buf)?),
        name: read_string(buf, "asset_name")?,
        media_type: read_string(buf, "asset_media_type")?,
        description: read_string(buf, "asset_description")?,
        size: read_u64(buf)?,
        hash_algorithm: read_string(buf, "asset_hash_algorithm")?,
        hash_value: read_string(buf, "asset_hash_value")?,
    })
}

// ── Error response ───────────────────────────────────────────────────────

fn encode_error_payload(out: &mut BytesMut, e: &ErrorResponse) {
    write_uuid(out, &e.request_id.0);
    write_string(out, &e.message);
    write_string(out, &e.error_code);
    write_map(out, &e.attributes);
    write_opt_string(out, &e.remediating_action);
    out.put_u8(match e.blame {
        Blame::Client => 0,
        Blame::Server => 1,
    });
    out.put_u16(e.extras.len() as u16);
    for extra in &e.extras {
        encode_error_payload(out, extra);
    }
}

fn decode_error_payload(buf: &mut &[u8]) -> Result<ErrorResponse> {
    let request_id = RequestId(read_uuid(buf)?);
    let message = read_string(buf, "error_message")?;
    let error_code = read_string(buf, "error_code")?;
    let attributes = read_map(buf)?;
    let remediating_action = read_opt_string(buf, "error_remediating_action")?;
    let blame = match read_u8(buf)? {
        0 => Blame::Client,
        1 => Blame::Server,
        other => {
            return Err(WireError::Corruption(format!(
                "invalid blame value: {other}"
            )))
        }
    };
    let extra_count = read_u16(buf)? as usize;
    let mut extras = Vec::with_capacity(extra_count.min(256));
    for _ in 0..extra_count {
        extras.push(decode_error_payload(buf)?);
    }
    Ok(ErrorResponse {
        request_id,
        message,
        error_code,
        attributes,
        remediating_action,
        blame,
        extras,
    })
}

// ── Message encode ───────────────────────────────────────────────────────

fn encode_payload(msg: &Message) -> BytesMut {
    let mut out = BytesMut::with_capacity(128);
    match msg {
        Message::Command(cmd) => match cmd {
            Command::Login(c) => {
                write_string(&mut out, &c.user_name);
                write_string(&mut out, &c.password);
                write_map(&mut out, &c.metadata);
            }
            Command::Logout(_) => {}
            Command::AssetCreate(c) => {
                write_string(&mut out, &c.name);
                write_string(&mut out, &c.media_type);
                write_string(&mut out, &c.description);
            }
            Command::AssetGet(c) => write_uuid(&mut out, &c.asset_id.0),
            Command::AssetSearchBegin(c) => {
                write_opt_string(&mut out, &c.query.name_contains);
                write_opt_string(&mut out, &c.query.media_type);
                out.put_u32(c.query.page_size);
            }
            Command::AssetSearchNext(_) | Command::AssetSearchPrevious(_) => {}
            Command::RolesAssign(c) => {
                write_uuid(&mut out, &c.user_id.0);
                write_string_list(&mut out, &c.roles);
            }
            Command::RolesRevoke(c) => {
                write_uuid(&mut out, &c.user_id.0);
                write_string_list(&mut out, &c.roles);
            }
            Command::RolesGet(c) => write_uuid(&mut out, &c.user_id.0),
            Command::FileInfoGet(c) => write_uuid(&mut out, &c.asset_id.0),
        },
        Message::Response(resp) => match resp {
            Response::Login(r) => {
                write_uuid(&mut out, &r.request_id.0);
                write_uuid(&mut out, &r.user_id.0);
            }
            Response::Logout(r) => write_uuid(&mut out, &r.request_id.0),
            Response::AssetCreate(r) => {
                write_uuid(&mut out, &r.request_id.0);
                encode_asset_summary(&mut out, &r.asset);
            }
            Response::AssetGet(r) => {
                write_uuid(&mut out, &r.request_id.0);
                encode_asset_summary(&mut out, &r.asset);
            }
            Response::AssetPage(r) => {
                write_uuid(&mut out, &r.request_id.0);
                out.put_u32(r.items.len() as u32);
                for item in &r.items {
                    encode_asset_summary(&mut out, item);
                }
                out.put_u32(r.page_index);
                out.put_u32(r.page_count);
                out.put_u64(r.first_offset);
            }
            Response::RolesAssign(r) => write_uuid(&mut out, &r.request_id.0),
            Response::RolesRevoke(r) => write_uuid(&mut out, &r.request_id.0),
            Response::RolesGet(r) => {
                write_uuid(&mut out, &r.request_id.0);
                write_string_list(&mut out, &r.roles);
            }
            Response::FileInfo(r) => {
                write_uuid(&mut out, &r.request_id.0);
                write_uuid(&mut out, &r.asset_id.0);
                write_string(&mut out, &r.media_type);
                out.put_u64(r.size);
                write_string(&mut out, &r.hash_algorithm);
                write_string(&mut out, &r.hash_value);
            }
            Response::Error(e) => encode_error_payload(&mut out, e),
        },
    }
    out
}

/// Encode a message into a framed byte buffer (header + payload).
pub fn encode_message(msg: &Message) -> BytesMut {
    let payload = encode_payload(msg);
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.put_u8(msg.tag());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    frame
}

/// Decode one message from a framed byte buffer. The input must contain
/// the full frame. Returns `(message, bytes_consumed)`.
pub fn decode_message(input: &[u8]) -> Result<(Message, usize)> {
    if input.len() < FRAME_HEADER_SIZE {
        return Err(WireError::Truncated {
            expected: FRAME_HEADER_SIZE,
            actual: input.len(),
        });
    }

    let tag = input[0];
    let length = u32::from_be_bytes([input[1], input[2], input[3], input[4]]);
    if length > MAX_MESSAGE_SIZE {
        return Err(WireError::FrameTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let total = FRAME_HEADER_SIZE + length as usize;
    if input.len() < total {
        return Err(WireError::Truncated {
            expected: total,
            actual: input.len(),
        });
    }

    let payload = &input[FRAME_HEADER_SIZE..total];
    let mut buf: &[u8] = payload;

    let msg = match tag {
        MSG_CMD_LOGIN => Message::Command(Command::Login(CommandLogin {
            user_name: read_string(&mut buf, "user_name")?,
            password: read_string(&mut buf, "password")?,
            metadata: read_map(&mut buf)?,
        })),
        MSG_CMD_LOGOUT => Message::Command(Command::Logout(CommandLogout)),
        MSG_CMD_ASSET_CREATE => Message::Command(Command::AssetCreate(CommandAssetCreate {
            name: read_string(&mut buf, "asset_name")?,
            media_type: read_string(&mut buf, "asset_media_type")?,
            description: read_string(&mut buf, "asset_description")?,
        })),
        MSG_CMD_ASSET_GET => Message::Command(Command::AssetGet(CommandAssetGet {
            asset_id: AssetId(read_uuid(&mut buf)?),
        })),
        MSG_CMD_ASSET_SEARCH_BEGIN => {
            Message::Command(Command::AssetSearchBegin(CommandAssetSearchBegin {
                query: AssetQuery {
                    name_contains: read_opt_string(&mut buf, "query_name_contains")?,
                    media_type: read_opt_string(&mut buf, "query_media_type")?,
                    page_size: read_u32(&mut buf)?,
                },
            }))
        }
        MSG_CMD_ASSET_SEARCH_NEXT => {
            Message::Command(Command::AssetSearchNext(CommandAssetSearchNext))
        }
        MSG_CMD_ASSET_SEARCH_PREVIOUS => {
            Message::Command(Command::AssetSearchPrevious(CommandAssetSearchPrevious))
        }
        MSG_CMD_ROLES_ASSIGN => Message::Command(Command::RolesAssign(CommandRolesAssign {
            user_id: UserId(read_uuid(&mut buf)?),
            roles: read_string_list(&mut buf, "role_name")?,
        })),
        MSG_CMD_ROLES_REVOKE => Message::Command(Command::RolesRevoke(CommandRolesRevoke {
            user_id: UserId(read_uuid(&mut buf)?),
            roles: read_string_list(&mut buf, "role_name")?,
        })),
        MSG_CMD_ROLES_GET => Message::Command(Command::RolesGet(CommandRolesGet {
            user_id: UserId(read_uuid(&mut buf)?),
        })),
        MSG_CMD_FILE_INFO => Message::Command(Command::FileInfoGet(CommandFileInfoGet {
            asset_id: AssetId(read_uuid(&mut buf)?),
        })),
        MSG_RESP_LOGIN => Message::Response(Response::Login(ResponseLogin {
            request_id: RequestId(read_uuid(&mut buf)?),
            user_id: UserId(read_uuid(&mut buf)?),
        })),
        MSG_RESP_LOGOUT => Message::Response(Response::Logout(ResponseLogout {
            request_id: RequestId(read_uuid(&mut buf)?),
        })),
        MSG_RESP_ASSET_CREATE => Message::Response(Response::AssetCreate(ResponseAssetCreate {
            request_id: RequestId(read_uuid(&mut buf)?),
            asset: decode_asset_summary(&mut buf)?,
        })),
        MSG_RESP_ASSET_GET => Message::Response(Response::AssetGet(ResponseAssetGet {
            request_id: RequestId(read_uuid(&mut buf)?),
            asset: decode_asset_summary(&mut buf)?,
        })),
        MSG_RESP_ASSET_PAGE => {
            let request_id = RequestId(read_uuid(&mut buf)?);
            let count = read_u32(&mut buf)? as usize;
            let mut items = Vec::with_capacity(count.min(65536));
            for _ in 0..count {
                items.push(decode_asset_summary(&mut buf)?);
            }
            Message::Response(Response::AssetPage(ResponseAssetPage {
                request_id,
                items,
                page_index: read_u32(&mut buf)?,
                page_count: read_u32(&mut buf)?,
                first_offset: read_u64(&mut buf)?,
            }))
        }
        MSG_RESP_ROLES_ASSIGN => Message::Response(Response::RolesAssign(ResponseRolesAssign {
            request_id: RequestId(read_uuid(&mut buf)?),
        })),
        MSG_RESP_ROLES_REVOKE => Message::Response(Response::RolesRevoke(ResponseRolesRevoke {
            request_id: RequestId(read_uuid(&mut buf)?),
        })),
        MSG_RESP_ROLES_GET => Message::Response(Response::RolesGet(ResponseRolesGet {
            request_id: RequestId(read_uuid(&mut buf)?),
            roles: read_string_list(&mut buf, "role_name")?,
        })),
        MSG_RESP_FILE_INFO => Message::Response(Response::FileInfo(ResponseFileInfo {
            request_id: RequestId(read_uuid(&mut buf)?),
            asset_id: AssetId(read_uuid(&mut buf)?),
            media_type: read_string(&mut buf, "file_media_type")?,
            size: read_u64(&mut buf)?,
            hash_algorithm: read_string(&mut buf, "file_hash_algorithm")?,
            hash_value: read_string(&mut buf, "file_hash_value")?,
        })),
        MSG_RESP_ERROR => Message::Response(Response::Error(decode_error_payload(&mut buf)?)),
        _ => return Err(WireError::UnknownTag(tag)),
    };

    if !buf.is_empty() {
        return Err(WireError::TrailingBytes {
            remaining: buf.len(),
        });
    }

    Ok((msg, total))
}

/// Decode exactly one message; trailing bytes after the frame are a
/// protocol error. Used by the single-command endpoint.
pub fn decode_exactly_one(input: &[u8]) -> Result<Message> {
    let (msg, consumed) = decode_message(input)?;
    if consumed != input.len() {
        return Err(WireError::TrailingBytes {
            remaining: input.len() - consumed,
        });
    }
    Ok(msg)
}

/// Decode exactly one message that must be a `Response`.
pub fn decode_response(input: &[u8]) -> Result<Response> {
    match decode_exactly_one(input)? {
        Message::Response(r) => Ok(r),
        Message::Command(c) => Err(WireError::UnexpectedMessage(format!(
            "expected a response, got command '{}'",
            c.name()
        ))),
    }
}

// ── Sequence framing ─────────────────────────────────────────────────────

/// Encode a sequence of messages: each record is `[u32 BE length]`
/// followed by the framed message, terminated by a zero-length record.
pub fn encode_message_sequence(messages: &[Message]) -> BytesMut {
    let mut out = BytesMut::with_capacity(64 * messages.len() + 4);
    for msg in messages {
        let frame = encode_message(msg);
        out.put_u32(frame.len() as u32);
        out.put_slice(&frame);
    }
    out.put_u32(0);
    out
}

/// Decode a zero-terminated sequence of framed messages. A missing
/// terminator or trailing bytes after it are protocol errors.
pub fn decode_message_sequence(input: &[u8]) -> Result<Vec<Message>> {
    let mut buf: &[u8] = input;
    let mut messages = Vec::new();
    loop {
        let length = read_u32(&mut buf)? as usize;
        if length == 0 {
            break;
        }
        if length > (MAX_MESSAGE_SIZE as usize) + FRAME_HEADER_SIZE {
            return Err(WireError::FrameTooLarge {
                size: length as u32,
                max: MAX_MESSAGE_SIZE,
            });
        }
        let record = read_bytes(&mut buf, length)?;
        let (msg, consumed) = decode_message(&record)?;
        if consumed != record.len() {
            return Err(WireError::TrailingBytes {
                remaining: record.len() - consumed,
            });
        }
        messages.push(msg);
    }
    if !buf.is_empty() {
        return Err(WireError::TrailingBytes {
            remaining: buf.len(),
        });
    }
    Ok(messages)
}

/// Decode a response sequence; any command in the stream is a protocol
/// error.
pub fn decode_response_sequence(input: &[u8]) -> Result<Vec<Response>> {
    decode_message_sequence(input)?
        .into_iter()
        .map(|m| match m {
            Message::Response(r) => Ok(r),
            Message::Command(c) => Err(WireError::UnexpectedMessage(format!(
                "expected a response sequence, got command '{}'",
                c.name()
            ))),
        })
        .collect()
}
