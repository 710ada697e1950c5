//! Codec for the version-discovery endpoint.
//!
//! The server answers an unauthenticated `GET` on the base URI with an
//! encoded list of endpoint advertisements; the client intersects it
//! with its supported protocol set before sending any command.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use crate::error::WireError;
use crate::types::{EndpointAdvertisement, ProtocolIdentifier};

/// Sanity bound on the advertisement count.
const MAX_ADVERTISEMENTS: u32 = 1024;

pub fn encode_advertisements(adverts: &[EndpointAdvertisement]) -> BytesMut {
    let mut out = BytesMut::with_capacity(4 + adverts.len() * 64);
    out.put_u32(adverts.len() as u32);
    for advert in adverts {
        out.put_slice(advert.protocol.id.as_bytes());
        out.put_u32(advert.protocol.version_major);
        out.put_u32(advert.protocol.version_minor);
        out.put_u16(advert.endpoint_path.len() as u16);
        out.put_slice(advert.endpoint_path.as_bytes());
    }
    out
}

pub fn decode_advertisements(input: &[u8]) -> Result<Vec<EndpointAdvertisement>, WireError> {
    let mut buf = input;

    let count = read_u32(&mut buf)?;
    if count > MAX_ADVERTISEMENTS {
        return Err(WireError::Corruption(format!(
            "advertisement count {count} exceeds {MAX_ADVERTISEMENTS}"
        )));
    }

    let mut adverts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = read_uuid(&mut buf)?;
        let version_major = read_u32(&mut buf)?;
        let version_minor = read_u32(&mut buf)?;
        let path_len = read_u16(&mut buf)? as usize;
        let path_bytes = read_bytes(&mut buf, path_len)?;
        let endpoint_path = String::from_utf8(path_bytes)
            .map_err(|_| WireError::InvalidUtf8 { field: "endpoint_path" })?;
        adverts.push(EndpointAdvertisement {
            protocol: ProtocolIdentifier::new(id, version_major, version_minor),
            endpoint_path,
        });
    }
    if !buf.is_empty() {
        return Err(WireError::TrailingBytes {
            remaining: buf.len(),
        });
    }
    Ok(adverts)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, WireError> {
    if buf.len() < 4 {
        return Err(WireError::Truncated {
            expected: 4,
            actual: buf.len(),
        });
    }
    let v = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

fn read_u16(buf: &mut &[u8]) -> Result<u16, WireError> {
    if buf.len() < 2 {
        return Err(WireError::Truncated {
            expected: 2,
            actual: buf.len(),
        });
    }
    let v = u16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(v)
}

fn read_bytes(buf: &mut &[u8], n: usize) -> Result<Vec<u8>, WireError> {
    if buf.len() < n {
        return Err(WireError::Truncated {
            expected: n,
            actual: buf.len(),
        });
    }
    let v = buf[..n].to_vec();
    *buf = &buf[n..];
    Ok(v)
}

fn read_uuid(buf: &mut &[u8]) -> Result<Uuid, WireError> {
    let bytes = read_bytes(buf, 16)?;
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&bytes);
    Ok(Uuid::from_bytes(arr))
}
