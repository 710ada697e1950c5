//! Gzip payload coding for HTTP response bodies.
//!
//! Responses may be served with `Content-Encoding: gzip`; the client
//! decompresses transparently before parsing. This module is a
//! self-contained coder: the encoder emits valid gzip members built
//! from stored (uncompressed) DEFLATE blocks, and the decoder accepts
//! stored-block members with full header and CRC32/ISIZE validation.
//! Compressed DEFLATE block types are rejected as unsupported; for
//! interop with general gzip producers, swap in a full inflater.

use crate::error::WireError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const CM_DEFLATE: u8 = 8;

const FLG_FHCRC: u8 = 0b0000_0010;
const FLG_FEXTRA: u8 = 0b0000_0100;
const FLG_FNAME: u8 = 0b0000_1000;
const FLG_FCOMMENT: u8 = 0b0001_0000;

/// Maximum bytes per stored DEFLATE block.
const STORED_BLOCK_MAX: usize = 0xFFFF;

/// Maximum decoded size accepted: matches the largest file body cap.
const MAX_DECODED_SIZE: usize = 64 * 1024 * 1024;

/// CRC32 (IEEE 802.3 polynomial), bitwise, reflected.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

/// Encode `data` as a gzip member using stored DEFLATE blocks.
pub fn gzip_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 32);
    // Fixed header: magic, CM=deflate, no flags, no mtime, XFL=0, OS=unknown.
    out.extend_from_slice(&GZIP_MAGIC);
    out.push(CM_DEFLATE);
    out.push(0);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.push(0);
    out.push(0xFF);

    if data.is_empty() {
        // Single final stored block of length zero.
        out.push(0x01);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0xFFFFu16.to_le_bytes());
    } else {
        let mut chunks = data.chunks(STORED_BLOCK_MAX).peekable();
        while let Some(chunk) = chunks.next() {
            let bfinal: u8 = if chunks.peek().is_none() { 1 } else { 0 };
            // Stored block: 3-bit header (BFINAL, BTYPE=00) padded to a
            // byte boundary, then LEN and its ones' complement, LE.
            out.push(bfinal);
            let len = chunk.len() as u16;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&(!len).to_le_bytes());
            out.extend_from_slice(chunk);
        }
    }

    out.extend_from_slice(&crc32(data).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], WireError> {
    if buf.len() < n {
        return Err(WireError::Gzip(format!(
            "truncated gzip stream: need {n} bytes, have {}",
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u16_le(buf: &mut &[u8]) -> Result<u16, WireError> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn take_u32_le(buf: &mut &[u8]) -> Result<u32, WireError> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decode one gzip member. Validates the header, the CRC32 trailer and
/// the ISIZE field.
pub fn gzip_decode(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut buf = data;

    let header = take(&mut buf, 10)?;
    if header[0..2] != GZIP_MAGIC {
        return Err(WireError::Gzip("bad gzip magic".into()));
    }
    if header[2] != CM_DEFLATE {
        return Err(WireError::Gzip(format!(
            "unsupported compression method: {}",
            header[2]
        )));
    }
    let flags = header[3];

    if flags & FLG_FEXTRA != 0 {
        let xlen = take_u16_le(&mut buf)? as usize;
        take(&mut buf, xlen)?;
    }
    if flags & FLG_FNAME != 0 {
        skip_zero_terminated(&mut buf)?;
    }
    if flags & FLG_FCOMMENT != 0 {
        skip_zero_terminated(&mut buf)?;
    }
    if flags & FLG_FHCRC != 0 {
        take(&mut buf, 2)?;
    }

    let mut out = Vec::new();
    loop {
        let block_header = take(&mut buf, 1)?[0];
        let bfinal = block_header & 0b0000_0001 != 0;
        let btype = (block_header >> 1) & 0b0000_0011;
        if btype != 0 {
            return Err(WireError::Gzip(format!(
                "unsupported deflate block type: {btype}"
            )));
        }
        let len = take_u16_le(&mut buf)? as usize;
        let nlen = take_u16_le(&mut buf)?;
        if nlen != !(len as u16) {
            return Err(WireError::Gzip("stored block LEN/NLEN mismatch".into()));
        }
        if out.len() + len > MAX_DECODED_SIZE {
            return Err(WireError::Gzip(format!(
                "decoded size exceeds {MAX_DECODED_SIZE} bytes"
            )));
        }
        out.extend_from_slice(take(&mut buf, len)?);
        if bfinal {
            break;
        }
    }

    let crc_expected = take_u32_le(&mut buf)?;
    let isize_expected = take_u32_le(&mut buf)?;
    if !buf.is_empty() {
        return Err(WireError::Gzip(format!(
            "trailing bytes after gzip member: {}",
            buf.len()
        )));
    }
    let crc_actual = crc32(&out);
    if crc_actual != crc_expected {
        return Err(WireError::Gzip(format!(
            "CRC32 mismatch: expected {crc_expected:08x}, computed {crc_actual:08x}"
        )));
    }
    if isize_expected != (out.len() as u64 % 0x1_0000_0000) as u32 {
        return Err(WireError::Gzip("ISIZE mismatch".into()));
    }
    Ok(out)
}

fn skip_zero_terminated(buf: &mut &[u8]) -> Result<(), WireError> {
    match buf.iter().position(|&b| b == 0) {
        Some(pos) => {
            *buf = &buf[pos + 1..];
            Ok(())
        }
        None => Err(WireError::Gzip("unterminated gzip header field".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_vectors() {
        assert_eq!(crc32(b""), 0x0000_0000);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_roundtrip_empty() {
        let encoded = gzip_encode(b"");
        assert_eq!(gzip_decode(&encoded).unwrap(), b"");
    }

    #[test]
    fn test_roundtrip_small() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let encoded = gzip_encode(data);
        assert_eq!(gzip_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_multi_block() {
        // Larger than one stored block, so the encoder must chain blocks.
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let encoded = gzip_encode(&data);
        assert_eq!(gzip_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut encoded = gzip_encode(b"hello");
        encoded[0] = 0x00;
        assert!(matches!(
            gzip_decode(&encoded),
            Err(WireError::Gzip(msg)) if msg.contains("magic")
        ));
    }

    #[test]
    fn test_crc_mismatch_rejected() {
        let mut encoded = gzip_encode(b"hello");
        let n = encoded.len();
        encoded[n - 5] ^= 0xFF; // flip a CRC byte
        assert!(matches!(
            gzip_decode(&encoded),
            Err(WireError::Gzip(msg)) if msg.contains("CRC32")
        ));
    }

    #[test]
    fn test_corrupt_body_rejected() {
        let mut encoded = gzip_encode(b"hello world");
        // Flip a payload byte (after the 10-byte header and 5-byte
        // stored-block header); CRC must catch it.
        encoded[16] ^= 0x01;
        assert!(gzip_decode(&encoded).is_err());
    }

    #[test]
    fn test_compressed_block_type_rejected() {
        let mut encoded = gzip_encode(b"x");
        // Rewrite the stored-block header to claim fixed Huffman (BTYPE=01).
        encoded[10] = 0b0000_0011;
        assert!(matches!(
            gzip_decode(&encoded),
            Err(WireError::Gzip(msg)) if msg.contains("block type")
        ));
    }

    #[test]
    fn test_header_with_name_field() {
        // Build a member with FNAME set; the decoder must skip it.
        let data = b"payload";
        let mut encoded = gzip_encode(data);
        encoded[3] |= FLG_FNAME;
        // Splice a zero-terminated name after the 10-byte header.
        let mut with_name = encoded[..10].to_vec();
        with_name.extend_from_slice(b"file.bin\0");
        with_name.extend_from_slice(&encoded[10..]);
        assert_eq!(gzip_decode(&with_name).unwrap(), data);
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let encoded = gzip_encode(b"hello");
        let truncated = &encoded[..encoded.len() - 3];
        assert!(gzip_decode(truncated).is_err());
    }
}
