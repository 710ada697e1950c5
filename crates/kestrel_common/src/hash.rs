//! Content hashing for file transfer integrity checks.
//!
//! Both the client (download verification) and the server (upload
//! verification) compute digests incrementally over 8 KiB chunks and
//! compare case-sensitive lowercase hex.

use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

/// Hex-encode bytes as lowercase ASCII.
pub fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((b & 0x0F) as u32, 16).unwrap_or('0'));
    }
    out
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported hash algorithm: {0}")]
pub struct UnsupportedAlgorithm(pub String);

/// Supported hash algorithms, keyed by their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn from_name(name: &str) -> Result<Self, UnsupportedAlgorithm> {
        match name {
            "SHA-256" => Ok(Self::Sha256),
            "SHA-384" => Ok(Self::Sha384),
            "SHA-512" => Ok(Self::Sha512),
            other => Err(UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }
}

/// Incremental digest over one of the supported algorithms.
pub struct Hasher {
    inner: HasherInner,
}

enum HasherInner {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Sha256 => HasherInner::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => HasherInner::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => HasherInner::Sha512(Sha512::new()),
        };
        Self { inner }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.inner {
            HasherInner::Sha256(h) => h.update(chunk),
            HasherInner::Sha384(h) => h.update(chunk),
            HasherInner::Sha512(h) => h.update(chunk),
        }
    }

    /// Finish the digest and return it as lowercase hex.
    pub fn finish_hex(self) -> String {
        match self.inner {
            HasherInner::Sha256(h) => hex_lower(&h.finalize()),
            HasherInner::Sha384(h) => hex_lower(&h.finalize()),
            HasherInner::Sha512(h) => hex_lower(&h.finalize()),
        }
    }
}

/// Hash a full in-memory buffer. Convenience for server-side upload checks.
pub fn hash_buffer_hex(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut h = Hasher::new(algorithm);
    h.update(data);
    h.finish_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_lower() {
        assert_eq!(hex_lower(&[]), "");
        assert_eq!(hex_lower(&[0x00, 0xFF, 0x1a]), "00ff1a");
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hash_buffer_hex(HashAlgorithm::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_empty_vector() {
        assert_eq!(
            hash_buffer_hex(HashAlgorithm::Sha256, b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = vec![0xAB; 100_000];
        let mut h = Hasher::new(HashAlgorithm::Sha512);
        for chunk in data.chunks(8192) {
            h.update(chunk);
        }
        assert_eq!(h.finish_hex(), hash_buffer_hex(HashAlgorithm::Sha512, &data));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(
            HashAlgorithm::from_name("SHA-256").unwrap(),
            HashAlgorithm::Sha256
        );
        assert_eq!(HashAlgorithm::Sha384.name(), "SHA-384");
        // Names are case-sensitive.
        assert!(HashAlgorithm::from_name("sha-256").is_err());
        assert!(HashAlgorithm::from_name("MD5").is_err());
    }
}
