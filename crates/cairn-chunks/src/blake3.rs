//! BLAKE3 content hashing for blobs, blocks, and fingerprints
//!
//! The hex form of the digest is the checksum under which a blob is stored.
//! Anything claiming to be a checksum must be exactly `CHECKSUM_LEN` lowercase
//! hex characters; `is_checksum` is the single place that rule lives.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = ::blake3::Hash;

/// Length of a checksum in hex characters
pub const CHECKSUM_LEN: usize = 64;

/// Hash a byte slice in memory.
pub fn hash_bytes(data: &[u8]) -> Hash {
    ::blake3::hash(data)
}

/// Hash a byte slice and return the lowercase hex checksum.
pub fn hex_digest(data: &[u8]) -> String {
    hash_to_hex(&hash_bytes(data))
}

/// Hash everything a reader yields, 64KB at a time.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<Hash> {
    let mut hasher = ::blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024]; // 64KB read buffer

    loop {
        let n = reader.read(&mut buf).context("reading for hash")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash a file from disk using the streaming interface.
pub fn hash_file(path: &Path) -> Result<Hash> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening file for hashing: {}", path.display()))?;
    let hash = hash_reader(file).with_context(|| format!("hashing {}", path.display()))?;
    debug!(path = %path.display(), hash = %hash.to_hex(), "hashed file");
    Ok(hash)
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &Hash) -> String {
    hash.to_hex().to_string()
}

/// Parse a 64-char hex string into a Hash
pub fn hash_from_hex(hex: &str) -> Result<Hash> {
    ::blake3::Hash::from_hex(hex).map_err(|e| anyhow::anyhow!("invalid BLAKE3 hex '{}': {}", hex, e))
}

/// True if `s` has the exact shape of a stored checksum.
pub fn is_checksum(s: &str) -> bool {
    s.len() == CHECKSUM_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_hash_is_deterministic() {
        let h1 = hash_bytes(b"");
        let h2 = hash_bytes(b"");
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_hex_roundtrip() {
        let h = hash_bytes(b"hello cairn");
        let hex = hash_to_hex(&h);
        assert_eq!(hex.len(), CHECKSUM_LEN);
        assert!(is_checksum(&hex));
        let back = hash_from_hex(&hex).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn checksum_shape() {
        assert!(!is_checksum(""));
        assert!(!is_checksum("abc"));
        assert!(!is_checksum(&"A".repeat(64)));
        assert!(!is_checksum(&"g".repeat(64)));
        assert!(is_checksum(&"0f".repeat(32)));
    }

    #[test]
    fn file_hash_matches_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0u32..200_000).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hash_file(&dir.path().join("nope")).is_err());
    }

    proptest! {
        #[test]
        fn streaming_equals_oneshot(data in proptest::collection::vec(any::<u8>(), 0..=200_000)) {
            let streamed = hash_reader(data.as_slice()).unwrap();
            prop_assert_eq!(streamed, hash_bytes(&data));
        }
    }
}
