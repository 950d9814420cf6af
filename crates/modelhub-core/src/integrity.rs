//! Artifact checksums.
//!
//! Every stored artifact is fingerprinted with SHA-256. The digest recorded
//! at creation must match the bytes on disk for as long as the version
//! exists.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A content hash (SHA-256 hex digest).
///
/// The empty hash means "unknown": the artifact was missing or unreadable
/// when the checksum was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute the SHA-256 hash of the given data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex_encode(&hasher.finalize()))
    }

    /// The "unknown" hash.
    pub fn empty() -> Self {
        ContentHash(String::new())
    }

    /// Whether this hash carries a digest.
    pub fn is_known(&self) -> bool {
        !self.0.is_empty()
    }

    /// Get the hex string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that the given data matches this hash. An unknown hash never
    /// verifies.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.is_known() && ContentHash::compute(data) == *self
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_known() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "<unknown>")
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_deterministic() {
        let h1 = ContentHash::compute(b"weights");
        let h2 = ContentHash::compute(b"weights");
        assert_eq!(h1, h2);
        assert_ne!(h1, ContentHash::compute(b"other weights"));
    }

    #[test]
    fn hash_format() {
        // SHA-256 of empty input is well-known
        assert_eq!(
            ContentHash::compute(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let hash = ContentHash::compute(b"model bytes");
        assert!(hash.verify(b"model bytes"));
        assert!(!hash.verify(b"model bytez"));
    }

    #[test]
    fn empty_hash_never_verifies() {
        let hash = ContentHash::empty();
        assert!(!hash.is_known());
        assert!(!hash.verify(b""));
        assert_eq!(hash.to_string(), "<unknown>");
    }

    #[test]
    fn serializes_as_plain_string() {
        let hash = ContentHash::compute(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.as_str()));
    }
}
