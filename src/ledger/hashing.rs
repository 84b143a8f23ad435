use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur while canonicalizing data for hashing
#[derive(Debug, Error)]
pub enum HashingError {
    #[error("Canonicalization error: {0}")]
    Canonicalization(String),
}

/// Serializes a value into its canonical JSON form
///
/// Canonical means: object keys sorted ascending, compact separators, no
/// superfluous whitespace. Two structurally equal values always canonicalize
/// to the same string regardless of construction order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, HashingError> {
    // serde_json maps are BTreeMap-backed, so keys come out sorted
    let value = serde_json::to_value(value)
        .map_err(|e| HashingError::Canonicalization(e.to_string()))?;

    serde_json::to_string(&value).map_err(|e| HashingError::Canonicalization(e.to_string()))
}

/// Computes the SHA-256 hex digest of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes the fingerprint of a transaction-like value
///
/// The fingerprint is the SHA-256 hex digest over the canonical JSON form of
/// the value, so it identifies the content, not the in-memory representation.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String, HashingError> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Computes the Merkle root over a list of hex-encoded fingerprints
///
/// An empty input yields the SHA-256 digest of the empty byte string. When a
/// level has odd cardinality the last entry is duplicated; this is the
/// canonical tie-break for unbalanced trees and must not change.
pub fn merkle_root(fingerprints: &[String]) -> String {
    if fingerprints.is_empty() {
        return sha256_hex(b"");
    }

    let mut level: Vec<String> = fingerprints.to_vec();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1].clone();
            level.push(last);
        }

        let mut next_level = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut combined = String::with_capacity(pair[0].len() + pair[1].len());
            combined.push_str(&pair[0]);
            combined.push_str(&pair[1]);
            next_level.push(sha256_hex(combined.as_bytes()));
        }

        level = next_level;
    }

    level.remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte string
    const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_empty_merkle_root_is_fixed_sentinel() {
        assert_eq!(merkle_root(&[]), EMPTY_DIGEST);
        // Deterministic across calls
        assert_eq!(merkle_root(&[]), merkle_root(&[]));
    }

    #[test]
    fn test_single_fingerprint_is_its_own_root() {
        let fp = sha256_hex(b"record-1");
        assert_eq!(merkle_root(&[fp.clone()]), fp);
    }

    #[test]
    fn test_odd_level_duplicates_last_entry() {
        let fps: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|s| sha256_hex(s.as_bytes()))
            .collect();

        // Appending a duplicate of the last entry must not change the root
        let mut padded = fps.clone();
        padded.push(fps[2].clone());

        assert_eq!(merkle_root(&fps), merkle_root(&padded));
    }

    #[test]
    fn test_root_changes_when_one_leaf_changes() {
        let fps: Vec<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|s| sha256_hex(s.as_bytes()))
            .collect();

        let mut tampered = fps.clone();
        tampered[1] = sha256_hex(b"B");

        assert_ne!(merkle_root(&fps), merkle_root(&tampered));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = serde_json::json!({
            "zebra": 1,
            "alpha": 2,
            "mid": {"y": 3, "x": 4}
        });

        let canonical = canonical_json(&value).unwrap();
        assert_eq!(canonical, r#"{"alpha":2,"mid":{"x":4,"y":3},"zebra":1}"#);
    }
}
