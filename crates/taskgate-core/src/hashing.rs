// taskgate-core/src/hashing.rs
// ============================================================================
// Module: Taskgate Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for work queues, summaries, and evidence.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Every digest Taskgate persists (payload digests, evidence artifact hashes,
//! binder fingerprints, deterministic telemetry refs) is computed the same
//! way: canonicalize to RFC 8785 JSON, then SHA-256 the bytes. Keeping this
//! in one place means replay and live runs always agree on a hash for the
//! same logical value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes a serializable value as canonical JSON and returns a lowercase hex digest.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

/// Hashes raw bytes and returns a lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Hashes a UTF-8 string and returns a lowercase hex digest.
#[must_use]
pub fn hash_str(value: &str) -> String {
    hash_bytes(value.as_bytes())
}

/// Hashes a sequence of `|`-joined parts, matching the binder's composite-key
/// convention (`sha256("a|b|c")`).
#[must_use]
pub fn hash_joined_parts(parts: &[&str]) -> String {
    hash_str(&parts.join("|"))
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::hash_joined_parts;
    use super::hash_str;

    #[test]
    fn hash_str_is_deterministic() {
        assert_eq!(hash_str("run-demo"), hash_str("run-demo"));
        assert_ne!(hash_str("run-demo"), hash_str("run-other"));
    }

    #[test]
    fn joined_parts_matches_manual_join() {
        let joined = hash_joined_parts(&["a", "b", "c"]);
        assert_eq!(joined, hash_str("a|b|c"));
    }
}
