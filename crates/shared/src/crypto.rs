//! Hashing utilities for API key digests and backup checksums.

use sha2::{Digest, Sha256};

/// Prefix carried by every orchestrator API key.
pub const API_KEY_PREFIX: &str = "co_";

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    sha256_bytes_hex(input.as_bytes())
}

/// Computes SHA-256 hash of raw bytes and returns it as a hex string.
pub fn sha256_bytes_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Extracts the prefix from an API key (first 8 characters after "co_").
///
/// The prefix is safe to log and identifies a key without revealing it.
pub fn extract_key_prefix(key: &str) -> Option<&str> {
    if key.starts_with(API_KEY_PREFIX) && key.len() >= API_KEY_PREFIX.len() + 8 {
        key.get(API_KEY_PREFIX.len()..API_KEY_PREFIX.len() + 8)
    } else {
        None
    }
}

/// Compares two hex digests without short-circuiting on the first mismatch.
pub fn digest_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
