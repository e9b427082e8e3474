//! Content hashing for change detection.

use sha2::{Digest, Sha256};

/// Truncated SHA-256 of UTF-8 text, as 12 lowercase hex characters.
///
/// Used to fingerprint Dockerfile content: byte-identical inputs always
/// hash identically, and any one-byte change produces a different value
/// with standard collision resistance. Twelve characters keeps the value
/// readable in container names and state files.
pub fn short_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex[..12].to_string()
}
