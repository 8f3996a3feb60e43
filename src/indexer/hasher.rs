/// Content-addressable fingerprint used to deduplicate uploads.
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the raw document bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
