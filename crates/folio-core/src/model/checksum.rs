//! Checksums for migration content
//!
//! A SHA-256 of the unit body is stored next to each record so that a unit
//! edited after it was applied can be detected on the next run.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hex checksum of a unit body
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
