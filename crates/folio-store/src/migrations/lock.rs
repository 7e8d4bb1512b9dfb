//! Run lock key derivation
//!
//! Postgres advisory locks are keyed by a single bigint. The key is derived
//! from the record table name so that runs against different record tables
//! (schema vs. seed data) do not block each other.

use sha2::{Digest, Sha256};

const LOCK_NAMESPACE: &str = "folio-migrate:";

/// Advisory lock key for a record table
pub fn lock_key(table: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(LOCK_NAMESPACE.as_bytes());
    hasher.update(table.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}
