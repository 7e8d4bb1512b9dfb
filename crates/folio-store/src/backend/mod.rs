//! Record stores
//!
//! A `MigrationStore` is the single, exclusively owned connection a run
//! works through. It both executes unit content and keeps the record table,
//! so a unit and its record can share one transaction.

mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::errors::{invalid_input, ApplyFailure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::{MigrationRecord, MigrationUnit};

/// Default name of the record-keeping table
pub const DEFAULT_RECORD_TABLE: &str = "schema_migrations";

#[async_trait]
pub trait MigrationStore: Send {
    /// Short backend name for log lines (`sqlite`, `postgres`)
    fn backend_name(&self) -> &'static str;

    /// Name of the record-keeping table
    fn table(&self) -> &str;

    /// Whether the record table exists yet (read-only)
    async fn record_table_exists(&mut self) -> Result<bool>;

    /// Create the record table if absent. Never destructive.
    async fn ensure_record_table(&mut self) -> Result<()>;

    /// Look up the record for one unit
    ///
    /// Errors are returned as-is; the applicator decides to read a failed
    /// lookup as "not recorded".
    async fn find_record(&mut self, name: &str) -> Result<Option<MigrationRecord>>;

    /// All records, oldest first
    async fn list_records(&mut self) -> Result<Vec<MigrationRecord>>;

    /// Execute the unit's batch and write its record stamped `applied_at`
    ///
    /// Transactional units run batch and record insert in one transaction.
    async fn apply_unit(
        &mut self,
        unit: &MigrationUnit,
        applied_at: DateTime<Utc>,
    ) -> std::result::Result<(), ApplyFailure>;

    /// Try to take the run lock without waiting. `Ok(false)` means held elsewhere.
    ///
    /// Postgres takes a session advisory lock on `key`. SQLite file databases
    /// create a lock file beside the database instead and ignore `key`.
    async fn try_lock(&mut self, key: i64) -> Result<bool>;

    /// Release the run lock (advisory unlock, or removing the lock file)
    async fn unlock(&mut self, key: i64) -> Result<()>;
}

#[async_trait]
impl<S: MigrationStore + ?Sized> MigrationStore for Box<S> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    fn table(&self) -> &str {
        (**self).table()
    }

    async fn record_table_exists(&mut self) -> Result<bool> {
        (**self).record_table_exists().await
    }

    async fn ensure_record_table(&mut self) -> Result<()> {
        (**self).ensure_record_table().await
    }

    async fn find_record(&mut self, name: &str) -> Result<Option<MigrationRecord>> {
        (**self).find_record(name).await
    }

    async fn list_records(&mut self) -> Result<Vec<MigrationRecord>> {
        (**self).list_records().await
    }

    async fn apply_unit(
        &mut self,
        unit: &MigrationUnit,
        applied_at: DateTime<Utc>,
    ) -> std::result::Result<(), ApplyFailure> {
        (**self).apply_unit(unit, applied_at).await
    }

    async fn try_lock(&mut self, key: i64) -> Result<bool> {
        (**self).try_lock(key).await
    }

    async fn unlock(&mut self, key: i64) -> Result<()> {
        (**self).unlock(key).await
    }
}

/// Validate a record table name before it is spliced into SQL
///
/// Accepts plain identifiers only: ASCII letters, digits and `_`, not
/// starting with a digit, at most 63 bytes (the Postgres identifier limit).
pub fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(invalid_input(
            "record_table",
            format!("'{}' is not a valid record table name", table),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::ExErrorKind;

    #[test]
    fn test_valid_table_names() {
        assert!(validate_table_name("schema_migrations").is_ok());
        assert!(validate_table_name("_seed_runs2").is_ok());
    }

    #[test]
    fn test_invalid_table_names() {
        for bad in ["", "1table", "schema-migrations", "t; DROP TABLE users", "a.b"] {
            let err = validate_table_name(bad).unwrap_err();
            assert_eq!(err.kind(), ExErrorKind::InvalidInput, "{}", bad);
        }
        assert!(validate_table_name(&"x".repeat(64)).is_err());
    }
}
