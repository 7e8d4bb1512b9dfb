//! SQLite record store
//!
//! Backs local development databases and the test suite. Statements run
//! synchronously on the owned `rusqlite::Connection`; nothing is held across
//! an await point.
//!
//! SQLite has no session-level advisory lock, so file databases take the run
//! lock by creating `<database>.<table>.lock` next to the database file. The
//! file is removed on unlock and when the store is dropped.

#![allow(clippy::result_large_err)]

use crate::backend::{validate_table_name, MigrationStore};
use crate::errors::{connection_error, io_error, record_table_error, ApplyFailure, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use folio_core::{MigrationRecord, MigrationUnit};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    table: String,
    /// `None` for in-memory databases, which no other process can reach
    lock_path: Option<PathBuf>,
    lock_held: bool,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let conn = Connection::open(path.as_ref()).map_err(|e| connection_error("sqlite", e))?;
        Self::from_file(conn, path.as_ref(), table)
    }

    /// Open a database file that must already exist
    pub fn open_existing<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path.as_ref(), flags)
            .map_err(|e| connection_error("sqlite", e))?;
        Self::from_file(conn, path.as_ref(), table)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let conn = Connection::open_in_memory().map_err(|e| connection_error("sqlite", e))?;
        Self::configure(&conn)?;
        Ok(Self {
            conn,
            table: table.to_string(),
            lock_path: None,
            lock_held: false,
        })
    }

    fn from_file(conn: Connection, path: &Path, table: &str) -> Result<Self> {
        Self::configure(&conn)?;
        Ok(Self {
            conn,
            table: table.to_string(),
            lock_path: Some(lock_path_for(path, table)),
            lock_held: false,
        })
    }

    /// Borrow the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| connection_error("sqlite", e))
    }

    /// Lock file guarding runs against this database and table, if any
    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    fn release_lock_file(&mut self) -> Result<()> {
        if !self.lock_held {
            return Ok(());
        }
        self.lock_held = false;
        match &self.lock_path {
            Some(path) => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error("release_lock", path, e)),
            },
            None => Ok(()),
        }
    }

    fn has_checksum_column(&self) -> rusqlite::Result<bool> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", self.table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns.iter().any(|c| c == "checksum"))
    }
}

#[async_trait]
impl MigrationStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn record_table_exists(&mut self) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&self.table],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| record_table_error(&self.table, e))
    }

    async fn ensure_record_table(&mut self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    checksum TEXT
                )",
                self.table
            ))
            .map_err(|e| record_table_error(&self.table, e))?;

        // Tables created by older tooling lack the checksum column
        let has_checksum = self
            .has_checksum_column()
            .map_err(|e| record_table_error(&self.table, e))?;
        if !has_checksum {
            self.conn
                .execute_batch(&format!("ALTER TABLE {} ADD COLUMN checksum TEXT", self.table))
                .map_err(|e| record_table_error(&self.table, e))?;
        }

        Ok(())
    }

    async fn find_record(&mut self, name: &str) -> Result<Option<MigrationRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT name, applied_at, checksum FROM {} WHERE name = ?1",
                    self.table
                ),
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| record_table_error(&self.table, e))?;

        row.map(|(name, applied_at, checksum)| to_record(&self.table, name, &applied_at, checksum))
            .transpose()
    }

    async fn list_records(&mut self) -> Result<Vec<MigrationRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT name, applied_at, checksum FROM {} ORDER BY applied_at, id",
                self.table
            ))
            .map_err(|e| record_table_error(&self.table, e))?;
        let rows: Vec<(String, String, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(|e| record_table_error(&self.table, e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| record_table_error(&self.table, e))?;
        drop(stmt);

        rows.into_iter()
            .map(|(name, applied_at, checksum)| to_record(&self.table, name, &applied_at, checksum))
            .collect()
    }

    async fn apply_unit(
        &mut self,
        unit: &MigrationUnit,
        applied_at: DateTime<Utc>,
    ) -> std::result::Result<(), ApplyFailure> {
        let insert = format!(
            "INSERT INTO {} (name, applied_at, checksum) VALUES (?1, ?2, ?3)",
            self.table
        );
        let stamp = format_timestamp(applied_at);

        if !unit.is_transactional() {
            self.conn
                .execute_batch(unit.content())
                .map_err(|e| ApplyFailure::Execute(e.to_string()))?;
            self.conn
                .execute(&insert, params![unit.name(), stamp, unit.checksum()])
                .map_err(|e| ApplyFailure::Record {
                    message: e.to_string(),
                    rolled_back: false,
                })?;
            return Ok(());
        }

        // Dropping the transaction without commit rolls it back
        let tx = self
            .conn
            .transaction()
            .map_err(|e| ApplyFailure::Execute(e.to_string()))?;
        tx.execute_batch(unit.content())
            .map_err(|e| ApplyFailure::Execute(e.to_string()))?;
        tx.execute(&insert, params![unit.name(), stamp, unit.checksum()])
            .map_err(|e| ApplyFailure::Record {
                message: e.to_string(),
                rolled_back: true,
            })?;
        tx.commit()
            .map_err(|e| ApplyFailure::Execute(format!("commit failed: {}", e)))?;

        Ok(())
    }

    async fn try_lock(&mut self, _key: i64) -> Result<bool> {
        let Some(path) = &self.lock_path else {
            self.lock_held = true;
            return Ok(true);
        };
        if self.lock_held {
            return Ok(true);
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                // Owner pid, for whoever finds a stale lock file
                writeln!(file, "{}", std::process::id()).ok();
                self.lock_held = true;
                tracing::debug!(backend = "sqlite", lock_file = %path.display(), "lock taken");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(
                    backend = "sqlite",
                    lock_file = %path.display(),
                    "lock file present; delete it if no other run is in progress"
                );
                Ok(false)
            }
            Err(e) => Err(io_error("acquire_lock", path, e)),
        }
    }

    async fn unlock(&mut self, _key: i64) -> Result<()> {
        self.release_lock_file()
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(e) = self.release_lock_file() {
            tracing::warn!(error = %e, "failed to remove migration lock file");
        }
    }
}

/// `<database>.<table>.lock`, next to the database file
fn lock_path_for(path: &Path, table: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.lock", table));
    PathBuf::from(name)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored `applied_at`, accepting both RFC 3339 and SQLite's
/// `CURRENT_TIMESTAMP` format.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn to_record(
    table: &str,
    name: String,
    applied_at: &str,
    checksum: Option<String>,
) -> Result<MigrationRecord> {
    let applied_at = parse_timestamp(applied_at).ok_or_else(|| {
        record_table_error(
            table,
            format!("unreadable applied_at '{}' for {}", applied_at, name),
        )
    })?;
    Ok(MigrationRecord {
        name,
        applied_at,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-01-01T00:00:00.123456Z").is_some());
        assert!(parse_timestamp("2024-01-01 00:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let earlier = "2024-01-01T00:00:00.000001Z".parse::<DateTime<Utc>>().unwrap();
        let later = "2024-01-01T00:00:00.000002Z".parse::<DateTime<Utc>>().unwrap();
        assert!(format_timestamp(earlier) < format_timestamp(later));
    }

    #[test]
    fn test_lock_path_sits_next_to_database() {
        assert_eq!(
            lock_path_for(Path::new("data/folio.db"), "schema_migrations"),
            PathBuf::from("data/folio.db.schema_migrations.lock")
        );
    }

    #[tokio::test]
    async fn test_second_store_on_same_file_cannot_lock() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("folio.db");
        let mut first = SqliteStore::open(&db, "schema_migrations").unwrap();
        let mut second = SqliteStore::open(&db, "schema_migrations").unwrap();

        assert!(first.try_lock(1).await.unwrap());
        assert!(first.lock_path().unwrap().exists());
        assert!(!second.try_lock(1).await.unwrap());

        first.unlock(1).await.unwrap();
        assert!(!db.with_file_name("folio.db.schema_migrations.lock").exists());
        assert!(second.try_lock(1).await.unwrap());
        second.unlock(1).await.unwrap();
    }

    #[tokio::test]
    async fn test_locks_on_different_tables_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("folio.db");
        let mut migrations = SqliteStore::open(&db, "schema_migrations").unwrap();
        let mut seeds = SqliteStore::open(&db, "seed_runs").unwrap();

        assert!(migrations.try_lock(1).await.unwrap());
        assert!(seeds.try_lock(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_store_releases_its_lock() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("folio.db");
        let lock_file = {
            let mut store = SqliteStore::open(&db, "schema_migrations").unwrap();
            assert!(store.try_lock(1).await.unwrap());
            store.lock_path().unwrap().to_path_buf()
        };
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_failed_lock_attempt_leaves_other_owner_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("folio.db");
        let mut owner = SqliteStore::open(&db, "schema_migrations").unwrap();
        assert!(owner.try_lock(1).await.unwrap());

        {
            let mut other = SqliteStore::open(&db, "schema_migrations").unwrap();
            assert!(!other.try_lock(1).await.unwrap());
            other.unlock(1).await.unwrap();
        }
        assert!(owner.lock_path().unwrap().exists());
    }

    #[tokio::test]
    async fn test_in_memory_store_always_locks() {
        let mut store = SqliteStore::open_in_memory("schema_migrations").unwrap();
        assert!(store.lock_path().is_none());
        assert!(store.try_lock(1).await.unwrap());
        store.unlock(1).await.unwrap();
    }

    #[test]
    fn test_open_existing_does_not_create_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("missing.db");

        let err = SqliteStore::open_existing(&db, "schema_migrations").unwrap_err();
        assert_eq!(err.kind(), folio_core::ExErrorKind::Connection);
        assert!(!db.exists());

        SqliteStore::open(&db, "schema_migrations").unwrap();
        assert!(SqliteStore::open_existing(&db, "schema_migrations").is_ok());
    }

    #[tokio::test]
    async fn test_ensure_record_table_adds_missing_checksum_column() {
        let mut store = SqliteStore::open_in_memory("schema_migrations").unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TABLE schema_migrations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                );
                INSERT INTO schema_migrations (name) VALUES ('0001_legacy');",
            )
            .unwrap();

        store.ensure_record_table().await.unwrap();
        assert!(store.has_checksum_column().unwrap());

        let record = store.find_record("0001_legacy").await.unwrap().unwrap();
        assert_eq!(record.checksum, None);
    }

    #[tokio::test]
    async fn test_ensure_record_table_is_idempotent() {
        let mut store = SqliteStore::open_in_memory("schema_migrations").unwrap();
        assert!(!store.record_table_exists().await.unwrap());
        store.ensure_record_table().await.unwrap();
        store.ensure_record_table().await.unwrap();
        assert!(store.record_table_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_partial_state() {
        let mut store = SqliteStore::open_in_memory("schema_migrations").unwrap();
        store.ensure_record_table().await.unwrap();
        let unit = MigrationUnit::new(
            "0001_half_broken",
            "CREATE TABLE profiles (id INTEGER PRIMARY KEY); CREATE TABLEE oops (id INTEGER);",
        )
        .unwrap();

        let failure = store.apply_unit(&unit, Utc::now()).await.unwrap_err();
        assert!(matches!(failure, ApplyFailure::Execute(_)));

        let profiles: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'profiles'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(profiles, 0, "transactional unit must roll back");
        assert!(store.find_record("0001_half_broken").await.unwrap().is_none());
    }
}
