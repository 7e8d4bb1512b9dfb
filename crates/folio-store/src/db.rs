//! Store connection management
//!
//! Turns connection settings into an owned `MigrationStore`. The handle is
//! created once per invocation and passed to the applicator.

use crate::backend::{MigrationStore, PostgresStore, SqliteStore};
use crate::errors::{invalid_input, Result};
use folio_core_types::Sensitive;
use std::path::PathBuf;

/// Discrete Postgres connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<Sensitive<String>>,
    /// Require TLS; otherwise TLS is used only if the server offers it
    pub ssl: bool,
}

/// Which store a run targets
#[derive(Debug, Clone, PartialEq)]
pub enum StoreTarget {
    Postgres(PgSettings),
    /// A full `postgres://` URL
    PostgresUrl(Sensitive<String>),
    Sqlite(PathBuf),
    SqliteMemory,
}

impl StoreTarget {
    /// Interpret a `DATABASE_URL`-style string
    ///
    /// `sqlite::memory:`, `sqlite://path` and `sqlite:path` select SQLite;
    /// `postgres://` and `postgresql://` select Postgres.
    pub fn from_url(url: &str) -> Result<Self> {
        if url == "sqlite::memory:" {
            return Ok(StoreTarget::SqliteMemory);
        }
        if let Some(path) = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
        {
            if path.is_empty() {
                return Err(invalid_input("store_target", "sqlite url has no path"));
            }
            return Ok(StoreTarget::Sqlite(PathBuf::from(path)));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(StoreTarget::PostgresUrl(Sensitive::new(url.to_string())));
        }
        Err(invalid_input(
            "store_target",
            "unsupported database url scheme (expected sqlite: or postgres://)",
        ))
    }

    /// Human-readable target description with credentials left out
    pub fn describe(&self) -> String {
        match self {
            StoreTarget::Postgres(s) => {
                format!("postgres {}@{}:{}/{}", s.user, s.host, s.port, s.database)
            }
            StoreTarget::PostgresUrl(_) => "postgres (DATABASE_URL)".to_string(),
            StoreTarget::Sqlite(path) => format!("sqlite {}", path.display()),
            StoreTarget::SqliteMemory => "sqlite :memory:".to_string(),
        }
    }
}

/// Open the store a run will own
///
/// With `create` unset a missing SQLite file is never created; an empty
/// in-memory database stands in for it, so every unit reads as pending.
pub async fn connect(
    target: &StoreTarget,
    table: &str,
    create: bool,
) -> Result<Box<dyn MigrationStore>> {
    let store: Box<dyn MigrationStore> = match target {
        StoreTarget::Postgres(settings) => Box::new(PostgresStore::connect(settings, table).await?),
        StoreTarget::PostgresUrl(url) => {
            Box::new(PostgresStore::connect_url(url.expose(), table).await?)
        }
        StoreTarget::Sqlite(path) if create => Box::new(SqliteStore::open(path, table)?),
        StoreTarget::Sqlite(path) if path.exists() => {
            Box::new(SqliteStore::open_existing(path, table)?)
        }
        StoreTarget::Sqlite(path) => {
            tracing::debug!(path = %path.display(), "database file absent, reading as empty");
            Box::new(SqliteStore::open_in_memory(table)?)
        }
        StoreTarget::SqliteMemory => Box::new(SqliteStore::open_in_memory(table)?),
    };
    tracing::debug!(backend = store.backend_name(), target = %target.describe(), "connected");
    Ok(store)
}
