//! Folio Store - migration application against SQLite and Postgres
//!
//! Provides:
//! - Unit sources (directory of `.sql` files, embedded portfolio schema)
//! - The `MigrationStore` seam with SQLite and Postgres backends
//! - The `Applicator` that applies pending units exactly once, under a run lock

pub mod backend;
pub mod db;
pub mod errors;
pub mod migrations;

// Re-export key types
pub use backend::{MigrationStore, PostgresStore, SqliteStore, DEFAULT_RECORD_TABLE};
pub use db::{connect, PgSettings, StoreTarget};
pub use errors::{ApplyFailure, Result};
pub use migrations::{
    Applicator, ApplyOptions, DirectorySource, EmbeddedSource, StatusReport, UnitSource,
};
