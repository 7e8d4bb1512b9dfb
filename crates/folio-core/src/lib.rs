//! Folio Core - domain model, error facility and logging facility
//!
//! This crate provides the pieces every other Folio crate builds on:
//! - `MigrationUnit` / `MigrationRecord` / `RunSummary` models
//! - The `ExError` error facility with stable error codes
//! - The structured logging facility and its test capture layer

pub mod errors;
pub mod logging_facility;
pub mod model;

// Used by the exported logging macros
#[doc(hidden)]
pub use folio_core_types;

// Re-export commonly used types
pub use errors::{ExError, ExErrorKind, Result};
pub use model::{MigrationRecord, MigrationUnit, RunSummary, UnitOutcome, UnitStatus};
