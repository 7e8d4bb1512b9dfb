//! Error handling for folio-store
//!
//! Wraps the folio-core `ExError` facility with store-specific helpers, and
//! defines `ApplyFailure`, the error a backend returns when a unit fails.

use folio_core::errors::{ExError, ExErrorKind};
use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Why a backend could not apply a unit
///
/// The split matters to the operator: an `Execute` failure left nothing
/// behind, while a `Record` failure may have left a schema change without
/// its bookkeeping row.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyFailure {
    /// The unit's statement batch (or its commit) failed
    #[error("statement batch failed: {0}")]
    Execute(String),

    /// The batch ran but the record row could not be written
    #[error("{}", describe_record_failure(.message, .rolled_back))]
    Record { message: String, rolled_back: bool },
}

fn describe_record_failure(message: &str, rolled_back: &bool) -> String {
    if *rolled_back {
        format!("record insert failed, batch rolled back: {}", message)
    } else {
        format!(
            "record insert failed after the batch was committed; the schema change is in place \
             but unrecorded and the next run will execute it again: {}",
            message
        )
    }
}

impl ApplyFailure {
    /// Convert into the canonical error, attaching the unit name
    pub fn into_ex_error(self, unit: &str) -> ExError {
        let kind = match &self {
            ApplyFailure::Execute(_) => ExErrorKind::UnitApplication,
            ApplyFailure::Record { .. } => ExErrorKind::RecordInsert,
        };
        ExError::new(kind)
            .with_op("apply_unit")
            .with_unit(unit)
            .with_message(self.to_string())
    }
}

/// Store unreachable or credentials rejected
pub fn connection_error(backend: &str, reason: impl std::fmt::Display) -> ExError {
    ExError::new(ExErrorKind::Connection)
        .with_op("connect")
        .with_message(format!("{} connection failed: {}", backend, reason))
}

/// Record table could not be created or read
pub fn record_table_error(table: &str, reason: impl std::fmt::Display) -> ExError {
    ExError::new(ExErrorKind::RecordTable)
        .with_op("record_table")
        .with_message(format!("record table '{}': {}", table, reason))
}

/// Advisory lock already held by another session
pub fn lock_held(table: &str) -> ExError {
    ExError::new(ExErrorKind::Concurrency)
        .with_op("acquire_lock")
        .with_message(format!(
            "another migration run holds the lock for '{}'; retry once it finishes",
            table
        ))
}

/// Recorded checksum differs from the unit's current content
pub fn checksum_mismatch(unit: &str, expected: &str, actual: &str) -> ExError {
    ExError::new(ExErrorKind::ChecksumMismatch)
        .with_op("verify_records")
        .with_unit(unit)
        .with_message(format!(
            "unit changed after it was applied: recorded {}, current {}",
            expected, actual
        ))
}

/// A record exists for a unit the source does not know
pub fn unknown_record(unit: &str) -> ExError {
    ExError::new(ExErrorKind::UnknownRecord)
        .with_op("verify_records")
        .with_unit(unit)
        .with_message("record has no matching migration unit")
}

/// A pending unit sorts before a unit that is already applied
pub fn out_of_order(unit: &str, newest_applied: &str) -> ExError {
    ExError::new(ExErrorKind::OutOfOrder)
        .with_op("verify_records")
        .with_unit(unit)
        .with_message(format!(
            "pending unit sorts before already applied unit {}",
            newest_applied
        ))
}

/// Caller-supplied value rejected
pub fn invalid_input(op: &str, reason: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op(op.to_string())
        .with_message(reason)
}

/// Filesystem failure while reading or writing units
pub fn io_error(operation: &str, path: &std::path::Path, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(format!("{}: {}", path.display(), err))
}
