use crate::errors::{ExError, ExErrorKind, Result};
use crate::model::checksum::compute_checksum;

/// Leading comment that opts a unit out of the per-unit transaction
///
/// Needed for statements Postgres refuses to run inside a transaction block,
/// such as `CREATE INDEX CONCURRENTLY`.
pub const NO_TRANSACTION_DIRECTIVE: &str = "-- folio:no-transaction";

/// A named, ordered, immutable batch of schema change statements
///
/// Units are ordered by `name` using plain byte-wise string ordering, which
/// is why the convention is a fixed-width timestamp prefix
/// (`20240101000000_initial_setup`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    name: String,
    content: String,
    checksum: String,
    transactional: bool,
}

impl MigrationUnit {
    /// Build a unit, computing its checksum and transaction mode
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the name is empty or contains whitespace.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("migration_unit")
                .with_message("migration unit name must not be empty"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("migration_unit")
                .with_unit(name.clone())
                .with_message("migration unit name must not contain whitespace"));
        }

        let content = content.into();
        let checksum = compute_checksum(&content);
        let transactional = !has_no_transaction_directive(&content);

        Ok(Self {
            name,
            content,
            checksum,
            transactional,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Whether the batch and its record insert share one transaction
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }
}

fn has_no_transaction_directive(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line == NO_TRANSACTION_DIRECTIVE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_unit_is_transactional_by_default() {
        let unit = MigrationUnit::new("0001_init", "CREATE TABLE t (id INT);").unwrap();
        assert!(unit.is_transactional());
        assert_eq!(unit.checksum().len(), 64);
    }

    #[test]
    fn test_no_transaction_directive_on_first_line() {
        let unit = MigrationUnit::new(
            "0002_index",
            "\n  -- folio:no-transaction\nCREATE INDEX CONCURRENTLY idx ON t (id);",
        )
        .unwrap();
        assert!(!unit.is_transactional());
    }

    #[test]
    fn test_directive_later_in_body_is_ignored() {
        let unit = MigrationUnit::new(
            "0002_index",
            "CREATE TABLE t (id INT);\n-- folio:no-transaction\n",
        )
        .unwrap();
        assert!(unit.is_transactional());
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = MigrationUnit::new("", "SELECT 1").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[test]
    fn test_whitespace_name_rejected() {
        let err = MigrationUnit::new("0001 init", "SELECT 1").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }
}
