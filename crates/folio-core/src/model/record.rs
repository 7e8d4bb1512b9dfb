use chrono::{DateTime, Utc};
use serde::Serialize;

/// Persisted evidence that a unit was applied
///
/// Written once per successfully applied unit and never updated. The
/// checksum is optional because tables created by older tooling have no
/// such column until the first run adds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: Option<String>,
}

/// Where a known unit stands against the record table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitStatus {
    Applied {
        applied_at: DateTime<Utc>,
        /// True when the recorded checksum differs from the unit on disk
        drifted: bool,
    },
    Pending,
}

impl UnitStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, UnitStatus::Applied { .. })
    }
}
