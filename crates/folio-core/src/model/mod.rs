pub mod checksum;
pub mod record;
pub mod summary;
pub mod unit;

pub use checksum::compute_checksum;
pub use record::{MigrationRecord, UnitStatus};
pub use summary::{RunSummary, UnitOutcome};
pub use unit::{MigrationUnit, NO_TRANSACTION_DIRECTIVE};
