//! Migration application
//!
//! Sources yield ordered units; the `Applicator` applies them to a store.

pub mod embedded;
pub mod lock;
pub mod runner;
pub mod source;

pub use embedded::EmbeddedSource;
pub use lock::lock_key;
pub use runner::{next_timestamp, Applicator, ApplyOptions, StatusReport, UnitReport};
pub use source::{order_units, scaffold_unit, DirectorySource, UnitSource};
