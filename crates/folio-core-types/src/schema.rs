//! Canonical schema constants for structured logging and events
//!
//! These constants keep log field names stable across the workspace.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";

// Migration identifiers
pub const FIELD_UNIT: &str = "unit";
pub const FIELD_OUTCOME: &str = "outcome";

// Error fields
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

// Per-unit outcomes
pub const OUTCOME_APPLIED: &str = "applied";
pub const OUTCOME_SKIPPED: &str = "skipped";
pub const OUTCOME_FAILED: &str = "failed";
