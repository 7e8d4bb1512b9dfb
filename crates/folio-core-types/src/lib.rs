//! Core types shared across Folio facilities
//!
//! This crate provides foundational types used by the error handling,
//! logging and migration layers:
//!
//! - **Correlation**: RequestId, used to tag a single migration run
//! - **Sensitive data**: Sensitive<T> marker for automatic redaction
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::RequestId;
pub use sensitive::Sensitive;
