//! Structured logging facility for Folio
//!
//! This module provides:
//! - Single initialization point via `init(profile)`
//! - Structured logging macros (`log_op_start!`, `log_op_end!`, `log_op_error!`)
//! - Test capture mode for asserting on per-unit migration events
//!
//! # Usage
//!
//! ```rust
//! use folio_core::logging_facility::{init, Profile};
//!
//! // Initialize once at process startup
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
