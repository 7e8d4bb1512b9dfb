//! Canonical logging macros
//!
//! Every operation boundary in the applicator goes through these so that
//! `component`, `op` and `event` are always present on the emitted event.

/// Log the start of an operation
///
/// # Example
///
/// ```
/// # use folio_core::log_op_start;
/// log_op_start!("migrate_run");
/// log_op_start!("apply_unit", unit = "20240101000000_initial_setup");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::folio_core_types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::folio_core_types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// # Example
///
/// ```
/// # use folio_core::log_op_end;
/// log_op_end!("migrate_run", duration_ms = 42);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::folio_core_types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::folio_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error
///
/// Takes the `ExError` by reference; the caller still owns it and usually
/// returns it right after logging.
///
/// # Example
///
/// ```
/// # use folio_core::log_op_error;
/// # use folio_core::errors::{ExError, ExErrorKind};
/// let err = ExError::new(ExErrorKind::UnitApplication).with_unit("0001_init");
/// log_op_error!("apply_unit", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let ex_err: &$crate::errors::ExError = &$err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::folio_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            message = %ex_err,
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let ex_err: &$crate::errors::ExError = &$err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::folio_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            message = %ex_err,
            $($field)*
        );
    }};
}
