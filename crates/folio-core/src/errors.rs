/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure a migration run can surface maps to exactly one kind, and
/// each kind maps to a stable code that operators and tests can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Store access
    /// Target store unreachable or credentials rejected
    Connection,
    /// Record-keeping table cannot be created or read
    RecordTable,

    // Unit application
    /// A unit's statement batch failed
    UnitApplication,
    /// A unit ran but its record could not be written
    RecordInsert,

    // Run guards
    /// Another run holds the migration lock
    Concurrency,
    ChecksumMismatch,
    UnknownRecord,
    OutOfOrder,

    // Input/Setup
    InvalidInput,
    Config,
    Io,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Connection => "ERR_CONNECTION",
            ExErrorKind::RecordTable => "ERR_RECORD_TABLE",
            ExErrorKind::UnitApplication => "ERR_UNIT_APPLICATION",
            ExErrorKind::RecordInsert => "ERR_RECORD_INSERT",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::ChecksumMismatch => "ERR_CHECKSUM_MISMATCH",
            ExErrorKind::UnknownRecord => "ERR_UNKNOWN_RECORD",
            ExErrorKind::OutOfOrder => "ERR_OUT_OF_ORDER",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries the classification used for programmatic handling plus the
/// context an operator needs to fix a failed run: which operation, which
/// unit, and the driver's message verbatim.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    unit: Option<String>,
    message: String,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            unit: None,
            message: String::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add migration unit context
    pub fn with_unit(mut self, name: impl Into<String>) -> Self {
        self.unit = Some(name.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the migration unit name, if any
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(unit) = &self.unit {
            write!(f, " (unit: {})", unit)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========
