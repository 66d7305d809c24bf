//! Error taxonomy shared by every component (C9, spec §7).
//!
//! `CoreError` is the single error type returned across component
//! boundaries. It pairs a closed [`ErrorKind`] (which fixes severity and
//! recoverability) with a stable string code and a human message, and
//! optionally chains a boxed cause.

use std::fmt;

/// Error kind taxonomy, §7. Severity and recoverability are a function of
/// the kind, not of the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidParameter,
    OutOfMemory,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    InvalidState,
    GuardDenied,
    IntegrityCheckFailed,
    TooLarge,
    ChecksumMismatch,
    ForeignException,
    CapacityExceeded,
    Cancelled,
    Internal,
}

/// Severity level, independent from [`ErrorKind`] so that call sites can
/// still be asserted against in tests without duplicating the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl ErrorKind {
    /// Default severity for this kind, per the table in spec §7.
    pub const fn severity(self) -> Severity {
        use ErrorKind::*;
        match self {
            OutOfMemory | IntegrityCheckFailed | Internal => Severity::Fatal,
            AlreadyExists | GuardDenied => Severity::Warning,
            Cancelled => Severity::Info,
            InvalidParameter
            | NotFound
            | PermissionDenied
            | InvalidState
            | TooLarge
            | ChecksumMismatch
            | ForeignException
            | CapacityExceeded => Severity::Error,
        }
    }

    /// Whether a caller can reasonably retry or route around this error.
    pub const fn recoverable(self) -> bool {
        !matches!(
            self,
            ErrorKind::OutOfMemory | ErrorKind::IntegrityCheckFailed | ErrorKind::Internal
        )
    }

    /// Stable `snake_case` identifier, used as the default `code` when
    /// none more specific is supplied.
    pub const fn default_code(self) -> &'static str {
        use ErrorKind::*;
        match self {
            InvalidParameter => "invalid-parameter",
            OutOfMemory => "out-of-memory",
            NotFound => "not-found",
            AlreadyExists => "already-exists",
            PermissionDenied => "permission-denied",
            InvalidState => "invalid-state",
            GuardDenied => "guard-denied",
            IntegrityCheckFailed => "integrity-check-failed",
            TooLarge => "too-large",
            ChecksumMismatch => "checksum-mismatch",
            ForeignException => "foreign-exception",
            CapacityExceeded => "capacity-exceeded",
            Cancelled => "cancelled",
            Internal => "internal",
        }
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug)]
pub struct CoreError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CoreError {
    /// Construct a new error of `kind`, using the kind's default code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code(),
            message: message.into(),
            source: None,
        }
    }

    /// Construct with a more specific, component-qualified code (e.g.
    /// `"fsm.wrong_state"`) while keeping `kind`'s severity semantics.
    pub fn with_code(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause, producing an error chain readable via
    /// `std::error::Error::source`.
    pub fn caused_by(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.recoverable()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience result alias used throughout the crate.
pub type PolyResult<T> = Result<T, CoreError>;

macro_rules! kind_ctor {
    ($fn_name:ident, $kind:ident) => {
        impl CoreError {
            #[doc = concat!("Shorthand for `CoreError::new(ErrorKind::", stringify!($kind), ", ..)`.")]
            pub fn $fn_name(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        }
    };
}

kind_ctor!(invalid_parameter, InvalidParameter);
kind_ctor!(out_of_memory, OutOfMemory);
kind_ctor!(not_found, NotFound);
kind_ctor!(already_exists, AlreadyExists);
kind_ctor!(permission_denied, PermissionDenied);
kind_ctor!(invalid_state, InvalidState);
kind_ctor!(guard_denied, GuardDenied);
kind_ctor!(integrity_check_failed, IntegrityCheckFailed);
kind_ctor!(too_large, TooLarge);
kind_ctor!(checksum_mismatch, ChecksumMismatch);
kind_ctor!(foreign_exception, ForeignException);
kind_ctor!(capacity_exceeded, CapacityExceeded);
kind_ctor!(cancelled, Cancelled);
kind_ctor!(internal, Internal);

/// An immutable, by-value error record (§3 "Error record"), distinct from
/// [`CoreError`]: this is the lightweight type stored in the C9 error
/// plane and handed to sinks, not the richer chained error returned by
/// fallible calls.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub source: &'static str,
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    pub context: Option<String>,
}

impl ErrorRecord {
    pub fn from_core_error(component: &'static str, err: &CoreError) -> Self {
        Self {
            source: component,
            code: err.code(),
            severity: err.severity(),
            message: err.message().to_string(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}
