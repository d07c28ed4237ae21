//! Error types for the PicoGine engine
//!
//! Three kinds of failure reach the process entry point:
//! - native graphics calls returning a failure status (`ApiCallFailed`)
//! - programming errors such as descriptor exhaustion or out-of-turn frame calls
//!   (`PreconditionViolated`)
//! - backend construction failing to find a usable adapter (`NoSuitableAdapter`)
//!
//! None of them is retried. The frame loop stops and the caller reports the error.

use std::fmt;

use crate::native::HResult;

/// Result type for PicoGine engine operations
pub type PicoResult<T> = std::result::Result<T, PicoError>;

/// Source location an error was raised from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    /// Source file (as given by `file!()`)
    pub file: &'static str,
    /// Source line (as given by `line!()`)
    pub line: u32,
}

impl Origin {
    /// Create an origin from a file and line
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[File] {}\n[Line] {}", self.file, self.line)
    }
}

/// PicoGine engine errors
#[derive(Debug, Clone)]
pub enum PicoError {
    /// A native graphics call returned a failure status
    ApiCallFailed {
        /// The call expression that failed
        call: &'static str,
        /// Status code returned by the native API
        status: HResult,
        /// Where the call was made
        origin: Origin,
    },

    /// A programming error: invalid capacity, exhausted heap, out-of-turn frame call
    PreconditionViolated {
        /// What was violated
        message: String,
        /// Where the violation was detected
        origin: Origin,
    },

    /// No adapter or feature level usable by the requested backend
    NoSuitableAdapter(String),

    /// The GPU stopped making progress (fence wait exceeded the diagnostic timeout)
    DeviceLost(String),

    /// Initialization failed (engine, renderer, subsystems)
    InitializationFailed(String),

    /// Backend-specific error
    BackendError(String),
}

impl PicoError {
    /// Human readable name of the error kind, used as the report title
    pub fn kind_name(&self) -> &'static str {
        match self {
            PicoError::ApiCallFailed { .. } => "Graphics API Exception",
            PicoError::PreconditionViolated { .. } => "Precondition Violation",
            PicoError::NoSuitableAdapter(_) => "Adapter Selection Failure",
            PicoError::DeviceLost(_) => "Device Lost",
            PicoError::InitializationFailed(_) => "Initialization Failure",
            PicoError::BackendError(_) => "Backend Exception",
        }
    }

    /// Source location the error was raised from, when known
    pub fn origin(&self) -> Option<Origin> {
        match self {
            PicoError::ApiCallFailed { origin, .. } => Some(*origin),
            PicoError::PreconditionViolated { origin, .. } => Some(*origin),
            _ => None,
        }
    }

    /// Native status code carried by the error, if any
    pub fn status(&self) -> Option<HResult> {
        match self {
            PicoError::ApiCallFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error is a programming error rather than a runtime failure
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, PicoError::PreconditionViolated { .. })
    }
}

impl fmt::Display for PicoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PicoError::ApiCallFailed { call, status, .. } => {
                write!(f, "Native call `{}` failed: {}", call, status)
            }
            PicoError::PreconditionViolated { message, .. } => {
                write!(f, "Precondition violated: {}", message)
            }
            PicoError::NoSuitableAdapter(msg) => write!(f, "No suitable adapter: {}", msg),
            PicoError::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            PicoError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            PicoError::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for PicoError {}

// ===== ERROR MACROS =====

/// Run a native call and convert a failing status into `PicoError::ApiCallFailed`
///
/// The failure is logged at ERROR severity with the call text and source location.
///
/// # Example
///
/// ```ignore
/// let fence = engine_check!("pico::dx12", device.create_fence(0))?;
/// ```
#[macro_export]
macro_rules! engine_check {
    ($source:expr, $call:expr) => {
        ($call).map_err(|status: $crate::native::HResult| {
            $crate::engine_error!($source, "`{}` failed: {}", stringify!($call), status);
            $crate::pico::PicoError::ApiCallFailed {
                call: stringify!($call),
                status,
                origin: $crate::pico::Origin::new(file!(), line!()),
            }
        })
    };
}

/// Log an ERROR message and build a `PicoError::BackendError` from it
///
/// # Example
///
/// ```ignore
/// let heap = heaps.get(kind).ok_or_else(|| engine_err!("pico::dx12", "No heap for {:?}", kind))?;
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::pico::PicoError::BackendError(message)
    }};
}

/// Log an ERROR message and return early with a `PicoError::BackendError`
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

/// Check a precondition; on failure log it and return `PicoError::PreconditionViolated`
///
/// # Example
///
/// ```ignore
/// engine_ensure!("pico::Renderer", !self.recording, "begin_frame called twice");
/// ```
#[macro_export]
macro_rules! engine_ensure {
    ($source:expr, $cond:expr, $($arg:tt)*) => {
        if !($cond) {
            let message = format!($($arg)*);
            $crate::engine_error!($source, "Precondition violated: {}", message);
            return Err($crate::pico::PicoError::PreconditionViolated {
                message,
                origin: $crate::pico::Origin::new(file!(), line!()),
            });
        }
    };
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
