//! Core Error Types
//!
//! Defines the error type shared by every Gatework crate. The set is kept
//! dependency-free (only thiserror + std + serde_json) so the core crate stays
//! lightweight.
//!
//! Besides describing failures, `CoreError` owns the transient/permanent
//! classification the execution engine uses to decide whether a failed gate
//! gets its single retry.

use thiserror::Error;

/// Core error type for the Gatework workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid gate definition or pipeline option (duplicate name, unknown
    /// dependency, out-of-range setting).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The gate dependency graph contains a cycle through the listed gates.
    #[error("Dependency cycle detected among gates: {}", .gates.join(", "))]
    CycleDetected { gates: Vec<String> },

    /// A gate's dependency produced no usable result.
    #[error("Gate '{gate}' skipped: dependency '{dependency}' has no result")]
    DependencyUnmet { gate: String, dependency: String },

    /// A gate exceeded its deadline.
    #[error("Gate '{gate}' timed out after {timeout_ms}ms")]
    Timeout { gate: String, timeout_ms: u64 },

    /// Error raised by a validator implementation.
    #[error("Validator error in gate '{gate}': {message}")]
    Validator { gate: String, message: String },

    /// Result cache read/write failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

/// Message fragments that mark a validator error as worth one retry.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "temporar",
    "unavailable",
    "connection reset",
    "econnreset",
    "try again",
];

impl CoreError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a validator error for a gate
    pub fn validator(gate: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validator {
            gate: gate.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error for a gate
    pub fn timeout(gate: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            gate: gate.into(),
            timeout_ms,
        }
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry of the failed operation is likely to succeed.
    ///
    /// Timeouts are always transient. I/O errors are transient for
    /// connection-level and interruption kinds. Validator errors are
    /// classified by message markers. Everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::Timeout { .. } => true,
            CoreError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            CoreError::Validator { message, .. } => {
                let lowered = message.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m))
            }
            _ => false,
        }
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
