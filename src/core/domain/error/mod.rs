use std::backtrace::Backtrace;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// Alias keeps thiserror from generating the nightly-only `Error::provide` impl.
type CapturedBacktrace = Backtrace;

/// Marker used when a process failure is reported together with the server output.
pub const SERVER_LOGS_HEADER: &str = "==== SERVER LOGS ====";

/// The kind of persisted entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Cluster,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Cluster => f.write_str("cluster"),
        }
    }
}

/// The main error type for devbao operations.
///
/// Variants follow the failure classes an operator cares about: invalid local
/// configuration, conflicts with durable state, remote API failures, process
/// failures and inconsistent on-disk records.
#[derive(Error, Debug)]
pub enum DevbaoError {
    /// The administrative endpoint could not be reached or the transport failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The administrative endpoint answered with a failure or an unexpected shape.
    ///
    /// # Fields
    /// * `path` - API path that was requested
    /// * `status` - HTTP status, if a response was received
    /// * `message` - server supplied errors or a parse failure description
    #[error("API error on {path} ({status}): {message}")]
    Api {
        path: String,
        status: u16,
        message: String,
    },

    /// Represents validation failures with detailed context
    ///
    /// # Fields
    /// * `source` - The underlying validation error
    /// * `backtrace` - Stack trace where the error occurred
    #[error("Validation error: {source}")]
    Validation {
        source: ValidationError,
        backtrace: CapturedBacktrace,
    },

    /// The operation would overwrite or contradict existing durable state.
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// On-disk records reference each other inconsistently, or the remote
    /// cluster state contradicts itself.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// A persisted node or cluster record does not exist.
    #[error("{kind} {name} does not exist")]
    NotFound { kind: EntityKind, name: String },

    /// No server binary could be resolved for the requested product.
    #[error("unable to find server binary; tried {}", .candidates.join(", "))]
    BinaryNotFound { candidates: Vec<String> },

    /// The server process could not be spawned.
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The server never accepted connections on its listener.
    #[error("server did not accept connections on {address} within {timeout_ms}ms\n\n==== SERVER LOGS ====\n\n{logs}")]
    ReadinessTimeout {
        address: String,
        timeout_ms: u128,
        logs: String,
    },

    /// The server exited before it became ready.
    #[error("server exited early with {status}\n\n==== SERVER LOGS ====\n\n{logs}")]
    ProcessExited { status: String, logs: String },

    /// The tracked process id does not belong to the expected server binary.
    #[error("process {pid} is not running: {reason}")]
    NotRunning { pid: u32, reason: String },

    /// Delivering a signal to the server process failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// No cluster member reported itself as the active leader.
    #[error("no leader found for cluster {cluster}: [{}]", .errors.join("; "))]
    NoLeader { cluster: String, errors: Vec<String> },

    /// A bounded wait gave up.
    #[error("timed out after {elapsed_ms}ms waiting for {what}{}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Timeout {
        what: String,
        elapsed_ms: u128,
        last_error: Option<String>,
    },

    /// A profile step failed; carries every warning the server returned before it.
    #[error("profile {profile} failed at {step}: {source}{}", format_warnings(.warnings))]
    Profile {
        profile: String,
        step: String,
        warnings: Vec<String>,
        #[source]
        source: Box<DevbaoError>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Wraps another error with a description of what was being attempted.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DevbaoError>,
    },
}

fn format_warnings(warnings: &[String]) -> String {
    if warnings.is_empty() {
        return String::new();
    }
    format!("\nwarnings:\n{}", warnings.join("\n"))
}

impl DevbaoError {
    /// Builds an I/O error bound to the path that was being accessed.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DevbaoError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &DevbaoError {
        match self {
            DevbaoError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if the error, once unwrapped, is a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), DevbaoError::NotFound { .. })
    }
}

impl From<ValidationError> for DevbaoError {
    fn from(error: ValidationError) -> Self {
        DevbaoError::Validation {
            source: error,
            backtrace: Backtrace::capture(),
        }
    }
}

/// Specialized error type for validation failures.
///
/// This enum provides detailed context about why a validation
/// failed, including field-specific errors and format violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Represents a validation failure for a specific field
    ///
    /// # Fields
    /// * `field` - The name of the field that failed validation
    /// * `message` - A detailed message about why validation failed
    #[error("Field '{field}' validation failed: {message}")]
    Field { field: String, message: String },

    /// Represents format/syntax validation failures
    ///
    /// # Fields
    /// * `0` - Description of the format violation
    #[error("Format error: {0}")]
    Format(String),

    /// Represents violations of domain constraints
    ///
    /// # Fields
    /// * `0` - Description of the constraint violation
    #[error("Domain constraint violation: {0}")]
    ConstraintViolation(String),
}

impl ValidationError {
    pub(crate) fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Type alias for Results that may fail with a DevbaoError
pub type DevbaoResult<T> = Result<T, DevbaoError>;

/// Adds "while doing X" context to a failing result.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> DevbaoResult<T>;

    fn with_context<F, C>(self, f: F) -> DevbaoResult<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<DevbaoError>,
{
    fn context(self, context: impl Into<String>) -> DevbaoResult<T> {
        self.map_err(|e| DevbaoError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F, C>(self, f: F) -> DevbaoResult<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| DevbaoError::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}
