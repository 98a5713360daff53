//! Error types for the landing zone provisioner.
//!
//! Errors are grouped by the phase that raises them: configuration loading and
//! flattening, graph assembly and planning, cloud calls, the apply run as a
//! whole, and ledger persistence. Configuration and graph errors abort a run
//! before any cloud mutation happens.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the landing zone provisioner.
#[derive(Debug, Error)]
pub enum LandingZoneError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Graph assembly and planning errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Cloud control-plane errors.
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Apply run errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Ledger persistence errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Two entries produced the same derived key.
    #[error("Conflicting {kind} key '{key}': defined by {first} and {second}")]
    ConfigConflict {
        /// Kind of resource the key belongs to.
        kind: String,
        /// The colliding key.
        key: String,
        /// Source of the first definition.
        first: String,
        /// Source of the second definition.
        second: String,
    },

    /// A required field is absent.
    #[error("Missing required field '{field}' in {entry}")]
    MissingField {
        /// Entry that lacks the field.
        entry: String,
        /// Name of the missing field.
        field: String,
    },
}

/// Graph assembly and planning errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {cycle}")]
    GraphCycle {
        /// The cycle, rendered as `a -> b -> a`.
        cycle: String,
    },

    /// A node depends on a key that is not in the graph.
    #[error("Unsatisfiable dependency: '{referrer}' depends on missing '{missing}'")]
    UnsatisfiableGraph {
        /// The dependency that does not exist.
        missing: String,
        /// The node that references it.
        referrer: String,
    },
}

/// Cloud control-plane errors.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Request throttled by the control plane.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// A just-created parent is not visible yet.
    #[error("Resource not found yet: {resource}")]
    NotFoundYet {
        /// The resource that could not be found.
        resource: String,
    },

    /// Network error talking to the control plane.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Server-side failure (5xx).
    #[error("Control plane unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Request denied by policy or authorization.
    #[error("Policy error: {message}")]
    Policy {
        /// Description of the denial.
        message: String,
    },

    /// Request rejected as invalid (bad CIDR, duplicate alias, ...).
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The response could not be understood.
    #[error("Invalid response from control plane: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Apply run errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// At least one node failed.
    #[error(
        "Partial apply: {} failed [{}], {} skipped [{}], {} succeeded",
        failed.len(),
        failed.join(", "),
        skipped.len(),
        skipped.join(", "),
        succeeded.len()
    )]
    PartialApply {
        /// Keys of nodes that failed.
        failed: Vec<String>,
        /// Keys of nodes that were skipped.
        skipped: Vec<String>,
        /// Keys of nodes that reached `Applied`.
        succeeded: Vec<String>,
    },

    /// A node's required input was not produced by its dependency.
    #[error("Unresolved reference for {node}: {reference}")]
    UnresolvedReference {
        /// Node that needed the reference.
        node: String,
        /// Description of the missing reference.
        reference: String,
    },
}

/// Ledger persistence errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Ledger is corrupted.
    #[error("Ledger is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Ledger lock acquisition failed.
    #[error("Failed to acquire ledger lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Ledger lock is held by another process.
    #[error("Ledger is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Writing the ledger failed.
    #[error("Failed to write ledger: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("Ledger serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Result type alias for landing zone operations.
pub type Result<T> = std::result::Result<T, LandingZoneError>;

impl LandingZoneError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a missing-field error.
    #[must_use]
    pub fn missing(entry: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            entry: entry.into(),
            field: field.into(),
        }
    }
}

impl CloudError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a policy error.
    #[must_use]
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy {
            message: message.into(),
        }
    }

    /// Returns true if the error is transient and the call may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::NotFoundYet { .. }
                | Self::Network { .. }
                | Self::Unavailable { .. }
        )
    }

    /// Returns the delay the server asked for, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}
