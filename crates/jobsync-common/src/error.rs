//! Error types for jobsync
//!
//! Errors are structured with fields to aid debugging in production.
//! Kubernetes API failures keep the underlying kube-rs error so callers can
//! tell a missing object (404) or an existing one (409) apart from every
//! other failure.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for jobsync operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document or resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Job configuration could not be loaded
    #[error("job config error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },

    /// Framework document is structurally unusable
    #[error("invalid snapshot for {framework}: {message}")]
    InvalidSnapshot {
        /// Name of the framework, if it could be read
        framework: String,
        /// Description of what's invalid
        message: String,
    },

    /// An operation was called on a framework in the wrong state
    #[error("precondition failed for {framework}: {message}")]
    Precondition {
        /// Name of the framework
        framework: String,
        /// Description of the violated precondition
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "reconciler")
        context: String,
    },
}

impl Error {
    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a job config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid snapshot error without a known framework name
    pub fn invalid_snapshot(msg: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            framework: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create an invalid snapshot error for a named framework
    pub fn invalid_snapshot_for(framework: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            framework: framework.into(),
            message: msg.into(),
        }
    }

    /// Create a precondition error for a named framework
    pub fn precondition(framework: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Precondition {
            framework: framework.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code returned by the API server, if this is an API error
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// The target object does not exist (404)
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// The object being created already exists (409)
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Check if this error is retryable
    ///
    /// The reconciler never retries on its own; this only informs the
    /// caller's polling schedule.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::InvalidSnapshot { .. } => false,
            Error::Precondition { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the framework name if this error is associated with one
    pub fn framework(&self) -> Option<&str> {
        match self {
            Error::InvalidSnapshot { framework, .. } | Error::Precondition { framework, .. } => {
                Some(framework)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::config(e.to_string())
    }
}
