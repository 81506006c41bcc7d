//! Error types for convergence.
//!
//! Errors are grouped into categories so callers can tell schema bugs
//! (fix the resource implementation) from configuration errors (fix the
//! deployment) from remote conditions (inspect the provider).

use thiserror::Error;

/// Categories of convergence errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Handler graph or key ownership is inconsistent
    Schema,
    /// Declared configuration is missing or malformed
    Configuration,
    /// A desired change needs destructive recreation
    RecreateRequired,
    /// The provider reported a state outside the known set
    UnexpectedState,
    /// The provider no longer knows the resource
    NotFound,
    /// Operation was interrupted or ran out of time
    Interrupted,
    /// Provider, store or serialization failure
    Other,
}

impl ErrorCategory {
    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Schema => "The resource implementation declares inconsistent handlers",
            Self::Configuration => "Fix the resource definition and try again",
            Self::RecreateRequired => "Re-run with recreation allowed to replace the resource",
            Self::UnexpectedState => "Inspect the resource with the provider before retrying",
            Self::NotFound => "The resource was removed outside of this tool",
            Self::Interrupted => "Re-run to resume from the recorded state",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors reported by provider clients.
///
/// `NotFound` is a distinct variant so callers never have to inspect
/// message text to detect a vanished resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The remote object does not exist
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing object
        what: String,
    },

    /// Any other failure reported by the provider API
    #[error("provider API error: {message}")]
    Api {
        /// Message returned by the provider
        message: String,
    },
}

impl ProviderError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors that can occur while planning or converging a resource.
#[derive(Debug, Error)]
pub enum Error {
    /// A desired key is owned by no handler
    #[error("{resource}: configuration key '{key}' is not owned by any handler")]
    UnownedKey { resource: String, key: String },

    /// Two handlers claim the same key
    #[error("configuration key '{key}' is owned by both '{first}' and '{second}'")]
    ConflictingOwnership {
        key: String,
        first: String,
        second: String,
    },

    /// Two handlers share a name
    #[error("handler '{0}' is declared more than once")]
    DuplicateHandler(String),

    /// A handler runs after a handler that was never declared
    #[error("handler '{handler}' runs after unknown handler '{predecessor}'")]
    UnknownPredecessor {
        handler: String,
        predecessor: String,
    },

    /// The `after` relation is cyclic
    #[error("handler dependencies form a cycle through: {}", .handlers.join(", "))]
    Cycle { handlers: Vec<String> },

    /// A required setting is absent
    #[error("{resource}: {message}")]
    MissingSetting { resource: String, message: String },

    /// The desired configuration does not match the resource schema
    #[error("{resource}: invalid configuration: {source}")]
    InvalidConfig {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    /// A change needs the resource to be replaced
    #[error("{resource}: {detail}; allow recreation to replace it")]
    RecreateRequired { resource: String, detail: String },

    /// The provider reported an unknown state
    #[error("{resource} is in an unknown state '{state}'")]
    UnexpectedState { resource: String, state: String },

    /// A `res-<name>` reference could not be resolved
    #[error("cannot resolve '{reference}': {reason}")]
    Unresolved { reference: String, reason: String },

    /// The operation was cancelled
    #[error("waiting for {0} was cancelled")]
    Cancelled(String),

    /// A bounded wait ran out of time
    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    /// Provider client failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Persistent store failure
    #[error("state store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Persisted value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnownedKey { .. }
            | Error::ConflictingOwnership { .. }
            | Error::DuplicateHandler(_)
            | Error::UnknownPredecessor { .. }
            | Error::Cycle { .. } => ErrorCategory::Schema,
            Error::MissingSetting { .. }
            | Error::InvalidConfig { .. }
            | Error::Unresolved { .. } => ErrorCategory::Configuration,
            Error::RecreateRequired { .. } => ErrorCategory::RecreateRequired,
            Error::UnexpectedState { .. } => ErrorCategory::UnexpectedState,
            Error::Provider(e) if e.is_not_found() => ErrorCategory::NotFound,
            Error::Cancelled(_) | Error::Timeout { .. } => ErrorCategory::Interrupted,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this wraps a provider "not found" condition.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Wrap a store backend error.
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Store(Box::new(err))
    }
}

/// Result type for convergence operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_structural() {
        let err: Error = ProviderError::not_found("subnet subnet-1").into();
        assert!(err.is_not_found());
        assert_eq!(err.category(), ErrorCategory::NotFound);

        let err: Error = ProviderError::api("Error 404: Not Found").into();
        assert!(!err.is_not_found());
        assert_eq!(err.category(), ErrorCategory::Other);
    }

    #[test]
    fn test_schema_errors() {
        let err = Error::Cycle {
            handlers: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.category(), ErrorCategory::Schema);
        assert_eq!(
            err.to_string(),
            "handler dependencies form a cycle through: a, b"
        );
    }

    #[test]
    fn test_recreate_message_names_resource() {
        let err = Error::RecreateRequired {
            resource: "web-subnet".into(),
            detail: "subnet subnet-1 definition changed".into(),
        };
        assert!(err.to_string().starts_with("web-subnet:"));
        assert_eq!(err.category(), ErrorCategory::RecreateRequired);
    }
}
