//! Error types for the Strata operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! retry policy is driven by error classification: platform errors carry a
//! `retryable` flag instead of comparing against a shared sentinel value.

use thiserror::Error;

/// Main error type for Strata operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Remote platform call failed
    #[error("platform error during {operation}: {message}")]
    Platform {
        /// The remote operation that failed (e.g., "create space")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether the retry policy should back off and try again
        retryable: bool,
    },

    /// Fatal inconsistency between local and remote state
    ///
    /// Examples: two remote records sharing one owner token, or a record
    /// missing right after a create that should have produced one. Requires
    /// operator intervention; never auto-resolved.
    #[error("inconsistent state for {resource}: {message}")]
    Inconsistent {
        /// Name of the resource in an inconsistent state
        resource: String,
        /// Description of the inconsistency
        message: String,
    },

    /// Configuration error in a spec, annotation, or referenced secret
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// The offending field path, if known
        field: Option<String>,
    },

    /// Credentials or parameter secret could not be used
    #[error("secret {namespace}/{name}: {message}")]
    Secret {
        /// Secret name
        name: String,
        /// Secret namespace
        namespace: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "cache")
        context: String,
    },
}

impl Error {
    /// Create a retryable platform error
    ///
    /// Use for infrastructure failures (network, 5xx) where a later retry
    /// can reasonably be expected to succeed.
    pub fn platform(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable platform error
    pub fn platform_fatal(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a fatal inconsistency error
    pub fn inconsistent(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Inconsistent {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error with a field path
    pub fn config_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a secret error
    pub fn secret(
        name: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Secret {
            name: name.into(),
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: "reconciler".to_string(),
        }
    }

    /// Whether the retry policy should count and retry this error
    ///
    /// Only platform errors explicitly flagged retryable qualify. Everything
    /// else (inconsistency, configuration, kube API errors) is surfaced
    /// directly as an Error condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Platform { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_is_retryable() {
        let err = Error::platform("create instance", "connection reset");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_platform_fatal_is_not_retryable() {
        let err = Error::platform_fatal("create instance", "plan not found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_errors_are_not_retryable() {
        assert!(!Error::config("bad json").is_retryable());
        assert!(!Error::inconsistent("my-instance", "duplicate owner").is_retryable());
        assert!(!Error::internal("oops").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::secret("creds", "prod", "missing key url");
        assert_eq!(err.to_string(), "secret prod/creds: missing key url");
    }
}
