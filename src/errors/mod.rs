//! # Error Handling
//!
//! Error types for the switchyard control-plane compiler.
//!
//! Graph construction and resource translation never surface errors to their
//! callers: failures there are recorded in the status ledger. The error type
//! below covers configuration loading and decoding of the opaque filter
//! configuration strings carried by filter objects.

/// Custom result type for switchyard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the switchyard control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a serialization error with context
    pub fn serialization<S: Into<String>>(context: S, source: serde_yaml::Error) -> Self {
        Self::Serialization { context: context.into(), source }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_build_expected_variants() {
        assert!(matches!(Error::config("bad"), Error::Config(msg) if msg == "bad"));
        assert!(matches!(Error::validation("bad"), Error::Validation(_)));
        assert!(matches!(Error::internal("bad"), Error::Internal(_)));
    }

    #[test]
    fn serialization_error_keeps_context() {
        let source = serde_yaml::from_str::<u32>("not a number").unwrap_err();
        let err = Error::serialization("filter config", source);
        assert!(err.to_string().contains("filter config"));
    }
}
