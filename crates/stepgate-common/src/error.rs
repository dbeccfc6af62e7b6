//! Error types for Stepgate
//!
//! Configuration loading and validation errors shared by every component.

use thiserror::Error;

/// Common result type for Stepgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Stepgate
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error("duplicate provider id: {0}")]
    DuplicateProvider(String),

    #[error("duplicate registered service id: {0}")]
    DuplicateService(u64),

    #[error("provider id must not be empty")]
    EmptyProviderId,

    #[error("invalid pattern for {field}: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
}

impl Error {
    /// Build an [`Error::InvalidPattern`] for the named configuration field
    pub fn invalid_pattern(field: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            field: field.into(),
            source,
        }
    }
}
