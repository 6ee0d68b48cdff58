//! Error types for feature store operations
//!
//! Errors are tagged by what went wrong rather than where, so callers can
//! decide on recovery by matching the variant:
//!
//! - [`FeatureStoreError::Configuration`]: the request can never succeed against
//!   this store (unmappable type, invalid schema), raised before any backend call
//! - [`FeatureStoreError::Unsupported`]: a dialect was asked for something it
//!   declined to implement
//! - [`FeatureStoreError::Backend`] / [`FeatureStoreError::Sql`]: connection or
//!   statement failures
//! - [`FeatureStoreError::Decoding`]: a feature identity or cell value could not
//!   be converted to its declared type

use thiserror::Error;

/// Errors that can occur during feature store operations
#[derive(Debug, Error)]
pub enum FeatureStoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<FeatureStoreError>,
    },

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl FeatureStoreError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn decoding(msg: impl Into<String>) -> Self {
        Self::Decoding(msg.into())
    }

    pub fn schema_not_found(msg: impl Into<String>) -> Self {
        Self::SchemaNotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }

    /// Wrap this error with the operation that was running when it happened
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through operation context
    pub fn root(&self) -> &FeatureStoreError {
        match self {
            Self::Backend { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), Self::Unsupported(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), Self::Configuration(_))
    }

    pub fn is_decoding(&self) -> bool {
        matches!(self.root(), Self::Decoding(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::SchemaNotFound(_))
    }

    /// Connection and statement failures raised by the backend driver
    pub fn is_backend(&self) -> bool {
        matches!(self.root(), Self::Sql(_) | Self::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, FeatureStoreError>;

/// Attach operation context to backend failures
///
/// Only execution errors are wrapped; configuration, unsupported and decoding
/// errors already say what went wrong and pass through untouched.
pub trait ResultExt<T> {
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            if e.is_backend() {
                e.with_context(context)
            } else {
                e
            }
        })
    }
}
