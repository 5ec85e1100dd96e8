//! Error types for tabula
//!
//! Provides granular error classification for proper retry handling:
//! - Transient errors (connection, timeout, deadlock)
//! - Non-transient errors (configuration, mapping, constraint violations)

use std::fmt;
use thiserror::Error;

/// Result type for tabula operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (transient)
    Connection,
    /// Query execution errors
    Query,
    /// Scope or transaction state misuse
    State,
    /// Constraint violation (not transient, but recoverable in upsert flows)
    Constraint,
    /// Row-to-record mapping or value conversion errors (not transient)
    Mapping,
    /// Table/column metadata errors (not transient)
    Metadata,
    /// Parameter substitution errors (not transient)
    Parameter,
    /// Timeout errors (transient)
    Timeout,
    /// Deadlock detected (transient)
    Deadlock,
    /// Configuration error
    Configuration,
    /// Data-layer operation gave up (e.g. exhausted insert-or-update)
    Data,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally transient
    #[inline]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::Deadlock)
    }
}

/// Main error type for tabula
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed or was dropped
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Scope/transaction state misuse (nesting, disposal order, isolation)
    #[error("invalid scope state: {message}")]
    State { message: String },

    /// Constraint violation (PK, FK, unique, check)
    #[error("constraint violation: {constraint_name} - {message}")]
    Constraint {
        constraint_name: String,
        message: String,
    },

    /// Row-to-record mapping or value conversion failed
    #[error("mapping error: {message}")]
    Mapping { message: String },

    /// Table/column metadata rejected (missing descriptor, bad attribute set)
    #[error("metadata error: {message}")]
    Metadata { message: String },

    /// Parameter marker could not be resolved against the supplied arguments
    #[error("parameter error: {message}")]
    Parameter { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Deadlock detected
    #[error("deadlock detected")]
    Deadlock,

    /// Configuration error (bad connection string, unknown dialect)
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Data-layer operation gave up after bounded recovery
    #[error("data error: {message}")]
    Data { message: String },

    /// Unsupported operation for this dialect or driver
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::State { .. } => ErrorCategory::State,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::Mapping { .. } => ErrorCategory::Mapping,
            Self::Metadata { .. } => ErrorCategory::Metadata,
            Self::Parameter { .. } => ErrorCategory::Parameter,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Deadlock => ErrorCategory::Deadlock,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Data { .. } => ErrorCategory::Data,
            Self::Unsupported { .. } | Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient (a retry may succeed)
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.category().is_transient()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error carrying the offending SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a query error with SQL and source
    pub fn query_with_source(
        message: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a scope state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create a constraint violation error
    pub fn constraint(constraint_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            constraint_name: constraint_name.into(),
            message: message.into(),
        }
    }

    /// Create a mapping error
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Create a metadata error
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Create a parameter substitution error
    pub fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a data-layer error
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::State => write!(f, "state"),
            Self::Constraint => write!(f, "constraint"),
            Self::Mapping => write!(f, "mapping"),
            Self::Metadata => write!(f, "metadata"),
            Self::Parameter => write!(f, "parameter"),
            Self::Timeout => write!(f, "timeout"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::Configuration => write!(f, "configuration"),
            Self::Data => write!(f, "data"),
            Self::Other => write!(f, "other"),
        }
    }
}
