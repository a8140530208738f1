use thiserror::Error;

/// Unified error type for datasource construction and queries
#[derive(Error, Debug)]
pub enum DataError {
    /// Malformed or inconsistent datasource definition
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<DataError>>,
    },

    /// Deadline exceeded on a hard-fail call, or the backend failed while
    /// the query was running
    #[error("Query timeout: {message}")]
    Timeout {
        message: String,
        #[source]
        source: Option<Box<DataError>>,
    },

    /// Column is not part of the datasource schema
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Key string cannot be decoded into (column, value) pairs
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Connection to the backend failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed in the backend
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema/introspection error reported by the backend
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Create a configuration error without an underlying cause
    pub fn configuration(msg: impl Into<String>) -> Self {
        DataError::Configuration {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a configuration error wrapping a backend failure
    pub fn configuration_caused_by(msg: impl Into<String>, cause: DataError) -> Self {
        DataError::Configuration {
            message: msg.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a timeout error without an underlying cause
    pub fn timeout(msg: impl Into<String>) -> Self {
        DataError::Timeout {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a timeout error wrapping a backend failure
    pub fn timeout_caused_by(msg: impl Into<String>, cause: DataError) -> Self {
        DataError::Timeout {
            message: msg.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DataError::Timeout { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, DataError::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
