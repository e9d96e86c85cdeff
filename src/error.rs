use std::time::Duration;

use thiserror::Error;

/// Error type for pgmap operations
#[derive(Debug, Error)]
pub enum PgMapError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Expected {expected} row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Cannot convert {found} to {expected}")]
    InvalidValue { expected: &'static str, found: String },

    #[error("Column {column}: cannot convert {found} to {expected}")]
    ColumnConversion {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Split column `{split_on}` not found for mapped type #{type_index}")]
    SplitOnNotFound { split_on: String, type_index: usize },

    #[error("No more result sets")]
    NoMoreResultSets,

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transaction already finished")]
    TransactionFinished,

    #[error("A transaction is open on this connection; use the transaction instead")]
    TransactionInProgress,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for pgmap operations
pub type Result<T> = std::result::Result<T, PgMapError>;
