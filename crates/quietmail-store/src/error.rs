//! Error types for the store.

use std::time::Duration;

use thiserror::Error;

use crate::folder::Folder;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The pooled connection resource could not be created or opened.
    #[error("Connection error for {path}: {source}")]
    Connection {
        /// Storage file the pool was being opened for.
        path: String,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Begin, commit or rollback failed. The transaction has been rolled back.
    #[error("Transaction error ({context}): {source}")]
    Transaction {
        /// Which step failed.
        context: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The transaction ran longer than its timeout and was rolled back.
    #[error("Transaction timeout after {elapsed:.2?} (limit {timeout:.2?})")]
    TransactionTimeout {
        /// Time spent inside the transaction.
        elapsed: Duration,
        /// Configured limit.
        timeout: Duration,
    },

    /// The identifier is absent from the folder.
    #[error("Message {id} not found in {folder}")]
    NotFound {
        /// Requested identifier.
        id: String,
        /// Folder that was searched.
        folder: Folder,
    },

    /// The folder does not support the requested operation.
    #[error("Folder {folder} does not support {operation}")]
    Capability {
        /// Operation that was refused.
        operation: &'static str,
        /// Folder it was requested on.
        folder: Folder,
    },

    /// Malformed query or search parameters. Raised before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for building a validation error.
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true for [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`Error::Validation`].
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true for [`Error::TransactionTimeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TransactionTimeout { .. })
    }

    /// Returns true for [`Error::Capability`].
    #[must_use]
    pub const fn is_capability(&self) -> bool {
        matches!(self, Self::Capability { .. })
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
