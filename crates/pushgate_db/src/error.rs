//! Error types for the stores

use pushgate_common::{persistence_error, CredentialError, GatewayError};
use thiserror::Error;

/// Errors that can occur when working with the stores
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from SQLx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Error with the database configuration
    #[error("Database configuration error: {0}")]
    ConfigError(String),

    /// Error with database pool creation
    #[error("Database pool error: {0}")]
    PoolError(String),

    /// Error with database query
    #[error("Database query error: {0}")]
    QueryError(String),

    /// A stored column could not be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// A project credential failed validation and was not persisted
    #[error("Invalid credential: {0}")]
    InvalidCredential(#[from] CredentialError),
}

impl From<DbError> for GatewayError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidCredential(e) => GatewayError::Validation(e.to_string()),
            other => persistence_error(other),
        }
    }
}
