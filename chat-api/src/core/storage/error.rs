//! Error taxonomy shared by every storage backend

use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Missing, or owned by someone else
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The record store and the content store disagree
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Timeout or unavailable backend; safe to retry
    #[error("Store unavailable: {0}")]
    Transient(String),

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    #[cfg(test)]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn backend_error(err: impl Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Transient(err.to_string())
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        match &err {
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
                StoreError::Transient(err.to_string())
            },
            neo4rs::Error::Neo4j(server) => match server.kind() {
                neo4rs::Neo4jErrorKind::Transient
                | neo4rs::Neo4jErrorKind::Client(neo4rs::Neo4jClientErrorKind::SessionExpired) => {
                    StoreError::Transient(err.to_string())
                },
                _ if server.code() == "Neo.ClientError.Schema.ConstraintValidationFailed" => {
                    StoreError::Conflict(server.message().to_string())
                },
                _ => StoreError::Backend(err.to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}
