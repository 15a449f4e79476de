use std::fmt::Display;

use thiserror::Error;

/// Errors raised by repositories, sessions and stores.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A required read yielded nothing.
    #[error("{message}")]
    NotFound {
        entity: &'static str,
        id: Option<String>,
        message: String,
    },

    /// The repository never registered the requested capability.
    /// `supported` lists the valid sort fields when the request was a sort.
    #[error("{message}")]
    NotImplemented {
        message: String,
        supported: Vec<String>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Row-version mismatch (or duplicate insert) detected at save time.
    #[error("concurrency conflict on {table}:{key} (expected version {expected}, actual {actual})")]
    Conflict {
        table: String,
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Entity model misconfiguration (unknown table or navigation).
    #[error("model error: {0}")]
    Metadata(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: Option<String>) -> Self {
        DefaultErrorFactory.not_found(entity, id)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        DefaultErrorFactory.not_implemented(message.into(), Vec::new())
    }

    pub fn invalid_argument(message: impl Display) -> Self {
        RepositoryError::InvalidArgument(message.to_string())
    }

    pub fn metadata(message: impl Display) -> Self {
        RepositoryError::Metadata(message.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, RepositoryError::NotImplemented { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }
}

/// Produces the domain errors a repository raises, so hosts can reword
/// or localize messages.
pub trait ErrorFactory: Send + Sync {
    fn not_found(&self, entity: &'static str, id: Option<String>) -> RepositoryError;

    fn not_implemented(&self, message: String, supported: Vec<String>) -> RepositoryError;
}

/// English messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorFactory;

impl ErrorFactory for DefaultErrorFactory {
    fn not_found(&self, entity: &'static str, id: Option<String>) -> RepositoryError {
        let message = match &id {
            Some(id) => format!("{} with id {} was not found.", entity, id),
            None => format!("{} was not found.", entity),
        };
        RepositoryError::NotFound {
            entity,
            id,
            message,
        }
    }

    fn not_implemented(&self, message: String, supported: Vec<String>) -> RepositoryError {
        RepositoryError::NotImplemented { message, supported }
    }
}
