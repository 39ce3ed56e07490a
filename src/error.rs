use thiserror::Error;

use crate::access::{Operation, Role};
use crate::persistence::{EntityKind, PersistenceError};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("role {role} may not {operation}")]
    Forbidden { role: Role, operation: Operation },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
