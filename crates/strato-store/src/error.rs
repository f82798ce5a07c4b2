//! Store error types.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not find {kind} with id {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("update params for {expected} applied to {actual} app {id}")]
    KindMismatch {
        id: Uuid,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("app {0} already exists")]
    AlreadyExists(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn app_not_found(id: Uuid) -> Self {
        StoreError::NotFound { kind: "app", id }
    }

    pub fn deploy_not_found(id: Uuid) -> Self {
        StoreError::NotFound { kind: "deploy", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
