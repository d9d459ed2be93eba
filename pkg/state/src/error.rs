use thiserror::Error;

/// Errors surfaced by the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{key} not found")]
    NotFound { key: String },

    #[error("{key} already exists")]
    AlreadyExists { key: String },

    /// The object changed since it was read.
    #[error("conflict on {key}: expected resource version {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("state store is closed")]
    Closed,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
