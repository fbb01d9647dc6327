#![forbid(unsafe_code)]

use thiserror::Error;

use crate::path::StatePath;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("default state must be a JSON object")]
    InvalidDefaults,

    #[error("value at {path} is not an object")]
    NotAnObject { path: StatePath },

    #[error("the root path cannot be assigned; use update")]
    RootWrite,

    #[error("no change function named {name}")]
    UnknownAccessor { name: String },
}

impl StoreError {
    #[must_use]
    pub fn not_an_object(path: &StatePath) -> Self {
        Self::NotAnObject { path: path.clone() }
    }

    #[must_use]
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownAccessor { name: name.into() }
    }
}
