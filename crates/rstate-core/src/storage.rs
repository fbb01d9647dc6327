#![forbid(unsafe_code)]

//! Persistence backend contract and an in-memory implementation.
//!
//! Backends own serialization. The store only hands them JSON trees and
//! never retries a failed call.

use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Backend { message: String },
}

impl StorageError {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Asynchronous persisted backing for a store.
///
/// Implementations are single-threaded like the store itself, so the
/// returned futures are not required to be `Send`.
#[async_trait(?Send)]
pub trait StateStorage {
    /// Load the persisted state. A backend with nothing stored yet should
    /// return an empty object so reconciliation backfills every default.
    async fn read(&self) -> Result<Value, StorageError>;

    /// Persist a full state snapshot.
    async fn write(&self, state: &Value) -> Result<(), StorageError>;
}

/// Volatile storage kept in memory.
///
/// Records every written snapshot and can be primed to fail its next read
/// or write.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    current: RefCell<Option<Value>>,
    writes: RefCell<Vec<Value>>,
    reads: Cell<usize>,
    fail_next_read: RefCell<Option<String>>,
    fail_next_write: RefCell<Option<String>>,
}

impl MemoryStorage {
    /// Empty storage; the first read yields `{}`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `state`.
    #[must_use]
    pub fn with_state(state: Value) -> Self {
        Self {
            current: RefCell::new(Some(state)),
            ..Self::default()
        }
    }

    /// Make the next `read` fail with `message`.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        *self.fail_next_read.borrow_mut() = Some(message.into());
    }

    /// Make the next `write` fail with `message`.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        *self.fail_next_write.borrow_mut() = Some(message.into());
    }

    /// Last persisted state, if any.
    #[must_use]
    pub fn current(&self) -> Option<Value> {
        self.current.borrow().clone()
    }

    /// Every snapshot written, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<Value> {
        self.writes.borrow().clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.get()
    }
}

#[async_trait(?Send)]
impl StateStorage for MemoryStorage {
    async fn read(&self) -> Result<Value, StorageError> {
        self.reads.set(self.reads.get() + 1);
        if let Some(message) = self.fail_next_read.borrow_mut().take() {
            return Err(StorageError::backend(message));
        }
        Ok(self
            .current
            .borrow()
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    async fn write(&self, state: &Value) -> Result<(), StorageError> {
        if let Some(message) = self.fail_next_write.borrow_mut().take() {
            return Err(StorageError::backend(message));
        }
        *self.current.borrow_mut() = Some(state.clone());
        self.writes.borrow_mut().push(state.clone());
        Ok(())
    }
}

#[async_trait(?Send)]
impl<S: StateStorage + ?Sized> StateStorage for std::rc::Rc<S> {
    async fn read(&self) -> Result<Value, StorageError> {
        (**self).read().await
    }

    async fn write(&self, state: &Value) -> Result<(), StorageError> {
        (**self).write(state).await
    }
}
