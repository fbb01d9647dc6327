#![forbid(unsafe_code)]

//! Core: reactive persisted state stores.
//!
//! A [`Store`] holds a JSON-shaped state, reconciles it against a default
//! shape when loading from a [`StateStorage`] backend, and notifies
//! subscribers per property (optionally at any nesting depth) and once per
//! logical update for the aggregate.
//!
//! # Example
//!
//! ```
//! use rstate_core::{MemoryStorage, Store, StoreConfig};
//! use serde_json::json;
//!
//! # fn main() -> rstate_core::Result<()> {
//! let store = Store::new(
//!     StoreConfig::new("settings", json!({"volume": 50})),
//!     MemoryStorage::new(),
//! )?;
//! store.update(json!({"volume": 10}))?;
//! let _sub = store.on_did_change_named("onDidChangeVolume", |v| println!("volume = {v}"))?;
//! assert_eq!(store.get("volume"), Some(json!(10)));
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod node;
pub mod path;
pub mod persist;
pub mod reconcile;
pub mod registry;
pub mod storage;
pub mod store;

pub use bus::{EventBus, ListenerId, Subscription};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use node::NodeRef;
pub use path::{CHANGE_PREFIX, EventName, StatePath};
pub use persist::WriteThrough;
pub use reconcile::{reconcile, reconciled};
pub use registry::{AccessorRegistry, ChangeFn};
pub use storage::{MemoryStorage, StateStorage, StorageError};
pub use store::{InitPhase, Store};
