#![forbid(unsafe_code)]

//! rstate public facade crate.
//!
//! Re-exports the store core and, with the `file-storage` feature, the
//! on-disk JSON backend.

pub use rstate_core::*;

#[cfg(feature = "file-storage")]
pub use rstate_storage::JsonFileStorage;

pub mod prelude {
    pub use rstate_core as core;
    #[cfg(feature = "file-storage")]
    pub use rstate_storage as storage;

    pub use rstate_core::{
        MemoryStorage, StatePath, StateStorage, Store, StoreConfig, StoreError, Subscription,
        WriteThrough,
    };
    #[cfg(feature = "file-storage")]
    pub use rstate_storage::JsonFileStorage;
}
