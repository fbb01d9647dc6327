#![forbid(unsafe_code)]

//! Persistent storage backends for rstate stores.
//!
//! [`JsonFileStorage`] keeps a store's state as one pretty-printed JSON
//! document on disk.

pub mod file;

pub use file::JsonFileStorage;
