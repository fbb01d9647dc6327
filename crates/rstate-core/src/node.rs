#![forbid(unsafe_code)]

//! Recursive change tracking for nested objects.
//!
//! With [`StoreConfig::with_recursive`](crate::config::StoreConfig::with_recursive)
//! enabled, every object assigned into the store is *wrapped*: a change
//! function is synthesized for each existing key, depth-first, so consumers
//! can subscribe to nested paths that have never been written.
//!
//! Nested writes go through [`NodeRef::set`] or [`Store::set_path`]. A write
//! to `a.b.c` always succeeds and then dispatches, inside one transaction:
//!
//! 1. `a.b.c`, then `a.b`, then `a`, each with its value read after the write,
//! 2. the aggregate event once, with the full state.
//!
//! Without recursive tracking a nested write still lands in internal state
//! but dispatches nothing.

use serde_json::Value;

use crate::bus::Subscription;
use crate::error::{Result, StoreError};
use crate::path::{StatePath, value_at, value_at_mut};
use crate::store::Store;

impl Store {
    /// Assign `value` at `path`.
    ///
    /// Single-segment paths behave exactly like `update` of that property.
    /// Deeper paths require the parent to be an object.
    pub fn set_path(&self, path: &StatePath, value: Value) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Err(StoreError::RootWrite);
        };
        let Some(leaf) = path.leaf().map(str::to_string) else {
            return Err(StoreError::RootWrite);
        };
        if parent.is_root() {
            self.bus.transaction(|| self.assign_property(leaf, value));
            return Ok(());
        }

        let wrap = value.is_object();
        {
            let mut state = self.state.borrow_mut();
            let node = value_at_mut(&mut state, &parent)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| StoreError::not_an_object(&parent))?;
            node.insert(leaf, value);
        }

        if !self.recursive {
            tracing::trace!(
                message = "store.nested_write",
                store = %self.id,
                path = %path,
                tracked = false
            );
            return Ok(());
        }

        tracing::trace!(
            message = "store.nested_write",
            store = %self.id,
            path = %path,
            tracked = true
        );
        self.bus.transaction(|| {
            self.registry.borrow_mut().ensure_on_did_change(path);
            if wrap {
                self.register_tree(path);
            }
            for prefix in path.ancestors_deepest_first() {
                self.dispatch_path(&prefix);
            }
            self.dispatch_root();
        });
        Ok(())
    }

    /// Handle to the node at `path`.
    #[must_use]
    pub fn node(&self, path: &StatePath) -> NodeRef<'_> {
        NodeRef {
            store: self,
            path: path.clone(),
        }
    }

    /// Handle to a top-level property.
    #[must_use]
    pub fn property(&self, name: &str) -> NodeRef<'_> {
        self.node(&StatePath::new([name]))
    }

    /// Synthesize change functions for every key below `path`, depth-first.
    pub(crate) fn register_tree(&self, path: &StatePath) {
        let children: Vec<(String, bool)> = {
            let state = self.state.borrow();
            match value_at(&state, path).and_then(Value::as_object) {
                Some(map) => map.iter().map(|(k, v)| (k.clone(), v.is_object())).collect(),
                None => return,
            }
        };
        for (key, is_object) in children {
            let child = path.child(key);
            self.registry.borrow_mut().ensure_on_did_change(&child);
            if is_object {
                self.register_tree(&child);
            }
        }
    }
}

/// Write-intercepting view of one node of the store's state.
#[derive(Debug, Clone)]
pub struct NodeRef<'s> {
    store: &'s Store,
    path: StatePath,
}

impl<'s> NodeRef<'s> {
    #[must_use]
    pub fn path(&self) -> &StatePath {
        &self.path
    }

    /// Current value of this node.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.store.get_path(&self.path)
    }

    /// Keys of this node if it is an object.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.store.with_state(|state| {
            value_at(state, &self.path)
                .and_then(Value::as_object)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    #[must_use]
    pub fn child(&self, key: &str) -> NodeRef<'s> {
        NodeRef {
            store: self.store,
            path: self.path.child(key),
        }
    }

    /// Assign `value` under `key` of this node.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.store.set_path(&self.path.child(key), value)
    }

    /// Subscribe to this node's change function.
    pub fn on_did_change(&self, callback: impl Fn(&Value) + 'static) -> Result<Subscription> {
        self.store.on_did_change_at(&self.path, callback)
    }
}
