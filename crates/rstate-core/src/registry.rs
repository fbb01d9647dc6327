#![forbid(unsafe_code)]

//! Lazily populated accessor registry.
//!
//! Two tables grow as the store sees writes:
//!
//! - **Properties**: top-level names with a getter/setter pair, created on
//!   the first `update` that assigns them.
//! - **Change functions**: one per path, keyed by [`StatePath`] and
//!   reachable by its `onDidChange…` label.
//!
//! Entries are created at most once and never removed.

use ahash::AHashMap;

use crate::path::{EventName, StatePath};

/// A synthesized change-registration entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFn {
    pub path: StatePath,
    pub event: EventName,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct AccessorRegistry {
    store_id: String,
    properties: Vec<String>,
    property_index: AHashMap<String, usize>,
    change_fns: AHashMap<StatePath, ChangeFn>,
    /// First path to claim a label keeps it.
    labels: AHashMap<String, StatePath>,
    change_order: Vec<StatePath>,
}

impl AccessorRegistry {
    #[must_use]
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            ..Self::default()
        }
    }

    /// Define the getter/setter pair for a top-level property.
    /// Returns `true` only on first definition.
    pub fn ensure_accessor(&mut self, property: &str) -> bool {
        if self.property_index.contains_key(property) {
            return false;
        }
        self.property_index
            .insert(property.to_string(), self.properties.len());
        self.properties.push(property.to_string());
        tracing::trace!(message = "store.accessor", store = %self.store_id, property);
        true
    }

    /// Define the change function for `path`. Returns `true` only on
    /// first definition.
    pub fn ensure_on_did_change(&mut self, path: &StatePath) -> bool {
        if self.change_fns.contains_key(path) {
            return false;
        }
        let label = path.change_label();
        let change_fn = ChangeFn {
            path: path.clone(),
            event: EventName::for_path(&self.store_id, path),
            label: label.clone(),
        };
        self.labels.entry(label).or_insert_with(|| path.clone());
        self.change_fns.insert(path.clone(), change_fn);
        self.change_order.push(path.clone());
        tracing::trace!(
            message = "store.change_fn",
            store = %self.store_id,
            path = %path
        );
        true
    }

    #[must_use]
    pub fn has_accessor(&self, property: &str) -> bool {
        self.property_index.contains_key(property)
    }

    #[must_use]
    pub fn change_fn(&self, path: &StatePath) -> Option<&ChangeFn> {
        self.change_fns.get(path)
    }

    #[must_use]
    pub fn change_fn_by_label(&self, label: &str) -> Option<&ChangeFn> {
        self.labels.get(label).and_then(|p| self.change_fns.get(p))
    }

    /// Top-level property names in definition order.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Change-function labels in definition order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.change_order
            .iter()
            .filter_map(|p| self.change_fns.get(p))
            .map(|f| f.label.clone())
            .collect()
    }

    /// Event names of every change function in definition order.
    #[must_use]
    pub fn events(&self) -> Vec<EventName> {
        self.change_order
            .iter()
            .filter_map(|p| self.change_fns.get(p))
            .map(|f| f.event.clone())
            .collect()
    }
}
