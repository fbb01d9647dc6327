#![forbid(unsafe_code)]

//! Aligning persisted state with the canonical default shape.
//!
//! [`reconcile`] runs two passes over a loaded state:
//!
//! 1. **Fill**: every field present in the defaults but absent from the
//!    loaded state is copied from the defaults. Fields that are objects on
//!    both sides are filled recursively.
//! 2. **Prune**: every field present in the loaded state but absent from the
//!    defaults is deleted, recursing into objects present on both sides.
//!
//! The fill pass completes before pruning starts.
//!
//! # Coercion rules
//!
//! - Where the default is an object and the loaded value is not (a scalar,
//!   an array, or `null`), the loaded value is replaced by the default.
//! - Scalar type mismatches are accepted as-is: a string stored where the
//!   default holds a number survives.
//! - An object where the default is a non-null scalar or an array keeps no
//!   keys: it is pruned to `{}`.
//! - Arrays are opaque. They are never reconciled element-wise.
//! - A `null` default carries no shape; whatever was loaded is kept.
//!
//! # Invariants
//!
//! 1. Idempotent: a second `reconcile` with the same defaults changes nothing.
//! 2. For every object node of the defaults, the corresponding node of the
//!    result is an object with exactly the same key set.

use serde_json::{Map, Value};

/// Reconcile `loaded` against `defaults` in place.
///
/// If `defaults` is not an object there is no shape to enforce and `loaded`
/// is left untouched. If `loaded` is not an object it is replaced by a copy
/// of `defaults`.
pub fn reconcile(loaded: &mut Value, defaults: &Value) {
    let Value::Object(default_map) = defaults else {
        return;
    };
    if !loaded.is_object() {
        *loaded = defaults.clone();
        return;
    }
    if let Value::Object(loaded_map) = loaded {
        fill_missing(loaded_map, default_map);
        prune_extra(loaded_map, default_map);
    }
}

/// Owned convenience wrapper around [`reconcile`].
#[must_use]
pub fn reconciled(mut loaded: Value, defaults: &Value) -> Value {
    reconcile(&mut loaded, defaults);
    loaded
}

fn fill_missing(loaded: &mut Map<String, Value>, defaults: &Map<String, Value>) {
    for (key, default_value) in defaults {
        match loaded.get_mut(key) {
            None => {
                loaded.insert(key.clone(), default_value.clone());
            }
            Some(current) => {
                if let Value::Object(default_child) = default_value {
                    match current {
                        Value::Object(current_child) => fill_missing(current_child, default_child),
                        other => *other = default_value.clone(),
                    }
                }
            }
        }
    }
}

fn prune_extra(loaded: &mut Map<String, Value>, defaults: &Map<String, Value>) {
    loaded.retain(|key, _| defaults.contains_key(key));
    for (key, current) in loaded.iter_mut() {
        match (current, defaults.get(key)) {
            (Value::Object(current_child), Some(Value::Object(default_child))) => {
                prune_extra(current_child, default_child);
            }
            // A non-null scalar default declares no keys.
            (Value::Object(current_child), Some(default_value)) if !default_value.is_null() => {
                current_child.clear();
            }
            _ => {}
        }
    }
}
