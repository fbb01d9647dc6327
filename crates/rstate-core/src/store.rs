#![forbid(unsafe_code)]

//! The store façade: initialization, partial updates, and change
//! subscriptions.
//!
//! # Lifecycle
//!
//! A [`Store`] starts [`InitPhase::Uninitialized`] with empty internal
//! state. [`Store::init`] reads the backend, reconciles the result against
//! the defaults, applies it through [`Store::update`], and then attaches a
//! [`WriteThrough`] that records the latest aggregate change for the
//! backend. The caller keeps that handle and flushes it.
//!
//! # Dispatch order
//!
//! For each property of an `update`, in the partial's key order:
//!
//! 1. the accessor and change function are synthesized if missing,
//! 2. the value is written into internal state,
//! 3. the property event fires with the new value,
//! 4. the aggregate event fires with the full state.
//!
//! The whole `update` runs inside one bus transaction, so root
//! subscribers registered with [`Store::on_did_change`] observe exactly one
//! call carrying the final state.
//!
//! # Initial run
//!
//! Once the store is initialized, every new change registration is invoked
//! immediately with the current value before it sees any later change.
//!
//! # Concurrency
//!
//! The store is single-threaded (`!Send`). `init` is the only suspension
//! point. Calling `init` more than once double-subscribes the write-through;
//! call it exactly once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::bus::{EventBus, Subscription};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::path::{CHANGE_PREFIX, EventName, StatePath, value_at};
use crate::persist::WriteThrough;
use crate::reconcile::reconcile;
use crate::registry::AccessorRegistry;
use crate::storage::StateStorage;

/// Lifecycle marker gating the initial-run replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitPhase {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
}

/// Reactive store over a JSON-shaped state with persisted backing.
pub struct Store {
    pub(crate) id: String,
    pub(crate) defaults: Value,
    pub(crate) recursive: bool,
    pub(crate) state: RefCell<Value>,
    pub(crate) registry: RefCell<AccessorRegistry>,
    phase: Cell<InitPhase>,
    pub(crate) bus: EventBus,
    storage: Rc<dyn StateStorage>,
    root_event: EventName,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("recursive", &self.recursive)
            .field("phase", &self.phase.get())
            .field("state", &self.state.borrow())
            .finish()
    }
}

impl Store {
    /// Create a store with its own private event bus.
    pub fn new(config: StoreConfig, storage: impl StateStorage + 'static) -> Result<Self> {
        Self::with_bus(config, storage, EventBus::new())
    }

    /// Create a store dispatching on a shared bus.
    pub fn with_bus(
        config: StoreConfig,
        storage: impl StateStorage + 'static,
        bus: EventBus,
    ) -> Result<Self> {
        if !config.default_state.is_object() {
            return Err(StoreError::InvalidDefaults);
        }
        let root_event = EventName::root(&config.id);
        Ok(Self {
            registry: RefCell::new(AccessorRegistry::new(config.id.clone())),
            id: config.id,
            defaults: config.default_state,
            recursive: config.recursive,
            state: RefCell::new(Value::Object(Map::new())),
            phase: Cell::new(InitPhase::Uninitialized),
            bus,
            storage: Rc::new(storage),
            root_event,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn phase(&self) -> InitPhase {
        self.phase.get()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.phase.get() == InitPhase::Initialized
    }

    #[must_use]
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    /// Event name of the aggregate change.
    #[must_use]
    pub fn root_event(&self) -> &EventName {
        &self.root_event
    }

    /// Event name for any path of this store.
    #[must_use]
    pub fn event_name(&self, path: &StatePath) -> EventName {
        EventName::for_path(&self.id, path)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Load, reconcile, and apply persisted state, then attach the
    /// write-through.
    ///
    /// A failed read resets the phase and propagates the error. Dropping
    /// the returned handle stops persistence.
    pub async fn init(&self) -> Result<WriteThrough> {
        if self.phase.get() != InitPhase::Uninitialized {
            tracing::warn!(
                message = "store.init.repeated",
                store = %self.id,
                phase = ?self.phase.get()
            );
        }
        self.phase.set(InitPhase::Initializing);

        let storage = Rc::clone(&self.storage);
        let mut loaded = match storage.read().await {
            Ok(loaded) => loaded,
            Err(err) => {
                self.phase.set(InitPhase::Uninitialized);
                return Err(err.into());
            }
        };
        reconcile(&mut loaded, &self.defaults);
        self.update(loaded)?;
        self.phase.set(InitPhase::Initialized);

        tracing::info!(
            message = "store.init",
            store = %self.id,
            properties = self.registry.borrow().properties().len(),
            recursive = self.recursive
        );
        Ok(WriteThrough::attach(self, storage))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current value of a top-level property.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<Value> {
        self.state.borrow().get(property).cloned()
    }

    /// Current value at any path. The root path returns the full state.
    #[must_use]
    pub fn get_path(&self, path: &StatePath) -> Option<Value> {
        value_at(&self.state.borrow(), path).cloned()
    }

    /// Full state snapshot.
    #[must_use]
    pub fn state(&self) -> Value {
        self.state.borrow().clone()
    }

    /// Borrow the state without cloning.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to the store (re-entrant borrow).
    pub fn with_state<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.state.borrow())
    }

    /// Deserialize the full state into a typed shape.
    pub fn snapshot_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.state())?)
    }

    /// Top-level properties with synthesized accessors, in creation order.
    #[must_use]
    pub fn properties(&self) -> Vec<String> {
        self.registry.borrow().properties().to_vec()
    }

    /// Labels of every synthesized change function, in creation order.
    #[must_use]
    pub fn change_labels(&self) -> Vec<String> {
        self.registry.borrow().labels()
    }

    #[must_use]
    pub fn has_change_fn(&self, path: &StatePath) -> bool {
        self.registry.borrow().change_fn(path).is_some()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Assign every key present in `partial`. Keys absent from `partial`
    /// are untouched; `null` is assigned like any other value.
    pub fn update(&self, partial: Value) -> Result<()> {
        let Value::Object(entries) = partial else {
            return Err(StoreError::not_an_object(&StatePath::root()));
        };
        tracing::debug!(message = "store.update", store = %self.id, keys = entries.len());
        self.bus.transaction(|| {
            for (property, value) in entries {
                self.assign_property(property, value);
            }
        });
        Ok(())
    }

    /// Serialize a typed partial and apply it with [`update`](Self::update).
    pub fn update_from<P: Serialize>(&self, partial: &P) -> Result<()> {
        self.update(serde_json::to_value(partial)?)
    }

    /// The synthesized setter of one top-level property.
    pub(crate) fn assign_property(&self, property: String, value: Value) {
        let path = StatePath::new([property.as_str()]);
        {
            let mut registry = self.registry.borrow_mut();
            registry.ensure_accessor(&property);
            registry.ensure_on_did_change(&path);
        }
        let wrap = self.recursive && value.is_object();
        if let Value::Object(state) = &mut *self.state.borrow_mut() {
            state.insert(property, value);
        }
        self.dispatch_path(&path);
        self.dispatch_root();
        if wrap {
            self.register_tree(&path);
        }
    }

    /// Dispatch the event for `path` with its current value.
    pub(crate) fn dispatch_path(&self, path: &StatePath) {
        let value = self.get_path(path).unwrap_or(Value::Null);
        self.bus.dispatch(&self.event_name(path), &value);
    }

    /// Dispatch the aggregate event with the full state.
    pub(crate) fn dispatch_root(&self) {
        let state = self.state();
        self.bus.dispatch(&self.root_event, &state);
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to the aggregate change.
    ///
    /// Calls are coalesced per `update`: the callback sees one invocation
    /// with the final state. Once initialized, the callback first runs with
    /// the current state.
    pub fn on_did_change(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.subscribe_root(callback, self.is_initialized())
    }

    pub(crate) fn subscribe_root(
        &self,
        callback: impl Fn(&Value) + 'static,
        replay: bool,
    ) -> Subscription {
        let related = self.registry.borrow().events();
        let initial = replay.then(|| self.state());
        self.bus
            .register_batched(&self.root_event, related, callback, initial.as_ref())
    }

    /// Subscribe to one path. The root path is the aggregate change.
    ///
    /// Fails with [`StoreError::UnknownAccessor`] until a change function
    /// has been synthesized for `path`.
    pub fn on_did_change_at(
        &self,
        path: &StatePath,
        callback: impl Fn(&Value) + 'static,
    ) -> Result<Subscription> {
        if path.is_root() {
            return Ok(self.on_did_change(callback));
        }
        let event = self
            .registry
            .borrow()
            .change_fn(path)
            .map(|f| f.event.clone())
            .ok_or_else(|| StoreError::unknown(path.change_label()))?;
        let initial = self
            .is_initialized()
            .then(|| self.get_path(path).unwrap_or(Value::Null));
        Ok(self.bus.register(&event, callback, initial.as_ref()))
    }

    /// Subscribe through a synthesized label such as `onDidChangeVolume`.
    pub fn on_did_change_named(
        &self,
        label: &str,
        callback: impl Fn(&Value) + 'static,
    ) -> Result<Subscription> {
        if label == CHANGE_PREFIX {
            return Ok(self.on_did_change(callback));
        }
        let path = self
            .registry
            .borrow()
            .change_fn_by_label(label)
            .map(|f| f.path.clone())
            .ok_or_else(|| StoreError::unknown(label))?;
        self.on_did_change_at(&path, callback)
    }
}
