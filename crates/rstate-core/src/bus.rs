#![forbid(unsafe_code)]

//! Named-event bus with RAII subscriptions and transactional batching.
//!
//! # Design
//!
//! [`EventBus`] is a cheaply cloneable handle over `Rc<RefCell<..>>` shared
//! state. It is single-threaded: all dispatch happens synchronously on the
//! caller's stack.
//!
//! Two kinds of listener exist:
//!
//! - **Direct** listeners ([`EventBus::register`]) run on every dispatch to
//!   their event name.
//! - **Batched** listeners ([`EventBus::register_batched`]) watch a primary
//!   name plus related names. Outside a transaction they behave like direct
//!   listeners. Inside a [`EventBus::transaction`] they are marked pending
//!   and fire exactly once when the outermost transaction exits.
//!
//! # Invariants
//!
//! 1. Listeners for one name run in registration order.
//! 2. A listener disposed before or during a dispatch is not invoked again.
//! 3. No `RefCell` borrow is held while a callback runs, so callbacks may
//!    dispatch, register, or dispose re-entrantly.
//! 4. Pending batched listeners flush in registration order, once each.
//!
//! # Failure Modes
//!
//! - **Callback panics inside a transaction**: the depth guard still
//!   unwinds, but pending listeners stay pending until the next outermost
//!   transaction exits.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use serde_json::Value;

use crate::path::EventName;

/// Callback invoked with the dispatched value.
pub type Callback = Rc<dyn Fn(&Value)>;

/// Unique listener identifier within one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    callback: Callback,
    active: Cell<bool>,
}

struct BatchedListener {
    id: ListenerId,
    primary: EventName,
    related: Vec<EventName>,
    callback: Callback,
    active: Cell<bool>,
    /// Value to deliver on flush; `Some` means the listener is pending.
    pending: RefCell<Option<Value>>,
    /// Whether the pending value came from the primary name.
    pending_from_primary: Cell<bool>,
}

impl BatchedListener {
    fn watches(&self, name: &EventName) -> bool {
        self.primary == *name || self.related.iter().any(|r| r == name)
    }

    /// Record a dispatch. Primary values win over related ones.
    fn mark(&self, name: &EventName, value: &Value) {
        let from_primary = self.primary == *name;
        if from_primary || !self.pending_from_primary.get() {
            *self.pending.borrow_mut() = Some(value.clone());
            self.pending_from_primary.set(from_primary);
        }
    }

    fn take_pending(&self) -> Option<Value> {
        self.pending_from_primary.set(false);
        self.pending.borrow_mut().take()
    }
}

#[derive(Default)]
struct BusInner {
    direct: AHashMap<EventName, Vec<Rc<Listener>>>,
    batched: Vec<Rc<BatchedListener>>,
    depth: usize,
    next_id: u64,
    dispatched: u64,
}

impl BusInner {
    fn allocate_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

/// Single-threaded named-event bus.
///
/// Cloning an `EventBus` creates a new handle to the **same** listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventBus")
            .field("names", &inner.direct.len())
            .field("batched", &inner.batched.len())
            .field("depth", &inner.depth)
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a direct listener for `name`.
    ///
    /// If `initial` is given, the callback runs once with it before this
    /// method returns.
    pub fn register(
        &self,
        name: &EventName,
        callback: impl Fn(&Value) + 'static,
        initial: Option<&Value>,
    ) -> Subscription {
        let callback: Callback = Rc::new(callback);
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.allocate_id();
            inner
                .direct
                .entry(name.clone())
                .or_default()
                .push(Rc::new(Listener {
                    id,
                    callback: Rc::clone(&callback),
                    active: Cell::new(true),
                }));
            id
        };
        if let Some(value) = initial {
            callback(value);
        }
        Subscription::new(&self.inner, id, SubscriptionKind::Direct(name.clone()))
    }

    /// Register a batched listener over `primary` plus `related` names.
    ///
    /// If `initial` is given, the callback runs once with it before this
    /// method returns.
    pub fn register_batched(
        &self,
        primary: &EventName,
        related: impl IntoIterator<Item = EventName>,
        callback: impl Fn(&Value) + 'static,
        initial: Option<&Value>,
    ) -> Subscription {
        let callback: Callback = Rc::new(callback);
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.allocate_id();
            inner.batched.push(Rc::new(BatchedListener {
                id,
                primary: primary.clone(),
                related: related.into_iter().filter(|r| r != primary).collect(),
                callback: Rc::clone(&callback),
                active: Cell::new(true),
                pending: RefCell::new(None),
                pending_from_primary: Cell::new(false),
            }));
            id
        };
        if let Some(value) = initial {
            callback(value);
        }
        Subscription::new(&self.inner, id, SubscriptionKind::Batched)
    }

    /// Dispatch `value` to every listener of `name`.
    pub fn dispatch(&self, name: &EventName, value: &Value) {
        let (direct, batched, in_transaction) = {
            let mut inner = self.inner.borrow_mut();
            inner.dispatched += 1;
            let direct = inner.direct.get(name).cloned().unwrap_or_default();
            let batched: Vec<Rc<BatchedListener>> = inner
                .batched
                .iter()
                .filter(|l| l.watches(name))
                .cloned()
                .collect();
            (direct, batched, inner.depth > 0)
        };

        for listener in direct {
            if listener.active.get() {
                (listener.callback)(value);
            }
        }

        for listener in batched {
            if !listener.active.get() {
                continue;
            }
            if in_transaction {
                listener.mark(name, value);
            } else {
                (listener.callback)(value);
            }
        }
    }

    /// Run `f` with batched delivery deferred until the outermost
    /// transaction exits. Nested transactions are supported.
    pub fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        let guard = TransactionGuard::enter(&self.inner);
        let result = f();
        if guard.exit() {
            self.flush_pending();
        }
        result
    }

    /// Whether a transaction is currently open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.borrow().depth > 0
    }

    /// Number of live direct listeners for `name`.
    #[must_use]
    pub fn listener_count(&self, name: &EventName) -> usize {
        self.inner
            .borrow()
            .direct
            .get(name)
            .map_or(0, |listeners| listeners.len())
    }

    /// Number of live batched listeners.
    #[must_use]
    pub fn batched_count(&self) -> usize {
        self.inner.borrow().batched.len()
    }

    /// Total dispatch calls over the bus lifetime.
    #[must_use]
    pub fn dispatch_count(&self) -> u64 {
        self.inner.borrow().dispatched
    }

    fn flush_pending(&self) {
        // Callbacks may dispatch outside any transaction; those run
        // immediately, so a single pass over the snapshot suffices.
        let batched: Vec<Rc<BatchedListener>> = self.inner.borrow().batched.clone();
        let mut fired = 0usize;
        for listener in batched {
            let Some(value) = listener.take_pending() else {
                continue;
            };
            if listener.active.get() {
                fired += 1;
                (listener.callback)(&value);
            }
        }
        tracing::trace!(message = "bus.flush", fired);
    }
}

/// Depth counter that unwinds even if the transaction body panics.
struct TransactionGuard<'a> {
    inner: &'a Rc<RefCell<BusInner>>,
    armed: bool,
}

impl<'a> TransactionGuard<'a> {
    fn enter(inner: &'a Rc<RefCell<BusInner>>) -> Self {
        inner.borrow_mut().depth += 1;
        Self { inner, armed: true }
    }

    /// Leave the transaction, returning whether it was the outermost one.
    fn exit(mut self) -> bool {
        self.armed = false;
        let mut inner = self.inner.borrow_mut();
        inner.depth = inner.depth.saturating_sub(1);
        inner.depth == 0
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.inner.borrow_mut();
            inner.depth = inner.depth.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone)]
enum SubscriptionKind {
    Direct(EventName),
    Batched,
}

/// RAII disposer for a bus registration.
///
/// Dropping the subscription unregisters the listener. Use
/// [`detach`](Subscription::detach) to keep it for the bus lifetime.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    bus: Weak<RefCell<BusInner>>,
    id: ListenerId,
    kind: SubscriptionKind,
    disposed: bool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Subscription {
    fn new(bus: &Rc<RefCell<BusInner>>, id: ListenerId, kind: SubscriptionKind) -> Self {
        Self {
            bus: Rc::downgrade(bus),
            id,
            kind,
            disposed: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Unregister the listener now.
    pub fn dispose(mut self) {
        self.remove();
    }

    /// Keep the listener registered for as long as the bus lives.
    pub fn detach(mut self) {
        self.disposed = true;
    }

    fn remove(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut inner = bus.borrow_mut();
        match &self.kind {
            SubscriptionKind::Direct(name) => {
                if let Some(listeners) = inner.direct.get_mut(name) {
                    listeners.retain(|l| {
                        if l.id == self.id {
                            l.active.set(false);
                            false
                        } else {
                            true
                        }
                    });
                    if listeners.is_empty() {
                        inner.direct.remove(name);
                    }
                }
            }
            SubscriptionKind::Batched => {
                inner.batched.retain(|l| {
                    if l.id == self.id {
                        l.active.set(false);
                        false
                    } else {
                        true
                    }
                });
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl Fn(&Value) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |v: &Value| sink.borrow_mut().push(v.clone()))
    }

    fn name(s: &str) -> EventName {
        EventName::raw(s)
    }

    #[test]
    fn direct_listener_receives_dispatch() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sub = bus.register(&name("a"), cb, None);

        bus.dispatch(&name("a"), &json!(1));
        bus.dispatch(&name("b"), &json!(2));

        assert_eq!(*log.borrow(), vec![json!(1)]);
    }

    #[test]
    fn initial_value_runs_immediately() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sub = bus.register(&name("a"), cb, Some(&json!("now")));
        assert_eq!(*log.borrow(), vec![json!("now")]);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let o2 = Rc::clone(&order);
        let _s1 = bus.register(&name("a"), move |_| o1.borrow_mut().push(1), None);
        let _s2 = bus.register(&name("a"), move |_| o2.borrow_mut().push(2), None);

        bus.dispatch(&name("a"), &Value::Null);
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn dispose_stops_only_that_listener() {
        let bus = EventBus::new();
        let (log_a, cb_a) = recorder();
        let (log_b, cb_b) = recorder();
        let sub_a = bus.register(&name("a"), cb_a, None);
        let _sub_b = bus.register(&name("a"), cb_b, None);

        sub_a.dispose();
        bus.dispatch(&name("a"), &json!(1));

        assert!(log_a.borrow().is_empty());
        assert_eq!(log_b.borrow().len(), 1);
        assert_eq!(bus.listener_count(&name("a")), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        {
            let _sub = bus.register(&name("a"), cb, None);
        }
        bus.dispatch(&name("a"), &json!(1));
        assert!(log.borrow().is_empty());
        assert_eq!(bus.listener_count(&name("a")), 0);
    }

    #[test]
    fn detach_keeps_listener() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        bus.register(&name("a"), cb, None).detach();
        bus.dispatch(&name("a"), &json!(1));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn batched_outside_transaction_fires_each_time() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sub = bus.register_batched(&name("root"), [name("x")], cb, None);

        bus.dispatch(&name("x"), &json!(1));
        bus.dispatch(&name("root"), &json!(2));
        assert_eq!(*log.borrow(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn batched_inside_transaction_fires_once_with_primary_value() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sub = bus.register_batched(&name("root"), [name("x"), name("y")], cb, None);

        bus.transaction(|| {
            bus.dispatch(&name("x"), &json!("x1"));
            bus.dispatch(&name("root"), &json!("r1"));
            bus.dispatch(&name("y"), &json!("y1"));
            bus.dispatch(&name("root"), &json!("r2"));
            bus.dispatch(&name("x"), &json!("x2"));
        });

        assert_eq!(*log.borrow(), vec![json!("r2")]);
    }

    #[test]
    fn batched_related_only_delivers_last_related() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sub = bus.register_batched(&name("root"), [name("x")], cb, None);

        bus.transaction(|| {
            bus.dispatch(&name("x"), &json!(1));
            bus.dispatch(&name("x"), &json!(2));
        });
        assert_eq!(*log.borrow(), vec![json!(2)]);
    }

    #[test]
    fn direct_listeners_are_not_deferred() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sub = bus.register(&name("a"), cb, None);

        bus.transaction(|| {
            bus.dispatch(&name("a"), &json!(1));
            assert_eq!(log.borrow().len(), 1);
        });
    }

    #[test]
    fn nested_transactions_flush_at_outermost() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sub = bus.register_batched(&name("root"), [], cb, None);

        bus.transaction(|| {
            bus.transaction(|| bus.dispatch(&name("root"), &json!(1)));
            assert!(log.borrow().is_empty());
            assert!(bus.in_transaction());
            bus.dispatch(&name("root"), &json!(2));
        });

        assert_eq!(*log.borrow(), vec![json!(2)]);
        assert!(!bus.in_transaction());
    }

    #[test]
    fn transaction_returns_body_result() {
        let bus = EventBus::new();
        assert_eq!(bus.transaction(|| 7), 7);
    }

    #[test]
    fn disposed_during_transaction_does_not_fire() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let sub = bus.register_batched(&name("root"), [], cb, None);

        bus.transaction(|| {
            bus.dispatch(&name("root"), &json!(1));
        });
        assert_eq!(log.borrow().len(), 1);

        let mut sub = Some(sub);
        bus.transaction(|| {
            bus.dispatch(&name("root"), &json!(2));
            if let Some(s) = sub.take() {
                s.dispose();
            }
        });
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn reentrant_dispatch_from_callback() {
        let bus = EventBus::new();
        let (log, cb) = recorder();
        let _sink = bus.register(&name("b"), cb, None);

        let inner_bus = bus.clone();
        let _relay = bus.register(
            &name("a"),
            move |v| inner_bus.dispatch(&EventName::raw("b"), v),
            None,
        );

        bus.dispatch(&name("a"), &json!("relayed"));
        assert_eq!(*log.borrow(), vec![json!("relayed")]);
    }

    #[test]
    fn listener_can_dispose_itself_while_running() {
        let bus = EventBus::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let calls = Rc::new(Cell::new(0));

        let slot_c = Rc::clone(&slot);
        let calls_c = Rc::clone(&calls);
        let sub = bus.register(
            &name("a"),
            move |_| {
                calls_c.set(calls_c.get() + 1);
                if let Some(s) = slot_c.borrow_mut().take() {
                    s.dispose();
                }
            },
            None,
        );
        *slot.borrow_mut() = Some(sub);

        bus.dispatch(&name("a"), &Value::Null);
        bus.dispatch(&name("a"), &Value::Null);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let sub;
        {
            let bus = EventBus::new();
            sub = bus.register(&name("a"), |_| {}, None);
        }
        sub.dispose();
    }

    #[test]
    fn panicking_body_unwinds_depth() {
        let bus = EventBus::new();
        let bus_c = bus.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bus_c.transaction(|| -> u8 { panic!("boom") });
        }));
        assert!(result.is_err());
        assert!(!bus.in_transaction());
    }

    #[test]
    fn dispatch_count_tracks_calls() {
        let bus = EventBus::new();
        bus.dispatch(&name("a"), &Value::Null);
        bus.dispatch(&name("b"), &Value::Null);
        assert_eq!(bus.dispatch_count(), 2);
    }
}
