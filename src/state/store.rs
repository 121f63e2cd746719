//! Keyed state store.
//!
//! The [`Store`] holds named state slices, each managed exclusively by a pure
//! reducer. Every dispatched action flows through the middleware chain, then
//! through every registered reducer; subscribers of each reduced slice are
//! notified `(new, old)` under the copy-before-notify rule.
//!
//! The store performs no equality suppression: a reducer returning an
//! unchanged value still notifies. Minimal-update suppression is the diff
//! engine's responsibility one layer up.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use super::observable::Subscription;
use crate::persist::Storage;
use crate::types::Value;

// =============================================================================
// Actions, reducers, middleware
// =============================================================================

/// A dispatched state-change description.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: String,
    pub payload: Value,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }
}

/// Pure `(state, action) -> state` function for one slice.
pub type Reducer = Arc<dyn Fn(&Value, &Action) -> Value + Send + Sync>;

/// Interceptor stage: may inspect, transform, or short-circuit an action by
/// deciding whether (and with what) to call `next`.
pub type Middleware = Arc<dyn Fn(&Store, Action, &mut dyn FnMut(Action)) + Send + Sync>;

type SliceCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

// =============================================================================
// Store
// =============================================================================

struct Inner {
    slices: IndexMap<String, Value>,
    reducers: IndexMap<String, Reducer>,
    subscribers: IndexMap<String, Vec<(u64, SliceCallback)>>,
    middleware: Vec<Middleware>,
    next_id: u64,
}

/// Keyed collection of reducer-managed state slices.
///
/// Cloning shares the same store. Long-lived, like [`Observable`]:
/// created once at setup, reclaimed when unreferenced.
///
/// [`Observable`]: super::observable::Observable
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slices: IndexMap::new(),
                reducers: IndexMap::new(),
                subscribers: IndexMap::new(),
                middleware: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a reducer for a slice, seeding its initial state.
    pub fn add_reducer(
        &self,
        key: impl Into<String>,
        initial: Value,
        reducer: impl Fn(&Value, &Action) -> Value + Send + Sync + 'static,
    ) {
        let key = key.into();
        let mut inner = self.inner.lock();
        inner.slices.insert(key.clone(), initial);
        inner.reducers.insert(key, Arc::new(reducer));
    }

    /// Append a middleware stage. Stages run in registration order.
    pub fn add_middleware(&self, middleware: Middleware) {
        self.inner.lock().middleware.push(middleware);
    }

    /// Current state of one slice.
    pub fn state(&self, key: &str) -> Option<Value> {
        self.inner.lock().slices.get(key).cloned()
    }

    /// Copy of the entire slice map.
    pub fn all_state(&self) -> IndexMap<String, Value> {
        self.inner.lock().slices.clone()
    }

    /// Subscribe to one slice's changes, notified `(new, old)`.
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        cb: impl Fn(&Value, &Value) + Send + Sync + 'static,
    ) -> Subscription {
        let key = key.into();
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .subscribers
                .entry(key.clone())
                .or_default()
                .push((id, Arc::new(cb)));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(subs) = inner.lock().subscribers.get_mut(&key) {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                }
            }
        })
    }

    /// Dispatch an action through the middleware chain, then through every
    /// registered reducer. A slice with no reducer is untouched; an action
    /// nothing reduces is a silent no-op.
    pub fn dispatch(&self, action: Action) {
        debug!(kind = %action.kind, "dispatch");
        let chain: Vec<Middleware> = self.inner.lock().middleware.clone();
        self.run_chain(&chain, 0, action);
    }

    fn run_chain(&self, chain: &[Middleware], index: usize, action: Action) {
        match chain.get(index) {
            Some(stage) => {
                let stage = stage.clone();
                stage(self, action, &mut |next_action| {
                    self.run_chain(chain, index + 1, next_action);
                });
            }
            None => self.reduce(action),
        }
    }

    fn reduce(&self, action: Action) {
        // Reducers are pure functions, safe to run in the critical section;
        // subscribers are invoked only after the lock is released.
        let notifications = {
            let mut inner = self.inner.lock();
            let keys: Vec<String> = inner.reducers.keys().cloned().collect();
            let mut notifications: Vec<(Value, Value, Vec<SliceCallback>)> = Vec::new();
            for key in keys {
                let reducer = inner.reducers[&key].clone();
                let old = inner.slices.get(&key).cloned().unwrap_or(Value::Null);
                let new = reducer(&old, &action);
                inner.slices.insert(key.clone(), new.clone());
                let subscribers = inner
                    .subscribers
                    .get(&key)
                    .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                    .unwrap_or_default();
                notifications.push((old, new, subscribers));
            }
            notifications
        };

        for (old, new, subscribers) in &notifications {
            for cb in subscribers {
                cb(new, old);
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("slices", &inner.slices.keys().collect::<Vec<_>>())
            .field("middleware", &inner.middleware.len())
            .finish()
    }
}

// =============================================================================
// Built-in middleware
// =============================================================================

/// Log every action and the slice keys it touched.
pub fn logger() -> Middleware {
    Arc::new(|store: &Store, action: Action, next: &mut dyn FnMut(Action)| {
        let kind = action.kind.clone();
        next(action);
        debug!(kind = %kind, slices = ?store.all_state().keys().collect::<Vec<_>>(), "reduced");
    })
}

/// Save the named slices after every reduction.
pub fn persist(storage: Arc<dyn Storage + Send + Sync>, keys: Vec<String>) -> Middleware {
    Arc::new(move |store: &Store, action: Action, next: &mut dyn FnMut(Action)| {
        next(action);
        for key in &keys {
            if let Some(state) = store.state(key) {
                if let Err(err) = storage.save(key, &state) {
                    tracing::warn!(%key, %err, "slice persistence failed");
                }
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStorage;

    fn counter_reducer(state: &Value, action: &Action) -> Value {
        let current = state.as_num().unwrap_or(0.0);
        match action.kind.as_str() {
            "increment" => Value::Num(current + 1.0),
            "add" => Value::Num(current + action.payload.as_num().unwrap_or(0.0)),
            _ => state.clone(),
        }
    }

    #[test]
    fn test_dispatch_reduces_slice() {
        let store = Store::new();
        store.add_reducer("counter", Value::Num(0.0), counter_reducer);

        store.dispatch(Action::new("increment"));
        store.dispatch(Action::with_payload("add", 4));
        assert_eq!(store.state("counter"), Some(Value::Num(5.0)));
    }

    #[test]
    fn test_slice_isolation() {
        let store = Store::new();
        store.add_reducer("a", Value::Num(0.0), counter_reducer);
        store.add_reducer("b", Value::Str("untouched".into()), |state, action| {
            // A reducer only ever sees its own slice.
            assert!(matches!(state, Value::Str(_)));
            match action.kind.as_str() {
                "rename" => action.payload.clone(),
                _ => state.clone(),
            }
        });

        store.dispatch(Action::new("increment"));
        assert_eq!(store.state("a"), Some(Value::Num(1.0)));
        assert_eq!(store.state("b"), Some(Value::Str("untouched".into())));
    }

    #[test]
    fn test_unregistered_slice_is_silent_noop() {
        let store = Store::new();
        store.dispatch(Action::new("anything"));
        assert_eq!(store.state("ghost"), None);
    }

    #[test]
    fn test_subscribers_see_new_and_old() {
        let store = Store::new();
        store.add_reducer("counter", Value::Num(0.0), counter_reducer);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = store.subscribe("counter", move |new, old| {
            s.lock().push((old.clone(), new.clone()));
        });

        store.dispatch(Action::new("increment"));
        assert_eq!(
            *seen.lock(),
            vec![(Value::Num(0.0), Value::Num(1.0))]
        );
    }

    #[test]
    fn test_no_equality_suppression() {
        let store = Store::new();
        // "noop" actions return the state unchanged.
        store.add_reducer("counter", Value::Num(0.0), counter_reducer);

        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let _sub = store.subscribe("counter", move |_, _| *c.lock() += 1);

        store.dispatch(Action::new("noop"));
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_middleware_runs_in_order_and_can_transform() {
        let store = Store::new();
        store.add_reducer("counter", Value::Num(0.0), counter_reducer);

        let trace = Arc::new(Mutex::new(Vec::new()));

        let t1 = trace.clone();
        store.add_middleware(Arc::new(move |_, action, next| {
            t1.lock().push("first");
            // Transform: double any "add" payload.
            if action.kind == "add" {
                let doubled = action.payload.as_num().unwrap_or(0.0) * 2.0;
                next(Action::with_payload("add", doubled));
            } else {
                next(action);
            }
        }));

        let t2 = trace.clone();
        store.add_middleware(Arc::new(move |_, action, next| {
            t2.lock().push("second");
            next(action);
        }));

        store.dispatch(Action::with_payload("add", 3));
        assert_eq!(*trace.lock(), vec!["first", "second"]);
        assert_eq!(store.state("counter"), Some(Value::Num(6.0)));
    }

    #[test]
    fn test_middleware_short_circuit() {
        let store = Store::new();
        store.add_reducer("counter", Value::Num(0.0), counter_reducer);

        store.add_middleware(Arc::new(|_, action, next| {
            // Drop everything except increments.
            if action.kind == "increment" {
                next(action);
            }
        }));

        store.dispatch(Action::new("increment"));
        store.dispatch(Action::with_payload("add", 100));
        assert_eq!(store.state("counter"), Some(Value::Num(1.0)));
    }

    #[test]
    fn test_unsubscribe_via_drop() {
        let store = Store::new();
        store.add_reducer("counter", Value::Num(0.0), counter_reducer);

        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let sub = store.subscribe("counter", move |_, _| *c.lock() += 1);

        store.dispatch(Action::new("increment"));
        drop(sub);
        store.dispatch(Action::new("increment"));
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_persist_middleware_saves_named_slices() {
        let store = Store::new();
        store.add_reducer("counter", Value::Num(0.0), counter_reducer);
        store.add_reducer("other", Value::Null, |s, _| s.clone());

        let storage = Arc::new(MemoryStorage::new());
        store.add_middleware(persist(storage.clone(), vec!["counter".to_string()]));

        store.dispatch(Action::new("increment"));
        assert_eq!(storage.load("counter").unwrap(), Value::Num(1.0));
        assert!(storage.load("other").unwrap_err().is_not_found());
    }
}
