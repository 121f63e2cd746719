//! Derived observables.
//!
//! A [`Computed<T>`] recomputes whenever one of its declared dependencies
//! changes, then notifies its own subscribers with `(new, old)` under the
//! same copy-before-notify discipline as [`Observable`].

use std::sync::Arc;

use parking_lot::Mutex;

use super::observable::{Observable, Subscription};

type Callback<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;
type Compute<T> = Box<dyn Fn() -> T + Send>;

struct Inner<T> {
    compute: Compute<T>,
    value: T,
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
    /// Dependency subscriptions, kept alive for the computed's lifetime.
    _sources: Vec<Subscription>,
}

/// Derived value recomputed when a declared dependency changes.
///
/// Dependencies are declared at construction via [`map`](Computed::map),
/// [`zip2`](Computed::zip2), or [`zip3`](Computed::zip3); there is no
/// automatic dependency tracking. Cloning shares the same cell.
pub struct Computed<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Computed<T> {
    /// Derive from a single observable.
    pub fn map<S: Clone + Send + 'static>(
        source: &Observable<S>,
        f: impl Fn(&S) -> T + Send + Sync + 'static,
    ) -> Self {
        let source_clone = source.clone();
        let compute: Compute<T> = Box::new(move || source_clone.with(|v| f(v)));
        Self::build(compute, |this| vec![Self::watch(source, this)])
    }

    /// Derive from two observables.
    pub fn zip2<S1, S2>(
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        f: impl Fn(&S1, &S2) -> T + Send + Sync + 'static,
    ) -> Self
    where
        S1: Clone + Send + 'static,
        S2: Clone + Send + 'static,
    {
        let (a, b) = (s1.clone(), s2.clone());
        let compute: Compute<T> = Box::new(move || a.with(|v1| b.with(|v2| f(v1, v2))));
        Self::build(compute, |this| {
            vec![Self::watch(s1, this), Self::watch(s2, this)]
        })
    }

    /// Derive from three observables.
    pub fn zip3<S1, S2, S3>(
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        s3: &Observable<S3>,
        f: impl Fn(&S1, &S2, &S3) -> T + Send + Sync + 'static,
    ) -> Self
    where
        S1: Clone + Send + 'static,
        S2: Clone + Send + 'static,
        S3: Clone + Send + 'static,
    {
        let (a, b, c) = (s1.clone(), s2.clone(), s3.clone());
        let compute: Compute<T> =
            Box::new(move || a.with(|v1| b.with(|v2| c.with(|v3| f(v1, v2, v3)))));
        Self::build(compute, |this| {
            vec![Self::watch(s1, this), Self::watch(s2, this), Self::watch(s3, this)]
        })
    }

    fn build(compute: Compute<T>, wire: impl FnOnce(&Self) -> Vec<Subscription>) -> Self {
        let initial = compute();
        let this = Self {
            inner: Arc::new(Mutex::new(Inner {
                compute,
                value: initial,
                subscribers: Vec::new(),
                next_id: 0,
                _sources: Vec::new(),
            })),
        };
        let sources = wire(&this);
        this.inner.lock()._sources = sources;
        this
    }

    /// Subscribe `this` to recompute when `source` changes. The dependency
    /// holds only a weak reference back, so dropping every Computed handle
    /// makes the wiring inert.
    fn watch<S: Clone + Send + 'static>(source: &Observable<S>, this: &Self) -> Subscription {
        let weak = Arc::downgrade(&this.inner);
        source.subscribe(move |_, _| {
            if let Some(inner) = weak.upgrade() {
                Computed { inner }.recompute();
            }
        })
    }

    fn recompute(&self) {
        let (old, new, subscribers) = {
            let mut inner = self.inner.lock();
            let old = inner.value.clone();
            // The compute closure reads dependency cells; their locks are
            // not held here, only this computed's own.
            let new = (inner.compute)();
            inner.value = new.clone();
            let subscribers: Vec<Callback<T>> =
                inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            (old, new, subscribers)
        };
        for cb in &subscribers {
            cb(&new, &old);
        }
    }

    /// Current derived value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Read the current derived value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock().value)
    }

    /// Add a subscriber invoked with `(new, old)` after each recomputation.
    pub fn subscribe(&self, cb: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push((id, Arc::new(cb)));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().subscribers.retain(|(sub_id, _)| *sub_id != id);
            }
        })
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Computed")
            .field("value", &inner.value)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
