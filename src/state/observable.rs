//! Reactive value cell.
//!
//! [`Observable<T>`] is the foundational primitive: one value, an ordered
//! subscriber list, and a strict notification discipline.
//!
//! # Notification discipline
//!
//! A write computes the new value and snapshots the subscriber list inside
//! one short critical section, releases the lock, then invokes each snapshot
//! entry with `(new, old)` in subscription order. Changes to the subscriber
//! list during a pass never affect that pass. A write issued from inside a
//! subscriber is queued and runs as its own independent pass after the outer
//! pass returns, so notification depth is bounded and a subscriber added
//! mid-pass is never notified by the in-flight pass.
//!
//! Writes may originate from background threads (completed async I/O); the
//! mutex serializes them, and no subscriber ever runs while the lock is held.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

// =============================================================================
// Subscription guard
// =============================================================================

/// RAII subscription handle shared by [`Observable`], `Computed`, and the
/// store. Dropping it unsubscribes; [`detach`](Subscription::detach) keeps
/// the subscription alive for the lifetime of its source instead.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Explicitly unsubscribe now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Consume the guard without unsubscribing.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// =============================================================================
// Observable
// =============================================================================

type Callback<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// One queued notification pass: value transition plus the subscriber
/// snapshot taken at write time.
struct Pass<T> {
    old: T,
    new: T,
    subscribers: Vec<Callback<T>>,
}

struct Inner<T> {
    value: T,
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
    /// True while a notification pass is running; writes arriving meanwhile
    /// queue their pass instead of nesting.
    notifying: bool,
    pending: VecDeque<Pass<T>>,
}

/// Single reactive value cell with publish/subscribe.
///
/// Cloning shares the same cell. Long-lived: created once at setup and
/// reclaimed when the last handle drops.
pub struct Observable<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                subscribers: Vec::new(),
                next_id: 0,
                notifying: false,
                pending: VecDeque::new(),
            })),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Read the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock().value)
    }

    /// Replace the value and notify subscribers with `(new, old)`.
    ///
    /// No equality suppression: setting an equal value still notifies.
    /// Minimal-update suppression belongs to the diff engine, one layer up.
    pub fn set(&self, value: T) {
        self.write(move |_| value);
    }

    /// Replace the value through a function of the current value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.write(f);
    }

    fn write(&self, make: impl FnOnce(&T) -> T) {
        let first_pass = {
            let mut inner = self.inner.lock();
            let old = inner.value.clone();
            let new = make(&old);
            inner.value = new.clone();
            let subscribers: Vec<Callback<T>> =
                inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            let pass = Pass { old, new, subscribers };
            if inner.notifying {
                // Re-entrant or concurrent write: the active pass drains it.
                inner.pending.push_back(pass);
                return;
            }
            inner.notifying = true;
            pass
        };

        let mut pass = first_pass;
        loop {
            for cb in &pass.subscribers {
                cb(&pass.new, &pass.old);
            }
            let mut inner = self.inner.lock();
            match inner.pending.pop_front() {
                Some(next) => {
                    drop(inner);
                    pass = next;
                }
                None => {
                    inner.notifying = false;
                    return;
                }
            }
        }
    }

    /// Add a subscriber invoked with `(new, old)` on every write.
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

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
