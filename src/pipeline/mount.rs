//! Mount lifecycle and the flush loop.
//!
//! A [`Runtime`] owns the adapter and every mounted subtree. Mounting runs
//! the render callback once and commits the initial tree synchronously;
//! every later update goes through [`MountHandle::invalidate`] and the
//! scheduler, so a burst of state changes costs one render per flush.
//!
//! # Locking
//!
//! Render callbacks run under the runtime lock, so they must not mount or
//! unmount. Invalidation takes only the scheduler lock, which is why a
//! render-triggered state change (observable set, subscriber, invalidate)
//! cannot deadlock against an in-flight flush.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::render::adapter::{DomAdapter, NodeHandle};
use crate::render::patch::Patcher;
use crate::state::{Observable, Store, Subscription};
use crate::types::Priority;
use crate::vnode::VNode;

use super::scheduler::{MountId, Scheduler};

// =============================================================================
// Mount handle
// =============================================================================

/// Caller-side handle to one mounted subtree.
///
/// Dropping the handle drops its state bindings but leaves the subtree
/// committed; removal is explicit via [`Runtime::unmount`].
pub struct MountHandle {
    id: MountId,
    scheduler: Scheduler,
    subscriptions: Vec<Subscription>,
}

impl MountHandle {
    pub fn id(&self) -> MountId {
        self.id
    }

    /// Mark this subtree dirty. Never renders synchronously; the subtree
    /// re-renders once at the next flush, at the highest priority requested
    /// since the last one.
    pub fn invalidate(&self, priority: Priority) {
        self.scheduler.schedule(self.id, priority);
    }

    /// Invalidate this subtree whenever `source` changes.
    pub fn bind<T: Clone + Send + 'static>(&mut self, source: &Observable<T>, priority: Priority) {
        let id = self.id;
        let scheduler = self.scheduler.clone();
        self.subscriptions
            .push(source.subscribe(move |_, _| scheduler.schedule(id, priority)));
    }

    /// Invalidate this subtree whenever the named store slice is reduced.
    pub fn bind_slice(&mut self, store: &Store, key: impl Into<String>, priority: Priority) {
        let id = self.id;
        let scheduler = self.scheduler.clone();
        self.subscriptions
            .push(store.subscribe(key, move |_, _| scheduler.schedule(id, priority)));
    }
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("id", &self.id)
            .field("bindings", &self.subscriptions.len())
            .finish()
    }
}

// =============================================================================
// Runtime
// =============================================================================

type RenderFn = Box<dyn FnMut() -> Arc<VNode> + Send>;

struct MountEntry {
    container: NodeHandle,
    render: RenderFn,
    committed: Option<Arc<VNode>>,
}

struct RuntimeInner<A> {
    adapter: A,
    mounts: IndexMap<MountId, MountEntry>,
    next_mount: u64,
}

/// Owner of the adapter and every mounted subtree.
///
/// Cloning shares the same runtime.
pub struct Runtime<A> {
    inner: Arc<Mutex<RuntimeInner<A>>>,
    scheduler: Scheduler,
}

impl<A> Clone for Runtime<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<A: DomAdapter + Send + 'static> Runtime<A> {
    /// Wire a runtime to a scheduler: drained batches flush through this
    /// runtime's adapter. The scheduler holds only a weak path back, so
    /// dropping the last runtime handle reclaims everything.
    pub fn new(adapter: A, scheduler: Scheduler) -> Self {
        let inner = Arc::new(Mutex::new(RuntimeInner {
            adapter,
            mounts: IndexMap::new(),
            next_mount: 0,
        }));

        let weak = Arc::downgrade(&inner);
        scheduler.set_flush_target(Arc::new(move |batch| {
            if let Some(inner) = weak.upgrade() {
                flush_batch(&inner, batch);
            }
        }));

        Self { inner, scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Mount a render callback into `container`.
    ///
    /// The callback runs once immediately and its tree is committed before
    /// this returns, so the subtree is visible without waiting for a flush.
    pub fn mount(
        &self,
        container: NodeHandle,
        mut render: impl FnMut() -> Arc<VNode> + Send + 'static,
    ) -> Result<MountHandle> {
        let mut guard = self.inner.lock();
        let id = MountId(guard.next_mount);
        guard.next_mount += 1;

        let tree = render();
        Patcher::new(&mut guard.adapter, container).commit(None, Some(&tree))?;
        guard.mounts.insert(
            id,
            MountEntry {
                container,
                render: Box::new(render),
                committed: Some(tree),
            },
        );
        debug!(mount = id.raw(), "mounted");

        Ok(MountHandle {
            id,
            scheduler: self.scheduler.clone(),
            subscriptions: Vec::new(),
        })
    }

    /// Tear a subtree down: its live nodes are removed and any still-pending
    /// invalidation is dropped.
    pub fn unmount(&self, handle: MountHandle) -> Result<()> {
        let MountHandle { id, subscriptions, .. } = handle;
        drop(subscriptions);
        self.scheduler.forget(id);

        let mut guard = self.inner.lock();
        let RuntimeInner { adapter, mounts, .. } = &mut *guard;
        if let Some(entry) = mounts.shift_remove(&id) {
            Patcher::new(adapter, entry.container).commit(entry.committed.as_ref(), None)?;
            debug!(mount = id.raw(), "unmounted");
        }
        Ok(())
    }

    /// Number of live mounts.
    pub fn mount_count(&self) -> usize {
        self.inner.lock().mounts.len()
    }

    /// Run a closure against the adapter, for host integration and tests.
    pub fn with_adapter<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.inner.lock().adapter)
    }
}

/// Re-render and commit every mount in one drained batch, highest priority
/// first. One failing subtree is logged and skipped; the rest of the batch
/// still flushes.
fn flush_batch<A: DomAdapter>(inner: &Mutex<RuntimeInner<A>>, batch: Vec<(MountId, Priority)>) {
    let mut guard = inner.lock();
    let RuntimeInner { adapter, mounts, .. } = &mut *guard;

    for (id, priority) in batch {
        // Unmounted between scheduling and flush.
        let Some(entry) = mounts.get_mut(&id) else {
            continue;
        };

        let tree = (entry.render)();
        let result =
            Patcher::new(adapter, entry.container).commit(entry.committed.as_ref(), Some(&tree));
        if let Err(err) = result {
            warn!(mount = id.raw(), ?priority, %err, "commit failed, subtree skipped");
        }
        // The new tree carries every handle the commit did attach; keeping it
        // as the committed tree holds the diff baseline and the live state
        // together even after a partial failure.
        entry.committed = Some(tree);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scheduler::ManualHost;
    use crate::render::adapter::MemoryAdapter;
    use crate::state::Action;
    use crate::types::Value;

    fn runtime_with_host() -> (Runtime<MemoryAdapter>, ManualHost, NodeHandle) {
        let host = ManualHost::new();
        let scheduler = Scheduler::new(host.clone());
        let mut adapter = MemoryAdapter::new();
        let root = adapter.create_root();
        (Runtime::new(adapter, scheduler), host, root)
    }

    fn counter_view(n: i64) -> Arc<VNode> {
        VNode::element("div")
            .child(VNode::text(format!("count: {n}")))
            .build()
    }

    fn root_text(runtime: &Runtime<MemoryAdapter>, root: NodeHandle) -> String {
        runtime.with_adapter(|adapter| {
            let snap = adapter.snapshot(root).unwrap();
            snap.children[0].children[0].text.clone().unwrap()
        })
    }

    #[test]
    fn test_mount_commits_immediately() {
        let (runtime, _host, root) = runtime_with_host();
        let _handle = runtime.mount(root, || counter_view(0)).unwrap();

        assert_eq!(root_text(&runtime, root), "count: 0");
        assert_eq!(runtime.mount_count(), 1);
    }

    #[test]
    fn test_invalidation_burst_renders_once_per_flush() {
        let (runtime, host, root) = runtime_with_host();

        let value = Observable::new(0i64);
        let renders = Arc::new(Mutex::new(0usize));

        let v = value.clone();
        let r = renders.clone();
        let handle = runtime
            .mount(root, move || {
                *r.lock() += 1;
                counter_view(v.get())
            })
            .unwrap();
        assert_eq!(*renders.lock(), 1);

        handle.invalidate(Priority::Normal);
        handle.invalidate(Priority::Normal);
        handle.invalidate(Priority::UserBlocking);
        assert_eq!(*renders.lock(), 1);

        value.set(7);
        host.run_paint();
        assert_eq!(*renders.lock(), 2);
        assert_eq!(root_text(&runtime, root), "count: 7");
    }

    #[test]
    fn test_bound_observable_drives_rerender() {
        let (runtime, host, root) = runtime_with_host();

        let value = Observable::new(1i64);
        let v = value.clone();
        let mut handle = runtime.mount(root, move || counter_view(v.get())).unwrap();
        handle.bind(&value, Priority::Normal);

        value.set(42);
        host.run_paint();
        assert_eq!(root_text(&runtime, root), "count: 42");
    }

    #[test]
    fn test_bound_store_slice_drives_rerender() {
        let (runtime, host, root) = runtime_with_host();

        let store = Store::new();
        store.add_reducer("count", Value::Num(0.0), |state, action| {
            match action.kind.as_str() {
                "increment" => Value::Num(state.as_num().unwrap_or(0.0) + 1.0),
                _ => state.clone(),
            }
        });

        let s = store.clone();
        let mut handle = runtime
            .mount(root, move || {
                counter_view(s.state("count").and_then(|v| v.as_num()).unwrap_or(0.0) as i64)
            })
            .unwrap();
        handle.bind_slice(&store, "count", Priority::Normal);

        store.dispatch(Action::new("increment"));
        host.run_paint();
        assert_eq!(root_text(&runtime, root), "count: 1");
    }

    #[test]
    fn test_unmount_removes_subtree_and_pending_work() {
        let (runtime, host, root) = runtime_with_host();

        let handle = runtime.mount(root, || counter_view(0)).unwrap();
        handle.invalidate(Priority::Normal);
        runtime.unmount(handle).unwrap();

        assert_eq!(runtime.mount_count(), 0);
        runtime.with_adapter(|adapter| {
            assert!(adapter.snapshot(root).unwrap().children.is_empty());
        });

        // The already-armed slot finds nothing to do.
        host.run_paint();
        assert_eq!(runtime.mount_count(), 0);
    }

    #[test]
    fn test_failed_mount_does_not_block_siblings() {
        let (runtime, host, root_a) = runtime_with_host();
        let root_b = runtime.with_adapter(|adapter| adapter.create_root());

        let a_value = Observable::new(0i64);
        let av = a_value.clone();
        let mut handle_a = runtime.mount(root_a, move || counter_view(av.get())).unwrap();
        handle_a.bind(&a_value, Priority::Normal);

        let b_value = Observable::new(0i64);
        let bv = b_value.clone();
        let mut handle_b = runtime.mount(root_b, move || counter_view(bv.get())).unwrap();
        handle_b.bind(&b_value, Priority::Normal);

        // Break mount A's committed text node so its next commit fails.
        let a_text = runtime.with_adapter(|adapter| {
            let div = adapter.children_of(root_a)[0];
            adapter.children_of(div)[0]
        });
        runtime.with_adapter(|adapter| adapter.poison(a_text));

        a_value.set(1);
        b_value.set(2);
        host.run_paint();

        // B flushed despite A's failure.
        assert_eq!(root_text(&runtime, root_b), "count: 2");
    }

    #[test]
    fn test_mid_flush_invalidation_waits_for_next_flush() {
        let (runtime, host, root) = runtime_with_host();

        let value = Observable::new(0i64);
        let renders = Arc::new(Mutex::new(0usize));

        let v = value.clone();
        let r = renders.clone();
        let mut handle = runtime
            .mount(root, move || {
                *r.lock() += 1;
                if v.get() == 1 {
                    // The first reactive render bumps the value again.
                    v.set(2);
                }
                counter_view(v.get())
            })
            .unwrap();
        handle.bind(&value, Priority::Normal);

        value.set(1);
        host.run_paint();
        // Initial mount render plus one flush render.
        assert_eq!(*renders.lock(), 2);

        // The mid-flush set deferred to a fresh slot.
        host.run_paint();
        assert_eq!(*renders.lock(), 3);
        assert_eq!(root_text(&runtime, root), "count: 2");
    }
}
