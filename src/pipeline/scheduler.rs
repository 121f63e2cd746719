//! Render scheduler.
//!
//! Invalidations never render synchronously. They land in a pending set keyed
//! by mount, deduplicated with max-priority upgrade, and drain as one batch
//! when the host fires the armed callback slot. The host owns the actual
//! timing (animation frame, idle period, test-driven manual pump); the
//! scheduler owns coalescing, priority, and the single-armed-slot discipline.
//!
//! # Slot arming
//!
//! At most one host slot is armed at a time. An idle-class batch arms the
//! idle slot; anything higher arms the paint slot. When a paint-class
//! invalidation arrives while only the idle slot is armed, the scheduler
//! re-arms the paint slot and bumps its generation counter, so the earlier
//! idle callback becomes a no-op when the host eventually fires it.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::types::Priority;

// =============================================================================
// Mount identity
// =============================================================================

/// Identity of one mounted subtree within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(pub(crate) u64);

impl MountId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

// =============================================================================
// Host boundary
// =============================================================================

/// Callback handed to the host for one armed slot. Fired at most once.
pub type SlotCallback = Box<dyn FnOnce() + Send>;

/// Which host slot a batch is armed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    /// Next paint opportunity. Used for everything above the idle classes.
    Paint,
    /// Next idle period. Used when the whole pending set is idle-class.
    Idle,
}

/// Host timing boundary.
///
/// A browser host maps paint to the animation-frame callback and idle to the
/// idle callback; tests drive [`ManualHost`] by hand.
pub trait HostScheduler {
    fn request_paint(&mut self, callback: SlotCallback);
    fn request_idle(&mut self, callback: SlotCallback);
}

/// Hand-pumped host for tests: slots queue up until explicitly fired.
#[derive(Clone, Default)]
pub struct ManualHost {
    slots: Arc<Mutex<ManualSlots>>,
}

#[derive(Default)]
struct ManualSlots {
    paint: Vec<SlotCallback>,
    idle: Vec<SlotCallback>,
    paint_requests: usize,
    idle_requests: usize,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every queued paint callback, in arrival order.
    pub fn run_paint(&self) {
        let callbacks = std::mem::take(&mut self.slots.lock().paint);
        for cb in callbacks {
            cb();
        }
    }

    /// Fire every queued idle callback, in arrival order.
    pub fn run_idle(&self) {
        let callbacks = std::mem::take(&mut self.slots.lock().idle);
        for cb in callbacks {
            cb();
        }
    }

    /// Total paint slots ever requested.
    pub fn paint_requests(&self) -> usize {
        self.slots.lock().paint_requests
    }

    /// Total idle slots ever requested.
    pub fn idle_requests(&self) -> usize {
        self.slots.lock().idle_requests
    }
}

impl HostScheduler for ManualHost {
    fn request_paint(&mut self, callback: SlotCallback) {
        let mut slots = self.slots.lock();
        slots.paint.push(callback);
        slots.paint_requests += 1;
    }

    fn request_idle(&mut self, callback: SlotCallback) {
        let mut slots = self.slots.lock();
        slots.idle.push(callback);
        slots.idle_requests += 1;
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Drain handler invoked with one sorted batch per fired slot.
pub type FlushTarget = Arc<dyn Fn(Vec<(MountId, Priority)>) + Send + Sync>;

struct SchedulerInner {
    pending: IndexMap<MountId, Priority>,
    armed: Option<SlotClass>,
    /// Bumped on every arming; a slot callback carrying a stale generation
    /// does nothing.
    generation: u64,
    host: Box<dyn HostScheduler + Send>,
    flush_target: Option<FlushTarget>,
}

/// Coalescing, priority-aware render scheduler.
///
/// Cloning shares the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl Scheduler {
    pub fn new(host: impl HostScheduler + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                pending: IndexMap::new(),
                armed: None,
                generation: 0,
                host: Box::new(host),
                flush_target: None,
            })),
        }
    }

    /// Install the handler that receives drained batches. Replaces any
    /// previous target.
    pub fn set_flush_target(&self, target: FlushTarget) {
        self.inner.lock().flush_target = Some(target);
    }

    /// Mark one mount dirty at the given priority.
    ///
    /// Re-scheduling an already pending mount keeps one entry and upgrades
    /// its priority to the maximum seen. Never renders synchronously.
    pub fn schedule(&self, id: MountId, priority: Priority) {
        let mut inner = self.inner.lock();

        let entry = inner.pending.entry(id).or_insert(priority);
        if priority > *entry {
            *entry = priority;
        }
        trace!(mount = id.0, ?priority, pending = inner.pending.len(), "scheduled");

        let desired = if inner.pending.values().all(|p| p.is_idle_class()) {
            SlotClass::Idle
        } else {
            SlotClass::Paint
        };

        match inner.armed {
            None => self.arm(&mut inner, desired),
            // An armed idle slot cannot serve a paint-class batch in time;
            // re-arm and let the generation check retire the idle callback.
            Some(SlotClass::Idle) if desired == SlotClass::Paint => {
                self.arm(&mut inner, SlotClass::Paint);
            }
            Some(_) => {}
        }
    }

    /// Drop any pending entry for a mount that no longer exists.
    pub fn forget(&self, id: MountId) {
        self.inner.lock().pending.shift_remove(&id);
    }

    /// Number of distinct mounts currently pending.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    fn arm(&self, inner: &mut SchedulerInner, class: SlotClass) {
        inner.generation += 1;
        let generation = inner.generation;
        inner.armed = Some(class);

        let weak = Arc::downgrade(&self.inner);
        let callback: SlotCallback = Box::new(move || fire(&weak, generation));
        match class {
            SlotClass::Paint => inner.host.request_paint(callback),
            SlotClass::Idle => inner.host.request_idle(callback),
        }
    }
}

/// Slot entry point. Validates the generation, disarms, drains the pending
/// set into a priority-sorted batch, and hands it to the flush target with
/// no scheduler lock held, so mid-flush invalidations arm a fresh slot
/// instead of joining the in-flight batch.
fn fire(weak: &Weak<Mutex<SchedulerInner>>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    let (batch, target) = {
        let mut inner = inner.lock();
        if inner.generation != generation || inner.armed.is_none() {
            return;
        }
        inner.armed = None;
        let mut batch: Vec<(MountId, Priority)> = inner.pending.drain(..).collect();
        // Stable sort: equal priorities keep first-scheduled order.
        batch.sort_by_key(|&(_, priority)| std::cmp::Reverse(priority));
        (batch, inner.flush_target.clone())
    };

    if let Some(target) = target {
        target(batch);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_scheduler(host: &ManualHost) -> (Scheduler, Arc<Mutex<Vec<Vec<(MountId, Priority)>>>>) {
        let scheduler = Scheduler::new(host.clone());
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        scheduler.set_flush_target(Arc::new(move |batch| sink.lock().push(batch)));
        (scheduler, batches)
    }

    #[test]
    fn test_schedule_is_never_synchronous() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::Immediate);
        assert!(batches.lock().is_empty());

        host.run_paint();
        assert_eq!(batches.lock().len(), 1);
    }

    #[test]
    fn test_coalescing_single_entry_and_slot() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::Normal);
        scheduler.schedule(MountId(0), Priority::Normal);
        scheduler.schedule(MountId(0), Priority::Normal);

        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(host.paint_requests(), 1);

        host.run_paint();
        assert_eq!(batches.lock().len(), 1);
        assert_eq!(batches.lock()[0], vec![(MountId(0), Priority::Normal)]);
    }

    #[test]
    fn test_priority_upgrade_keeps_max() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::UserBlocking);
        scheduler.schedule(MountId(0), Priority::Normal);

        host.run_paint();
        assert_eq!(batches.lock()[0], vec![(MountId(0), Priority::UserBlocking)]);
    }

    #[test]
    fn test_idle_class_arms_idle_slot() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::Low);
        assert_eq!(host.idle_requests(), 1);
        assert_eq!(host.paint_requests(), 0);

        host.run_idle();
        assert_eq!(batches.lock().len(), 1);
    }

    #[test]
    fn test_idle_to_paint_rearm_retires_stale_slot() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::Idle);
        scheduler.schedule(MountId(1), Priority::UserBlocking);
        assert_eq!(host.idle_requests(), 1);
        assert_eq!(host.paint_requests(), 1);

        // Paint slot drains both entries.
        host.run_paint();
        assert_eq!(batches.lock().len(), 1);
        assert_eq!(
            batches.lock()[0],
            vec![(MountId(1), Priority::UserBlocking), (MountId(0), Priority::Idle)]
        );

        // The superseded idle callback is a no-op.
        host.run_idle();
        assert_eq!(batches.lock().len(), 1);
    }

    #[test]
    fn test_batch_sorted_by_priority_then_arrival() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::Normal);
        scheduler.schedule(MountId(1), Priority::Immediate);
        scheduler.schedule(MountId(2), Priority::Normal);

        host.run_paint();
        assert_eq!(
            batches.lock()[0],
            vec![
                (MountId(1), Priority::Immediate),
                (MountId(0), Priority::Normal),
                (MountId(2), Priority::Normal),
            ]
        );
    }

    #[test]
    fn test_schedule_after_fire_arms_again() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::Normal);
        host.run_paint();

        scheduler.schedule(MountId(0), Priority::Normal);
        assert_eq!(host.paint_requests(), 2);
        host.run_paint();
        assert_eq!(batches.lock().len(), 2);
    }

    #[test]
    fn test_mid_flush_schedule_defers_to_next_batch() {
        let host = ManualHost::new();
        let scheduler = Scheduler::new(host.clone());
        let batches = Arc::new(Mutex::new(Vec::new()));

        let sink = batches.clone();
        let rescheduler = scheduler.clone();
        scheduler.set_flush_target(Arc::new(move |batch: Vec<(MountId, Priority)>| {
            let first_pass = sink.lock().is_empty();
            sink.lock().push(batch);
            if first_pass {
                rescheduler.schedule(MountId(0), Priority::Normal);
            }
        }));

        scheduler.schedule(MountId(0), Priority::Normal);
        host.run_paint();
        assert_eq!(batches.lock().len(), 1);

        // The mid-flush invalidation armed a fresh slot.
        assert_eq!(host.paint_requests(), 2);
        host.run_paint();
        assert_eq!(batches.lock().len(), 2);
    }

    #[test]
    fn test_forget_drops_pending_entry() {
        let host = ManualHost::new();
        let (scheduler, batches) = recording_scheduler(&host);

        scheduler.schedule(MountId(0), Priority::Normal);
        scheduler.schedule(MountId(1), Priority::Normal);
        scheduler.forget(MountId(0));

        host.run_paint();
        assert_eq!(batches.lock()[0], vec![(MountId(1), Priority::Normal)]);
    }
}
