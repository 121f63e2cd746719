//! Update pipeline: scheduling and the mount/flush loop.
//!
//! # Data flow
//!
//! ```text
//! state change → MountHandle::invalidate → Scheduler (coalesce, prioritize)
//!              → host slot fires → Runtime flush → render → diff/patch → adapter
//! ```
//!
//! Invalidation is cheap and lock-light; all rendering cost is paid once per
//! fired slot, for the whole pending batch.

pub mod mount;
pub mod scheduler;

pub use mount::{MountHandle, Runtime};
pub use scheduler::{HostScheduler, ManualHost, MountId, Scheduler, SlotCallback, SlotClass};
