//! # weft
//!
//! Reactive virtual-node rendering engine for Rust.
//!
//! ## Architecture
//!
//! Rendering is a one-way pipeline from state to a host document:
//!
//! ```text
//! Observable / Store → invalidate → Scheduler → flush → render callback
//!                    → VNode tree → diff → Operation batch → Patcher → DomAdapter
//! ```
//!
//! State primitives notify subscribers; subscribers invalidate mounted
//! subtrees; the scheduler coalesces invalidations into one batch per host
//! slot; the flush re-renders each dirty subtree, diffs it against the
//! committed tree, and applies the minimal operation set through the
//! adapter boundary. The engine never talks to a concrete document model:
//! hosts implement [`DomAdapter`](render::DomAdapter), tests use the
//! in-memory recorder.
//!
//! ## Modules
//!
//! - [`types`] - Core value union, priorities, node flags
//! - [`vnode`] - Immutable virtual node trees
//! - [`render`] - Diff engine, patch applier, adapter boundary
//! - [`state`] - Observable cells, derived values, keyed store
//! - [`pipeline`] - Scheduler and the mount/flush runtime
//! - [`persist`] - Key/value persistence for store slices

pub mod error;
pub mod persist;
pub mod pipeline;
pub mod render;
pub mod state;
pub mod types;
pub mod vnode;

pub use error::{Error, Result};
pub use types::{Priority, Value};

pub use vnode::{NodeKind, TEXT_PROP, VNode};

pub use render::{
    AdapterCall, DomAdapter, MemoryAdapter, NodeHandle, Operation, Patcher, PropDelta, PropPatch,
    Snapshot, diff,
};

pub use state::{Action, Computed, Observable, Store, Subscription};

pub use pipeline::{HostScheduler, ManualHost, MountHandle, MountId, Runtime, Scheduler};

pub use persist::{JsonFileStorage, MemoryStorage, Storage};
