//! Reconciliation: diff engine, patch applier, and the adapter boundary.
//!
//! # Data flow
//!
//! ```text
//! render callback → fresh VNode tree → diff() → Operation batch → Patcher → DomAdapter
//! ```
//!
//! [`diff`] is pure computation; every side effect against the live tree is
//! confined to [`DomAdapter`] calls made by the [`Patcher`].

pub mod adapter;
pub mod diff;
pub mod patch;

pub use adapter::{AdapterCall, DomAdapter, MemoryAdapter, NodeHandle, Snapshot};
pub use diff::{Operation, PropDelta, PropPatch, diff};
pub use patch::Patcher;
