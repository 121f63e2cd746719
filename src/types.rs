//! Core types for weft.
//!
//! These types define the foundation that everything builds on.
//! They flow through the diff engine, the patch applier, and the store.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Value
// =============================================================================

/// Closed tagged union for prop values and store slice state.
///
/// Props are opaque to the diff engine: it only ever compares them
/// structurally. Keeping the union closed (instead of a dynamic `Any`) makes
/// delta computation exhaustive and lets the persistence layer encode any
/// value without reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    /// Opaque reference to a host-side object (event handler id, resource id).
    /// Compared by identity of the id, never dereferenced by the engine.
    Handle(u64),
}

impl Value {
    /// True for `Value::Null`.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as `&str` if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the numeric value if this is a number.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the boolean value if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Num(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Scheduling priority for a queued re-render.
///
/// Ordered so that `max()` picks the more urgent of two priorities.
/// `Low` and `Idle` requests are flushed from the host's idle slot;
/// everything else from the paint-aligned slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Idle,
    Low,
    #[default]
    Normal,
    UserBlocking,
    Immediate,
}

impl Priority {
    /// Whether this priority is served from the host's idle slot.
    #[inline]
    pub fn is_idle_class(self) -> bool {
        matches!(self, Priority::Idle | Priority::Low)
    }
}

// =============================================================================
// Node flags
// =============================================================================

bitflags::bitflags! {
    /// Per-node lifecycle flags, mutated only by the patch applier.
    ///
    /// Dirty tracking lives in the scheduler's pending set, per mount; nodes
    /// only record whether they are materialized.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// The node has been materialized through the adapter at least once.
        const COMMITTED = 1 << 0;
    }
}

// =============================================================================
// Tests
// =============================================================================
