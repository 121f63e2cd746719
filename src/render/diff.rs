//! Tree diff engine.
//!
//! [`diff`] compares two virtual trees and produces a minimal ordered list of
//! [`Operation`]s. It is a pure function: no adapter calls, no tree mutation,
//! and identical inputs always produce identical output sequences.
//!
//! # Child reconciliation
//!
//! Unkeyed children are compared positionally across the longer of the two
//! lists. As soon as any sibling carries a key, the list switches to keyed
//! reconciliation: keyed children match by identity, unkeyed children in a
//! keyed list are always created/removed rather than matched by position,
//! and a key whose node kind changed between renders is removed and
//! recreated rather than replaced in place.
//!
//! # Operation order
//!
//! Within one parent the engine emits removes, then matched-child recursion,
//! then creates in ascending target index, then at most one reorder. Applied
//! in that order, creates land at their exact target index, so a reorder is
//! needed precisely when the matched children's old positions (read in new
//! order) are not monotonically non-decreasing.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::types::Value;
use crate::vnode::{NodeKind, TEXT_PROP, VNode};

// =============================================================================
// Operations
// =============================================================================

/// One entry in a prop delta: a new value, or the removal tombstone.
#[derive(Debug, Clone, PartialEq)]
pub enum PropPatch {
    Set(Value),
    Remove,
}

/// Changed/added/removed props for one node, in deterministic order.
pub type PropDelta = IndexMap<String, PropPatch>;

/// A single change between two trees.
///
/// `parent` is `None` for operations on the diff root; the patch applier
/// substitutes the mount container there. Operation order within a batch is
/// significant: later operations may rely on handles created earlier.
#[derive(Debug, Clone)]
pub enum Operation {
    Create {
        parent: Option<Arc<VNode>>,
        node: Arc<VNode>,
        index: usize,
    },
    Update {
        old: Arc<VNode>,
        new: Arc<VNode>,
        delta: PropDelta,
    },
    Remove {
        parent: Option<Arc<VNode>>,
        node: Arc<VNode>,
        index: usize,
    },
    Replace {
        parent: Option<Arc<VNode>>,
        old: Arc<VNode>,
        new: Arc<VNode>,
        index: usize,
    },
    /// Reposition `parent`'s children into `order` (the full new child list).
    Reorder {
        parent: Arc<VNode>,
        order: Vec<Arc<VNode>>,
    },
}

// =============================================================================
// Diff
// =============================================================================

/// Compute the operations that transform `old` into `new`.
///
/// Structurally identical trees yield an empty sequence.
pub fn diff(old: Option<&Arc<VNode>>, new: Option<&Arc<VNode>>) -> Vec<Operation> {
    let mut ops = Vec::new();
    diff_nodes(None, old, new, 0, &mut ops);
    ops
}

fn diff_nodes(
    parent: Option<&Arc<VNode>>,
    old: Option<&Arc<VNode>>,
    new: Option<&Arc<VNode>>,
    index: usize,
    ops: &mut Vec<Operation>,
) {
    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => ops.push(Operation::Create {
            parent: parent.cloned(),
            node: new.clone(),
            index,
        }),
        (Some(old), None) => ops.push(Operation::Remove {
            parent: parent.cloned(),
            node: old.clone(),
            index,
        }),
        (Some(old), Some(new)) => {
            // Kind mismatch: conservative whole-subtree replace, no recursion.
            if !old.kind().matches(new.kind()) {
                ops.push(Operation::Replace {
                    parent: parent.cloned(),
                    old: old.clone(),
                    new: new.clone(),
                    index,
                });
                return;
            }

            let delta = prop_delta(old, new);
            if !delta.is_empty() {
                ops.push(Operation::Update {
                    old: old.clone(),
                    new: new.clone(),
                    delta,
                });
            }

            diff_children(new, old.children(), new.children(), ops);
        }
    }
}

/// Changed/added keys map to their new value, removed keys to the tombstone.
/// Text content rides on the reserved text prop.
fn prop_delta(old: &VNode, new: &VNode) -> PropDelta {
    let mut delta = PropDelta::new();

    if let (NodeKind::Text(old_text), NodeKind::Text(new_text)) = (old.kind(), new.kind()) {
        if old_text != new_text {
            delta.insert(
                TEXT_PROP.to_string(),
                PropPatch::Set(Value::Str(new_text.clone())),
            );
        }
    }

    for (name, new_value) in new.props() {
        match old.props().get(name) {
            Some(old_value) if old_value == new_value => {}
            _ => {
                delta.insert(name.clone(), PropPatch::Set(new_value.clone()));
            }
        }
    }

    for name in old.props().keys() {
        if !new.props().contains_key(name) {
            delta.insert(name.clone(), PropPatch::Remove);
        }
    }

    delta
}

fn diff_children(
    parent: &Arc<VNode>,
    old_children: &[Arc<VNode>],
    new_children: &[Arc<VNode>],
    ops: &mut Vec<Operation>,
) {
    let keyed = old_children.iter().any(|c| c.node_key().is_some())
        || new_children.iter().any(|c| c.node_key().is_some());

    if keyed {
        diff_children_keyed(parent, old_children, new_children, ops);
    } else {
        let max_len = old_children.len().max(new_children.len());
        for i in 0..max_len {
            diff_nodes(
                Some(parent),
                old_children.get(i),
                new_children.get(i),
                i,
                ops,
            );
        }
    }
}

fn diff_children_keyed(
    parent: &Arc<VNode>,
    old_children: &[Arc<VNode>],
    new_children: &[Arc<VNode>],
    ops: &mut Vec<Operation>,
) {
    // Duplicate sibling keys are bounded undefined behavior: the map is
    // deterministic (last write wins), never a crash.
    let mut old_keys: IndexMap<&str, usize> = IndexMap::new();
    for (i, child) in old_children.iter().enumerate() {
        if let Some(key) = child.node_key() {
            old_keys.insert(key, i);
        }
    }
    // Match keyed new children against old positions. A key carried across a
    // kind change is not reconcilable in place; the pair is left unmatched so
    // it flows through the remove/create accounting below, whose index
    // arithmetic stays exact. A keyed Replace applied at the new index would
    // land against a live list that has not received its creates yet.
    let mut matched_old: Vec<usize> = Vec::new();
    let mut matches: Vec<(usize, usize)> = Vec::new(); // (new index, old index)
    for (new_index, child) in new_children.iter().enumerate() {
        if let Some(key) = child.node_key() {
            if let Some(&old_index) = old_keys.get(key) {
                if old_children[old_index].kind().matches(child.kind()) {
                    matched_old.push(old_index);
                    matches.push((new_index, old_index));
                }
            }
        }
    }

    // Removes first: keyed-but-unmatched and unkeyed old children. Unkeyed
    // children in a keyed list are never matched by position.
    for (old_index, child) in old_children.iter().enumerate() {
        let survives = child
            .node_key()
            .is_some_and(|_| matched_old.contains(&old_index));
        if !survives {
            ops.push(Operation::Remove {
                parent: Some(parent.clone()),
                node: child.clone(),
                index: old_index,
            });
        }
    }

    // Matched pairs recurse in new order.
    for &(new_index, old_index) in &matches {
        diff_nodes(
            Some(parent),
            Some(&old_children[old_index]),
            Some(&new_children[new_index]),
            new_index,
            ops,
        );
    }

    // Creates in ascending target index: keyed children absent from old,
    // keyed children whose kind changed, and every unkeyed child in a keyed
    // list.
    for (new_index, child) in new_children.iter().enumerate() {
        let created = match child.node_key() {
            Some(_) => !matches.iter().any(|&(n, _)| n == new_index),
            None => true,
        };
        if created {
            ops.push(Operation::Create {
                parent: Some(parent.clone()),
                node: child.clone(),
                index: new_index,
            });
        }
    }

    // One reorder iff the matched old positions, read in new order, are not
    // monotonically non-decreasing. Emitted last so the live child list
    // already equals the new set when it applies.
    if needs_reorder(&matched_old) {
        ops.push(Operation::Reorder {
            parent: parent.clone(),
            order: new_children.to_vec(),
        });
    }
}

fn needs_reorder(matched_old_positions: &[usize]) -> bool {
    matched_old_positions.windows(2).any(|w| w[1] < w[0])
}

// =============================================================================
// Tests
// =============================================================================
