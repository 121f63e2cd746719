//! Patch applier.
//!
//! Executes an [`Operation`] batch against the live tree through the
//! [`DomAdapter`] boundary, strictly in order: later operations may depend on
//! handles created earlier in the same batch, so no reordering or parallel
//! execution is permitted.
//!
//! The applier holds no state beyond the trees it is handed. Handles are
//! written onto the new tree as it is committed; matched nodes inherit the
//! committed handle of the node they replace (the graft pass), so the new
//! tree becomes the committed tree wholesale once `commit` returns.
//!
//! The first adapter failure aborts the rest of the batch and is returned to
//! the caller. Per-mount isolation is the flush loop's job, one level up.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::render::adapter::{DomAdapter, NodeHandle};
use crate::render::diff::{Operation, PropPatch, diff};
use crate::vnode::VNode;

/// Applies operation batches for one mounted subtree.
pub struct Patcher<'a> {
    adapter: &'a mut dyn DomAdapter,
    /// Live parent of the subtree root; stands in for `parent: None` ops.
    container: NodeHandle,
}

impl<'a> Patcher<'a> {
    pub fn new(adapter: &'a mut dyn DomAdapter, container: NodeHandle) -> Self {
        Self { adapter, container }
    }

    /// Diff `old` against `new`, carry committed handles over to matched
    /// nodes, and apply the resulting operations.
    ///
    /// After a successful commit the `new` tree carries every live handle and
    /// replaces `old` as the committed tree; `old` is only kept long enough
    /// to diff against.
    pub fn commit(&mut self, old: Option<&Arc<VNode>>, new: Option<&Arc<VNode>>) -> Result<()> {
        let ops = diff(old, new);
        if let (Some(old), Some(new)) = (old, new) {
            graft(old, new);
        }
        self.apply(&ops)
    }

    /// Execute a batch strictly in order.
    ///
    /// Operations resolve live handles from the nodes they reference, so the
    /// batch must come from trees whose matched nodes carry handles: either
    /// the committed tree itself, or a fresh tree grafted against it (which
    /// [`commit`](Patcher::commit) does). `Update` accepts the handle from
    /// either side of its pair.
    pub fn apply(&mut self, ops: &[Operation]) -> Result<()> {
        for op in ops {
            self.apply_one(op)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::Create { parent, node, index } => {
                let parent_handle = self.parent_handle(parent.as_deref())?;
                let handle = self.create_subtree(node)?;
                self.adapter.insert_child(parent_handle, handle, *index)
            }
            Operation::Update { old, new, delta } => {
                let handle = new
                    .handle()
                    .or_else(|| old.handle())
                    .ok_or(Error::UncommittedNode)?;
                for (name, patch) in delta {
                    match patch {
                        PropPatch::Set(value) => {
                            self.adapter.set_property(handle, name, Some(value))?;
                        }
                        PropPatch::Remove => {
                            self.adapter.set_property(handle, name, None)?;
                        }
                    }
                }
                Ok(())
            }
            Operation::Remove { parent, node, .. } => {
                let parent_handle = self.parent_handle(parent.as_deref())?;
                let handle = node.handle().ok_or(Error::UncommittedNode)?;
                self.adapter.remove_child(parent_handle, handle)?;
                node.detach_recursive();
                Ok(())
            }
            Operation::Replace { parent, old, new, index } => {
                // Create first, then detach-and-substitute at the same slot.
                let parent_handle = self.parent_handle(parent.as_deref())?;
                let new_handle = self.create_subtree(new)?;
                let old_handle = old.handle().ok_or(Error::UncommittedNode)?;
                self.adapter.remove_child(parent_handle, old_handle)?;
                old.detach_recursive();
                self.adapter.insert_child(parent_handle, new_handle, *index)
            }
            Operation::Reorder { parent, order } => {
                let parent_handle = parent.handle().ok_or(Error::UncommittedNode)?;
                let handles: Vec<NodeHandle> = order
                    .iter()
                    .map(|child| child.handle().ok_or(Error::UncommittedNode))
                    .collect::<Result<_>>()?;
                self.adapter.reorder_children(parent_handle, &handles)
            }
        }
    }

    fn parent_handle(&self, parent: Option<&VNode>) -> Result<NodeHandle> {
        match parent {
            Some(node) => node.handle().ok_or(Error::UncommittedNode),
            None => Ok(self.container),
        }
    }

    /// Allocate a node, set every prop, recursively create children, and
    /// record the handle on the VNode. Children are inserted bottom-up before
    /// the subtree root is handed back for insertion.
    fn create_subtree(&mut self, node: &Arc<VNode>) -> Result<NodeHandle> {
        let handle = match node.kind() {
            crate::vnode::NodeKind::Element(tag) => self.adapter.create_node(tag)?,
            crate::vnode::NodeKind::Text(content) => self.adapter.create_text_node(content)?,
        };

        for (name, value) in node.props() {
            self.adapter.set_property(handle, name, Some(value))?;
        }

        for (i, child) in node.children().iter().enumerate() {
            let child_handle = self.create_subtree(child)?;
            self.adapter.insert_child(handle, child_handle, i)?;
        }

        node.attach_handle(handle);
        Ok(handle)
    }
}

// =============================================================================
// Handle grafting
// =============================================================================

/// Copy committed handles from `old` onto the matching nodes of `new`.
///
/// Follows the same matching rules as the diff engine: positional for unkeyed
/// sibling lists, key identity otherwise, and never across a kind mismatch
/// (those pairs are replaced, not reconciled).
fn graft(old: &Arc<VNode>, new: &Arc<VNode>) {
    if !old.kind().matches(new.kind()) {
        return;
    }
    new.inherit_handle(old);

    let old_children = old.children();
    let new_children = new.children();
    let keyed = old_children.iter().any(|c| c.node_key().is_some())
        || new_children.iter().any(|c| c.node_key().is_some());

    if keyed {
        let mut old_keys: IndexMap<&str, usize> = IndexMap::new();
        for (i, child) in old_children.iter().enumerate() {
            if let Some(key) = child.node_key() {
                old_keys.insert(key, i);
            }
        }
        for child in new_children {
            if let Some(old_index) = child.node_key().and_then(|k| old_keys.get(k)) {
                graft(&old_children[*old_index], child);
            }
        }
    } else {
        for (old_child, new_child) in old_children.iter().zip(new_children) {
            graft(old_child, new_child);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
