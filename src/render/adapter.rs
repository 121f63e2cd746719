//! DOM adapter boundary.
//!
//! The engine never touches a concrete document model. Every externally
//! observable side effect of a commit goes through [`DomAdapter`]; a browser
//! host backs it with real document calls, tests back it with the in-memory
//! [`MemoryAdapter`] recorder.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::types::Value;

// =============================================================================
// Handles
// =============================================================================

/// Opaque reference to one live node, issued by the adapter on create and
/// meaningless to the engine beyond identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u64);

// =============================================================================
// Adapter trait
// =============================================================================

/// Host boundary through which the patch applier manipulates the live tree.
///
/// All methods are fallible: a call against a detached or invalid handle
/// returns an error, which the flush loop treats as fatal for that one
/// scheduled subtree only.
pub trait DomAdapter {
    /// Allocate a node of the given element type.
    fn create_node(&mut self, tag: &str) -> Result<NodeHandle>;

    /// Allocate a text node with the given content.
    fn create_text_node(&mut self, content: &str) -> Result<NodeHandle>;

    /// Set a property, or clear it when `value` is `None` (the removal
    /// tombstone from a prop delta).
    fn set_property(&mut self, handle: NodeHandle, name: &str, value: Option<&Value>)
    -> Result<()>;

    /// Insert `child` under `parent` at `index` (clamped to the child count).
    fn insert_child(&mut self, parent: NodeHandle, child: NodeHandle, index: usize) -> Result<()>;

    /// Detach `child` from `parent`.
    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()>;

    /// Reposition `parent`'s existing children into the given order without
    /// destroying or recreating any of them.
    fn reorder_children(&mut self, parent: NodeHandle, order: &[NodeHandle]) -> Result<()>;
}

// =============================================================================
// In-memory recorder host
// =============================================================================

/// One recorded adapter call, for assertions about what a commit did.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    CreateNode { tag: String },
    CreateTextNode { content: String },
    SetProperty { handle: NodeHandle, name: String, cleared: bool },
    InsertChild { parent: NodeHandle, child: NodeHandle, index: usize },
    RemoveChild { parent: NodeHandle, child: NodeHandle },
    ReorderChildren { parent: NodeHandle },
}

#[derive(Debug, Clone)]
struct MemNode {
    tag: Option<String>,
    text: Option<String>,
    props: IndexMap<String, Value>,
    children: Vec<NodeHandle>,
}

/// Comparable shape of a live subtree, for round-trip assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tag: Option<String>,
    pub text: Option<String>,
    pub props: IndexMap<String, Value>,
    pub children: Vec<Snapshot>,
}

/// In-memory [`DomAdapter`] backed by a real node table.
///
/// Maintains actual parent/child structure so tests can assert the final
/// tree shape, and records every call so tests can assert *how* the shape
/// was reached (e.g. a keyed rotation performs no creates).
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    nodes: HashMap<NodeHandle, MemNode>,
    calls: Vec<AdapterCall>,
    next_id: u64,
    /// Handles that will fail all subsequent calls. Lets tests exercise the
    /// per-subtree failure isolation policy.
    poisoned: Vec<NodeHandle>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a detached container node to mount into.
    pub fn create_root(&mut self) -> NodeHandle {
        let handle = self.alloc();
        self.nodes.insert(
            handle,
            MemNode {
                tag: Some("#root".to_string()),
                text: None,
                props: IndexMap::new(),
                children: Vec::new(),
            },
        );
        handle
    }

    /// Everything recorded since construction or the last [`clear_calls`].
    ///
    /// [`clear_calls`]: MemoryAdapter::clear_calls
    pub fn calls(&self) -> &[AdapterCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_creates(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    AdapterCall::CreateNode { .. } | AdapterCall::CreateTextNode { .. }
                )
            })
            .count()
    }

    pub fn count_removes(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, AdapterCall::RemoveChild { .. }))
            .count()
    }

    pub fn count_reorders(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, AdapterCall::ReorderChildren { .. }))
            .count()
    }

    /// Make every future call against `handle` fail.
    pub fn poison(&mut self, handle: NodeHandle) {
        self.poisoned.push(handle);
    }

    /// Snapshot the subtree rooted at `handle` into a comparable shape.
    pub fn snapshot(&self, handle: NodeHandle) -> Option<Snapshot> {
        let node = self.nodes.get(&handle)?;
        let children = node
            .children
            .iter()
            .filter_map(|c| self.snapshot(*c))
            .collect();
        Some(Snapshot {
            tag: node.tag.clone(),
            text: node.text.clone(),
            props: node.props.clone(),
            children,
        })
    }

    /// Direct children of a live node, in order.
    pub fn children_of(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.nodes
            .get(&handle)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn alloc(&mut self) -> NodeHandle {
        self.next_id += 1;
        NodeHandle(self.next_id)
    }

    fn check(&self, handle: NodeHandle) -> Result<()> {
        if self.poisoned.contains(&handle) {
            return Err(Error::Adapter(format!("poisoned handle {handle:?}")));
        }
        if self.nodes.contains_key(&handle) {
            Ok(())
        } else {
            Err(Error::DetachedHandle)
        }
    }
}

impl DomAdapter for MemoryAdapter {
    fn create_node(&mut self, tag: &str) -> Result<NodeHandle> {
        let handle = self.alloc();
        self.nodes.insert(
            handle,
            MemNode {
                tag: Some(tag.to_string()),
                text: None,
                props: IndexMap::new(),
                children: Vec::new(),
            },
        );
        self.calls.push(AdapterCall::CreateNode { tag: tag.to_string() });
        Ok(handle)
    }

    fn create_text_node(&mut self, content: &str) -> Result<NodeHandle> {
        let handle = self.alloc();
        self.nodes.insert(
            handle,
            MemNode {
                tag: None,
                text: Some(content.to_string()),
                props: IndexMap::new(),
                children: Vec::new(),
            },
        );
        self.calls.push(AdapterCall::CreateTextNode {
            content: content.to_string(),
        });
        Ok(handle)
    }

    fn set_property(
        &mut self,
        handle: NodeHandle,
        name: &str,
        value: Option<&Value>,
    ) -> Result<()> {
        self.check(handle)?;
        self.calls.push(AdapterCall::SetProperty {
            handle,
            name: name.to_string(),
            cleared: value.is_none(),
        });
        let node = self.nodes.get_mut(&handle).ok_or(Error::DetachedHandle)?;
        // Text nodes route their content through the reserved prop.
        if node.text.is_some() && name == crate::vnode::TEXT_PROP {
            node.text = value.and_then(|v| v.as_str()).map(str::to_string);
            return Ok(());
        }
        match value {
            Some(v) => {
                node.props.insert(name.to_string(), v.clone());
            }
            None => {
                node.props.shift_remove(name);
            }
        }
        Ok(())
    }

    fn insert_child(&mut self, parent: NodeHandle, child: NodeHandle, index: usize) -> Result<()> {
        self.check(parent)?;
        self.check(child)?;
        self.calls.push(AdapterCall::InsertChild { parent, child, index });
        let node = self.nodes.get_mut(&parent).ok_or(Error::DetachedHandle)?;
        let index = index.min(node.children.len());
        node.children.insert(index, child);
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        self.check(parent)?;
        self.calls.push(AdapterCall::RemoveChild { parent, child });
        let node = self.nodes.get_mut(&parent).ok_or(Error::DetachedHandle)?;
        let pos = node
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or(Error::DetachedHandle)?;
        node.children.remove(pos);
        // Drop the detached subtree from the node table.
        let mut stack = vec![child];
        while let Some(h) = stack.pop() {
            if let Some(n) = self.nodes.remove(&h) {
                stack.extend(n.children);
            }
        }
        Ok(())
    }

    fn reorder_children(&mut self, parent: NodeHandle, order: &[NodeHandle]) -> Result<()> {
        self.check(parent)?;
        self.calls.push(AdapterCall::ReorderChildren { parent });
        let node = self.nodes.get_mut(&parent).ok_or(Error::DetachedHandle)?;
        for handle in order {
            if !node.children.contains(handle) {
                return Err(Error::DetachedHandle);
            }
        }
        if order.len() != node.children.len() {
            return Err(Error::Adapter(format!(
                "reorder size mismatch: {} given, {} present",
                order.len(),
                node.children.len()
            )));
        }
        node.children = order.to_vec();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_insert() {
        let mut adapter = MemoryAdapter::new();
        let root = adapter.create_root();
        let div = adapter.create_node("div").unwrap();
        let text = adapter.create_text_node("hi").unwrap();

        adapter.insert_child(root, div, 0).unwrap();
        adapter.insert_child(div, text, 0).unwrap();

        let snap = adapter.snapshot(root).unwrap();
        assert_eq!(snap.children.len(), 1);
        assert_eq!(snap.children[0].tag.as_deref(), Some("div"));
        assert_eq!(snap.children[0].children[0].text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut adapter = MemoryAdapter::new();
        let root = adapter.create_root();
        let div = adapter.create_node("div").unwrap();
        let inner = adapter.create_node("span").unwrap();
        adapter.insert_child(root, div, 0).unwrap();
        adapter.insert_child(div, inner, 0).unwrap();

        adapter.remove_child(root, div).unwrap();
        assert!(adapter.snapshot(div).is_none());
        assert!(adapter.snapshot(inner).is_none());
        assert!(adapter.snapshot(root).unwrap().children.is_empty());
    }

    #[test]
    fn test_set_property_and_clear() {
        let mut adapter = MemoryAdapter::new();
        let div = adapter.create_node("div").unwrap();

        adapter
            .set_property(div, "class", Some(&Value::Str("a".into())))
            .unwrap();
        assert_eq!(
            adapter.snapshot(div).unwrap().props.get("class"),
            Some(&Value::Str("a".into()))
        );

        adapter.set_property(div, "class", None).unwrap();
        assert!(adapter.snapshot(div).unwrap().props.is_empty());
    }

    #[test]
    fn test_reorder_requires_same_children() {
        let mut adapter = MemoryAdapter::new();
        let root = adapter.create_root();
        let a = adapter.create_node("a").unwrap();
        let b = adapter.create_node("b").unwrap();
        adapter.insert_child(root, a, 0).unwrap();
        adapter.insert_child(root, b, 1).unwrap();

        adapter.reorder_children(root, &[b, a]).unwrap();
        assert_eq!(adapter.children_of(root), vec![b, a]);

        let stranger = adapter.create_node("c").unwrap();
        assert!(adapter.reorder_children(root, &[stranger, a]).is_err());
    }

    #[test]
    fn test_detached_handle_errors() {
        let mut adapter = MemoryAdapter::new();
        let ghost = NodeHandle(999);
        assert!(matches!(
            adapter.set_property(ghost, "x", None),
            Err(Error::DetachedHandle)
        ));
    }
}
