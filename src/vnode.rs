//! Virtual node tree.
//!
//! A [`VNode`] is an immutable per-render description of one rendered element
//! and its subtree. Render callbacks build a fresh tree on every invocation;
//! the previously committed tree is kept only long enough to diff against.
//!
//! Nodes are shared via `Arc` so that diff operations can reference them
//! directly, the way the reconciler hands whole nodes to the patch applier,
//! and so committed trees can be held by a runtime whose flush runs off the
//! constructing thread. The only interior mutability is the live-tree handle
//! slot and the flag byte, both written exclusively by the patch applier
//! during a commit; they are atomics, with `0` as the vacant handle value
//! (adapters never issue handle `0`).

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::render::adapter::NodeHandle;
use crate::types::{NodeFlags, Value};

/// Reserved prop name carrying a text node's content through the adapter's
/// property contract. A text-content change is an `Update` on this prop,
/// never a `Replace`.
pub const TEXT_PROP: &str = "text";

// =============================================================================
// Node kind
// =============================================================================

/// What a node is: an element with a tag, or a text run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(String),
    Text(String),
}

impl NodeKind {
    /// Whether two kinds are reconcilable in place.
    ///
    /// Elements match on tag; text nodes always match each other (content
    /// differences become a prop delta). A kind mismatch forces a `Replace`.
    pub fn matches(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (NodeKind::Element(a), NodeKind::Element(b)) => a == b,
            (NodeKind::Text(_), NodeKind::Text(_)) => true,
            _ => false,
        }
    }
}

// =============================================================================
// VNode
// =============================================================================

/// In-memory description of one rendered node and its subtree.
///
/// Built through the chainable constructors and frozen behind `Arc` once it
/// enters the diff engine:
///
/// ```
/// use weft::vnode::VNode;
///
/// let tree = VNode::element("ul")
///     .prop("class", "items")
///     .child(VNode::element("li").key("a").child(VNode::text("first")))
///     .child(VNode::element("li").key("b").child(VNode::text("second")))
///     .build();
/// assert_eq!(tree.children().len(), 2);
/// ```
#[derive(Debug)]
pub struct VNode {
    kind: NodeKind,
    props: IndexMap<String, Value>,
    children: Vec<Arc<VNode>>,
    key: Option<String>,
    /// Live-tree handle, populated by the patch applier on first commit and
    /// cleared again on remove/replace. `0` means detached.
    handle: AtomicU64,
    flags: AtomicU8,
}

impl VNode {
    /// Start an element node with the given tag.
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Element(tag.into()),
            props: IndexMap::new(),
            children: Vec::new(),
            key: None,
            handle: AtomicU64::new(0),
            flags: AtomicU8::new(0),
        }
    }

    /// Create a text node.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Text(content.into()),
            props: IndexMap::new(),
            children: Vec::new(),
            key: None,
            handle: AtomicU64::new(0),
            flags: AtomicU8::new(0),
        }
    }

    /// Set the sibling-scoped identity key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set a prop. Later writes to the same name overwrite earlier ones.
    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Append one child.
    pub fn child(mut self, child: impl Into<Arc<VNode>>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Append children from an iterator.
    pub fn children_from(mut self, children: impl IntoIterator<Item = Arc<VNode>>) -> Self {
        self.children.extend(children);
        self
    }

    /// Freeze the node for diffing.
    pub fn build(self) -> Arc<VNode> {
        Arc::new(self)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Element tag, if this is an element node.
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element(tag) => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    /// Text content, if this is a text node.
    pub fn text_content(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text(content) => Some(content),
            NodeKind::Element(_) => None,
        }
    }

    pub fn props(&self) -> &IndexMap<String, Value> {
        &self.props
    }

    pub fn children(&self) -> &[Arc<VNode>] {
        &self.children
    }

    pub fn node_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The live handle, if this node has been committed.
    pub fn handle(&self) -> Option<NodeHandle> {
        match self.handle.load(Ordering::Acquire) {
            0 => None,
            raw => Some(NodeHandle(raw)),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.flags_now().contains(NodeFlags::COMMITTED)
    }

    fn flags_now(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    // -------------------------------------------------------------------------
    // Commit bookkeeping (patch applier only)
    // -------------------------------------------------------------------------

    pub(crate) fn attach_handle(&self, handle: NodeHandle) {
        self.handle.store(handle.0, Ordering::Release);
        self.flags
            .store((self.flags_now() | NodeFlags::COMMITTED).bits(), Ordering::Release);
    }

    /// Detach this node and its whole subtree from the live tree.
    pub(crate) fn detach_recursive(&self) {
        self.handle.store(0, Ordering::Release);
        self.flags.store(
            (self.flags_now() - NodeFlags::COMMITTED).bits(),
            Ordering::Release,
        );
        for child in &self.children {
            child.detach_recursive();
        }
    }

    /// Carry the committed handle over from the node this one replaces in
    /// the next committed tree. Used for matched nodes that need no create.
    pub(crate) fn inherit_handle(&self, from: &VNode) {
        if let Some(handle) = from.handle() {
            self.attach_handle(handle);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shape() {
        let node = VNode::element("div")
            .prop("class", "box")
            .prop("hidden", false)
            .key("root")
            .child(VNode::text("hello"))
            .build();

        assert_eq!(node.tag(), Some("div"));
        assert_eq!(node.node_key(), Some("root"));
        assert_eq!(node.props().len(), 2);
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].text_content(), Some("hello"));
        assert!(!node.is_committed());
        assert_eq!(node.handle(), None);
    }

    #[test]
    fn test_kind_matching() {
        let div = NodeKind::Element("div".into());
        let div2 = NodeKind::Element("div".into());
        let span = NodeKind::Element("span".into());
        let text = NodeKind::Text("a".into());
        let text2 = NodeKind::Text("b".into());

        assert!(div.matches(&div2));
        assert!(!div.matches(&span));
        assert!(!div.matches(&text));
        // Text nodes reconcile in place regardless of content.
        assert!(text.matches(&text2));
    }

    #[test]
    fn test_detach_clears_subtree() {
        let child = VNode::text("x").build();
        let parent = VNode::element("div").child(child.clone()).build();

        parent.attach_handle(NodeHandle(1));
        child.attach_handle(NodeHandle(2));
        assert!(parent.is_committed());

        parent.detach_recursive();
        assert_eq!(parent.handle(), None);
        assert_eq!(child.handle(), None);
        assert!(!parent.is_committed());
        assert!(!child.is_committed());
    }

    #[test]
    fn test_prop_last_write_wins() {
        let node = VNode::element("div").prop("id", "a").prop("id", "b").build();
        assert_eq!(node.props().get("id"), Some(&Value::Str("b".into())));
    }

    #[test]
    fn test_trees_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<VNode>>();
    }
}
