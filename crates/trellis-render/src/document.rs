#![forbid(unsafe_code)]

//! Arena-backed output tree.
//!
//! The [`Document`] stores nodes in a slot arena and hands out compact
//! [`NodeId`]s instead of pointers, so parent/child links never form `Rc`
//! cycles. Each id carries a generation: once a node is disposed its slot is
//! reused under a new generation and the old id reports
//! [`TreeError::StaleNode`].
//!
//! # Node kinds
//!
//! | Kind       | Children | Markup                  |
//! |------------|----------|-------------------------|
//! | `Element`  | yes      | `<tag a="v">...</tag>`  |
//! | `Text`     | no       | escaped text            |
//! | `Anchor`   | no       | `<!--label-->`          |
//! | `Fragment` | yes      | children only; inserting a fragment moves its children |
//!
//! # Disposal
//!
//! [`Document::dispose`] detaches a node and frees its subtree. Disposables
//! attached to nodes of that subtree run first, with no borrow of the tree
//! held, so they may freely edit the document (a directive tearing down its
//! own block, for example). Teardown failures are isolated per disposable.
//!
//! # Usage
//!
//! ```
//! use trellis_render::Document;
//!
//! let doc = Document::new();
//! let list = doc.create_element("ul");
//! let item = doc.create_element("li");
//! let text = doc.create_text("milk");
//! doc.append_child(item, text).unwrap();
//! doc.append_child(list, item).unwrap();
//! assert_eq!(doc.markup(list), "<ul><li>milk</li></ul>");
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use trellis_core::{Disposable, DisposeBag, ReactiveError};

/// Handle to a node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Slot generation at creation time.
    #[inline]
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
    /// Invisible marker delimiting a region.
    Anchor(String),
    /// Transient container whose children move on insertion.
    Fragment,
}

impl NodeKind {
    fn is_container(&self) -> bool {
        matches!(self, Self::Element { .. } | Self::Fragment)
    }
}

/// Structural errors raised by tree edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The id refers to a disposed node.
    StaleNode(NodeId),
    /// `child` is not a child of `parent`.
    NotAChild { parent: NodeId, child: NodeId },
    /// The edit would make a node its own ancestor.
    HierarchyCycle { parent: NodeId, child: NodeId },
    /// Text and anchors cannot hold children.
    NotAContainer(NodeId),
    /// The node has no parent.
    Detached(NodeId),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleNode(id) => write!(f, "node {id} has been disposed"),
            Self::NotAChild { parent, child } => {
                write!(f, "node {child} is not a child of {parent}")
            }
            Self::HierarchyCycle { parent, child } => {
                write!(f, "inserting {child} into {parent} would create a cycle")
            }
            Self::NotAContainer(id) => write!(f, "node {id} cannot hold children"),
            Self::Detached(id) => write!(f, "node {id} is not attached to a parent"),
        }
    }
}

impl std::error::Error for TreeError {}

impl From<TreeError> for ReactiveError {
    fn from(err: TreeError) -> Self {
        ReactiveError::Protocol(err.to_string())
    }
}

struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    disposables: Vec<Box<dyn Disposable>>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Default)]
struct Tree {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
}

impl Tree {
    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            parent: None,
            children: Vec::new(),
            disposables: Vec::new(),
        };
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn free(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.generation == id.generation && slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(id.index);
                self.live -= 1;
            }
        }
    }

    fn get(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(TreeError::StaleNode(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(TreeError::StaleNode(id))
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.get(node).ok().and_then(|n| n.parent) {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn unlink(&mut self, node: NodeId) -> Result<(), TreeError> {
        let parent = self.get(node)?.parent;
        if let Some(parent) = parent {
            if let Ok(p) = self.get_mut(parent) {
                p.children.retain(|c| *c != node);
            }
            self.get_mut(node)?.parent = None;
        }
        Ok(())
    }

    fn insert(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) -> Result<(), TreeError> {
        if !self.get(parent)?.kind.is_container() {
            return Err(TreeError::NotAContainer(parent));
        }
        self.get(node)?;
        if let Some(reference) = reference {
            if reference == node {
                return Ok(());
            }
            if self.get(reference)?.parent != Some(parent) {
                return Err(TreeError::NotAChild {
                    parent,
                    child: reference,
                });
            }
        }
        if self.is_ancestor(node, parent) {
            return Err(TreeError::HierarchyCycle {
                parent,
                child: node,
            });
        }
        let moved: Vec<NodeId> = if matches!(self.get(node)?.kind, NodeKind::Fragment) {
            let children = std::mem::take(&mut self.get_mut(node)?.children);
            for child in &children {
                self.get_mut(*child)?.parent = None;
            }
            children
        } else {
            self.unlink(node)?;
            vec![node]
        };
        for child in &moved {
            self.get_mut(*child)?.parent = Some(parent);
        }
        let p = self.get_mut(parent)?;
        let at = match reference {
            Some(reference) => p
                .children
                .iter()
                .position(|c| *c == reference)
                .unwrap_or(p.children.len()),
            None => p.children.len(),
        };
        for (offset, child) in moved.into_iter().enumerate() {
            p.children.insert(at + offset, child);
        }
        Ok(())
    }

    fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Ok(node) = self.get(id) {
                out.push(id);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    fn write_markup(&self, id: NodeId, anchors: bool, out: &mut String) {
        let Ok(node) = self.get(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                for child in &node.children {
                    self.write_markup(*child, anchors, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            NodeKind::Text(text) => escape_into(text, false, out),
            NodeKind::Anchor(label) => {
                if anchors {
                    out.push_str("<!--");
                    out.push_str(label);
                    out.push_str("-->");
                }
            }
            NodeKind::Fragment => {
                for child in &node.children {
                    self.write_markup(*child, anchors, out);
                }
            }
        }
    }

    fn write_text(&self, id: NodeId, out: &mut String) {
        let Ok(node) = self.get(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Anchor(_) => {}
            NodeKind::Element { .. } | NodeKind::Fragment => {
                for child in &node.children {
                    self.write_text(*child, out);
                }
            }
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

/// Shared handle to an output tree.
///
/// Cloning creates another handle to the same tree.
#[derive(Clone, Default)]
pub struct Document {
    tree: Rc<RefCell<Tree>>,
}

impl Document {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether both handles refer to the same tree.
    #[must_use]
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree)
    }

    pub fn create_element(&self, tag: impl Into<String>) -> NodeId {
        self.tree.borrow_mut().alloc(NodeKind::Element {
            tag: tag.into(),
            attrs: BTreeMap::new(),
        })
    }

    pub fn create_text(&self, text: impl Into<String>) -> NodeId {
        self.tree.borrow_mut().alloc(NodeKind::Text(text.into()))
    }

    pub fn create_anchor(&self, label: impl Into<String>) -> NodeId {
        self.tree.borrow_mut().alloc(NodeKind::Anchor(label.into()))
    }

    pub fn create_fragment(&self) -> NodeId {
        self.tree.borrow_mut().alloc(NodeKind::Fragment)
    }

    /// Whether `node` has not been disposed.
    #[must_use]
    pub fn is_alive(&self, node: NodeId) -> bool {
        self.tree.borrow().get(node).is_ok()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.borrow().live
    }

    pub fn kind(&self, node: NodeId) -> Result<NodeKind, TreeError> {
        Ok(self.tree.borrow().get(node)?.kind.clone())
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().get(node).ok().and_then(|n| n.parent)
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .get(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.sibling(node, 1)
    }

    #[must_use]
    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.sibling(node, -1)
    }

    fn sibling(&self, node: NodeId, step: isize) -> Option<NodeId> {
        let tree = self.tree.borrow();
        let parent = tree.get(node).ok()?.parent?;
        let siblings = &tree.get(parent).ok()?.children;
        let at = siblings.iter().position(|c| *c == node)?;
        let target = at.checked_add_signed(step)?;
        siblings.get(target).copied()
    }

    /// Append `node` as the last child of `parent`, detaching it from any
    /// previous parent.
    pub fn append_child(&self, parent: NodeId, node: NodeId) -> Result<(), TreeError> {
        self.tree.borrow_mut().insert(parent, node, None)
    }

    /// Insert `node` before `reference` (or last when `None`).
    pub fn insert_before(
        &self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), TreeError> {
        self.tree.borrow_mut().insert(parent, node, reference)
    }

    /// Put `node` where `old` is and detach `old`.
    pub fn replace_child(&self, parent: NodeId, node: NodeId, old: NodeId) -> Result<(), TreeError> {
        let mut tree = self.tree.borrow_mut();
        if node == old {
            return Ok(());
        }
        tree.insert(parent, node, Some(old))?;
        tree.unlink(old)
    }

    /// Remove `node` from its parent. Detaching an unparented node is a no-op.
    pub fn detach(&self, node: NodeId) -> Result<(), TreeError> {
        self.tree.borrow_mut().unlink(node)
    }

    /// Attach a disposable run when `node` (or an ancestor) is disposed.
    pub fn attach_disposable(&self, node: NodeId, disposable: Box<dyn Disposable>) -> Result<(), TreeError> {
        self.tree.borrow_mut().get_mut(node)?.disposables.push(disposable);
        Ok(())
    }

    /// Detach `node` and free its subtree.
    ///
    /// Attached disposables run first, deepest nodes first, without any
    /// borrow of the tree held. Disposing a stale id is a no-op.
    pub fn dispose(&self, node: NodeId) {
        let mut bag = DisposeBag::new();
        {
            let mut tree = self.tree.borrow_mut();
            if tree.get(node).is_err() {
                return;
            }
            let _ = tree.unlink(node);
            for id in tree.subtree(node) {
                if let Ok(n) = tree.get_mut(id) {
                    for disposable in n.disposables.drain(..) {
                        bag.push(disposable);
                    }
                }
            }
        }
        let teardowns = bag.len();
        bag.dispose();
        let mut tree = self.tree.borrow_mut();
        if tree.get(node).is_ok() {
            let _ = tree.unlink(node);
            let freed = tree.subtree(node);
            for id in &freed {
                tree.free(*id);
            }
            tracing::trace!(node = %node, freed = freed.len(), teardowns, "disposed subtree");
        }
    }

    pub fn set_text(&self, node: NodeId, text: impl Into<String>) -> Result<(), TreeError> {
        let mut tree = self.tree.borrow_mut();
        match &mut tree.get_mut(node)?.kind {
            NodeKind::Text(current) => {
                *current = text.into();
                Ok(())
            }
            _ => Err(TreeError::NotAContainer(node)),
        }
    }

    /// Text of a text node.
    #[must_use]
    pub fn text(&self, node: NodeId) -> Option<String> {
        match &self.tree.borrow().get(node).ok()?.kind {
            NodeKind::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn set_attribute(
        &self,
        node: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), TreeError> {
        let mut tree = self.tree.borrow_mut();
        match &mut tree.get_mut(node)?.kind {
            NodeKind::Element { attrs, .. } => {
                attrs.insert(name.into(), value.into());
                Ok(())
            }
            _ => Err(TreeError::NotAContainer(node)),
        }
    }

    #[must_use]
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.tree.borrow().get(node).ok()?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).cloned(),
            _ => None,
        }
    }

    /// Serialize `node` with anchors rendered as comments.
    #[must_use]
    pub fn markup(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().write_markup(node, true, &mut out);
        out
    }

    /// Serialize the children of `node` with anchors rendered as comments.
    #[must_use]
    pub fn inner_markup(&self, node: NodeId) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        if let Ok(n) = tree.get(node) {
            for child in &n.children {
                tree.write_markup(*child, true, &mut out);
            }
        }
        out
    }

    /// Serialize the children of `node` without anchors.
    #[must_use]
    pub fn visible_markup(&self, node: NodeId) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        if let Ok(n) = tree.get(node) {
            for child in &n.children {
                tree.write_markup(*child, false, &mut out);
            }
        }
        out
    }

    /// Concatenated text of the subtree.
    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().write_text(node, &mut out);
        out
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use trellis_core::FnDisposable;

    #[test]
    fn append_and_markup() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "class", "a\"b").unwrap();
        let text = doc.create_text("1 < 2");
        doc.append_child(div, text).unwrap();
        assert_eq!(doc.markup(div), "<div class=\"a&quot;b\">1 &lt; 2</div>");
        assert_eq!(doc.text_content(div), "1 < 2");
    }

    #[test]
    fn anchors_render_as_comments() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let a = doc.create_anchor("x");
        doc.append_child(div, a).unwrap();
        assert_eq!(doc.inner_markup(div), "<!--x-->");
        assert_eq!(doc.visible_markup(div), "");
    }

    #[test]
    fn insert_before_and_siblings() {
        let doc = Document::new();
        let ul = doc.create_element("ul");
        let a = doc.create_text("a");
        let c = doc.create_text("c");
        let b = doc.create_text("b");
        doc.append_child(ul, a).unwrap();
        doc.append_child(ul, c).unwrap();
        doc.insert_before(ul, b, Some(c)).unwrap();
        assert_eq!(doc.children(ul), vec![a, b, c]);
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.previous_sibling(a), None);
        assert_eq!(doc.next_sibling(c), None);
    }

    #[test]
    fn inserting_moves_from_previous_parent() {
        let doc = Document::new();
        let left = doc.create_element("l");
        let right = doc.create_element("r");
        let t = doc.create_text("t");
        doc.append_child(left, t).unwrap();
        doc.append_child(right, t).unwrap();
        assert!(doc.children(left).is_empty());
        assert_eq!(doc.parent(t), Some(right));
    }

    #[test]
    fn fragment_children_move_on_insert() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let frag = doc.create_fragment();
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        doc.append_child(frag, a).unwrap();
        doc.append_child(frag, b).unwrap();
        doc.append_child(div, frag).unwrap();
        assert_eq!(doc.children(div), vec![a, b]);
        assert!(doc.children(frag).is_empty());
        assert_eq!(doc.parent(frag), None);
    }

    #[test]
    fn errors() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let inner = doc.create_element("span");
        let text = doc.create_text("t");
        let stray = doc.create_text("s");
        doc.append_child(div, inner).unwrap();

        assert_eq!(doc.append_child(text, stray), Err(TreeError::NotAContainer(text)));
        assert_eq!(
            doc.append_child(inner, div),
            Err(TreeError::HierarchyCycle { parent: inner, child: div })
        );
        assert_eq!(
            doc.insert_before(div, stray, Some(text)),
            Err(TreeError::NotAChild { parent: div, child: text })
        );
        doc.dispose(stray);
        assert_eq!(doc.append_child(div, stray), Err(TreeError::StaleNode(stray)));
        let err: ReactiveError = TreeError::StaleNode(stray).into();
        assert!(err.is_protocol());
    }

    #[test]
    fn replace_child_swaps_in_place() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        let z = doc.create_text("z");
        doc.append_child(div, a).unwrap();
        doc.append_child(div, b).unwrap();
        doc.replace_child(div, z, a).unwrap();
        assert_eq!(doc.children(div), vec![z, b]);
        assert_eq!(doc.parent(a), None);
        assert!(doc.is_alive(a));
    }

    #[test]
    fn dispose_frees_subtree_and_bumps_generation() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let child = doc.create_text("x");
        doc.append_child(div, child).unwrap();
        assert_eq!(doc.node_count(), 2);
        doc.dispose(div);
        assert_eq!(doc.node_count(), 0);
        assert!(!doc.is_alive(child));

        let reused = doc.create_text("y");
        assert!(reused.index() == div.index() || reused.index() == child.index());
        assert_ne!(reused, div);
        assert_ne!(reused, child);
        assert_eq!(doc.text(child), None);
        doc.dispose(div);
    }

    #[test]
    fn dispose_runs_attached_disposables_once() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let leaf = doc.create_text("x");
        doc.append_child(div, leaf).unwrap();
        let ran = Rc::new(Cell::new(0));
        for node in [div, leaf] {
            let r = Rc::clone(&ran);
            doc.attach_disposable(node, Box::new(FnDisposable::new(move || r.set(r.get() + 1))))
                .unwrap();
        }
        doc.dispose(div);
        doc.dispose(div);
        assert_eq!(ran.get(), 2);
    }

    #[test]
    fn disposable_may_edit_document() {
        let doc = Document::new();
        let root = doc.create_element("root");
        let victim = doc.create_text("v");
        let other = doc.create_text("o");
        doc.append_child(root, victim).unwrap();
        doc.append_child(root, other).unwrap();
        let d = doc.clone();
        doc.attach_disposable(victim, Box::new(FnDisposable::new(move || d.dispose(other))))
            .unwrap();
        doc.dispose(victim);
        assert!(doc.children(root).is_empty());
        assert_eq!(doc.node_count(), 1);
    }

    #[test]
    fn set_text_only_on_text_nodes() {
        let doc = Document::new();
        let text = doc.create_text("a");
        doc.set_text(text, "b").unwrap();
        assert_eq!(doc.text(text).as_deref(), Some("b"));
        let div = doc.create_element("div");
        assert!(doc.set_text(div, "x").is_err());
        assert_eq!(doc.attribute(div, "id"), None);
    }
}
