#![forbid(unsafe_code)]

//! Anchor-delimited mutable regions.
//!
//! A [`Block`] is a pair of anchors in the output tree. Everything a
//! directive renders lives strictly between them, so the region can be
//! cleared, moved or torn down without knowing what is inside.
//!
//! # Invariants
//!
//! 1. While not disposed, both anchors are alive, `open` precedes `close`
//!    under the same parent, and managed content lies strictly between them.
//! 2. [`clear`](Block::clear) disposes content nodes one at a time, so a
//!    nested block torn down by its owner's disposable never leaves orphans.
//! 3. [`dispose`](Block::dispose) is idempotent.
//!
//! # Failure Modes
//!
//! - **Unconnected block**: `set_content` on a block whose `close` anchor has
//!   no parent fails with [`TreeError::Detached`].

use std::cell::Cell;
use std::fmt;

use trellis_core::Disposable;

use crate::document::{Document, NodeId, TreeError};

/// A region of the output tree between two anchors.
pub struct Block {
    document: Document,
    open: NodeId,
    close: NodeId,
    disposed: Cell<bool>,
}

impl Block {
    /// Create the anchors. The block is not yet placed in the tree.
    #[must_use]
    pub fn new(document: &Document, label: &str) -> Self {
        let open = document.create_anchor(label);
        let close = document.create_anchor(format!("/{label}"));
        Self {
            document: document.clone(),
            open,
            close,
            disposed: Cell::new(false),
        }
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn open(&self) -> NodeId {
        self.open
    }

    #[must_use]
    pub fn close(&self) -> NodeId {
        self.close
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Parent both anchors live under.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.document.parent(self.close)
    }

    /// Append both anchors as adjacent children of `parent`.
    pub fn connect(&self, parent: NodeId) -> Result<(), TreeError> {
        self.document.append_child(parent, self.open)?;
        self.document.append_child(parent, self.close)
    }

    /// Put the block where `reference` is: `close` replaces `reference` and
    /// `open` goes right before it. `reference` ends up detached.
    pub fn insert_at(&self, parent: NodeId, reference: NodeId) -> Result<(), TreeError> {
        self.document.replace_child(parent, self.close, reference)?;
        self.document.insert_before(parent, self.open, Some(self.close))
    }

    /// Place the block right before `reference` (or last when `None`).
    pub fn insert_before(&self, parent: NodeId, reference: Option<NodeId>) -> Result<(), TreeError> {
        self.document.insert_before(parent, self.open, reference)?;
        self.document.insert_before(parent, self.close, reference)
    }

    /// Insert `node` right before `close`; content accumulates in order.
    pub fn set_content(&self, node: NodeId) -> Result<(), TreeError> {
        let parent = self
            .document
            .parent(self.close)
            .ok_or(TreeError::Detached(self.close))?;
        self.document.insert_before(parent, node, Some(self.close))
    }

    /// Nodes strictly between the anchors, in document order.
    #[must_use]
    pub fn content(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.document.next_sibling(self.open);
        while let Some(node) = cursor {
            if node == self.close {
                break;
            }
            out.push(node);
            cursor = self.document.next_sibling(node);
        }
        out
    }

    /// Dispose every node between the anchors.
    pub fn clear(&self) {
        let mut cleared = 0usize;
        loop {
            if !self.document.is_alive(self.close) {
                break;
            }
            match self.document.next_sibling(self.open) {
                Some(node) if node != self.close => {
                    self.document.dispose(node);
                    cleared += 1;
                }
                _ => break,
            }
        }
        if cleared > 0 {
            tracing::trace!(open = %self.open, cleared, "block cleared");
        }
    }

    /// Move the anchors and everything between them before `reference`
    /// under the same parent (last when `None`).
    pub fn move_before(&self, reference: Option<NodeId>) -> Result<(), TreeError> {
        let parent = self
            .document
            .parent(self.open)
            .ok_or(TreeError::Detached(self.open))?;
        let mut nodes = vec![self.open];
        nodes.extend(self.content());
        nodes.push(self.close);
        if reference.is_some_and(|r| nodes.contains(&r)) {
            return Ok(());
        }
        for node in nodes {
            self.document.insert_before(parent, node, reference)?;
        }
        Ok(())
    }

    /// Clear, then remove both anchors. A second call does nothing.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.clear();
        self.document.dispose(self.open);
        self.document.dispose(self.close);
    }
}

impl Disposable for Block {
    fn dispose(&mut self) {
        Block::dispose(self);
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("open", &self.open)
            .field("close", &self.close)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
