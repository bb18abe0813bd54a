#![forbid(unsafe_code)]

//! The structural directive protocol.
//!
//! Every structural directive follows the same lifecycle:
//!
//! ```text
//! Constructed ──initial mount──▶ Mounted ──update──▶ Mounted ──dispose──▶ Disposed
//!                                   ▲                   │
//!                                   └───────────────────┘
//! ```
//!
//! Construction places an owned [`Block`] according to
//! [`DirectiveContext::position`], subscribes to the directive's dependency
//! paths, then evaluates and mounts synchronously. Later changes reach the
//! directive through its observers; each update re-evaluates and reconciles
//! the Block's content. `Disposed` is terminal.
//!
//! # Invariants
//!
//! 1. A directive's content lies strictly between its Block's anchors.
//! 2. Disposal unsubscribes every path, cancels any pending update, tears
//!    down the Block and runs directive-specific unregistration, once.
//! 3. Mount and dispose counters in [`DirectiveStats`] only move when
//!    content is actually created or torn down.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use trellis_core::{Disposable, ReactiveError};
use trellis_render::{Block, Document, NodeId};
use trellis_runtime::Scheduler;

use crate::choice::ChoiceSpec;
use crate::factory::{Activation, NodeFactory};
use crate::host::Host;
use crate::injection::InjectionSpec;
use crate::placeholder::PlaceholderSpec;
use crate::registry::DirectiveRegistry;
use crate::repeat::LoopSpec;
use crate::scope::Scope;

/// Where a directive's Block goes under `parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// After the existing children.
    Append,
    /// Right before an existing child.
    Before(NodeId),
    /// In place of a marker node, which is disposed.
    Replace(NodeId),
}

/// Everything a directive needs from its surroundings.
#[derive(Clone)]
pub struct DirectiveContext {
    pub document: Document,
    pub parent: NodeId,
    pub position: Position,
    pub host: Host,
    pub scope: Scope,
    /// Deferred updates when present, eager updates otherwise.
    pub scheduler: Option<Scheduler>,
    pub registry: DirectiveRegistry,
}

impl DirectiveContext {
    /// A context appending to `parent` with a fresh host and the builtin
    /// registry.
    #[must_use]
    pub fn new(document: &Document, parent: NodeId, scope: Scope) -> Self {
        Self {
            document: document.clone(),
            parent,
            position: Position::Append,
            host: Host::new(),
            scope,
            scheduler: None,
            registry: DirectiveRegistry::with_builtins(),
        }
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: &Scheduler) -> Self {
        self.scheduler = Some(scheduler.clone());
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: &Host) -> Self {
        self.host = host.clone();
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: &DirectiveRegistry) -> Self {
        self.registry = registry.clone();
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Create the directive's Block and place it.
    pub(crate) fn place_block(&self, label: &str) -> Result<Block, ReactiveError> {
        let block = Block::new(&self.document, label);
        match self.position {
            Position::Append => block.connect(self.parent)?,
            Position::Before(reference) => block.insert_before(self.parent, Some(reference))?,
            Position::Replace(marker) => {
                block.insert_at(self.parent, marker)?;
                self.document.dispose(marker);
            }
        }
        Ok(block)
    }

    /// Build `factory`'s subtree at the end of `block` and activate it with
    /// `scope`. The activator's teardown is attached to the new node.
    pub(crate) fn mount(
        &self,
        block: &Block,
        factory: &dyn NodeFactory,
        scope: &Scope,
    ) -> Result<NodeId, ReactiveError> {
        let (node, activator) = factory.create(&self.document)?;
        if let Err(err) = block.set_content(node) {
            self.document.dispose(node);
            return Err(err.into());
        }
        if let Some(activate) = activator {
            let activation = Activation {
                document: &self.document,
                node,
                host: &self.host,
                scope,
                registry: &self.registry,
                scheduler: self.scheduler.as_ref(),
            };
            match activate(&activation) {
                Ok(teardown) => self.document.attach_disposable(node, teardown)?,
                Err(err) => {
                    self.document.dispose(node);
                    return Err(err);
                }
            }
        }
        Ok(node)
    }
}

impl fmt::Debug for DirectiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveContext")
            .field("parent", &self.parent)
            .field("position", &self.position)
            .field("host", &self.host.id())
            .field("deferred", &self.scheduler.is_some())
            .finish()
    }
}

/// Mount/dispose bookkeeping, observable from tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectiveStats {
    /// Update passes run, the initial evaluation included.
    pub updates: u64,
    /// Content subtrees (or loop instances) mounted.
    pub mounts: u64,
    /// Content subtrees (or loop instances) torn down.
    pub disposals: u64,
    /// Loop instances moved without being recreated.
    pub moves: u64,
}

/// Declarative description of a structural directive.
#[derive(Debug, Clone)]
pub enum DirectiveSpec {
    Loop(LoopSpec),
    Choice(ChoiceSpec),
    Injection(InjectionSpec),
    Placeholder(PlaceholderSpec),
}

impl DirectiveSpec {
    /// Name of the builtin directive this spec configures.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Loop(_) => "loop",
            Self::Choice(_) => "choice",
            Self::Injection(_) => "inject",
            Self::Placeholder(_) => "placeholder",
        }
    }
}

impl From<LoopSpec> for DirectiveSpec {
    fn from(spec: LoopSpec) -> Self {
        Self::Loop(spec)
    }
}

impl From<ChoiceSpec> for DirectiveSpec {
    fn from(spec: ChoiceSpec) -> Self {
        Self::Choice(spec)
    }
}

impl From<InjectionSpec> for DirectiveSpec {
    fn from(spec: InjectionSpec) -> Self {
        Self::Injection(spec)
    }
}

impl From<PlaceholderSpec> for DirectiveSpec {
    fn from(spec: PlaceholderSpec) -> Self {
        Self::Placeholder(spec)
    }
}

/// A live structural directive.
pub trait Directive: Disposable {
    /// Registry name (`"loop"`, `"choice"`, ...).
    fn name(&self) -> &'static str;

    fn is_disposed(&self) -> bool;

    fn stats(&self) -> DirectiveStats;

    /// Errors raised by eager updates since the last call. Deferred updates
    /// report through the scheduler instead.
    fn take_errors(&self) -> Vec<ReactiveError>;

    /// For downcasting to the concrete directive.
    fn as_any(&self) -> &dyn Any;
}

/// Shared factory handle.
pub type SharedFactory = Rc<dyn NodeFactory>;
