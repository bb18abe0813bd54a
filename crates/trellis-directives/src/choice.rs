#![forbid(unsafe_code)]

//! The Choice directive.
//!
//! Mounts the content of the first branch whose condition is truthy, or the
//! default branch when none is. Conditions are evaluated in declaration
//! order; the dependencies of every condition are observed up front.
//!
//! # Invariants
//!
//! 1. At most one branch is mounted at a time.
//! 2. An update that selects the branch already mounted performs no
//!    dispose and no mount.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use trellis_core::{Disposable, FnDisposable, ReactiveError};
use trellis_render::Block;

use crate::directive::{Directive, DirectiveContext, DirectiveStats, SharedFactory};
use crate::expression::Expression;
use crate::factory::NodeFactory;
use crate::reactor::{self, Reactive, UpdateQueue};

const NAME: &str = "choice";

/// One conditional branch.
#[derive(Clone)]
pub struct Branch {
    pub condition: Expression,
    pub factory: SharedFactory,
}

/// Configuration of a [`Choice`].
#[derive(Clone, Default)]
pub struct ChoiceSpec {
    pub branches: Vec<Branch>,
    pub default: Option<SharedFactory>,
}

impl ChoiceSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a branch after the existing ones.
    #[must_use]
    pub fn when(mut self, condition: Expression, factory: impl NodeFactory + 'static) -> Self {
        self.branches.push(Branch {
            condition,
            factory: Rc::new(factory),
        });
        self
    }

    /// Content shown when no condition holds.
    #[must_use]
    pub fn otherwise(mut self, factory: impl NodeFactory + 'static) -> Self {
        self.default = Some(Rc::new(factory));
        self
    }
}

impl fmt::Debug for ChoiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conditions: Vec<&str> = self.branches.iter().map(|b| b.condition.source()).collect();
        f.debug_struct("ChoiceSpec")
            .field("conditions", &conditions)
            .field("default", &self.default.is_some())
            .finish()
    }
}

/// Which content a [`Choice`] shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Nothing,
    Branch(usize),
    Default,
}

struct ChoiceInner {
    queue: UpdateQueue,
    ctx: DirectiveContext,
    spec: ChoiceSpec,
    block: Block,
    selected: Cell<Selection>,
}

impl Reactive for ChoiceInner {
    fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    fn update(this: &Rc<Self>) -> Result<(), ReactiveError> {
        let mut selection = if this.spec.default.is_some() {
            Selection::Default
        } else {
            Selection::Nothing
        };
        for (index, branch) in this.spec.branches.iter().enumerate() {
            if branch.condition.evaluate(&this.ctx.scope, NAME)?.is_truthy() {
                selection = Selection::Branch(index);
                break;
            }
        }
        if selection == this.selected.get() {
            tracing::trace!(?selection, "choice unchanged");
            return Ok(());
        }
        this.switch_to(selection)
    }
}

impl ChoiceInner {
    fn switch_to(&self, selection: Selection) -> Result<(), ReactiveError> {
        let previous = self.selected.replace(Selection::Nothing);
        if previous != Selection::Nothing {
            self.block.clear();
            self.queue.record(|s| s.disposals += 1);
        }
        let factory = match selection {
            Selection::Nothing => None,
            Selection::Branch(index) => self.spec.branches.get(index).map(|b| Rc::clone(&b.factory)),
            Selection::Default => self.spec.default.clone(),
        };
        if let Some(factory) = factory {
            self.ctx.mount(&self.block, factory.as_ref(), &self.ctx.scope)?;
            self.selected.set(selection);
            self.queue.record(|s| s.mounts += 1);
        }
        tracing::debug!(?previous, ?selection, "choice switched");
        Ok(())
    }

    fn dispose(&self) {
        if !self.queue.close() {
            return;
        }
        let had_content = self.selected.replace(Selection::Nothing) != Selection::Nothing;
        self.block.dispose();
        if had_content {
            self.queue.record(|s| s.disposals += 1);
        }
        tracing::debug!("choice disposed");
    }
}

/// Shows the first branch whose condition holds.
#[derive(Clone)]
pub struct Choice {
    inner: Rc<ChoiceInner>,
}

impl Choice {
    /// Place the directive and mount the initially selected branch.
    ///
    /// # Errors
    ///
    /// Tree errors from placing the Block, or the initial evaluation's error.
    pub fn new(ctx: &DirectiveContext, spec: ChoiceSpec) -> Result<Self, ReactiveError> {
        let block = ctx.place_block(NAME)?;
        let inner = Rc::new(ChoiceInner {
            queue: UpdateQueue::new(NAME, ctx.scheduler.clone()),
            ctx: ctx.clone(),
            spec,
            block,
            selected: Cell::new(Selection::Nothing),
        });
        let owner = Rc::clone(&inner);
        ctx.document.attach_disposable(
            inner.block.open(),
            Box::new(FnDisposable::new(move || owner.dispose())),
        )?;
        let dependencies: Vec<_> = inner
            .spec
            .branches
            .iter()
            .flat_map(|b| b.condition.dependencies().iter().cloned())
            .collect();
        reactor::watch(&inner, &ctx.scope, &dependencies);
        if let Err(err) = reactor::initial_update(&inner) {
            inner.dispose();
            return Err(err);
        }
        Ok(Self { inner })
    }

    /// The branch currently mounted.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.inner.selected.get()
    }

    #[must_use]
    pub fn block(&self) -> &Block {
        &self.inner.block
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Disposable for Choice {
    fn dispose(&mut self) {
        self.inner.dispose();
    }
}

impl Directive for Choice {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_disposed(&self) -> bool {
        self.inner.queue.is_closed()
    }

    fn stats(&self) -> DirectiveStats {
        self.inner.queue.stats()
    }

    fn take_errors(&self) -> Vec<ReactiveError> {
        self.inner.queue.take_errors()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Choice")
            .field("spec", &self.inner.spec)
            .field("selection", &self.selection())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ElementFactory;
    use crate::scope::Scope;
    use trellis_render::{Document, NodeId};
    use trellis_runtime::{Object, Value};

    fn setup(data: &Object) -> (Document, NodeId, Choice) {
        let doc = Document::new();
        let root = doc.create_element("div");
        let spec = ChoiceSpec::new()
            .when(Expression::path("admin"), ElementFactory::new("b").text("admin"))
            .when(Expression::path("user"), ElementFactory::new("i").text("user"))
            .otherwise(ElementFactory::new("span").text("guest"));
        let ctx = DirectiveContext::new(&doc, root, Scope::new(data.clone()));
        let choice = Choice::new(&ctx, spec).unwrap();
        (doc, root, choice)
    }

    #[test]
    fn first_truthy_branch_wins() {
        let data = Object::from_pairs([("admin", true), ("user", true)]);
        let (doc, root, choice) = setup(&data);
        assert_eq!(choice.selection(), Selection::Branch(0));
        assert_eq!(doc.visible_markup(root), "<b>admin</b>");
    }

    #[test]
    fn falls_back_to_default() {
        let data = Object::from_pairs([("admin", false)]);
        let (doc, root, choice) = setup(&data);
        assert_eq!(choice.selection(), Selection::Default);
        assert_eq!(doc.visible_markup(root), "<span>guest</span>");

        data.set("user", "yes");
        assert_eq!(doc.visible_markup(root), "<i>user</i>");
        assert_eq!(choice.stats().mounts, 2);
        assert_eq!(choice.stats().disposals, 1);
    }

    #[test]
    fn same_branch_is_a_no_op() {
        let data = Object::from_pairs([("admin", Value::from(1))]);
        let (doc, root, choice) = setup(&data);
        let first = doc.children(root);
        data.set("admin", 2);
        data.set("admin", "still");
        assert_eq!(doc.children(root), first);
        let stats = choice.stats();
        assert_eq!(stats.updates, 3);
        assert_eq!(stats.mounts, 1);
        assert_eq!(stats.disposals, 0);
    }

    #[test]
    fn no_default_renders_nothing() {
        let doc = Document::new();
        let root = doc.create_element("div");
        let data = Object::from_pairs([("on", false)]);
        let spec = ChoiceSpec::new().when(Expression::path("on"), ElementFactory::new("p"));
        let choice = Choice::new(&DirectiveContext::new(&doc, root, Scope::new(data.clone())), spec).unwrap();
        assert_eq!(choice.selection(), Selection::Nothing);
        assert_eq!(doc.visible_markup(root), "");
        data.set("on", true);
        assert_eq!(doc.visible_markup(root), "<p></p>");
        data.set("on", false);
        assert_eq!(doc.visible_markup(root), "");
        assert_eq!(choice.stats().disposals, 1);
    }

    #[test]
    fn dispose_stops_reacting() {
        let data = Object::from_pairs([("admin", true)]);
        let (doc, root, choice) = setup(&data);
        choice.dispose();
        assert!(choice.is_disposed());
        data.set("admin", false);
        assert_eq!(doc.inner_markup(root), "");
        assert_eq!(choice.stats().disposals, 1);
    }
}
