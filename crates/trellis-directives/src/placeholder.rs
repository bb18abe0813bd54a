#![forbid(unsafe_code)]

//! The Placeholder directive.
//!
//! Renders the content registered under a key by an
//! [`Injection`](crate::Injection) on the same host, or its default content
//! when nothing is registered. It watches both the key expression and the
//! registry entry for the current key, so content appears, changes and
//! falls back without the placeholder being rebuilt.
//!
//! # Invariants
//!
//! 1. Exactly one registry subscription is held, for the current key.
//! 2. Content is only remounted when the visible registration (or the
//!    fallback to default) actually changes.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use trellis_core::{Disposable, FnDisposable, ReactiveError};
use trellis_render::Block;
use trellis_runtime::Subscription;

use crate::directive::{Directive, DirectiveContext, DirectiveStats, SharedFactory};
use crate::expression::Expression;
use crate::factory::NodeFactory;
use crate::host::Injected;
use crate::reactor::{self, Reactive, UpdateQueue};

const NAME: &str = "placeholder";

/// Configuration of a [`Placeholder`].
#[derive(Clone)]
pub struct PlaceholderSpec {
    pub key: Expression,
    pub default: Option<SharedFactory>,
}

impl PlaceholderSpec {
    #[must_use]
    pub fn new(key: Expression) -> Self {
        Self { key, default: None }
    }

    #[must_use]
    pub fn default_content(mut self, factory: impl NodeFactory + 'static) -> Self {
        self.default = Some(Rc::new(factory));
        self
    }
}

impl fmt::Debug for PlaceholderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceholderSpec")
            .field("key", &self.key.source())
            .field("default", &self.default.is_some())
            .finish()
    }
}

enum Shown {
    Nothing,
    Default,
    Injected(Injected),
}

impl Shown {
    fn same_as(&self, other: &Shown) -> bool {
        match (self, other) {
            (Shown::Nothing, Shown::Nothing) | (Shown::Default, Shown::Default) => true,
            (Shown::Injected(a), Shown::Injected(b)) => {
                a.same_factory(b) && a.scope.bindings().ptr_eq(b.scope.bindings())
            }
            _ => false,
        }
    }
}

struct PlaceholderInner {
    queue: UpdateQueue,
    ctx: DirectiveContext,
    spec: PlaceholderSpec,
    block: Block,
    watched: RefCell<Option<(String, Subscription)>>,
    shown: RefCell<Shown>,
}

impl Reactive for PlaceholderInner {
    fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    fn update(this: &Rc<Self>) -> Result<(), ReactiveError> {
        let key = this.spec.key.evaluate(&this.ctx.scope, NAME)?.to_string();
        Self::watch_key(this, &key);

        let next = match this.ctx.host.injections().lookup(&key) {
            Some(injected) => Shown::Injected(injected),
            None if this.spec.default.is_some() => Shown::Default,
            None => Shown::Nothing,
        };
        if this.shown.borrow().same_as(&next) {
            return Ok(());
        }

        let previous = std::mem::replace(&mut *this.shown.borrow_mut(), Shown::Nothing);
        if !matches!(previous, Shown::Nothing) {
            this.block.clear();
            this.queue.record(|s| s.disposals += 1);
        }
        let mounted = match &next {
            Shown::Nothing => false,
            Shown::Default => match &this.spec.default {
                Some(factory) => {
                    this.ctx.mount(&this.block, factory.as_ref(), &this.ctx.scope)?;
                    true
                }
                None => false,
            },
            Shown::Injected(injected) => {
                this.ctx.mount(&this.block, injected.factory.as_ref(), &injected.scope)?;
                true
            }
        };
        if mounted {
            this.queue.record(|s| s.mounts += 1);
        }
        tracing::debug!(key = %key, injected = matches!(next, Shown::Injected(_)), "placeholder content changed");
        *this.shown.borrow_mut() = next;
        Ok(())
    }
}

impl PlaceholderInner {
    fn watch_key(this: &Rc<Self>, key: &str) {
        let current = this.watched.borrow().as_ref().is_some_and(|(k, _)| k == key);
        if current {
            return;
        }
        let observer = this
            .ctx
            .host
            .injections()
            .observe(key, this.queue.scheduler());
        let subscription = reactor::listen(this, &observer);
        let previous = this.watched.borrow_mut().replace((key.to_string(), subscription));
        drop(previous);
    }

    fn dispose(&self) {
        if !self.queue.close() {
            return;
        }
        let watched = self.watched.borrow_mut().take();
        drop(watched);
        let previous = std::mem::replace(&mut *self.shown.borrow_mut(), Shown::Nothing);
        self.block.dispose();
        if !matches!(previous, Shown::Nothing) {
            self.queue.record(|s| s.disposals += 1);
        }
        tracing::debug!("placeholder disposed");
    }
}

/// Renders injected content for a key, or a default.
#[derive(Clone)]
pub struct Placeholder {
    inner: Rc<PlaceholderInner>,
}

impl Placeholder {
    /// Place the directive and render the initial content.
    ///
    /// # Errors
    ///
    /// Tree errors from placing the Block, or the initial evaluation's error.
    pub fn new(ctx: &DirectiveContext, spec: PlaceholderSpec) -> Result<Self, ReactiveError> {
        let block = ctx.place_block(NAME)?;
        let inner = Rc::new(PlaceholderInner {
            queue: UpdateQueue::new(NAME, ctx.scheduler.clone()),
            ctx: ctx.clone(),
            spec,
            block,
            watched: RefCell::new(None),
            shown: RefCell::new(Shown::Nothing),
        });
        let owner = Rc::clone(&inner);
        ctx.document.attach_disposable(
            inner.block.open(),
            Box::new(FnDisposable::new(move || owner.dispose())),
        )?;
        reactor::watch(&inner, &ctx.scope, inner.spec.key.dependencies());
        if let Err(err) = reactor::initial_update(&inner) {
            inner.dispose();
            return Err(err);
        }
        Ok(Self { inner })
    }

    /// Key currently watched.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        self.inner.watched.borrow().as_ref().map(|(key, _)| key.clone())
    }

    #[must_use]
    pub fn is_showing_default(&self) -> bool {
        matches!(*self.inner.shown.borrow(), Shown::Default)
    }

    #[must_use]
    pub fn is_showing_injected(&self) -> bool {
        matches!(*self.inner.shown.borrow(), Shown::Injected(_))
    }

    #[must_use]
    pub fn block(&self) -> &Block {
        &self.inner.block
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Disposable for Placeholder {
    fn dispose(&mut self) {
        self.inner.dispose();
    }
}

impl Directive for Placeholder {
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

impl fmt::Debug for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Placeholder")
            .field("spec", &self.inner.spec)
            .field("key", &self.key())
            .field("default", &self.is_showing_default())
            .finish()
    }
}
