#![forbid(unsafe_code)]

//! The Injection directive.
//!
//! Registers content under a key in the host's
//! [`InjectionRegistry`](crate::InjectionRegistry). The key is an
//! expression: when it changes the old registration is withdrawn and a new
//! one is made, so placeholders on the old key fall back to their default.
//! The directive renders nothing at its own position; its Block only marks
//! where it was declared.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use trellis_core::{Disposable, FnDisposable, ReactiveError};
use trellis_render::Block;

use crate::directive::{Directive, DirectiveContext, DirectiveStats, SharedFactory};
use crate::expression::Expression;
use crate::factory::NodeFactory;
use crate::host::{Injected, RegistrationId};
use crate::reactor::{self, Reactive, UpdateQueue};

const NAME: &str = "inject";

/// Configuration of an [`Injection`].
#[derive(Clone)]
pub struct InjectionSpec {
    pub key: Expression,
    pub factory: SharedFactory,
}

impl InjectionSpec {
    pub fn new(key: Expression, factory: impl NodeFactory + 'static) -> Self {
        Self {
            key,
            factory: Rc::new(factory),
        }
    }
}

impl fmt::Debug for InjectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionSpec")
            .field("key", &self.key.source())
            .finish()
    }
}

struct InjectionInner {
    queue: UpdateQueue,
    ctx: DirectiveContext,
    spec: InjectionSpec,
    block: Block,
    registration: RefCell<Option<(String, RegistrationId)>>,
}

impl Reactive for InjectionInner {
    fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    fn update(this: &Rc<Self>) -> Result<(), ReactiveError> {
        let key = this.spec.key.evaluate(&this.ctx.scope, NAME)?.to_string();
        let unchanged = this
            .registration
            .borrow()
            .as_ref()
            .is_some_and(|(current, _)| *current == key);
        if unchanged {
            return Ok(());
        }
        this.withdraw();
        let content = Injected {
            factory: Rc::clone(&this.spec.factory),
            scope: this.ctx.scope.clone(),
        };
        let id = this.ctx.host.injections().register(&key, content);
        *this.registration.borrow_mut() = Some((key, id));
        this.queue.record(|s| s.mounts += 1);
        Ok(())
    }
}

impl InjectionInner {
    fn withdraw(&self) {
        let previous = self.registration.borrow_mut().take();
        if let Some((key, id)) = previous {
            if self.ctx.host.injections().unregister(&key, id) {
                self.queue.record(|s| s.disposals += 1);
            }
        }
    }

    fn dispose(&self) {
        if !self.queue.close() {
            return;
        }
        self.withdraw();
        self.block.dispose();
        tracing::debug!("injection disposed");
    }
}

/// Publishes content to the host's placeholders.
#[derive(Clone)]
pub struct Injection {
    inner: Rc<InjectionInner>,
}

impl Injection {
    /// Place the directive and register under the initial key.
    ///
    /// # Errors
    ///
    /// Tree errors from placing the Block, or the key expression's error.
    pub fn new(ctx: &DirectiveContext, spec: InjectionSpec) -> Result<Self, ReactiveError> {
        let block = ctx.place_block(NAME)?;
        let inner = Rc::new(InjectionInner {
            queue: UpdateQueue::new(NAME, ctx.scheduler.clone()),
            ctx: ctx.clone(),
            spec,
            block,
            registration: RefCell::new(None),
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

    /// The key currently registered.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        self.inner
            .registration
            .borrow()
            .as_ref()
            .map(|(key, _)| key.clone())
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Disposable for Injection {
    fn dispose(&mut self) {
        self.inner.dispose();
    }
}

impl Directive for Injection {
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

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injection")
            .field("spec", &self.inner.spec)
            .field("key", &self.key())
            .finish()
    }
}
