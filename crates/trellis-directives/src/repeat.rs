#![forbid(unsafe_code)]

//! The Loop directive.
//!
//! Renders one instance of a child factory per item of an iterable and keeps
//! the instances in step with the iterable across updates.
//!
//! # Design
//!
//! Each instance owns a nested [`Block`] inside the loop's Block plus a child
//! [`Scope`] binding the item (and optionally its index). Reconciliation
//! matches new items to mounted instances by key:
//!
//! - the key is the key expression evaluated in the item's scope, or the
//!   item itself (objects and lists by identity, primitives by value);
//! - each instance watches its key expression, so mutating a key field of
//!   a mounted item re-keys it on the next update;
//! - the n-th occurrence of a key matches the n-th mounted instance with
//!   that key, so duplicates are reused positionally;
//! - unmatched instances are disposed, unmatched items are mounted;
//! - reused instances on the longest increasing subsequence of their old
//!   positions stay put, every other reused instance is moved.
//!
//! # Invariants
//!
//! 1. After an update, instance blocks appear in iterable order.
//! 2. An instance whose key survives is never recreated; only its item and
//!    index bindings are advanced.
//! 3. Removal and insertion of one update happen in the same pass.
//!
//! # Failure Modes
//!
//! - **Non-iterable value**: anything other than a list or null fails the
//!   update with [`ReactiveError::Evaluation`]; mounted instances are kept.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use trellis_core::{Disposable, FnDisposable, ReactiveError};
use trellis_render::{Block, NodeId, TreeError};
use trellis_runtime::{Identity, Value};

use crate::directive::{Directive, DirectiveContext, DirectiveStats, SharedFactory};
use crate::expression::Expression;
use crate::factory::NodeFactory;
use crate::reactor::{self, Reactive, UpdateQueue};
use crate::scope::{Scope, ScopeSubscription};

const NAME: &str = "loop";

/// Configuration of a [`Loop`].
#[derive(Clone)]
pub struct LoopSpec {
    pub iterable: Expression,
    pub key: Option<Expression>,
    pub item_name: String,
    pub index_name: Option<String>,
    pub factory: SharedFactory,
}

impl LoopSpec {
    /// Iterate `iterable`, binding each item as `item`.
    pub fn new(iterable: Expression, factory: impl NodeFactory + 'static) -> Self {
        Self {
            iterable,
            key: None,
            item_name: "item".to_string(),
            index_name: None,
            factory: Rc::new(factory),
        }
    }

    #[must_use]
    pub fn key(mut self, key: Expression) -> Self {
        self.key = Some(key);
        self
    }

    #[must_use]
    pub fn item_name(mut self, name: impl Into<String>) -> Self {
        self.item_name = name.into();
        self
    }

    #[must_use]
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }
}

impl fmt::Debug for LoopSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopSpec")
            .field("iterable", &self.iterable.source())
            .field("key", &self.key.as_ref().map(Expression::source))
            .field("item_name", &self.item_name)
            .field("index_name", &self.index_name)
            .finish()
    }
}

/// Reconciliation key of one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoopKey {
    Null,
    Bool(bool),
    /// Numbers compare by bit pattern, with `-0.0` folded into `0.0`.
    Number(u64),
    String(Rc<str>),
    Identity(Identity),
    Opaque(usize),
}

impl From<&Value> for LoopKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(if *n == 0.0 { 0 } else { n.to_bits() }),
            Value::String(s) => Self::String(Rc::clone(s)),
            Value::Object(o) => Self::Identity(o.id()),
            Value::List(l) => Self::Identity(l.id()),
            Value::Opaque(o) => Self::Opaque(o.addr()),
        }
    }
}

/// Stable identity of a mounted instance, for observing reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

struct Instance {
    id: InstanceId,
    key: LoopKey,
    scope: Scope,
    block: Rc<Block>,
    key_watches: Vec<ScopeSubscription>,
}

impl Instance {
    fn dispose(self) {
        drop(self.key_watches);
        self.block.dispose();
    }
}

struct LoopInner {
    queue: UpdateQueue,
    ctx: DirectiveContext,
    spec: LoopSpec,
    block: Block,
    instances: RefCell<Vec<Instance>>,
    next_instance: Cell<u64>,
}

impl Reactive for LoopInner {
    fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    fn update(this: &Rc<Self>) -> Result<(), ReactiveError> {
        let value = this.spec.iterable.evaluate(&this.ctx.scope, NAME)?;
        let items = match value {
            Value::Null => Vec::new(),
            Value::List(list) => list.to_vec(),
            other => {
                return Err(ReactiveError::evaluation(
                    NAME,
                    this.spec.iterable.source(),
                    format!("{other:?} is not iterable"),
                ));
            }
        };
        this.reconcile(items)
    }
}

impl LoopInner {
    fn key_of(&self, item: &Value, index: usize) -> Result<LoopKey, ReactiveError> {
        let Some(key) = &self.spec.key else {
            return Ok(LoopKey::from(item));
        };
        let probe = self.ctx.scope.child();
        probe.define(self.spec.item_name.as_str(), item.clone());
        if let Some(index_name) = &self.spec.index_name {
            probe.define(index_name.as_str(), index);
        }
        Ok(LoopKey::from(&key.evaluate(&probe, NAME)?))
    }

    fn reconcile(self: &Rc<Self>, items: Vec<Value>) -> Result<(), ReactiveError> {
        let keys = items
            .iter()
            .enumerate()
            .map(|(index, item)| self.key_of(item, index))
            .collect::<Result<Vec<_>, _>>()?;
        let parent = self
            .block
            .parent()
            .ok_or(TreeError::Detached(self.block.close()))?;

        let old = std::mem::take(&mut *self.instances.borrow_mut());

        // Positional matching of duplicate keys: occurrences queue up in
        // old order and are consumed front to back.
        let mut pool: HashMap<&LoopKey, SmallVec<[usize; 1]>> = HashMap::new();
        for (index, instance) in old.iter().enumerate().rev() {
            pool.entry(&instance.key).or_default().push(index);
        }
        let sources: Vec<Option<usize>> = keys
            .iter()
            .map(|key| pool.get_mut(key).and_then(SmallVec::pop))
            .collect();
        drop(pool);

        let mut slots: Vec<Option<Instance>> = old.into_iter().map(Some).collect();
        let mut reused = vec![false; slots.len()];
        for source in sources.iter().flatten() {
            reused[*source] = true;
        }

        let mut disposed = 0u64;
        for (index, slot) in slots.iter_mut().enumerate() {
            if reused[index] {
                continue;
            }
            if let Some(instance) = slot.take() {
                tracing::trace!(instance = instance.id.0, "loop instance removed");
                instance.dispose();
                disposed += 1;
            }
        }

        let old_positions: Vec<usize> = sources.iter().flatten().copied().collect();
        let mut keep_in_place = vec![false; slots.len()];
        for i in longest_increasing_subsequence(&old_positions) {
            keep_in_place[old_positions[i]] = true;
        }

        // Walk backwards so every placement can use its successor's open
        // anchor as the reference.
        let mut reference = self.block.close();
        let mut next: Vec<Instance> = Vec::with_capacity(items.len());
        let mut mounted = 0u64;
        let mut moved = 0u64;
        let mut failure: Option<ReactiveError> = None;
        for position in (0..items.len()).rev() {
            let item = &items[position];
            let reusable = sources[position].and_then(|source| slots[source].take().map(|i| (source, i)));
            match reusable {
                Some((source, instance)) => {
                    if !keep_in_place[source] {
                        if let Err(err) = instance.block.move_before(Some(reference)) {
                            failure = Some(err.into());
                            next.push(instance);
                            break;
                        }
                        moved += 1;
                    }
                    self.bind(&instance.scope, item, position);
                    reference = instance.block.open();
                    next.push(instance);
                }
                None => match self.mount_instance(parent, reference, keys[position].clone(), item, position) {
                    Ok(instance) => {
                        mounted += 1;
                        reference = instance.block.open();
                        next.push(instance);
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                },
            }
        }
        // Instances the pass never reached after a failure.
        for instance in slots.into_iter().flatten() {
            instance.dispose();
            disposed += 1;
        }
        next.reverse();
        *self.instances.borrow_mut() = next;

        self.queue.record(|s| {
            s.mounts += mounted;
            s.disposals += disposed;
            s.moves += moved;
        });
        tracing::debug!(items = items.len(), mounted, disposed, moved, "loop reconciled");
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn bind(&self, scope: &Scope, item: &Value, index: usize) {
        scope.define(self.spec.item_name.as_str(), item.clone());
        if let Some(index_name) = &self.spec.index_name {
            scope.define(index_name.as_str(), index);
        }
    }

    fn mount_instance(
        self: &Rc<Self>,
        parent: NodeId,
        reference: NodeId,
        key: LoopKey,
        item: &Value,
        index: usize,
    ) -> Result<Instance, ReactiveError> {
        let id = InstanceId(self.next_instance.get());
        self.next_instance.set(id.0 + 1);
        let block = Rc::new(Block::new(&self.ctx.document, "item"));
        block.insert_before(parent, Some(reference))?;
        let owner = Rc::clone(&block);
        self.ctx
            .document
            .attach_disposable(block.open(), Box::new(FnDisposable::new(move || owner.dispose())))?;
        let scope = self.ctx.scope.child();
        self.bind(&scope, item, index);
        if let Err(err) = self.ctx.mount(&block, self.spec.factory.as_ref(), &scope) {
            block.dispose();
            return Err(err);
        }
        let key_watches = self.watch_key(id, &scope);
        tracing::trace!(instance = id.0, index, "loop instance mounted");
        Ok(Instance {
            id,
            key,
            scope,
            block,
            key_watches,
        })
    }

    /// Request an update when instance `id`'s key stops matching the key it
    /// was reconciled under.
    fn watch_key(self: &Rc<Self>, id: InstanceId, scope: &Scope) -> Vec<ScopeSubscription> {
        let Some(key) = &self.spec.key else {
            return Vec::new();
        };
        key.dependencies()
            .iter()
            .map(|path| {
                let weak = Rc::downgrade(self);
                scope.watch(path, self.queue.scheduler(), move |_| {
                    if let Some(this) = weak.upgrade() {
                        if this.key_changed(id) {
                            reactor::request_update(&this);
                        }
                    }
                })
            })
            .collect()
    }

    /// Instances being reconciled are not listed, so changes during a pass
    /// are ignored; the pass computes fresh keys anyway.
    fn key_changed(&self, id: InstanceId) -> bool {
        let Some(key) = &self.spec.key else {
            return false;
        };
        let instances = self.instances.borrow();
        let Some(instance) = instances.iter().find(|i| i.id == id) else {
            return false;
        };
        match key.evaluate(&instance.scope, NAME) {
            Ok(value) => LoopKey::from(&value) != instance.key,
            Err(_) => true,
        }
    }

    fn dispose(&self) {
        if !self.queue.close() {
            return;
        }
        let instances = std::mem::take(&mut *self.instances.borrow_mut());
        let count = instances.len() as u64;
        for instance in instances {
            instance.dispose();
        }
        self.block.dispose();
        self.queue.record(|s| s.disposals += count);
        tracing::debug!(instances = count, "loop disposed");
    }
}

/// Indices (into `sequence`) of one longest strictly increasing subsequence.
fn longest_increasing_subsequence(sequence: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];
    for (i, value) in sequence.iter().enumerate() {
        let at = tails.partition_point(|&t| sequence[t] < *value);
        if at > 0 {
            previous[i] = Some(tails[at - 1]);
        }
        if at == tails.len() {
            tails.push(i);
        } else {
            tails[at] = i;
        }
    }
    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = previous[i];
    }
    out.reverse();
    out
}

/// Renders a child factory once per item of an iterable.
#[derive(Clone)]
pub struct Loop {
    inner: Rc<LoopInner>,
}

impl Loop {
    /// Place the loop, subscribe to the iterable and mount the initial items.
    ///
    /// # Errors
    ///
    /// Tree errors from placing the Block, or the initial evaluation's error.
    /// On error nothing stays mounted.
    pub fn new(ctx: &DirectiveContext, spec: LoopSpec) -> Result<Self, ReactiveError> {
        let block = ctx.place_block(NAME)?;
        let inner = Rc::new(LoopInner {
            queue: UpdateQueue::new(NAME, ctx.scheduler.clone()),
            ctx: ctx.clone(),
            spec,
            block,
            instances: RefCell::new(Vec::new()),
            next_instance: Cell::new(1),
        });
        let owner = Rc::clone(&inner);
        ctx.document.attach_disposable(
            inner.block.open(),
            Box::new(FnDisposable::new(move || owner.dispose())),
        )?;
        reactor::watch(&inner, &ctx.scope, inner.spec.iterable.dependencies());
        if let Err(err) = reactor::initial_update(&inner) {
            inner.dispose();
            return Err(err);
        }
        Ok(Self { inner })
    }

    /// Number of mounted instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.instances.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instance identities in render order.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.inner.instances.borrow().iter().map(|i| i.id).collect()
    }

    /// Instance keys in render order.
    #[must_use]
    pub fn keys(&self) -> Vec<LoopKey> {
        self.inner.instances.borrow().iter().map(|i| i.key.clone()).collect()
    }

    /// The scope of the instance at `index`.
    #[must_use]
    pub fn instance_scope(&self, index: usize) -> Option<Scope> {
        self.inner.instances.borrow().get(index).map(|i| i.scope.clone())
    }

    #[must_use]
    pub fn block(&self) -> &Block {
        &self.inner.block
    }

    /// Whether a deferred update is queued.
    #[must_use]
    pub fn has_pending_update(&self) -> bool {
        self.inner.queue.has_pending()
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Disposable for Loop {
    fn dispose(&mut self) {
        self.inner.dispose();
    }
}

impl Directive for Loop {
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

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("spec", &self.inner.spec)
            .field("instances", &self.len())
            .field("disposed", &self.inner.queue.is_closed())
            .finish()
    }
}
