#![forbid(unsafe_code)]

//! Evaluation scopes.
//!
//! A [`Scope`] is a chain of observable [`Object`]s. Lookups walk from the
//! innermost bindings outwards; the first object that *has* the name owns
//! it. Loop instances get a child scope binding the item and index on top of
//! the scope the loop was declared in.
//!
//! # Invariants
//!
//! 1. [`owner_of`](Scope::owner_of) and [`get`](Scope::get) agree: the value
//!    read is always the owner's property.
//! 2. A name bound nowhere is owned by the outermost scope, so observing it
//!    starts delivering once the root data defines it.
//! 3. A [`ScopeSubscription`] always listens on the current owner. When an
//!    inner level later defines the name, or the owning level removes it,
//!    the subscription moves and delivers the newly visible value.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use trellis_core::{Disposable, ObservablePath};
use trellis_runtime::{Object, Observer, Scheduler, Subscription, Value};

/// Variable bindings with an optional enclosing scope.
#[derive(Clone)]
pub struct Scope {
    bindings: Object,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    /// A root scope reading from `bindings`.
    #[must_use]
    pub fn new(bindings: Object) -> Self {
        Self {
            bindings,
            parent: None,
        }
    }

    /// An empty child scope.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            bindings: Object::new(),
            parent: Some(Rc::new(self.clone())),
        }
    }

    /// Objects backing this level of the scope.
    #[must_use]
    pub fn bindings(&self) -> &Object {
        &self.bindings
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Scope> {
        self.parent.as_deref()
    }

    /// Number of scope levels, this one included.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }

    /// The object that owns `name`.
    #[must_use]
    pub fn owner_of(&self, name: &str) -> Object {
        let mut level = self;
        loop {
            if level.bindings.has(name) {
                return level.bindings.clone();
            }
            match &level.parent {
                Some(parent) => level = &**parent,
                None => return level.bindings.clone(),
            }
        }
    }

    /// Read a variable. Unbound names read as `Null`.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.owner_of(name).get(name)
    }

    /// Write a variable on the scope that owns it.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.owner_of(name).set(name, value);
    }

    /// Bind `name` at this level, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.set(name, value);
    }

    /// Resolve a dotted path whose first segment is a variable.
    ///
    /// `None` when an intermediate is unreachable; an empty path reads the
    /// bindings object itself.
    #[must_use]
    pub fn resolve(&self, path: &ObservablePath) -> Option<Value> {
        let Some(first) = path.first() else {
            return Some(Value::Object(self.bindings.clone()));
        };
        self.get(first).resolve(&path.segments()[1..])
    }

    /// Observe `path` on the object owning its first segment.
    ///
    /// The owner is resolved once. Use [`watch`](Self::watch) to follow a
    /// later shadowing `define`.
    #[must_use]
    pub fn observe(&self, path: &ObservablePath, scheduler: Option<&Scheduler>) -> Observer {
        let owner = match path.first() {
            Some(first) => self.owner_of(first),
            None => self.bindings.clone(),
        };
        owner.observe_with(path, scheduler)
    }

    /// Listen to `path` wherever its first segment is bound.
    ///
    /// Besides the owner's observer, every level inside the owner is watched
    /// for the name, so a `define` there rebinds the subscription.
    pub fn watch(
        &self,
        path: &ObservablePath,
        scheduler: Option<&Scheduler>,
        listener: impl Fn(&Value) + 'static,
    ) -> ScopeSubscription {
        let inner = Rc::new(WatchInner {
            scope: self.clone(),
            path: path.clone(),
            scheduler: scheduler.cloned(),
            listener: Box::new(listener),
            owner: RefCell::new(None),
            subscriptions: RefCell::new(Vec::new()),
        });
        WatchInner::bind(&inner);
        ScopeSubscription { inner }
    }

    fn owner_of_path(&self, path: &ObservablePath) -> Object {
        match path.first() {
            Some(first) => self.owner_of(first),
            None => self.bindings.clone(),
        }
    }
}

struct WatchInner {
    scope: Scope,
    path: ObservablePath,
    scheduler: Option<Scheduler>,
    listener: Box<dyn Fn(&Value)>,
    owner: RefCell<Option<Object>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl WatchInner {
    fn bind(this: &Rc<Self>) {
        let owner = this.scope.owner_of_path(&this.path);
        let scheduler = this.scheduler.as_ref();
        let mut subscriptions = Vec::new();

        let weak = Rc::downgrade(this);
        let observer = owner.observe_with(&this.path, scheduler);
        subscriptions.push(observer.subscribe_fn(move |value| {
            if let Some(this) = weak.upgrade() {
                Self::deliver(&this, value);
            }
        }));

        if let Some(first) = this.path.first() {
            let mut level = &this.scope;
            while !level.bindings.ptr_eq(&owner) {
                let weak = Rc::downgrade(this);
                let shadow = level.bindings.observe_with(first, scheduler);
                subscriptions.push(shadow.subscribe_fn(move |_| {
                    if let Some(this) = weak.upgrade() {
                        Self::follow(&this);
                    }
                }));
                match &level.parent {
                    Some(parent) => level = &**parent,
                    None => break,
                }
            }
        }

        tracing::trace!(path = %this.path, watched = subscriptions.len(), "scope watch bound");
        *this.owner.borrow_mut() = Some(owner);
        let previous = std::mem::replace(&mut *this.subscriptions.borrow_mut(), subscriptions);
        drop(previous);
    }

    fn owner_moved(&self) -> bool {
        let current = self.scope.owner_of_path(&self.path);
        self.owner
            .borrow()
            .as_ref()
            .is_none_or(|owner| !owner.ptr_eq(&current))
    }

    fn deliver(this: &Rc<Self>, value: &Value) {
        if this.owner_moved() {
            Self::follow(this);
        } else {
            (this.listener)(value);
        }
    }

    fn follow(this: &Rc<Self>) {
        if this.subscriptions.borrow().is_empty() || !this.owner_moved() {
            return;
        }
        Self::bind(this);
        let value = this.scope.resolve(&this.path).unwrap_or(Value::Null);
        (this.listener)(&value);
    }
}

/// A listener on a scope path that follows the name between levels.
///
/// Dropping it unsubscribes everything it holds.
pub struct ScopeSubscription {
    inner: Rc<WatchInner>,
}

impl ScopeSubscription {
    /// The object currently listened on, `None` once disposed.
    #[must_use]
    pub fn owner(&self) -> Option<Object> {
        self.inner.owner.borrow().clone()
    }

    /// Observers held: the owner's plus one per shadowing candidate.
    #[must_use]
    pub fn watched(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }
}

impl Disposable for ScopeSubscription {
    fn dispose(&mut self) {
        self.inner.owner.borrow_mut().take();
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.borrow_mut());
        drop(subscriptions);
    }
}

impl fmt::Debug for ScopeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeSubscription")
            .field("path", &self.inner.path)
            .field("watched", &self.watched())
            .finish()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(Object::new())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("bindings", &self.bindings)
            .field("depth", &self.depth())
            .finish()
    }
}
