#![forbid(unsafe_code)]

//! Hosts and the injection registry.
//!
//! A [`Host`] is the component instance directives render on behalf of. It
//! carries an [`InjectionRegistry`]: content registered by an
//! [`Injection`](crate::Injection) under a key and rendered by every
//! [`Placeholder`](crate::Placeholder) reading that key.
//!
//! # Design
//!
//! Registrations stack per key; the most recent one is visible. Every change
//! to a key bumps a revision counter stored in an observable [`Object`], so
//! placeholders learn about registrations through the ordinary observer
//! graph (and through the scheduler when they have one).
//!
//! # Invariants
//!
//! 1. [`lookup`](InjectionRegistry::lookup) returns the newest live
//!    registration for a key.
//! 2. Every register/unregister that changes a key's stack bumps that key's
//!    revision exactly once.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use trellis_core::ObservablePath;
use trellis_runtime::{Object, Observer, Scheduler, Value};

use crate::factory::NodeFactory;
use crate::scope::Scope;

static NEXT_HOST: AtomicU64 = AtomicU64::new(1);

/// Handle to one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

/// Content registered by an injection: a factory and the scope it closes
/// over.
#[derive(Clone)]
pub struct Injected {
    pub factory: Rc<dyn NodeFactory>,
    pub scope: Scope,
}

impl Injected {
    /// Whether both refer to the same factory instance.
    #[must_use]
    pub fn same_factory(&self, other: &Injected) -> bool {
        Rc::as_ptr(&self.factory).cast::<()>() == Rc::as_ptr(&other.factory).cast::<()>()
    }
}

impl fmt::Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injected").field("scope", &self.scope).finish()
    }
}

/// Per-host map of injection key to stacked content.
pub struct InjectionRegistry {
    entries: RefCell<HashMap<String, Vec<(RegistrationId, Injected)>>>,
    revisions: Object,
    next_id: Cell<u64>,
}

impl InjectionRegistry {
    fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            revisions: Object::new(),
            next_id: Cell::new(1),
        }
    }

    /// Push content under `key`; it becomes the visible registration.
    pub fn register(&self, key: &str, content: Injected) -> RegistrationId {
        let id = RegistrationId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .push((id, content));
        tracing::debug!(key, registration = id.0, "injection registered");
        self.bump(key);
        id
    }

    /// Remove a registration. Returns `false` if it was not present.
    pub fn unregister(&self, key: &str, id: RegistrationId) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let Some(stack) = entries.get_mut(key) else {
                return false;
            };
            let before = stack.len();
            stack.retain(|(existing, _)| *existing != id);
            let removed = stack.len() != before;
            if stack.is_empty() {
                entries.remove(key);
            }
            removed
        };
        if removed {
            tracing::debug!(key, registration = id.0, "injection unregistered");
            self.bump(key);
        }
        removed
    }

    /// The visible content for `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Injected> {
        self.entries
            .borrow()
            .get(key)
            .and_then(|stack| stack.last())
            .map(|(_, content)| content.clone())
    }

    /// Number of stacked registrations under `key`.
    #[must_use]
    pub fn registration_count(&self, key: &str) -> usize {
        self.entries.borrow().get(key).map_or(0, Vec::len)
    }

    /// Revision of `key`; changes whenever its stack does.
    #[must_use]
    pub fn revision(&self, key: &str) -> u64 {
        self.revisions.get(key).as_number().map_or(0, |n| n as u64)
    }

    /// Observe changes to `key`.
    #[must_use]
    pub fn observe(&self, key: &str, scheduler: Option<&Scheduler>) -> Observer {
        self.revisions
            .observe_with(ObservablePath::from_segments([key]), scheduler)
    }

    fn bump(&self, key: &str) {
        let next = self.revision(key) + 1;
        self.revisions.set(key, Value::Number(next as f64));
    }
}

impl fmt::Debug for InjectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        let mut keys: Vec<_> = entries.keys().collect();
        keys.sort();
        f.debug_struct("InjectionRegistry").field("keys", &keys).finish()
    }
}

struct HostInner {
    id: u64,
    injections: InjectionRegistry,
}

/// The component instance directives render for.
#[derive(Clone)]
pub struct Host {
    inner: Rc<HostInner>,
}

impl Host {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(HostInner {
                id: NEXT_HOST.fetch_add(1, Ordering::Relaxed),
                injections: InjectionRegistry::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn injections(&self) -> &InjectionRegistry {
        &self.inner.injections
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Host) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.inner.id)
            .field("injections", &self.inner.injections)
            .finish()
    }
}
