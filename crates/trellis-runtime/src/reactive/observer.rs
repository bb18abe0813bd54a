#![forbid(unsafe_code)]

//! Path observers with sync or scheduler-backed delivery.
//!
//! # Design
//!
//! An [`Observer`] watches one [`ObservablePath`] rooted at one [`Object`].
//! It keeps a *chain*: the container reached at every depth of the path.
//! Each object in the chain carries a write hook for the next key; a list in
//! the chain is reached through the owning object's subject fan-out.
//!
//! Every notification first **rebinds** the chain. Intermediates that were
//! replaced lose their hook, new ones gain one. A hook that fires for an
//! object no longer in the chain is ignored and pruned, so replacing
//! `a.b` with a fresh object silences writes to the old `b`.
//!
//! Delivery is either eager (listeners run inside the write) or deferred:
//! an async observer cancels its previous pending delivery and enqueues a
//! fresh high-priority task, so a burst of writes collapses into one
//! delivery of the latest value.
//!
//! # Invariants
//!
//! 1. Observers are de-duplicated per `(root, path, scheduler)`.
//! 2. Listeners are called in subscription order. A listener unsubscribed
//!    during a pass is skipped; one subscribed during a pass waits for the
//!    next notification.
//! 3. When the path is unreachable (an intermediate is not a container)
//!    listeners are not called.
//! 4. After [`dispose`](Observer::dispose) no listener runs again.
//! 5. An observer whose last listener leaves is *released*: its hooks are
//!    detached, any pending delivery is cancelled and the root forgets it.
//!    Subscribing to a released handle attaches it again.
//! 6. Observing a root whose metadata was disposed yields an inert,
//!    already-disposed observer.
//!
//! # Failure Modes
//!
//! - **Unsubscribing an unknown listener**: returns
//!   [`ReactiveError::Protocol`] with the message `Listener not subscribed`,
//!   including on a disposed observer, which holds no listeners.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use trellis_core::{CancellationToken, CancellationTokenSource, Disposable, ObservablePath, ReactiveError};

use super::metadata::{self, ObserverKey};
use super::value::{Identity, Object, Value, WeakObject};
use crate::scheduler::{Priority, Scheduler};

static NEXT_OBSERVER: AtomicU64 = AtomicU64::new(1);

/// Process-unique observer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A listener callback. Compared by identity when unsubscribing.
pub type Listener = Rc<dyn Fn(&Value)>;

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

#[derive(Clone)]
enum LinkTarget {
    Object(WeakObject),
    List,
}

#[derive(Clone)]
struct Link {
    identity: Identity,
    target: LinkTarget,
    key: String,
    subject: bool,
}

enum Delivery {
    Sync,
    Async(Scheduler),
}

struct ObserverInner {
    id: ObserverId,
    key: ObserverKey,
    root: WeakObject,
    path: ObservablePath,
    listeners: RefCell<Vec<Listener>>,
    chain: RefCell<Vec<Link>>,
    delivery: Delivery,
    pending: RefCell<Option<CancellationTokenSource>>,
    released: Cell<bool>,
    disposed: Cell<bool>,
}

/// A de-duplicated watcher of one path rooted at one object.
///
/// Cloning creates another handle to the same observer.
#[derive(Clone)]
pub struct Observer {
    inner: Rc<ObserverInner>,
}

impl Observer {
    pub(crate) fn observe(root: &Object, path: ObservablePath, scheduler: Option<&Scheduler>) -> Observer {
        let key = ObserverKey {
            path: path.key(),
            scheduler: scheduler.map(Scheduler::id),
        };
        let root_disposed = {
            let meta = root.inner.meta.borrow();
            if let Some(existing) = meta.observers.get(&key) {
                return existing.clone();
            }
            meta.disposed
        };
        let observer = Observer {
            inner: Rc::new(ObserverInner {
                id: ObserverId(NEXT_OBSERVER.fetch_add(1, Ordering::Relaxed)),
                key: key.clone(),
                root: root.downgrade(),
                path,
                listeners: RefCell::new(Vec::new()),
                chain: RefCell::new(Vec::new()),
                delivery: match scheduler {
                    Some(s) => Delivery::Async(s.clone()),
                    None => Delivery::Sync,
                },
                pending: RefCell::new(None),
                released: Cell::new(false),
                disposed: Cell::new(root_disposed),
            }),
        };
        if root_disposed {
            tracing::trace!(
                observer = observer.id().get(),
                root = root.id().get(),
                "root metadata disposed; observer is inert"
            );
            return observer;
        }
        tracing::trace!(
            observer = observer.id().get(),
            root = root.id().get(),
            path = %observer.inner.path,
            deferred = observer.is_async(),
            "observer created"
        );
        // Register before binding: computed dependency cycles look it up.
        root.inner.meta.borrow_mut().observers.insert(key, observer.clone());
        observer.rebind();
        observer
    }

    #[must_use]
    pub fn id(&self) -> ObserverId {
        self.inner.id
    }

    /// The observed path.
    #[must_use]
    pub fn path(&self) -> &ObservablePath {
        &self.inner.path
    }

    /// The root object, if still alive.
    #[must_use]
    pub fn root(&self) -> Option<Object> {
        self.inner.root.upgrade()
    }

    /// Whether delivery goes through a scheduler.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.inner.delivery, Delivery::Async(_))
    }

    /// The scheduler used for deferred delivery.
    #[must_use]
    pub fn scheduler(&self) -> Option<&Scheduler> {
        match &self.inner.delivery {
            Delivery::Async(scheduler) => Some(scheduler),
            Delivery::Sync => None,
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether both handles refer to the same observer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObserver {
        WeakObserver {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Current value at the path; `None` when unreachable or the root is gone.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        let root = self.inner.root.upgrade()?;
        Value::Object(root).resolve(self.inner.path.segments())
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Add a listener. The returned [`Subscription`] removes it on drop.
    pub fn subscribe(&self, listener: Listener) -> Subscription {
        if self.inner.released.get() {
            self.reattach();
        }
        if self.is_disposed() {
            tracing::debug!(observer = self.id().get(), "subscribe on disposed observer ignored");
            return Subscription::inert();
        }
        self.inner.listeners.borrow_mut().push(Rc::clone(&listener));
        Subscription {
            observer: Rc::downgrade(&self.inner),
            listener: Some(listener),
        }
    }

    /// Add a closure listener.
    pub fn subscribe_fn(&self, listener: impl Fn(&Value) + 'static) -> Subscription {
        self.subscribe(Rc::new(listener))
    }

    /// Remove a listener by identity.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when `listener` is not currently subscribed.
    pub fn unsubscribe(&self, listener: &Listener) -> Result<(), ReactiveError> {
        let (removed, remaining) = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let removed = listeners
                .iter()
                .position(|l| same_listener(l, listener))
                .map(|index| listeners.remove(index));
            (removed, listeners.len())
        };
        if removed.is_none() {
            return Err(ReactiveError::listener_not_subscribed());
        }
        if remaining == 0 {
            self.release();
        }
        Ok(())
    }

    /// Whether the last listener left and the observer is detached.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.released.get()
    }

    /// Signal that the observed value may have changed.
    ///
    /// Rebinds the chain, then delivers now (sync) or schedules a delivery.
    pub fn notify(&self) {
        if self.is_disposed() || self.is_released() {
            return;
        }
        self.rebind();
        match &self.inner.delivery {
            Delivery::Sync => self.deliver(),
            Delivery::Async(scheduler) => self.schedule_delivery(scheduler),
        }
    }

    /// Whether the chain passes through `identity` at `depth`.
    pub(crate) fn is_attached_at(&self, depth: usize, identity: Identity) -> bool {
        self.inner
            .chain
            .borrow()
            .get(depth)
            .is_some_and(|link| link.identity == identity)
    }

    /// Number of containers currently hooked along the path.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.inner.chain.borrow().len()
    }

    fn rebind(&self) {
        if self.is_disposed() || self.is_released() {
            return;
        }
        let Some(root) = self.inner.root.upgrade() else {
            return;
        };
        let segments = self.inner.path.segments();
        let mut chain = Vec::with_capacity(segments.len());
        let mut current = Value::Object(root);
        for (depth, key) in segments.iter().enumerate() {
            let next = match &current {
                Value::Object(object) => {
                    metadata::instrument(object, key, self, depth);
                    metadata::ensure_computed_links(object, key);
                    let next = object.get(key);
                    let subject = match &next {
                        Value::List(list) => {
                            metadata::register_subject(
                                object,
                                key,
                                list,
                                self,
                                depth,
                                self.inner.path.skip(depth + 1),
                            );
                            true
                        }
                        _ => false,
                    };
                    chain.push(Link {
                        identity: object.id(),
                        target: LinkTarget::Object(object.downgrade()),
                        key: key.clone(),
                        subject,
                    });
                    next
                }
                Value::List(list) => {
                    chain.push(Link {
                        identity: list.id(),
                        target: LinkTarget::List,
                        key: key.clone(),
                        subject: false,
                    });
                    list.read_key(key)
                }
                _ => break,
            };
            current = next;
        }
        let old = self.inner.chain.replace(chain);
        let id = self.id();
        for (depth, link) in old.iter().enumerate() {
            let LinkTarget::Object(weak) = &link.target else {
                continue;
            };
            let Some(object) = weak.upgrade() else {
                continue;
            };
            let kept = self
                .inner
                .chain
                .borrow()
                .get(depth)
                .filter(|new| new.identity == link.identity)
                .map(|new| new.subject);
            match kept {
                None => {
                    metadata::detach(&object, &link.key, id, depth);
                    if link.subject {
                        metadata::unregister_subject(&object, &link.key, id, depth);
                    }
                }
                Some(false) if link.subject => {
                    metadata::unregister_subject(&object, &link.key, id, depth);
                }
                Some(_) => {}
            }
        }
    }

    fn deliver(&self) {
        if self.is_disposed() {
            return;
        }
        let Some(value) = self.value() else {
            tracing::trace!(observer = self.id().get(), path = %self.inner.path, "path unreachable; notification suppressed");
            return;
        };
        let snapshot: Vec<Listener> = self.inner.listeners.borrow().clone();
        for listener in snapshot {
            let still_subscribed = self
                .inner
                .listeners
                .borrow()
                .iter()
                .any(|l| same_listener(l, &listener));
            if still_subscribed && !self.is_disposed() {
                listener(&value);
            }
        }
    }

    fn schedule_delivery(&self, scheduler: &Scheduler) {
        let source = CancellationTokenSource::new();
        let token = source.token();
        if let Some(previous) = self.inner.pending.replace(Some(source)) {
            previous.cancel();
        }
        let weak = self.downgrade();
        let task_token = token.clone();
        scheduler.enqueue(
            move || {
                if let Some(observer) = weak.upgrade() {
                    observer.finish_pending(&task_token);
                    observer.deliver();
                }
                Ok(())
            },
            Priority::High,
            Some(token),
        );
    }

    fn finish_pending(&self, token: &CancellationToken) {
        let mut pending = self.inner.pending.borrow_mut();
        if pending.as_ref().is_some_and(|s| s.token().same_source(token)) {
            *pending = None;
        }
    }

    /// Whether a deferred delivery is queued.
    #[must_use]
    pub fn has_pending_delivery(&self) -> bool {
        self.inner
            .pending
            .borrow()
            .as_ref()
            .is_some_and(|s| !s.is_cancelled())
    }

    /// Detach after the last listener left.
    fn release(&self) {
        if self.is_disposed() || self.inner.released.replace(true) {
            return;
        }
        self.cancel_pending();
        self.detach_chain();
        self.forget();
        tracing::trace!(observer = self.id().get(), path = %self.inner.path, "observer released");
    }

    /// Undo [`release`](Self::release) for a new subscriber.
    fn reattach(&self) {
        let Some(root) = self.inner.root.upgrade() else {
            self.inner.disposed.set(true);
            return;
        };
        {
            let mut meta = root.inner.meta.borrow_mut();
            if meta.disposed {
                drop(meta);
                self.inner.disposed.set(true);
                return;
            }
            meta.observers
                .entry(self.inner.key.clone())
                .or_insert_with(|| self.clone());
        }
        self.inner.released.set(false);
        self.rebind();
        tracing::trace!(observer = self.id().get(), path = %self.inner.path, "observer reattached");
    }

    fn cancel_pending(&self) {
        if let Some(pending) = self.inner.pending.borrow_mut().take() {
            pending.cancel();
        }
    }

    fn detach_chain(&self) {
        let chain = std::mem::take(&mut *self.inner.chain.borrow_mut());
        let id = self.id();
        for (depth, link) in chain.iter().enumerate() {
            if let LinkTarget::Object(weak) = &link.target {
                if let Some(object) = weak.upgrade() {
                    metadata::detach(&object, &link.key, id, depth);
                    if link.subject {
                        metadata::unregister_subject(&object, &link.key, id, depth);
                    }
                }
            }
        }
    }

    /// Drop the root's memo entry if it still points at this observer.
    fn forget(&self) {
        if let Some(root) = self.inner.root.upgrade() {
            let removed = {
                let mut meta = root.inner.meta.borrow_mut();
                match meta.observers.get(&self.inner.key) {
                    Some(existing) if existing.ptr_eq(self) => meta.observers.remove(&self.inner.key),
                    _ => None,
                }
            };
            drop(removed);
        }
    }

    /// Release every hook and listener and cancel any pending delivery.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.cancel_pending();
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        drop(listeners);
        self.detach_chain();
        self.forget();
        tracing::debug!(observer = self.id().get(), path = %self.inner.path, "observer disposed");
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id().get())
            .field("path", &self.inner.path)
            .field("deferred", &self.is_async())
            .field("listeners", &self.listener_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Weak handle to an [`Observer`].
#[derive(Clone)]
pub struct WeakObserver {
    inner: Weak<ObserverInner>,
}

impl WeakObserver {
    #[must_use]
    pub fn upgrade(&self) -> Option<Observer> {
        self.inner.upgrade().map(|inner| Observer { inner })
    }
}

/// RAII guard for one listener. Dropping it unsubscribes.
pub struct Subscription {
    observer: Weak<ObserverInner>,
    listener: Option<Listener>,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            observer: Weak::new(),
            listener: None,
        }
    }

    /// Remove the listener now. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates [`Observer::unsubscribe`] failures.
    pub fn unsubscribe(&mut self) -> Result<(), ReactiveError> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };
        match self.observer.upgrade() {
            // Disposal already dropped every listener.
            Some(inner) if inner.disposed.get() => Ok(()),
            Some(inner) => Observer { inner }.unsubscribe(&listener),
            None => Ok(()),
        }
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.listener.is_some() && self.observer.strong_count() > 0
    }

    /// The observer this subscription belongs to.
    #[must_use]
    pub fn observer(&self) -> Option<Observer> {
        self.observer.upgrade().map(|inner| Observer { inner })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

impl Disposable for Subscription {
    fn dispose(&mut self) {
        if let Err(err) = self.unsubscribe() {
            tracing::warn!(%err, "subscription teardown failed");
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::List;
    use crate::{Scheduler, SchedulerConfig};
    use std::time::Duration;
    use trellis_core::{Clock, ManualClock};

    fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl Fn(&Value) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        (seen, move |v: &Value| s.borrow_mut().push(v.clone()))
    }

    #[test]
    fn sync_observer_delivers_on_write() {
        let object = Object::from_pairs([("v", 1)]);
        let (seen, listener) = recorder();
        let _sub = object.observe("v").subscribe_fn(listener);
        object.set("v", 2);
        assert_eq!(*seen.borrow(), vec![Value::from(2)]);
    }

    #[test]
    fn equal_write_is_silent() {
        let object = Object::from_pairs([("v", 1)]);
        let (seen, listener) = recorder();
        let _sub = object.observe("v").subscribe_fn(listener);
        object.set("v", 1);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn replaced_intermediate_is_detached() {
        let old = Object::from_pairs([("c", 1)]);
        let root = Object::from_pairs([("b", old.clone())]);
        let (seen, listener) = recorder();
        let _sub = root.observe("b.c").subscribe_fn(listener);

        let fresh = Object::from_pairs([("c", 2)]);
        root.set("b", fresh.clone());
        assert_eq!(*seen.borrow(), vec![Value::from(2)]);

        old.set("c", 99);
        assert_eq!(seen.borrow().len(), 1, "old intermediate no longer notifies");
        assert_eq!(old.hook_count("c"), 0);

        fresh.set("c", 3);
        assert_eq!(*seen.borrow(), vec![Value::from(2), Value::from(3)]);
    }

    #[test]
    fn unreachable_path_suppresses_delivery() {
        let root = Object::from_pairs([("b", Object::from_pairs([("c", 1)]))]);
        let observer = root.observe("b.c");
        let (seen, listener) = recorder();
        let _sub = observer.subscribe_fn(listener);
        root.set("b", Value::Null);
        assert!(seen.borrow().is_empty());
        assert_eq!(observer.value(), None);
        root.set("b", Object::from_pairs([("c", 5)]));
        assert_eq!(*seen.borrow(), vec![Value::from(5)]);
    }

    #[test]
    fn unsubscribe_unknown_listener_fails() {
        let object = Object::new();
        let observer = object.observe("v");
        let listener: Listener = Rc::new(|_| {});
        let err = observer.unsubscribe(&listener).unwrap_err();
        assert_eq!(err.to_string(), "protocol error: Listener not subscribed");
    }

    #[test]
    fn subscription_unsubscribe_is_idempotent() {
        let object = Object::new();
        let observer = object.observe("v");
        let mut sub = observer.subscribe_fn(|_| {});
        assert_eq!(observer.listener_count(), 1);
        assert!(sub.unsubscribe().is_ok());
        assert!(sub.unsubscribe().is_ok());
        assert_eq!(observer.listener_count(), 0);
        assert!(!sub.is_active());
    }

    #[test]
    fn last_unsubscribe_releases_observer() {
        let inner = Object::from_pairs([("v", 0)]);
        let root = Object::from_pairs([("a", inner.clone())]);
        let observer = root.observe("a.v");
        let first = observer.subscribe_fn(|_| {});
        let second = observer.subscribe_fn(|_| {});
        drop(first);
        assert!(!observer.is_released());
        assert_eq!(inner.hook_count("v"), 1);

        drop(second);
        assert!(observer.is_released());
        assert_eq!(observer.chain_len(), 0);
        assert_eq!(root.observer_count(), 0);
        assert_eq!(root.hook_count("a"), 0);
        assert_eq!(inner.hook_count("v"), 0);
    }

    #[test]
    fn released_observer_reattaches_on_subscribe() {
        let object = Object::from_pairs([("v", 0)]);
        let observer = object.observe("v");
        drop(observer.subscribe_fn(|_| {}));
        assert!(observer.is_released());

        let (seen, listener) = recorder();
        let _sub = observer.subscribe_fn(listener);
        assert!(!observer.is_released());
        assert!(observer.ptr_eq(&object.observe("v")));
        object.set("v", 4);
        assert_eq!(*seen.borrow(), vec![Value::from(4)]);
    }

    #[test]
    fn released_async_observer_queues_nothing() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(SchedulerConfig::default(), Clock::manual(&clock));
        let object = Object::from_pairs([("v", 0)]);
        let observer = object.observe_async("v", &scheduler);
        let sub = observer.subscribe_fn(|_| {});
        object.set("v", 1);
        assert!(observer.has_pending_delivery());

        drop(sub);
        assert!(!observer.has_pending_delivery());
        object.set("v", 2);
        let report = scheduler.flush();
        assert_eq!(report.executed, 0);
        assert_eq!(report.skipped, 1);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn unsubscribe_after_dispose_is_still_checked() {
        let object = Object::from_pairs([("v", 0)]);
        let observer = object.observe("v");
        let listener: Listener = Rc::new(|_| {});
        let mut sub = observer.subscribe(Rc::clone(&listener));
        observer.dispose();

        let stranger: Listener = Rc::new(|_| {});
        assert!(observer.unsubscribe(&stranger).unwrap_err().is_protocol());
        assert!(observer.unsubscribe(&listener).is_err());
        assert!(sub.unsubscribe().is_ok(), "a subscription never fails after disposal");
    }

    #[test]
    fn observe_on_disposed_metadata_is_inert() {
        let object = Object::from_pairs([("v", 0)]);
        object.dispose_metadata();
        let observer = object.observe("v");
        assert!(observer.is_disposed());
        assert_eq!(object.observer_count(), 0);
        assert!(!object.is_instrumented("v"));

        let (seen, listener) = recorder();
        let sub = observer.subscribe_fn(listener);
        assert!(!sub.is_active());
        object.set("v", 1);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn listener_removed_mid_pass_is_skipped() {
        let object = Object::from_pairs([("v", 0)]);
        let observer = object.observe("v");
        let second: Listener = Rc::new(|_| panic!("removed listener must not run"));
        let obs = observer.clone();
        let second_clone = Rc::clone(&second);
        let _first = observer.subscribe_fn(move |_| {
            let _ = obs.unsubscribe(&second_clone);
        });
        let _second = observer.subscribe(second);
        object.set("v", 1);
    }

    #[test]
    fn list_mutation_reaches_length_observer() {
        let list = List::new();
        let root = Object::from_pairs([("items", list.clone())]);
        let (seen, listener) = recorder();
        let _sub = root.observe("items.length").subscribe_fn(listener);
        list.push(1);
        list.set(0, 2);
        list.push(3);
        assert_eq!(*seen.borrow(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn list_observer_sees_every_mutation() {
        let list = List::new();
        let root = Object::from_pairs([("items", list.clone())]);
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = root.observe("items").subscribe_fn(move |_| c.set(c.get() + 1));
        list.push(1);
        list.set(0, 2);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn path_through_list_item() {
        let first = Object::from_pairs([("name", "a")]);
        let list = List::from_vec(vec![Value::from(first.clone())]);
        let root = Object::from_pairs([("items", list.clone())]);
        let (seen, listener) = recorder();
        let _sub = root.observe("items.0.name").subscribe_fn(listener);

        first.set("name", "b");
        list.insert(0, Object::from_pairs([("name", "z")]));
        first.set("name", "ignored");
        assert_eq!(*seen.borrow(), vec![Value::from("b"), Value::from("z")]);
    }

    #[test]
    fn replacing_list_moves_subject() {
        let old = List::from_vec(vec![Value::from(1)]);
        let root = Object::from_pairs([("items", old.clone())]);
        let (seen, listener) = recorder();
        let _sub = root.observe("items.length").subscribe_fn(listener);
        let fresh = List::new();
        root.set("items", fresh.clone());
        old.push(2);
        fresh.push(1);
        fresh.push(2);
        assert_eq!(*seen.borrow(), vec![Value::from(0), Value::from(1), Value::from(2)]);
        assert_eq!(old.hook_count(), 0);
    }

    #[test]
    fn computed_property_renotifies() {
        let person = Object::from_pairs([("first", "Ada"), ("last", "Lovelace")]);
        person.define_computed("full", ["first", "last"], |p| {
            Value::from(format!("{} {}", p.get("first"), p.get("last")))
        });
        let (seen, listener) = recorder();
        let _sub = person.observe("full").subscribe_fn(listener);
        person.set("last", "Byron");
        assert_eq!(*seen.borrow(), vec![Value::from("Ada Byron")]);
    }

    #[test]
    fn computed_chain_is_transitive() {
        let object = Object::from_pairs([("x", 1)]);
        object.define_computed("double", ["x"], |o| {
            Value::from(o.get("x").as_number().unwrap_or(0.0) * 2.0)
        });
        object.define_computed("quad", ["double"], |o| {
            Value::from(o.get("double").as_number().unwrap_or(0.0) * 2.0)
        });
        let (seen, listener) = recorder();
        let _sub = object.observe("quad").subscribe_fn(listener);
        object.set("x", 3);
        assert_eq!(*seen.borrow(), vec![Value::from(12)]);
    }

    #[test]
    fn async_observer_coalesces_bursts() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(
            SchedulerConfig::default().with_debounce(Duration::from_millis(5)),
            Clock::manual(&clock),
        );
        let object = Object::from_pairs([("v", 0)]);
        let observer = object.observe_async("v", &scheduler);
        let (seen, listener) = recorder();
        let _sub = observer.subscribe_fn(listener);
        object.set("v", 1);
        object.set("v", 2);
        object.set("v", 3);
        assert!(seen.borrow().is_empty());
        assert!(observer.has_pending_delivery());
        scheduler.when_done().unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from(3)]);
        assert!(!observer.has_pending_delivery());
    }

    #[test]
    fn async_and_sync_observers_are_distinct() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let object = Object::new();
        let sync = object.observe("v");
        let deferred = object.observe_async("v", &scheduler);
        assert!(!sync.ptr_eq(&deferred));
        assert!(deferred.ptr_eq(&object.observe_async("v", &scheduler)));
        assert_eq!(object.observer_count(), 2);
    }

    #[test]
    fn dispose_cancels_pending_delivery() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(SchedulerConfig::default(), Clock::manual(&clock));
        let object = Object::from_pairs([("v", 0)]);
        let observer = object.observe_async("v", &scheduler);
        let (seen, listener) = recorder();
        let _sub = observer.subscribe_fn(listener);
        object.set("v", 1);
        observer.dispose();
        observer.dispose();
        scheduler.when_done().unwrap();
        assert!(seen.borrow().is_empty());
        assert_eq!(object.observer_count(), 0);
        assert_eq!(object.hook_count("v"), 0);
    }
}
