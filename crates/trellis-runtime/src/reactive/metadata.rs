#![forbid(unsafe_code)]

//! Per-object metadata registry and write interception.
//!
//! # Design
//!
//! Each [`Object`] owns one [`Metadata`] record holding:
//!
//! | Field            | Purpose                                              |
//! |------------------|------------------------------------------------------|
//! | `observers`      | De-duplicated observers rooted at the object         |
//! | `interceptors`   | Per-key write hooks (observer + depth along its path)|
//! | `subjects`       | Per-key fan-out for in-place mutated lists           |
//! | `computed`       | Dependency paths of computed properties              |
//! | `computed_links` | Live subscriptions re-firing a computed property     |
//! | `disposables`    | Cleanup run once on disposal                         |
//!
//! Hooks hold observers weakly. A hook only fires if the observer's chain
//! still passes through this object at the recorded depth; otherwise it is
//! pruned.
//!
//! # Invariants
//!
//! 1. A key is instrumented at most once; re-instrumenting only adds hooks.
//! 2. Hooks on a key fire in registration order from a snapshot, so hooks
//!    added or removed while firing take effect on the next write.
//! 3. A write re-entering the same key while its hooks run schedules one
//!    more pass after the current one; computed re-fires re-entering a key
//!    are dropped, which breaks dependency cycles.
//!
//! # Failure Modes
//!
//! - **Runaway write loop**: a listener that keeps writing the key it
//!   listens to is cut off after [`MAX_REFIRE_PASSES`] passes with a
//!   `warn!` event.

use std::collections::HashMap;
use std::rc::Rc;

use trellis_core::ObservablePath;

use super::observer::{Observer, ObserverId, Subscription, WeakObserver};
use super::value::{Identity, List, Object, Value};

/// Upper bound on consecutive passes for one key write.
pub const MAX_REFIRE_PASSES: usize = 64;

/// De-duplication key for observers rooted at one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ObserverKey {
    pub(crate) path: String,
    pub(crate) scheduler: Option<u64>,
}

#[derive(Clone)]
pub(crate) struct Hook {
    observer_id: ObserverId,
    depth: usize,
    observer: WeakObserver,
}

struct Watcher {
    observer_id: ObserverId,
    depth: usize,
    observer: WeakObserver,
    remaining: ObservablePath,
    last: Option<Value>,
}

#[derive(Default)]
pub(crate) struct Subject {
    hooked: Option<Identity>,
    watchers: Vec<Watcher>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Firing {
    Clean,
    Again,
}

/// Reactive bookkeeping attached to one object.
#[derive(Default)]
pub(crate) struct Metadata {
    pub(crate) observers: HashMap<ObserverKey, Observer>,
    pub(crate) interceptors: HashMap<String, Vec<Hook>>,
    pub(crate) subjects: HashMap<String, Subject>,
    pub(crate) computed: HashMap<String, Vec<ObservablePath>>,
    pub(crate) computed_links: HashMap<String, Vec<Subscription>>,
    pub(crate) disposables: Vec<Box<dyn FnOnce()>>,
    pub(crate) instrumentations: usize,
    pub(crate) disposed: bool,
    firing: HashMap<String, Firing>,
}

/// Install (idempotently) the hook for `observer` at `depth` on `(object, key)`.
pub(crate) fn instrument(object: &Object, key: &str, observer: &Observer, depth: usize) {
    let mut meta = object.inner.meta.borrow_mut();
    if !meta.interceptors.contains_key(key) {
        meta.instrumentations += 1;
        tracing::trace!(object = object.id().get(), key, "instrumented key");
    }
    let hooks = meta.interceptors.entry(key.to_string()).or_default();
    let id = observer.id();
    if !hooks.iter().any(|h| h.observer_id == id && h.depth == depth) {
        hooks.push(Hook {
            observer_id: id,
            depth,
            observer: observer.downgrade(),
        });
    }
}

/// Remove the hook for `(observer_id, depth)` on `(object, key)`. The key
/// stays instrumented.
pub(crate) fn detach(object: &Object, key: &str, observer_id: ObserverId, depth: usize) {
    let mut meta = object.inner.meta.borrow_mut();
    if let Some(hooks) = meta.interceptors.get_mut(key) {
        hooks.retain(|h| !(h.observer_id == observer_id && h.depth == depth));
    }
}

/// Run the write hooks of `(object, key)` after a property write.
pub(crate) fn intercept_write(object: &Object, key: &str) {
    {
        let mut meta = object.inner.meta.borrow_mut();
        if let Some(state) = meta.firing.get_mut(key) {
            *state = Firing::Again;
            return;
        }
        meta.firing.insert(key.to_string(), Firing::Clean);
    }
    let mut passes = 0;
    loop {
        passes += 1;
        fire_hooks(object, key);
        fan_out(object, key);
        let again = {
            let mut meta = object.inner.meta.borrow_mut();
            match meta.firing.get_mut(key) {
                Some(state) if *state == Firing::Again => {
                    *state = Firing::Clean;
                    true
                }
                _ => false,
            }
        };
        if !again {
            break;
        }
        if passes >= MAX_REFIRE_PASSES {
            tracing::warn!(
                object = object.id().get(),
                key,
                passes,
                "write loop detected; dropping further notifications"
            );
            break;
        }
    }
    object.inner.meta.borrow_mut().firing.remove(key);
}

/// Re-notify observers of a computed property after one of its
/// dependencies changed.
pub(crate) fn fire_computed(object: &Object, name: &str) {
    {
        let mut meta = object.inner.meta.borrow_mut();
        if meta.firing.contains_key(name) {
            return;
        }
        meta.firing.insert(name.to_string(), Firing::Clean);
    }
    tracing::trace!(object = object.id().get(), name, "computed property invalidated");
    fire_hooks(object, name);
    fan_out(object, name);
    object.inner.meta.borrow_mut().firing.remove(name);
}

fn fire_hooks(object: &Object, key: &str) {
    let hooks: Vec<Hook> = object
        .inner
        .meta
        .borrow()
        .interceptors
        .get(key)
        .cloned()
        .unwrap_or_default();
    let mut stale = Vec::new();
    for hook in hooks {
        match hook.observer.upgrade() {
            Some(observer) if observer.is_attached_at(hook.depth, object.id()) => observer.notify(),
            _ => stale.push((hook.observer_id, hook.depth)),
        }
    }
    if !stale.is_empty() {
        let mut meta = object.inner.meta.borrow_mut();
        if let Some(hooks) = meta.interceptors.get_mut(key) {
            hooks.retain(|h| !stale.contains(&(h.observer_id, h.depth)));
        }
    }
}

/// Wire the dependency observers of computed property `name` the first
/// time an observer path runs through it.
pub(crate) fn ensure_computed_links(object: &Object, name: &str) {
    let deps = {
        let mut meta = object.inner.meta.borrow_mut();
        if meta.computed_links.contains_key(name) {
            return;
        }
        let Some(deps) = meta.computed.get(name).cloned() else {
            return;
        };
        // Insert first: a dependency cycle re-entering here sees the entry.
        meta.computed_links.insert(name.to_string(), Vec::new());
        deps
    };
    let mut links = Vec::with_capacity(deps.len());
    for dep in deps {
        let observer = object.observe(dep);
        let owner = object.downgrade();
        let name = name.to_string();
        links.push(observer.subscribe_fn(move |_| {
            if let Some(owner) = owner.upgrade() {
                fire_computed(&owner, &name);
            }
        }));
    }
    let mut meta = object.inner.meta.borrow_mut();
    if let Some(slot) = meta.computed_links.get_mut(name) {
        slot.extend(links);
    }
}

/// Register `observer` for in-place changes of the list stored at
/// `(owner, key)`.
pub(crate) fn register_subject(
    owner: &Object,
    key: &str,
    list: &List,
    observer: &Observer,
    depth: usize,
    remaining: ObservablePath,
) {
    let last = Value::List(list.clone()).resolve(remaining.segments());
    let install = {
        let mut meta = owner.inner.meta.borrow_mut();
        let subject = meta.subjects.entry(key.to_string()).or_default();
        let id = observer.id();
        match subject
            .watchers
            .iter_mut()
            .find(|w| w.observer_id == id && w.depth == depth)
        {
            Some(watcher) => {
                watcher.remaining = remaining;
                watcher.last = last;
            }
            None => subject.watchers.push(Watcher {
                observer_id: id,
                depth,
                observer: observer.downgrade(),
                remaining,
                last,
            }),
        }
        let install = subject.hooked != Some(list.id());
        subject.hooked = Some(list.id());
        install
    };
    if install {
        hook_list(owner, key, list);
    }
}

/// Remove `(observer_id, depth)` from the subject of `(owner, key)`.
pub(crate) fn unregister_subject(owner: &Object, key: &str, observer_id: ObserverId, depth: usize) {
    let mut meta = owner.inner.meta.borrow_mut();
    if let Some(subject) = meta.subjects.get_mut(key) {
        subject
            .watchers
            .retain(|w| !(w.observer_id == observer_id && w.depth == depth));
    }
}

fn hook_list(owner: &Object, key: &str, list: &List) {
    let weak_owner = owner.downgrade();
    let key = key.to_string();
    let list_id = list.id();
    list.add_hook(Rc::new(move |_list: &List| -> bool {
        let Some(owner) = weak_owner.upgrade() else {
            return false;
        };
        let current = matches!(owner.get(&key), Value::List(ref l) if l.id() == list_id);
        if !current {
            let mut meta = owner.inner.meta.borrow_mut();
            if let Some(subject) = meta.subjects.get_mut(&key) {
                if subject.hooked == Some(list_id) {
                    subject.hooked = None;
                }
            }
            return false;
        }
        fan_out(&owner, &key);
        true
    }));
}

/// Notify subject watchers of `(owner, key)`.
///
/// A watcher is notified when its remaining path is empty (it observes the
/// list itself) or when the value at its remaining path changed.
fn fan_out(owner: &Object, key: &str) {
    let watchers: Vec<(ObserverId, usize, WeakObserver, ObservablePath, Option<Value>)> = {
        let meta = owner.inner.meta.borrow();
        match meta.subjects.get(key) {
            None => return,
            Some(subject) => subject
                .watchers
                .iter()
                .map(|w| {
                    (
                        w.observer_id,
                        w.depth,
                        w.observer.clone(),
                        w.remaining.clone(),
                        w.last.clone(),
                    )
                })
                .collect(),
        }
    };
    if watchers.is_empty() {
        return;
    }
    let value = owner.get(key);
    let mut stale = Vec::new();
    for (id, depth, weak, remaining, last) in watchers {
        let Some(observer) = weak.upgrade() else {
            stale.push((id, depth));
            continue;
        };
        if !observer.is_attached_at(depth, owner.id()) {
            stale.push((id, depth));
            continue;
        }
        let current = value.resolve(remaining.segments());
        if remaining.is_empty() || current != last {
            {
                let mut meta = owner.inner.meta.borrow_mut();
                if let Some(watcher) = meta.subjects.get_mut(key).and_then(|s| {
                    s.watchers
                        .iter_mut()
                        .find(|w| w.observer_id == id && w.depth == depth)
                }) {
                    watcher.last = current;
                }
            }
            observer.notify();
        }
    }
    if !stale.is_empty() {
        let mut meta = owner.inner.meta.borrow_mut();
        if let Some(subject) = meta.subjects.get_mut(key) {
            subject
                .watchers
                .retain(|w| !stale.contains(&(w.observer_id, w.depth)));
        }
    }
}

/// Tear down everything the registry holds for `object`.
pub(crate) fn dispose(object: &Object) {
    let (observers, links, disposables) = {
        let mut meta = object.inner.meta.borrow_mut();
        if meta.disposed {
            return;
        }
        meta.disposed = true;
        meta.subjects.clear();
        (
            std::mem::take(&mut meta.observers),
            std::mem::take(&mut meta.computed_links),
            std::mem::take(&mut meta.disposables),
        )
    };
    tracing::debug!(
        object = object.id().get(),
        observers = observers.len(),
        disposables = disposables.len(),
        "disposing object metadata"
    );
    drop(links);
    for observer in observers.into_values() {
        observer.dispose();
    }
    for action in disposables {
        action();
    }
    let mut meta = object.inner.meta.borrow_mut();
    for hooks in meta.interceptors.values_mut() {
        hooks.clear();
    }
}

/// Ids of observers currently hooked on `(object, key)`; used by tests.
#[cfg(test)]
pub(crate) fn hooked_observers(object: &Object, key: &str) -> std::collections::HashSet<ObserverId> {
    object
        .inner
        .meta
        .borrow()
        .interceptors
        .get(key)
        .map(|hooks| hooks.iter().map(|h| h.observer_id).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn instrumenting_twice_is_a_noop() {
        let object = Object::from_pairs([("v", 1)]);
        let a = object.observe("v");
        let b = object.observe("v");
        assert!(a.ptr_eq(&b));
        assert_eq!(object.instrumentation_count(), 1);
        assert_eq!(object.hook_count("v"), 1);
        assert_eq!(hooked_observers(&object, "v").len(), 1);
    }

    #[test]
    fn write_hooks_fire_in_registration_order() {
        let object = Object::from_pairs([("v", 1), ("w", 1)]);
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let _s1 = object.observe("v").subscribe_fn(move |_| o1.borrow_mut().push("v"));
        let o2 = Rc::clone(&order);
        let _s2 = object.observe("v").subscribe_fn(move |_| o2.borrow_mut().push("v2"));
        object.set("v", 2);
        assert_eq!(*order.borrow(), vec!["v", "v2"]);
    }

    #[test]
    fn reentrant_write_to_same_key_runs_another_pass() {
        let object = Object::from_pairs([("v", 0)]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let target = object.downgrade();
        let _sub = object.observe("v").subscribe_fn(move |value| {
            s.borrow_mut().push(value.clone());
            if value.as_number() == Some(1.0) {
                if let Some(o) = target.upgrade() {
                    o.set("v", 2);
                }
            }
        });
        object.set("v", 1);
        assert_eq!(*seen.borrow(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn runaway_write_loop_is_bounded() {
        let object = Object::from_pairs([("v", 0)]);
        let calls = Rc::new(Cell::new(0usize));
        let c = Rc::clone(&calls);
        let target = object.downgrade();
        let _sub = object.observe("v").subscribe_fn(move |value| {
            c.set(c.get() + 1);
            if let (Some(o), Some(n)) = (target.upgrade(), value.as_number()) {
                o.set("v", n + 1.0);
            }
        });
        object.set("v", 1);
        assert_eq!(calls.get(), MAX_REFIRE_PASSES);
    }

    #[test]
    fn computed_cycle_terminates() {
        let object = Object::from_pairs([("x", 1)]);
        object.define_computed("a", ["b", "x"], |o| o.get("x"));
        object.define_computed("b", ["a"], |o| o.get("x"));
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        let _sub = object.observe("a").subscribe_fn(move |_| f.set(f.get() + 1));
        object.set("x", 2);
        assert!(fired.get() >= 1);
    }

    #[test]
    fn dispose_runs_disposables_once() {
        let object = Object::new();
        let ran = Rc::new(Cell::new(0));
        let r = Rc::clone(&ran);
        object.register_disposable(move || r.set(r.get() + 1));
        object.dispose_metadata();
        object.dispose_metadata();
        drop(object);
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn register_after_dispose_runs_immediately() {
        let object = Object::new();
        object.dispose_metadata();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        object.register_disposable(move || r.set(true));
        assert!(ran.get());
    }

    #[test]
    fn dispose_releases_observers() {
        let object = Object::from_pairs([("v", 1)]);
        let observer = object.observe("v");
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        let _sub = observer.subscribe_fn(move |_| f.set(f.get() + 1));
        object.dispose_metadata();
        assert_eq!(object.observer_count(), 0);
        assert!(observer.is_disposed());
        object.set("v", 2);
        assert_eq!(fired.get(), 0);
    }
}
