#![forbid(unsafe_code)]

//! Observable data: [`Value`], [`Object`] and [`List`].
//!
//! # Design
//!
//! Plain data objects cannot intercept writes in Rust, so mutation goes
//! through explicit setters. [`Object::set`] stores the value and then runs
//! the write hooks installed on that key by the observer graph. [`List`] is
//! the "externally mutated" source: in-place edits (`push`, `remove`, ...)
//! never go through a property write, so a list carries its own change hooks
//! instead.
//!
//! Every object carries its [`Metadata`] intrusively, so the registry lives
//! exactly as long as the object does and needs no global side table.
//!
//! # Equality
//!
//! Primitives compare by value, objects/lists/opaque handles by identity.
//! Writing a value equal to the current one is a no-op: no hook runs.
//!
//! # Failure Modes
//!
//! - **Write to a computed property**: ignored with a `warn!` event; the getter
//!   stays in place.
//! - **Traversal through a non-container**: reading `a.b` when `a` is null or a
//!   primitive yields `None` ("unreachable"), never a panic.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use trellis_core::ObservablePath;

use super::metadata::{self, Metadata};
use super::observer::Observer;
use crate::scheduler::Scheduler;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

fn next_identity() -> Identity {
    Identity(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed))
}

/// Process-unique identity of an [`Object`] or [`List`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(u64);

impl Identity {
    /// Raw numeric identity.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Getter of a computed property. Receives the owning object.
pub type Getter = Rc<dyn Fn(&Object) -> Value>;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically typed observable value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent or explicitly null. Missing properties read as `Null`.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    List(List),
    /// Host data the core never inspects (compared by identity).
    Opaque(Opaque),
}

impl Value {
    /// Whether this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness used by branch conditions.
    ///
    /// `Null`, `false`, `0`, `NaN` and the empty string are falsy; containers
    /// and opaque values are always truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) | Self::List(_) | Self::Opaque(_) => true,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Self::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Read one property key.
    ///
    /// Objects read their property (missing → `Null`); lists answer `length`
    /// and decimal indices (out of range → `Null`). Anything else is
    /// unreachable and yields `None`.
    #[must_use]
    pub fn read_key(&self, key: &str) -> Option<Value> {
        match self {
            Self::Object(object) => Some(object.get(key)),
            Self::List(list) => Some(list.read_key(key)),
            _ => None,
        }
    }

    /// Resolve a sequence of keys starting at this value.
    ///
    /// Returns `None` as soon as an intermediate is unreachable; the leaf
    /// itself may be `Null`.
    #[must_use]
    pub fn resolve(&self, segments: &[String]) -> Option<Value> {
        let mut current = self.clone();
        for segment in segments {
            current = current.read_key(segment)?;
        }
        Some(current)
    }

    /// Build a value graph from JSON. Arrays become [`List`]s, objects become
    /// [`Object`]s.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Self::List(List::from_vec(items.iter().map(Self::from_json).collect()))
            }
            serde_json::Value::Object(map) => {
                let object = Object::new();
                for (key, value) in map {
                    object.set(key.as_str(), Self::from_json(value));
                }
                Self::Object(object)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Opaque(a), Self::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Object(o) => write!(f, "Object(#{})", o.id().get()),
            Self::List(l) => write!(f, "List(#{}, len={})", l.id().get(), l.len()),
            Self::Opaque(_) => f.write_str("Opaque"),
        }
    }
}

/// Display form used by text bindings: `Null` renders empty, integral
/// numbers render without a fractional part.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Self::String(s) => f.write_str(s),
            Self::Object(_) => f.write_str("[object]"),
            Self::List(list) => {
                let items = list.to_vec();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Opaque(_) => f.write_str("[opaque]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}

impl From<&Object> for Value {
    fn from(o: &Object) -> Self {
        Self::Object(o.clone())
    }
}

impl From<List> for Value {
    fn from(l: List) -> Self {
        Self::List(l)
    }
}

impl From<&List> for Value {
    fn from(l: &List) -> Self {
        Self::List(l.clone())
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Self::Opaque(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Opaque
// ---------------------------------------------------------------------------

/// A host value carried through the graph without inspection.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    /// Wrap a value.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Wrap an existing `Rc`, preserving its identity.
    pub fn from_rc<T: Any>(value: Rc<T>) -> Self {
        Self(value)
    }

    /// Downcast to a concrete type.
    #[must_use]
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.0).downcast::<T>().ok()
    }

    /// Identity comparison.
    #[must_use]
    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }

    /// Address used as an identity key.
    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Opaque").field(&self.addr()).finish()
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

enum Slot {
    Value(Value),
    Computed(Getter),
}

pub(crate) struct ObjectInner {
    id: Identity,
    props: RefCell<BTreeMap<String, Slot>>,
    pub(crate) meta: RefCell<Metadata>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        let disposables = std::mem::take(&mut self.meta.get_mut().disposables);
        for action in disposables {
            action();
        }
    }
}

/// An identity-bearing property bag.
///
/// Cloning an `Object` creates a new handle to the **same** object.
#[derive(Clone)]
pub struct Object {
    pub(crate) inner: Rc<ObjectInner>,
}

impl Object {
    /// Create an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                id: next_identity(),
                props: RefCell::new(BTreeMap::new()),
                meta: RefCell::new(Metadata::default()),
            }),
        }
    }

    /// Create an object from key/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let object = Self::new();
        {
            let mut props = object.inner.props.borrow_mut();
            for (key, value) in pairs {
                props.insert(key.into(), Slot::Value(value.into()));
            }
        }
        object
    }

    /// Identity of this object.
    #[must_use]
    pub fn id(&self) -> Identity {
        self.inner.id
    }

    /// Whether both handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Read a property. Computed properties run their getter; missing keys
    /// read as `Null`.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        let getter = {
            let props = self.inner.props.borrow();
            match props.get(key) {
                None => return Value::Null,
                Some(Slot::Value(value)) => return value.clone(),
                Some(Slot::Computed(getter)) => Rc::clone(getter),
            }
        };
        getter(self)
    }

    /// Resolve a path starting at this object. `None` when an intermediate
    /// is unreachable.
    #[must_use]
    pub fn get_path(&self, path: impl Into<ObservablePath>) -> Option<Value> {
        let path = path.into();
        Value::Object(self.clone()).resolve(path.segments())
    }

    /// Whether the object has its own property `key` (plain or computed).
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.inner.props.borrow().contains_key(key)
    }

    /// Own property names in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.props.borrow().keys().cloned().collect()
    }

    /// Write a property and notify every observer whose path runs through
    /// `(self, key)`.
    ///
    /// Writing a value equal to the current one does nothing.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        {
            let mut props = self.inner.props.borrow_mut();
            match props.get(&key) {
                Some(Slot::Value(current)) if *current == value => return,
                Some(Slot::Computed(_)) => {
                    tracing::warn!(key = %key, object = self.id().get(), "write to computed property ignored");
                    return;
                }
                _ => {}
            }
            props.insert(key.clone(), Slot::Value(value));
        }
        tracing::trace!(key = %key, object = self.id().get(), "property write");
        metadata::intercept_write(self, &key);
    }

    /// Remove a property, returning its previous value. Observers see the
    /// key read as `Null` afterwards.
    pub fn remove(&self, key: &str) -> Value {
        let removed = self.inner.props.borrow_mut().remove(key);
        match removed {
            None => Value::Null,
            Some(slot) => {
                let previous = match slot {
                    Slot::Value(value) => value,
                    Slot::Computed(_) => Value::Null,
                };
                self.inner.meta.borrow_mut().computed.remove(key);
                metadata::intercept_write(self, key);
                previous
            }
        }
    }

    /// Declare a computed property.
    ///
    /// `deps` are paths relative to this object. Writing anywhere along a
    /// dependency path re-notifies observers of `name`, transitively through
    /// other computed properties.
    pub fn define_computed<I, P>(&self, name: impl Into<String>, deps: I, getter: impl Fn(&Object) -> Value + 'static)
    where
        I: IntoIterator<Item = P>,
        P: Into<ObservablePath>,
    {
        let name = name.into();
        let deps: Vec<ObservablePath> = deps.into_iter().map(Into::into).collect();
        self.inner
            .props
            .borrow_mut()
            .insert(name.clone(), Slot::Computed(Rc::new(getter)));
        let instrumented = {
            let mut meta = self.inner.meta.borrow_mut();
            meta.computed.insert(name.clone(), deps);
            meta.computed_links.remove(&name);
            meta.interceptors.contains_key(&name)
        };
        if instrumented {
            metadata::ensure_computed_links(self, &name);
            metadata::intercept_write(self, &name);
        }
    }

    /// Whether `name` is a computed property.
    #[must_use]
    pub fn is_computed(&self, name: &str) -> bool {
        matches!(self.inner.props.borrow().get(name), Some(Slot::Computed(_)))
    }

    /// Dependency paths declared for a computed property.
    #[must_use]
    pub fn computed_dependencies(&self, name: &str) -> Vec<ObservablePath> {
        self.inner
            .meta
            .borrow()
            .computed
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Get or create the synchronous observer for `path` rooted here.
    pub fn observe(&self, path: impl Into<ObservablePath>) -> Observer {
        Observer::observe(self, path.into(), None)
    }

    /// Get or create the scheduler-backed observer for `path` rooted here.
    pub fn observe_async(&self, path: impl Into<ObservablePath>, scheduler: &Scheduler) -> Observer {
        Observer::observe(self, path.into(), Some(scheduler))
    }

    /// Get or create an observer; eagerness is chosen by the caller.
    pub fn observe_with(&self, path: impl Into<ObservablePath>, scheduler: Option<&Scheduler>) -> Observer {
        Observer::observe(self, path.into(), scheduler)
    }

    /// Register a cleanup callback run once by
    /// [`dispose_metadata`](Self::dispose_metadata) or when the object drops.
    pub fn register_disposable(&self, action: impl FnOnce() + 'static) {
        let disposed = self.inner.meta.borrow().disposed;
        if disposed {
            action();
            return;
        }
        self.inner.meta.borrow_mut().disposables.push(Box::new(action));
    }

    /// Tear down this object's metadata: dispose its observers, drop computed
    /// links and subjects, and run registered disposables exactly once.
    pub fn dispose_metadata(&self) {
        metadata::dispose(self);
    }

    /// Number of live observers rooted at this object.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.meta.borrow().observers.len()
    }

    /// Whether `(self, key)` carries a write hook.
    #[must_use]
    pub fn is_instrumented(&self, key: &str) -> bool {
        self.inner.meta.borrow().interceptors.contains_key(key)
    }

    /// Number of observers hooked on `(self, key)`.
    #[must_use]
    pub fn hook_count(&self, key: &str) -> usize {
        self.inner
            .meta
            .borrow()
            .interceptors
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Number of distinct keys ever instrumented on this object.
    #[must_use]
    pub fn instrumentation_count(&self) -> usize {
        self.inner.meta.borrow().instrumentations
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id().get())
            .field("keys", &self.keys())
            .finish()
    }
}

/// Weak handle to an [`Object`].
#[derive(Clone)]
pub struct WeakObject {
    inner: Weak<ObjectInner>,
}

impl WeakObject {
    /// Upgrade to a strong handle if the object is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Object> {
        self.inner.upgrade().map(|inner| Object { inner })
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObject")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Change hook on a list. Returning `false` detaches the hook.
pub(crate) type ListHook = Rc<dyn Fn(&List) -> bool>;

pub(crate) struct ListInner {
    id: Identity,
    items: RefCell<Vec<Value>>,
    hooks: RefCell<Vec<ListHook>>,
}

/// An identity-bearing sequence mutated in place.
///
/// In-place edits do not go through a property write; observers of a path
/// through the list are reached by the owning object's subject fan-out.
#[derive(Clone)]
pub struct List {
    inner: Rc<ListInner>,
}

impl List {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create a list from items.
    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                id: next_identity(),
                items: RefCell::new(items),
                hooks: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Identity of this list.
    #[must_use]
    pub fn id(&self) -> Identity {
        self.inner.id
    }

    /// Whether both handles refer to the same list.
    #[must_use]
    pub fn ptr_eq(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Item at `index`, or `Null` when out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.inner
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of all items.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    pub(crate) fn read_key(&self, key: &str) -> Value {
        if key == "length" {
            return Value::from(self.len());
        }
        match key.parse::<usize>() {
            Ok(index) => self.get(index),
            Err(_) => Value::Null,
        }
    }

    pub fn push(&self, item: impl Into<Value>) {
        self.inner.items.borrow_mut().push(item.into());
        self.changed();
    }

    pub fn pop(&self) -> Option<Value> {
        let item = self.inner.items.borrow_mut().pop();
        if item.is_some() {
            self.changed();
        }
        item
    }

    /// Insert at `index` (clamped to the length).
    pub fn insert(&self, index: usize, item: impl Into<Value>) {
        {
            let mut items = self.inner.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, item.into());
        }
        self.changed();
    }

    /// Remove the item at `index`; `None` when out of range.
    pub fn remove(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            (index < items.len()).then(|| items.remove(index))
        };
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    /// Replace the item at `index`. Out-of-range indices are ignored.
    pub fn set(&self, index: usize, item: impl Into<Value>) {
        let item = item.into();
        {
            let mut items = self.inner.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) if *slot == item => return,
                Some(slot) => *slot = item,
                None => return,
            }
        }
        self.changed();
    }

    /// Move the item at `from` to position `to`.
    pub fn move_item(&self, from: usize, to: usize) {
        {
            let mut items = self.inner.items.borrow_mut();
            if from >= items.len() || from == to {
                return;
            }
            let item = items.remove(from);
            let to = to.min(items.len());
            items.insert(to, item);
        }
        self.changed();
    }

    /// Replace every item at once (one change notification).
    pub fn replace(&self, items: Vec<Value>) {
        *self.inner.items.borrow_mut() = items;
        self.changed();
    }

    pub fn clear(&self) {
        let was_empty = {
            let mut items = self.inner.items.borrow_mut();
            let was_empty = items.is_empty();
            items.clear();
            was_empty
        };
        if !was_empty {
            self.changed();
        }
    }

    pub(crate) fn add_hook(&self, hook: ListHook) {
        self.inner.hooks.borrow_mut().push(hook);
    }

    /// Number of change hooks attached.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.borrow().len()
    }

    fn changed(&self) {
        tracing::trace!(list = self.id().get(), len = self.len(), "list mutated in place");
        let hooks: Vec<ListHook> = self.inner.hooks.borrow().clone();
        let mut detached = Vec::new();
        for hook in &hooks {
            if !hook(self) {
                detached.push(Rc::as_ptr(hook) as *const ());
            }
        }
        if !detached.is_empty() {
            self.inner
                .hooks
                .borrow_mut()
                .retain(|h| !detached.contains(&(Rc::as_ptr(h) as *const ())));
        }
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("id", &self.id().get())
            .field("items", &*self.inner.items.borrow())
            .finish()
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn missing_property_reads_null() {
        let object = Object::new();
        assert!(object.get("nope").is_null());
        assert!(!object.has("nope"));
    }

    #[test]
    fn set_and_get() {
        let object = Object::new();
        object.set("v", 1);
        assert_eq!(object.get("v"), Value::from(1));
        assert_eq!(object.keys(), vec!["v".to_string()]);
    }

    #[test]
    fn from_pairs_populates() {
        let object = Object::from_pairs([("a", Value::from(1)), ("b", Value::from("x"))]);
        assert_eq!(object.get("a"), Value::from(1));
        assert_eq!(object.get("b").as_str(), Some("x"));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Object::new();
        let b = Object::new();
        assert_eq!(Value::from(&a), Value::from(a.clone()));
        assert_ne!(Value::from(&a), Value::from(&b));
    }

    #[test]
    fn primitives_compare_by_value() {
        assert_eq!(Value::from("x"), Value::from("x".to_string()));
        assert_ne!(Value::from(1), Value::from("1"));
        assert_eq!(Value::Null, Value::from(None::<i32>));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("a").is_truthy());
        assert!(Value::from(List::new()).is_truthy());
        assert!(Value::from(Object::new()).is_truthy());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from(true).to_string(), "true");
        let list = List::from_vec(vec![Value::from(1), Value::from("a")]);
        assert_eq!(Value::from(list).to_string(), "1,a");
    }

    #[test]
    fn resolve_through_nested_objects() {
        let inner = Object::from_pairs([("city", "Paris")]);
        let root = Object::from_pairs([("address", inner)]);
        assert_eq!(
            root.get_path("address.city"),
            Some(Value::from("Paris"))
        );
    }

    #[test]
    fn resolve_through_null_is_unreachable() {
        let root = Object::from_pairs([("address", Value::Null)]);
        assert_eq!(root.get_path("address.city"), None);
        assert_eq!(root.get_path("address"), Some(Value::Null));
    }

    #[test]
    fn resolve_through_list() {
        let item = Object::from_pairs([("name", "A")]);
        let list = List::from_vec(vec![Value::from(item)]);
        let root = Object::from_pairs([("items", list)]);
        assert_eq!(root.get_path("items.0.name"), Some(Value::from("A")));
        assert_eq!(root.get_path("items.length"), Some(Value::from(1)));
        assert_eq!(root.get_path("items.7"), Some(Value::Null));
        assert_eq!(root.get_path("items.7.name"), None);
    }

    #[test]
    fn computed_property_reads_getter() {
        let person = Object::from_pairs([("first", "Ada"), ("last", "Lovelace")]);
        person.define_computed("full", ["first", "last"], |p| {
            Value::from(format!("{} {}", p.get("first"), p.get("last")))
        });
        assert!(person.is_computed("full"));
        assert_eq!(person.get("full").as_str(), Some("Ada Lovelace"));
        assert_eq!(person.computed_dependencies("full").len(), 2);
    }

    #[test]
    fn write_to_computed_is_ignored() {
        let object = Object::new();
        object.define_computed("c", ["x"], |_| Value::from(7));
        object.set("c", 1);
        assert_eq!(object.get("c"), Value::from(7));
    }

    #[test]
    fn remove_returns_previous() {
        let object = Object::from_pairs([("a", 1)]);
        assert_eq!(object.remove("a"), Value::from(1));
        assert!(object.remove("a").is_null());
        assert!(!object.has("a"));
    }

    #[test]
    fn list_mutations() {
        let list = List::new();
        list.push(1);
        list.push(2);
        list.insert(0, 0);
        assert_eq!(list.to_vec(), vec![Value::from(0), Value::from(1), Value::from(2)]);
        assert_eq!(list.remove(1), Some(Value::from(1)));
        assert_eq!(list.remove(9), None);
        list.set(0, 5);
        list.move_item(0, 1);
        assert_eq!(list.to_vec(), vec![Value::from(2), Value::from(5)]);
        assert_eq!(list.pop(), Some(Value::from(5)));
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn list_hooks_fire_and_detach() {
        let list = List::new();
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        list.add_hook(Rc::new(move |_| {
            f.set(f.get() + 1);
            f.get() < 2
        }));
        list.push(1);
        assert_eq!(list.hook_count(), 1);
        list.push(2);
        assert_eq!(list.hook_count(), 0, "hook returned false and was detached");
        list.push(3);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn list_noop_mutations_do_not_fire() {
        let list = List::from_vec(vec![Value::from(1)]);
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        list.add_hook(Rc::new(move |_| {
            f.set(f.get() + 1);
            true
        }));
        list.set(0, 1);
        list.set(5, 1);
        list.move_item(0, 0);
        assert_eq!(list.remove(3), None);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn opaque_identity_and_downcast() {
        let a = Opaque::new(42u32);
        let b = a.clone();
        let c = Opaque::new(42u32);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.downcast::<u32>().as_deref(), Some(&42));
        assert!(a.downcast::<String>().is_none());
    }

    #[test]
    fn dropping_object_runs_disposables() {
        let ran = Rc::new(Cell::new(0));
        {
            let object = Object::new();
            let r = Rc::clone(&ran);
            object.register_disposable(move || r.set(r.get() + 1));
        }
        assert_eq!(ran.get(), 1);
    }
}
