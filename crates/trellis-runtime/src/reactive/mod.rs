#![forbid(unsafe_code)]

//! The observer graph.
//!
//! - [`Object`] / [`List`] / [`Value`]: observable data. Writes go through
//!   [`Object::set`]; lists mutate in place and fan out through their owner.
//! - [`Observer`]: a de-duplicated watcher of one path rooted at one object,
//!   delivering eagerly or through a [`Scheduler`](crate::Scheduler).
//! - [`Subscription`]: RAII guard that removes its listener on drop.
//!
//! # Architecture
//!
//! Everything is single-threaded (`Rc<RefCell<..>>`). Objects own their
//! observers strongly through their metadata; observers, hooks and
//! subscriptions only ever point back weakly, so dropping an object frees
//! its whole registry.
//!
//! # Invariants
//!
//! 1. Writing a value equal to the current one notifies nobody.
//! 2. Listeners run in subscription order.
//! 3. An unreachable path never reaches a listener.
//! 4. Dropping a [`Subscription`] removes the listener before the next
//!    notification.

mod metadata;
pub mod observer;
pub mod value;

pub use metadata::MAX_REFIRE_PASSES;
pub use observer::{Listener, Observer, ObserverId, Subscription, WeakObserver};
pub use value::{Getter, Identity, List, Object, Opaque, Value, WeakObject};
