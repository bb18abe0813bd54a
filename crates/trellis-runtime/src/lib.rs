#![forbid(unsafe_code)]

//! Runtime: the observer graph, the metadata registry and the scheduler.
//!
//! # Role in Trellis
//! `trellis-runtime` turns plain property writes into change notifications.
//! It owns the observable data model ([`Object`], [`List`], [`Value`]), the
//! per-object metadata that de-duplicates observers and hooks writes, and
//! the debounced priority [`Scheduler`] that defers and coalesces work.
//!
//! # Primary responsibilities
//! - **Observer**: watch a path rooted at an object, rebinding as
//!   intermediates are replaced, delivering eagerly or via the scheduler.
//! - **Computed properties**: re-notify observers when declared
//!   dependencies change, transitively.
//! - **Scheduler**: three priority queues, a debounce window, cancellation,
//!   and a per-flush task budget.
//!
//! # How it fits in the system
//! `trellis-core` supplies paths, tokens, clocks and errors. The render
//! layer and the directives subscribe to observers and enqueue their
//! updates here.

pub mod config;
pub mod reactive;
pub mod scheduler;

pub use config::{ConfigError, SchedulerConfig, SchedulerConfigParse};
pub use reactive::{
    Getter, Identity, List, Listener, Object, Observer, ObserverId, Opaque, Subscription, Value,
    WeakObject, WeakObserver,
};
pub use scheduler::{FlushReport, Pending, Priority, Scheduler, SchedulerStats};
