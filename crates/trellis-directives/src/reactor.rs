#![forbid(unsafe_code)]

//! Update coalescing shared by every directive.
//!
//! # Design
//!
//! A directive owns one [`UpdateQueue`]. Observer listeners never run the
//! update directly; they call [`request_update`]:
//!
//! - **Deferred** (a scheduler is present): at most one update task is
//!   pending. It is enqueued at high priority with a cancellation token, so
//!   several dependency changes within a flush collapse into one pass, and
//!   disposal cancels it.
//! - **Eager** (no scheduler): the update runs immediately. A request that
//!   arrives while the update is running marks the queue dirty and the
//!   running pass repeats, bounded by [`MAX_REFIRE_PASSES`].
//!
//! # Failure Modes
//!
//! - **Evaluation failure**: deferred updates return the error to the
//!   scheduler, which reports it after the flush. Eager updates log it and
//!   keep it for [`UpdateQueue::take_errors`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::{CancellationTokenSource, ObservablePath, ReactiveError};
use trellis_runtime::reactive::MAX_REFIRE_PASSES;
use trellis_runtime::{Observer, Priority, Scheduler, Subscription};

use crate::directive::DirectiveStats;
use crate::scope::{Scope, ScopeSubscription};

/// A directive that can be re-evaluated.
pub(crate) trait Reactive: 'static {
    fn queue(&self) -> &UpdateQueue;

    /// Re-evaluate and reconcile.
    fn update(this: &Rc<Self>) -> Result<(), ReactiveError>;
}

pub(crate) struct UpdateQueue {
    name: &'static str,
    scheduler: Option<Scheduler>,
    pending: RefCell<Option<CancellationTokenSource>>,
    running: Cell<bool>,
    dirty: Cell<bool>,
    closed: Cell<bool>,
    errors: RefCell<Vec<ReactiveError>>,
    watches: RefCell<Vec<ScopeSubscription>>,
    stats: Cell<DirectiveStats>,
}

impl UpdateQueue {
    pub(crate) fn new(name: &'static str, scheduler: Option<Scheduler>) -> Self {
        Self {
            name,
            scheduler,
            pending: RefCell::new(None),
            running: Cell::new(false),
            dirty: Cell::new(false),
            closed: Cell::new(false),
            errors: RefCell::new(Vec::new()),
            watches: RefCell::new(Vec::new()),
            stats: Cell::new(DirectiveStats::default()),
        }
    }

    pub(crate) fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub(crate) fn stats(&self) -> DirectiveStats {
        self.stats.get()
    }

    pub(crate) fn record(&self, edit: impl FnOnce(&mut DirectiveStats)) {
        let mut stats = self.stats.get();
        edit(&mut stats);
        self.stats.set(stats);
    }

    pub(crate) fn take_errors(&self) -> Vec<ReactiveError> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending
            .borrow()
            .as_ref()
            .is_some_and(|source| !source.is_cancelled())
    }

    pub(crate) fn keep(&self, watch: ScopeSubscription) {
        self.watches.borrow_mut().push(watch);
    }

    /// Stop accepting updates: cancel the pending task and drop every
    /// subscription. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        if self.closed.replace(true) {
            return false;
        }
        if let Some(pending) = self.pending.borrow_mut().take() {
            pending.cancel();
        }
        let watches = std::mem::take(&mut *self.watches.borrow_mut());
        drop(watches);
        true
    }
}

/// Subscribe `target` to every path in `dependencies`, following each name
/// to whichever scope level binds it.
pub(crate) fn watch<T: Reactive>(target: &Rc<T>, scope: &Scope, dependencies: &[ObservablePath]) {
    for path in dependencies {
        let weak = Rc::downgrade(target);
        let watch = scope.watch(path, target.queue().scheduler(), move |_| {
            if let Some(target) = weak.upgrade() {
                request_update(&target);
            }
        });
        target.queue().keep(watch);
    }
}

/// Route `observer`'s notifications into `target`'s update queue.
pub(crate) fn listen<T: Reactive>(target: &Rc<T>, observer: &Observer) -> Subscription {
    let weak = Rc::downgrade(target);
    observer.subscribe_fn(move |_| {
        if let Some(target) = weak.upgrade() {
            request_update(&target);
        }
    })
}

/// Ask for a re-evaluation of `target`.
pub(crate) fn request_update<T: Reactive>(target: &Rc<T>) {
    let queue = target.queue();
    if queue.closed.get() {
        return;
    }
    let Some(scheduler) = &queue.scheduler else {
        run_eagerly(target);
        return;
    };
    if queue.has_pending() {
        tracing::trace!(directive = queue.name, "update coalesced");
        return;
    }
    let source = CancellationTokenSource::new();
    let token = source.token();
    *queue.pending.borrow_mut() = Some(source);
    let weak = Rc::downgrade(target);
    scheduler.enqueue(
        move || {
            let Some(target) = weak.upgrade() else {
                return Ok(());
            };
            target.queue().pending.borrow_mut().take();
            run(&target)
        },
        Priority::High,
        Some(token),
    );
}

/// Run the first evaluation synchronously, whatever the delivery mode.
pub(crate) fn initial_update<T: Reactive>(target: &Rc<T>) -> Result<(), ReactiveError> {
    let queue = target.queue();
    queue.running.set(true);
    let outcome = run(target);
    queue.running.set(false);
    if queue.dirty.replace(false) && outcome.is_ok() {
        run_eagerly(target);
    }
    outcome
}

fn run<T: Reactive>(target: &Rc<T>) -> Result<(), ReactiveError> {
    let queue = target.queue();
    if queue.closed.get() {
        return Ok(());
    }
    queue.record(|s| s.updates += 1);
    T::update(target)
}

fn run_eagerly<T: Reactive>(target: &Rc<T>) {
    let queue = target.queue();
    if queue.running.get() {
        queue.dirty.set(true);
        return;
    }
    queue.running.set(true);
    let mut passes = 0;
    loop {
        queue.dirty.set(false);
        passes += 1;
        if let Err(error) = run(target) {
            tracing::warn!(directive = queue.name, %error, "directive update failed");
            queue.errors.borrow_mut().push(error);
        }
        if !queue.dirty.get() || queue.closed.get() {
            break;
        }
        if passes >= MAX_REFIRE_PASSES {
            tracing::warn!(directive = queue.name, passes, "directive keeps invalidating itself; giving up");
            break;
        }
    }
    queue.running.set(false);
}
