#![forbid(unsafe_code)]

//! Debounced priority scheduler.
//!
//! # Design
//!
//! Tasks wait in three FIFO queues, one per [`Priority`]. The first enqueue
//! while idle arms a deadline `debounce` in the future; later enqueues never
//! push it back. When the deadline passes, [`flush`](Scheduler::flush) drains
//! the queues, always taking the oldest task of the highest non-empty
//! priority. Tasks enqueued while a flush runs join that flush.
//!
//! The scheduler never owns a thread. The host drives it with
//! [`tick`](Scheduler::tick) from its event loop, or blocks on
//! [`when_done`](Scheduler::when_done), which sleeps on the scheduler's
//! [`Clock`] until every queue is empty.
//!
//! # Invariants
//!
//! 1. Within one priority tasks run in enqueue order.
//! 2. No `Normal` task runs while a `High` task is queued; likewise for
//!    `Low` against both.
//! 3. A task whose token is cancelled before it starts never runs.
//! 4. A failing task does not stop the flush; its error is collected. A
//!    panicking task is caught and reported as
//!    [`ReactiveError::TaskPanicked`].
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Re-entrant `flush` from a task | Returns an empty report, the outer flush continues |
//! | `when_done` from a task | [`ReactiveError::Protocol`] |
//! | More than `max_tasks_per_flush` tasks | Flush stops with [`ReactiveError::FlushLimit`], the rest stay queued and the deadline is re-armed |

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, debug_span, trace, warn};
use trellis_core::{CancellationToken, Clock, ReactiveError};
use web_time::Instant;

use crate::config::SchedulerConfig;

static NEXT_SCHEDULER: AtomicU64 = AtomicU64::new(1);

/// Task priority. `High` runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// All priorities from most to least urgent.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

type Task = Box<dyn FnOnce() -> Result<(), ReactiveError>>;

struct Queued {
    task: Task,
    token: Option<CancellationToken>,
}

/// Cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub enqueued: u64,
    /// Tasks dropped at enqueue time because their token was already cancelled.
    pub dropped: u64,
    pub executed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub flushes: u64,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Tasks that ran (including failures).
    pub executed: usize,
    /// Tasks dropped because their token was cancelled.
    pub skipped: usize,
    /// Failures in execution order.
    pub errors: Vec<ReactiveError>,
}

impl FlushReport {
    /// Whether the flush stopped on its task budget.
    #[must_use]
    pub fn hit_limit(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, ReactiveError::FlushLimit { .. }))
    }
}

struct State {
    queues: [VecDeque<Queued>; 3],
    deadline: Option<Instant>,
    flushing: bool,
    stats: SchedulerStats,
}

impl State {
    fn pending(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

struct SchedulerInner {
    id: u64,
    config: SchedulerConfig,
    clock: Clock,
    state: RefCell<State>,
}

/// Single-threaded debounced priority scheduler.
///
/// Cloning creates another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler on the system clock.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Clock::System)
    }

    /// Create a scheduler on an explicit clock.
    #[must_use]
    pub fn with_clock(config: SchedulerConfig, clock: Clock) -> Self {
        let id = NEXT_SCHEDULER.fetch_add(1, Ordering::Relaxed);
        debug!(
            scheduler = id,
            debounce_ms = config.debounce.as_millis() as u64,
            max_tasks_per_flush = config.max_tasks_per_flush,
            "scheduler created"
        );
        Self {
            inner: Rc::new(SchedulerInner {
                id,
                config,
                clock,
                state: RefCell::new(State {
                    queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                    deadline: None,
                    flushing: false,
                    stats: SchedulerStats::default(),
                }),
            }),
        }
    }

    /// Process-unique scheduler id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Whether both handles refer to the same scheduler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue `task`.
    ///
    /// Returns `false` when `token` is already cancelled; the task is then
    /// dropped without being queued.
    pub fn enqueue(
        &self,
        task: impl FnOnce() -> Result<(), ReactiveError> + 'static,
        priority: Priority,
        token: Option<CancellationToken>,
    ) -> bool {
        let mut state = self.inner.state.borrow_mut();
        if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            state.stats.dropped += 1;
            trace!(scheduler = self.inner.id, ?priority, "cancelled task dropped at enqueue");
            return false;
        }
        state.queues[priority.index()].push_back(Queued {
            task: Box::new(task),
            token,
        });
        state.stats.enqueued += 1;
        if !state.flushing && state.deadline.is_none() {
            let deadline = self.inner.clock.now() + self.inner.config.debounce;
            state.deadline = Some(deadline);
            trace!(scheduler = self.inner.id, "flush armed");
        }
        true
    }

    /// Queue a value-producing task and get a handle to its result.
    pub fn schedule<T: 'static>(
        &self,
        task: impl FnOnce() -> Result<T, ReactiveError> + 'static,
        priority: Priority,
        token: Option<CancellationToken>,
    ) -> Pending<T> {
        let slot: Rc<RefCell<Option<Result<T, ReactiveError>>>> = Rc::new(RefCell::new(None));
        let target = Rc::clone(&slot);
        self.enqueue(
            move || {
                let outcome = task();
                let reported = outcome.as_ref().err().cloned();
                *target.borrow_mut() = Some(outcome);
                match reported {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            },
            priority,
            token,
        );
        Pending {
            slot,
            scheduler: self.clone(),
        }
    }

    /// When the armed flush is due, if anything is queued.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.state.borrow().deadline
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.borrow().pending()
    }

    /// Whether nothing is queued and no flush is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.borrow();
        !state.flushing && state.pending() == 0
    }

    /// Whether a flush is running.
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.inner.state.borrow().flushing
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.state.borrow().stats
    }

    /// Flush if the armed deadline has passed.
    pub fn tick(&self) -> Option<FlushReport> {
        let due = self
            .next_deadline()
            .is_some_and(|deadline| deadline <= self.inner.clock.now());
        due.then(|| self.flush())
    }

    /// Drain the queues now, regardless of the deadline.
    pub fn flush(&self) -> FlushReport {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.flushing {
                trace!(scheduler = self.inner.id, "re-entrant flush ignored");
                return FlushReport::default();
            }
            state.flushing = true;
            state.deadline = None;
            state.stats.flushes += 1;
        }
        let _span = debug_span!("scheduler.flush", scheduler = self.inner.id).entered();
        let limit = self.inner.config.max_tasks_per_flush;
        let mut report = FlushReport::default();

        loop {
            let next = {
                let mut state = self.inner.state.borrow_mut();
                if report.executed >= limit && state.pending() > 0 {
                    None
                } else {
                    state.queues.iter_mut().find_map(VecDeque::pop_front)
                }
            };
            let Some(queued) = next else {
                break;
            };
            if queued.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
                report.skipped += 1;
                continue;
            }
            report.executed += 1;
            let task = queued.task;
            let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|payload| Err(ReactiveError::from_panic(payload.as_ref())));
            if let Err(err) = outcome {
                warn!(scheduler = self.inner.id, error = %err, "task failed during flush");
                report.errors.push(err);
            }
        }

        let mut state = self.inner.state.borrow_mut();
        state.flushing = false;
        if state.pending() > 0 {
            warn!(
                scheduler = self.inner.id,
                limit,
                remaining = state.pending(),
                "flush budget exhausted; deferring remaining tasks"
            );
            report.errors.push(ReactiveError::FlushLimit { limit });
            state.deadline = Some(self.inner.clock.now());
        }
        state.stats.executed += report.executed as u64;
        state.stats.skipped += report.skipped as u64;
        state.stats.failed += report
            .errors
            .iter()
            .filter(|e| !matches!(e, ReactiveError::FlushLimit { .. }))
            .count() as u64;
        debug!(
            scheduler = self.inner.id,
            executed = report.executed,
            skipped = report.skipped,
            errors = report.errors.len(),
            "flush complete"
        );
        report
    }

    /// Block until every queue is empty, sleeping on the clock until each
    /// armed deadline.
    ///
    /// # Errors
    ///
    /// - [`ReactiveError::Protocol`] when called from inside a task.
    /// - [`ReactiveError::Flush`] carrying every task failure, in order. A
    ///   flush that hit its budget ends the wait early with the
    ///   [`ReactiveError::FlushLimit`] included.
    pub fn when_done(&self) -> Result<(), ReactiveError> {
        if self.is_flushing() {
            return Err(ReactiveError::protocol(
                "when_done cannot wait from inside a running flush",
            ));
        }
        let mut errors = Vec::new();
        while let Some(deadline) = self.next_deadline() {
            self.inner.clock.sleep_until(deadline);
            let report = self.flush();
            let limited = report.hit_limit();
            errors.extend(report.errors);
            if limited {
                break;
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReactiveError::Flush(errors))
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Scheduler")
            .field("id", &self.inner.id)
            .field("pending", &state.pending())
            .field("flushing", &state.flushing)
            .field("deadline", &state.deadline)
            .finish()
    }
}

/// Handle to the result of a [`Scheduler::schedule`]d task.
pub struct Pending<T> {
    slot: Rc<RefCell<Option<Result<T, ReactiveError>>>>,
    scheduler: Scheduler,
}

impl<T> Pending<T> {
    /// Whether the task has run.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Take the result if the task already ran.
    pub fn try_take(&self) -> Option<Result<T, ReactiveError>> {
        self.slot.borrow_mut().take()
    }

    /// Drive the scheduler until the task has run and return its result.
    ///
    /// # Errors
    ///
    /// - The task's own error.
    /// - [`ReactiveError::TaskCanceled`] when the task was cancelled before
    ///   it started.
    /// - [`ReactiveError::Protocol`] when waiting from inside a flush.
    pub fn wait(self) -> Result<T, ReactiveError> {
        if let Some(outcome) = self.try_take() {
            return outcome;
        }
        let flushed = self.scheduler.when_done();
        match self.try_take() {
            Some(outcome) => outcome,
            None => {
                if let Err(ReactiveError::Protocol(message)) = flushed {
                    return Err(ReactiveError::Protocol(message));
                }
                Err(ReactiveError::TaskCanceled)
            }
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("settled", &self.is_settled())
            .finish()
    }
}
