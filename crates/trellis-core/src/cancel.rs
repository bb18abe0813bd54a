#![forbid(unsafe_code)]

//! Cooperative cancellation for queued work.
//!
//! A [`CancellationTokenSource`] is held by whoever owns a piece of pending
//! work (an async observer, a directive with a queued update). The
//! [`CancellationToken`] it hands out travels with the queued task. The
//! scheduler checks the token twice: at enqueue time and again right before
//! the task would run. Either way a cancelled token means the task is skipped
//! silently.
//!
//! # Design
//!
//! Both halves share one `Rc<Cell<bool>>`. Cancellation is one-way: once set,
//! the flag never clears. Tokens are `!Send` on purpose; all scheduler state
//! lives on a single thread.
//!
//! # Example
//!
//! ```
//! use trellis_core::cancel::CancellationTokenSource;
//!
//! let source = CancellationTokenSource::new();
//! let token = source.token();
//! assert!(!token.is_cancelled());
//!
//! source.cancel();
//! assert!(token.is_cancelled());
//! ```

use std::cell::Cell;
use std::rc::Rc;

/// Owner half of a cancellation pair.
///
/// Cloning shares the same flag; cancelling any clone cancels every token.
#[derive(Clone, Default)]
pub struct CancellationTokenSource {
    flag: Rc<Cell<bool>>,
}

impl CancellationTokenSource {
    /// Create a fresh, uncancelled source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            flag: Rc::clone(&self.flag),
        }
    }

    /// Cancel every token issued by this source. Idempotent.
    pub fn cancel(&self) {
        if !self.flag.replace(true) {
            tracing::trace!("cancellation token cancelled");
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.get()
    }
}

impl std::fmt::Debug for CancellationTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationTokenSource")
            .field("cancelled", &self.flag.get())
            .finish()
    }
}

/// Observer half of a cancellation pair.
#[derive(Clone)]
pub struct CancellationToken {
    flag: Rc<Cell<bool>>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn none() -> Self {
        Self {
            flag: Rc::new(Cell::new(false)),
        }
    }

    /// Whether the owning source has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.get()
    }

    /// Whether both tokens observe the same source.
    #[must_use]
    pub fn same_source(&self, other: &CancellationToken) -> bool {
        Rc::ptr_eq(&self.flag, &other.flag)
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.flag.get())
            .finish()
    }
}
