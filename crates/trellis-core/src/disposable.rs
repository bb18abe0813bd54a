#![forbid(unsafe_code)]

//! Idempotent teardown.
//!
//! [`Disposable`] is the contract every owned resource honours: calling
//! `dispose()` releases it, and calling it again does nothing.
//!
//! [`DisposeBag`] groups disposables so they can be torn down together. A
//! member that panics during teardown does not stop its siblings: every
//! member is disposed, the failure is logged, and the first panic is resumed
//! once the whole bag is empty.

use std::panic::{self, AssertUnwindSafe};

/// An owned resource that can be released.
///
/// Implementations must be idempotent: a second `dispose()` is a no-op.
pub trait Disposable {
    /// Release the resource.
    fn dispose(&mut self);
}

impl<T: Disposable + ?Sized> Disposable for Box<T> {
    fn dispose(&mut self) {
        (**self).dispose();
    }
}

/// A disposable running a closure at most once.
pub struct FnDisposable {
    action: Option<Box<dyn FnOnce()>>,
}

impl FnDisposable {
    /// Wrap `action`.
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Whether the closure has already run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.action.is_none()
    }
}

impl Disposable for FnDisposable {
    fn dispose(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl std::fmt::Debug for FnDisposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDisposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An ordered group of disposables torn down together.
#[derive(Default)]
pub struct DisposeBag {
    items: Vec<Box<dyn Disposable>>,
    disposed: bool,
}

impl DisposeBag {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. Adding to an already disposed bag disposes the member
    /// immediately.
    pub fn push(&mut self, mut item: Box<dyn Disposable>) {
        if self.disposed {
            item.dispose();
            return;
        }
        self.items.push(item);
    }

    /// Add a closure run on disposal.
    pub fn push_fn(&mut self, action: impl FnOnce() + 'static) {
        self.push(Box::new(FnDisposable::new(action)));
    }

    /// Number of members not yet disposed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the bag holds no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether [`dispose`](Disposable::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Disposable for DisposeBag {
    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let mut first_panic = None;
        // Members are disposed in reverse registration order.
        while let Some(mut item) = self.items.pop() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| item.dispose()));
            if let Err(payload) = outcome {
                tracing::error!("disposable panicked during teardown; continuing with siblings");
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

impl std::fmt::Debug for DisposeBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeBag")
            .field("len", &self.items.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
