#![forbid(unsafe_code)]

//! Core: observable paths, cancellation, clocks, errors and disposal.
//!
//! # Role in Trellis
//! `trellis-core` is the leaf layer. It owns the vocabulary every other
//! crate speaks: how a property path is spelled, how a queued task is
//! cancelled, where time comes from, what can go wrong, and how resources
//! are torn down.
//!
//! # Primary responsibilities
//! - **ObservablePath**: ordered property-key sequence with a canonical key.
//! - **CancellationTokenSource / CancellationToken**: single-threaded
//!   cooperative cancellation consumed by the scheduler.
//! - **Clock**: wall-clock or manually advanced time for deterministic tests.
//! - **ReactiveError**: the error taxonomy shared by the runtime and the
//!   directives.
//! - **Disposable**: idempotent teardown, plus [`DisposeBag`] for grouped,
//!   failure-isolated disposal.
//!
//! # How it fits in the system
//! The runtime (`trellis-runtime`) builds the observer graph and scheduler on
//! top of these types; the render layer (`trellis-render`) and the directives
//! (`trellis-directives`) only ever exchange these types across crate seams.

pub mod cancel;
pub mod clock;
pub mod disposable;
pub mod error;
pub mod path;

pub use cancel::{CancellationToken, CancellationTokenSource};
pub use clock::{Clock, ManualClock};
pub use disposable::{DisposeBag, Disposable, FnDisposable};
pub use error::ReactiveError;
pub use path::ObservablePath;
