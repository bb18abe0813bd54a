#![forbid(unsafe_code)]

//! Trellis: observable data, a priority scheduler and structural directives.
//!
//! This crate re-exports the workspace's public surface. Most programs only
//! need the [`prelude`]:
//!
//! ```
//! use trellis::prelude::*;
//!
//! let doc = Document::new();
//! let root = doc.create_element("ul");
//! let items = List::from_vec(vec![Value::from("a"), Value::from("b")]);
//! let data = Object::from_pairs([("items", items.clone())]);
//! let spec = LoopSpec::new(
//!     Expression::path("items"),
//!     ElementFactory::new("li").bind_text(Expression::path("item")),
//! );
//! let _rows = Loop::new(&DirectiveContext::new(&doc, root, Scope::new(data)), spec)?;
//! assert_eq!(doc.visible_markup(root), "<li>a</li><li>b</li>");
//!
//! items.push("c");
//! assert_eq!(doc.visible_markup(root), "<li>a</li><li>b</li><li>c</li>");
//! # Ok::<(), trellis::ReactiveError>(())
//! ```
//!
//! # Crates
//! - [`core`]: paths, cancellation, clocks, errors, disposables.
//! - [`runtime`]: the value model, observers and the scheduler.
//! - [`render`]: the arena output tree and [`Block`].
//! - [`directives`]: Loop, Choice, Injection, Placeholder and friends.

pub use trellis_core as core;
pub use trellis_directives as directives;
pub use trellis_render as render;
pub use trellis_runtime as runtime;

pub use trellis_core::{
    CancellationToken, CancellationTokenSource, Clock, DisposeBag, Disposable, FnDisposable,
    ManualClock, ObservablePath, ReactiveError,
};
pub use trellis_directives::{
    Choice, ChoiceSpec, Directive, DirectiveContext, DirectiveRegistry, DirectiveSpec,
    DirectiveStats, ElementFactory, Expression, Host, Injection, InjectionSpec, Loop, LoopSpec,
    NodeFactory, Placeholder, PlaceholderSpec, Scope, Selection, TextBinding, TextFactory,
};
pub use trellis_render::{Block, Document, NodeId, TreeError};
pub use trellis_runtime::{
    FlushReport, List, Object, Observer, Priority, Scheduler, SchedulerConfig, Subscription, Value,
};

/// A [`Scheduler`] configured from the `TRELLIS_*` environment variables.
#[must_use]
pub fn scheduler_from_env() -> Scheduler {
    let config = SchedulerConfig::from_env();
    tracing::debug!(?config, "scheduler configured from environment");
    Scheduler::new(config)
}

/// The types most programs need.
pub mod prelude {
    pub use crate::{
        Block, Choice, ChoiceSpec, Directive, DirectiveContext, Disposable, Document,
        ElementFactory, Expression, Injection, InjectionSpec, List, Loop, LoopSpec, NodeId,
        Object, Placeholder, PlaceholderSpec, Priority, ReactiveError, Scheduler,
        SchedulerConfig, Scope, Value,
    };
}
