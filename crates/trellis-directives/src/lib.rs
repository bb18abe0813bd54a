#![forbid(unsafe_code)]

//! Structural directives: Loop, Choice, Injection and Placeholder.
//!
//! # Role in Trellis
//! `trellis-directives` turns observed values into output-tree structure.
//! Each directive owns a [`Block`](trellis_render::Block), subscribes to the
//! paths its expressions read, and reconciles the Block's content whenever
//! one of them changes.
//!
//! # Primary responsibilities
//! - **Loop**: keyed list reconciliation with instance reuse and moves.
//! - **Choice**: first-truthy branch selection with idempotent re-evaluation.
//! - **Injection / Placeholder**: per-host content slots that react to
//!   registrations on both sides.
//! - **TextBinding**: the non-structural binding activators use for text.
//! - **DirectiveRegistry**: name-based creation for nested directives.
//!
//! # How it fits in the system
//! Expressions and scopes read the runtime's observable objects. Updates are
//! eager without a scheduler and coalesced into one high-priority task per
//! directive with one. Content comes from [`NodeFactory`] implementations
//! whose activators may create further directives through the registry.

pub mod choice;
pub mod directive;
pub mod expression;
pub mod factory;
pub mod host;
pub mod injection;
pub mod placeholder;
mod reactor;
pub mod registry;
pub mod repeat;
pub mod scope;
pub mod text;

pub use choice::{Branch, Choice, ChoiceSpec, Selection};
pub use directive::{Directive, DirectiveContext, DirectiveSpec, DirectiveStats, Position, SharedFactory};
pub use expression::{Evaluator, Expression};
pub use factory::{Activation, Activator, ElementFactory, FnFactory, NodeFactory, TextFactory};
pub use host::{Host, Injected, InjectionRegistry, RegistrationId};
pub use injection::{Injection, InjectionSpec};
pub use placeholder::{Placeholder, PlaceholderSpec};
pub use registry::{DirectiveConstructor, DirectiveRegistry};
pub use repeat::{InstanceId, Loop, LoopKey, LoopSpec};
pub use scope::{Scope, ScopeSubscription};
pub use text::TextBinding;
