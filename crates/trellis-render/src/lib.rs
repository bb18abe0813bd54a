#![forbid(unsafe_code)]

//! Render layer: the output tree and the blocks directives render into.
//!
//! # Role in Trellis
//! `trellis-render` is the stand-in for a host output tree. It stores nodes
//! in a generation-checked arena ([`Document`]) and provides [`Block`], the
//! anchor pair every structural directive owns.
//!
//! # Primary responsibilities
//! - **Document**: create, insert, move, detach and dispose nodes; run
//!   node-attached disposables on teardown; serialize to markup.
//! - **Block**: connect or splice a region, append content, clear it, move
//!   it as a unit, dispose it idempotently.
//!
//! # How it fits in the system
//! Directives in `trellis-directives` create blocks here and attach their
//! own teardown to the block's open anchor, so disposing any ancestor node
//! tears down every directive nested inside it.

pub mod block;
pub mod document;

pub use block::Block;
pub use document::{Document, NodeId, NodeKind, TreeError};
