#![forbid(unsafe_code)]

//! Text bindings.
//!
//! A [`TextBinding`] keeps one text node equal to the display form of an
//! expression. It shares the directives' update queue, so it is eager
//! without a scheduler and coalesced with one.

use std::fmt;
use std::rc::Rc;

use trellis_core::{Disposable, ReactiveError};
use trellis_render::{Document, NodeId};
use trellis_runtime::Scheduler;

use crate::expression::Expression;
use crate::reactor::{self, Reactive, UpdateQueue};
use crate::scope::Scope;

struct TextInner {
    queue: UpdateQueue,
    document: Document,
    node: NodeId,
    expression: Expression,
    scope: Scope,
}

impl Reactive for TextInner {
    fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    fn update(this: &Rc<Self>) -> Result<(), ReactiveError> {
        if !this.document.is_alive(this.node) {
            return Ok(());
        }
        let value = this.expression.evaluate(&this.scope, "text")?;
        this.document.set_text(this.node, value.to_string())?;
        Ok(())
    }
}

/// Keeps a text node in sync with an expression.
#[derive(Clone)]
pub struct TextBinding {
    inner: Rc<TextInner>,
}

impl TextBinding {
    /// Bind `node` and write the initial text.
    ///
    /// # Errors
    ///
    /// The initial evaluation's error, or a tree error when `node` is not a
    /// text node.
    pub fn new(
        document: &Document,
        node: NodeId,
        expression: Expression,
        scope: &Scope,
        scheduler: Option<&Scheduler>,
    ) -> Result<Self, ReactiveError> {
        let inner = Rc::new(TextInner {
            queue: UpdateQueue::new("text", scheduler.cloned()),
            document: document.clone(),
            node,
            expression,
            scope: scope.clone(),
        });
        reactor::watch(&inner, &inner.scope, inner.expression.dependencies());
        if let Err(err) = reactor::initial_update(&inner) {
            inner.queue.close();
            return Err(err);
        }
        Ok(Self { inner })
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Eager-mode evaluation errors since the last call.
    pub fn take_errors(&self) -> Vec<ReactiveError> {
        self.inner.queue.take_errors()
    }

    /// Stop tracking. The text node keeps its last value.
    pub fn dispose(&self) {
        if self.inner.queue.close() {
            tracing::trace!(node = %self.inner.node, "text binding disposed");
        }
    }
}

impl Disposable for TextBinding {
    fn dispose(&mut self) {
        TextBinding::dispose(self);
    }
}

impl fmt::Debug for TextBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextBinding")
            .field("node", &self.inner.node)
            .field("expression", &self.inner.expression.source())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{Clock, ManualClock};
    use trellis_runtime::{Object, SchedulerConfig, Value};

    #[test]
    fn eager_binding_tracks_writes() {
        let doc = Document::new();
        let node = doc.create_text("");
        let data = Object::from_pairs([("count", 1)]);
        let binding =
            TextBinding::new(&doc, node, Expression::path("count"), &Scope::new(data.clone()), None).unwrap();
        assert_eq!(doc.text(node).as_deref(), Some("1"));
        data.set("count", 2);
        assert_eq!(doc.text(node).as_deref(), Some("2"));

        binding.dispose();
        data.set("count", 3);
        assert_eq!(doc.text(node).as_deref(), Some("2"));
    }

    #[test]
    fn deferred_binding_coalesces() {
        let doc = Document::new();
        let node = doc.create_text("");
        let data = Object::from_pairs([("a", 1), ("b", 1)]);
        let scheduler = Scheduler::with_clock(SchedulerConfig::immediate(), Clock::manual(&ManualClock::new()));
        let sum = Expression::new("a + b", ["a", "b"], |s| {
            let a = s.get("a").as_number().unwrap_or(0.0);
            let b = s.get("b").as_number().unwrap_or(0.0);
            Ok(Value::from(a + b))
        });
        let binding = TextBinding::new(&doc, node, sum, &Scope::new(data.clone()), Some(&scheduler)).unwrap();
        data.set("a", 10);
        data.set("b", 20);
        assert_eq!(doc.text(node).as_deref(), Some("2"));
        scheduler.when_done().unwrap();
        assert_eq!(doc.text(node).as_deref(), Some("30"));
        assert_eq!(binding.inner.queue.stats().updates, 2);
    }

    #[test]
    fn eager_errors_are_kept() {
        let doc = Document::new();
        let node = doc.create_text("");
        let data = Object::from_pairs([("ok", true)]);
        let expr = Expression::new("check(ok)", ["ok"], |s| {
            if s.get("ok").is_truthy() {
                Ok(Value::from("fine"))
            } else {
                Err("not ok".to_string())
            }
        });
        let binding = TextBinding::new(&doc, node, expr, &Scope::new(data.clone()), None).unwrap();
        data.set("ok", false);
        let errors = binding.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_evaluation());
        assert_eq!(doc.text(node).as_deref(), Some("fine"));
    }
}
