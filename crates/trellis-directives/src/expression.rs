#![forbid(unsafe_code)]

//! Bound expressions.
//!
//! An [`Expression`] pairs an opaque evaluator with the source text it was
//! compiled from and the scope paths it reads. Directives never look inside
//! the evaluator: they observe the declared dependencies and call
//! [`evaluate`](Expression::evaluate) when one changes.

use std::fmt;
use std::rc::Rc;

use trellis_core::{ObservablePath, ReactiveError};
use trellis_runtime::Value;

use crate::scope::Scope;

/// Evaluator callback. Errors are plain messages; the directive wraps them.
pub type Evaluator = Rc<dyn Fn(&Scope) -> Result<Value, String>>;

/// An evaluator plus its source text and dependency paths.
#[derive(Clone)]
pub struct Expression {
    source: Rc<str>,
    dependencies: Vec<ObservablePath>,
    evaluator: Evaluator,
}

impl Expression {
    /// Wrap an evaluator.
    pub fn new<I, P>(
        source: impl Into<Rc<str>>,
        dependencies: I,
        evaluator: impl Fn(&Scope) -> Result<Value, String> + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ObservablePath>,
    {
        Self {
            source: source.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            evaluator: Rc::new(evaluator),
        }
    }

    /// Read a scope path. Unreachable paths evaluate to `Null`.
    #[must_use]
    pub fn path(path: impl Into<ObservablePath>) -> Self {
        let path = path.into();
        let source: Rc<str> = path.key().into();
        let read = path.clone();
        Self {
            source,
            dependencies: vec![path],
            evaluator: Rc::new(move |scope: &Scope| Ok(scope.resolve(&read).unwrap_or_default())),
        }
    }

    /// A value that never changes and depends on nothing.
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let source: Rc<str> = format!("{value:?}").into();
        Self {
            source,
            dependencies: Vec::new(),
            evaluator: Rc::new(move |_: &Scope| Ok(value.clone())),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn dependencies(&self) -> &[ObservablePath] {
        &self.dependencies
    }

    /// Evaluate in `scope` on behalf of `directive`.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Evaluation`] carrying the source text and
    /// `directive` when the evaluator fails.
    pub fn evaluate(&self, scope: &Scope, directive: &str) -> Result<Value, ReactiveError> {
        (self.evaluator)(scope)
            .map_err(|message| ReactiveError::evaluation(directive, self.source.as_ref(), message))
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
