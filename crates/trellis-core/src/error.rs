#![forbid(unsafe_code)]

//! Error taxonomy for the reactive core.
//!
//! # Failure Modes
//!
//! | Variant | Cause | Behavior |
//! |---------|-------|----------|
//! | `Protocol` | API misuse (unknown listener, stale node, unknown directive) | Fatal to the caller, never retried |
//! | `Evaluation` | An external evaluator failed during (re-)evaluation | Propagated with expression source and directive |
//! | `TaskCanceled` | Waiting on a cancellable operation that got cancelled | Returned only to explicit waiters |
//! | `FlushLimit` | A flush ran more tasks than its configured budget | Flush stops, remaining tasks stay queued |
//! | `TaskPanicked` | A scheduled task or listener panicked | Caught at the task boundary, the flush continues |
//! | `Flush` | One or more tasks failed during a flush | Reported after the batch completes |
//!
//! Cancellation of a queued task is never an error; it means the task was
//! superseded.

use std::any::Any;
use std::fmt;

/// Message carried by the protocol error raised for an unknown listener.
pub const LISTENER_NOT_SUBSCRIBED: &str = "Listener not subscribed";

/// Errors raised by the observer graph, the scheduler and the directives.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactiveError {
    /// The caller broke the API contract.
    Protocol(String),
    /// An evaluator failed.
    Evaluation {
        /// Directive that was evaluating (`"loop"`, `"choice"`, ...).
        directive: String,
        /// Source text of the failing expression.
        expression: String,
        /// Evaluator-provided message.
        message: String,
    },
    /// An explicitly awaited operation was cancelled before it ran.
    TaskCanceled,
    /// A single flush exceeded its task budget.
    FlushLimit {
        /// Configured budget.
        limit: usize,
    },
    /// A task panicked; carries the panic message when it was a string.
    TaskPanicked(String),
    /// Tasks failed during a flush; each failure is kept in order.
    Flush(Vec<ReactiveError>),
}

impl ReactiveError {
    /// Build a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// The protocol error for unsubscribing an unknown listener.
    #[must_use]
    pub fn listener_not_subscribed() -> Self {
        Self::Protocol(LISTENER_NOT_SUBSCRIBED.to_string())
    }

    /// Build an evaluation error.
    #[must_use]
    pub fn evaluation(
        directive: impl Into<String>,
        expression: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Evaluation {
            directive: directive.into(),
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Build the error for a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::TaskPanicked(message)
    }

    /// Whether this is a protocol error.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Whether this is an evaluation error (directly or inside a flush report).
    #[must_use]
    pub fn is_evaluation(&self) -> bool {
        match self {
            Self::Evaluation { .. } => true,
            Self::Flush(errors) => errors.iter().any(Self::is_evaluation),
            _ => false,
        }
    }
}

impl fmt::Display for ReactiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
            Self::Evaluation {
                directive,
                expression,
                message,
            } => write!(
                f,
                "evaluation error in {directive} while evaluating `{expression}`: {message}"
            ),
            Self::TaskCanceled => write!(f, "task canceled"),
            Self::TaskPanicked(message) => write!(f, "task panicked: {message}"),
            Self::FlushLimit { limit } => {
                write!(f, "flush exceeded its budget of {limit} tasks")
            }
            Self::Flush(errors) => {
                write!(f, "{} task(s) failed during flush", errors.len())?;
                if let Some(first) = errors.first() {
                    write!(f, "; first: {first}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ReactiveError {}
