#![forbid(unsafe_code)]

//! Directive lookup by name.
//!
//! Activators create nested directives by name, so the set of available
//! directives is data rather than code. [`DirectiveRegistry::with_builtins`]
//! knows `loop`, `choice`, `inject` and `placeholder`; hosts can register
//! more, or override a builtin, under any name.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use trellis_core::ReactiveError;

use crate::choice::Choice;
use crate::directive::{Directive, DirectiveContext, DirectiveSpec};
use crate::injection::Injection;
use crate::placeholder::Placeholder;
use crate::repeat::Loop;

/// Builds a directive from a context and a spec.
pub type DirectiveConstructor =
    Rc<dyn Fn(&DirectiveContext, DirectiveSpec) -> Result<Box<dyn Directive>, ReactiveError>>;

/// Shared name → constructor map.
#[derive(Clone, Default)]
pub struct DirectiveRegistry {
    constructors: Rc<RefCell<BTreeMap<String, DirectiveConstructor>>>,
}

impl DirectiveRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the four structural directives.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("loop", |ctx, spec| match spec {
            DirectiveSpec::Loop(spec) => Ok(Box::new(Loop::new(ctx, spec)?) as Box<dyn Directive>),
            other => Err(mismatch("loop", &other)),
        });
        registry.register("choice", |ctx, spec| match spec {
            DirectiveSpec::Choice(spec) => Ok(Box::new(Choice::new(ctx, spec)?) as Box<dyn Directive>),
            other => Err(mismatch("choice", &other)),
        });
        registry.register("inject", |ctx, spec| match spec {
            DirectiveSpec::Injection(spec) => Ok(Box::new(Injection::new(ctx, spec)?) as Box<dyn Directive>),
            other => Err(mismatch("inject", &other)),
        });
        registry.register("placeholder", |ctx, spec| match spec {
            DirectiveSpec::Placeholder(spec) => {
                Ok(Box::new(Placeholder::new(ctx, spec)?) as Box<dyn Directive>)
            }
            other => Err(mismatch("placeholder", &other)),
        });
        registry
    }

    /// Register (or replace) `name`.
    pub fn register(
        &self,
        name: impl Into<String>,
        constructor: impl Fn(&DirectiveContext, DirectiveSpec) -> Result<Box<dyn Directive>, ReactiveError>
        + 'static,
    ) {
        let name = name.into();
        tracing::trace!(directive = %name, "directive registered");
        self.constructors.borrow_mut().insert(name, Rc::new(constructor));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.borrow().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.constructors.borrow().keys().cloned().collect()
    }

    /// Instantiate the directive registered as `name`.
    ///
    /// # Errors
    ///
    /// [`ReactiveError::Protocol`] for an unknown name or a spec of the wrong
    /// kind; otherwise whatever the directive's constructor returns.
    pub fn create(
        &self,
        name: &str,
        ctx: &DirectiveContext,
        spec: DirectiveSpec,
    ) -> Result<Box<dyn Directive>, ReactiveError> {
        // Release the map before constructing: constructors may register.
        let constructor = self.constructors.borrow().get(name).cloned();
        let Some(constructor) = constructor else {
            return Err(ReactiveError::protocol(format!("unknown directive `{name}`")));
        };
        tracing::trace!(directive = name, "creating directive");
        constructor(ctx, spec)
    }
}

fn mismatch(name: &str, spec: &DirectiveSpec) -> ReactiveError {
    ReactiveError::protocol(format!(
        "directive `{name}` cannot be built from a `{}` spec",
        spec.kind()
    ))
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::ChoiceSpec;
    use crate::expression::Expression;
    use crate::factory::ElementFactory;
    use crate::repeat::LoopSpec;
    use crate::scope::Scope;
    use trellis_render::Document;
    use trellis_runtime::Object;

    #[test]
    fn builtins_are_registered() {
        let registry = DirectiveRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["choice", "inject", "loop", "placeholder"]);
    }

    #[test]
    fn create_by_name() {
        let doc = Document::new();
        let root = doc.create_element("div");
        let ctx = DirectiveContext::new(&doc, root, Scope::new(Object::from_pairs([("on", true)])));
        let spec = ChoiceSpec::new().when(Expression::path("on"), ElementFactory::new("p"));
        let directive = ctx.registry.create("choice", &ctx, spec.into()).unwrap();
        assert_eq!(directive.name(), "choice");
        assert!(directive.as_any().downcast_ref::<Choice>().is_some());
        assert_eq!(doc.visible_markup(root), "<p></p>");
    }

    #[test]
    fn unknown_name_is_a_protocol_error() {
        let doc = Document::new();
        let root = doc.create_element("div");
        let ctx = DirectiveContext::new(&doc, root, Scope::default());
        let spec = LoopSpec::new(Expression::path("xs"), ElementFactory::new("li"));
        let err = ctx.registry.create("repeat", &ctx, spec.into()).err().expect("creation should fail");
        assert_eq!(err, ReactiveError::protocol("unknown directive `repeat`"));
    }

    #[test]
    fn mismatched_spec_is_rejected() {
        let doc = Document::new();
        let root = doc.create_element("div");
        let ctx = DirectiveContext::new(&doc, root, Scope::default());
        let spec = LoopSpec::new(Expression::path("xs"), ElementFactory::new("li"));
        let err = ctx.registry.create("choice", &ctx, spec.into()).err().expect("creation should fail");
        assert!(err.is_protocol());
        assert_eq!(doc.inner_markup(root), "");
    }

    #[test]
    fn custom_directives_can_be_added() {
        let registry = DirectiveRegistry::new();
        registry.register("list", |ctx, spec| match spec {
            DirectiveSpec::Loop(spec) => Ok(Box::new(Loop::new(ctx, spec)?) as Box<dyn Directive>),
            other => Err(mismatch("list", &other)),
        });
        assert!(registry.contains("list"));
        assert!(!registry.contains("loop"));
    }
}
