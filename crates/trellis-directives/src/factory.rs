#![forbid(unsafe_code)]

//! Node factories and activators.
//!
//! A [`NodeFactory`] builds a detached output subtree and optionally returns
//! an [`Activator`]. Directives insert the subtree first and activate it
//! second, so anything the activator binds (text, nested directives) is
//! already placed in the tree. The activator's [`Disposable`] is attached to
//! the produced node and runs when that node is disposed.
//!
//! [`ElementFactory`] covers the common case of one element with
//! attributes, bound text and nested directives. [`TextFactory`] builds one
//! bound text node. [`FnFactory`] adapts a closure.

use std::fmt;
use std::rc::Rc;

use trellis_core::{DisposeBag, Disposable, ReactiveError};
use trellis_render::{Document, NodeId};
use trellis_runtime::Scheduler;

use crate::directive::{DirectiveContext, DirectiveSpec, Position};
use crate::expression::Expression;
use crate::host::Host;
use crate::registry::DirectiveRegistry;
use crate::scope::Scope;
use crate::text::TextBinding;

/// What an activator is handed when content is mounted.
pub struct Activation<'a> {
    pub document: &'a Document,
    /// The node the factory produced, already placed in the tree.
    pub node: NodeId,
    pub host: &'a Host,
    pub scope: &'a Scope,
    pub registry: &'a DirectiveRegistry,
    pub scheduler: Option<&'a Scheduler>,
}

/// Binds a freshly placed subtree. Invoked once per mount.
pub type Activator = Box<dyn FnOnce(&Activation<'_>) -> Result<Box<dyn Disposable>, ReactiveError>>;

/// Builds output subtrees.
pub trait NodeFactory {
    /// Create a detached subtree.
    ///
    /// # Errors
    ///
    /// Propagates tree errors raised while assembling the subtree.
    fn create(&self, document: &Document) -> Result<(NodeId, Option<Activator>), ReactiveError>;
}

// ---------------------------------------------------------------------------
// ElementFactory
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Child {
    Factory(Rc<dyn NodeFactory>),
    Text(String),
    Bound(Expression),
    Directive { name: String, spec: DirectiveSpec },
}

/// One element with static attributes and ordered children.
#[derive(Clone)]
pub struct ElementFactory {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<Child>,
}

impl ElementFactory {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Static text child.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Child::Text(text.into()));
        self
    }

    /// Text child bound to `expression`.
    #[must_use]
    pub fn bind_text(mut self, expression: Expression) -> Self {
        self.children.push(Child::Bound(expression));
        self
    }

    #[must_use]
    pub fn child(mut self, factory: impl NodeFactory + 'static) -> Self {
        self.children.push(Child::Factory(Rc::new(factory)));
        self
    }

    /// Nested directive created by name through the registry on activation.
    #[must_use]
    pub fn directive(mut self, name: impl Into<String>, spec: impl Into<DirectiveSpec>) -> Self {
        self.children.push(Child::Directive {
            name: name.into(),
            spec: spec.into(),
        });
        self
    }
}

enum Pending {
    Activate(NodeId, Activator),
    Bind(NodeId, Expression),
    Directive(NodeId, String, DirectiveSpec),
}

impl NodeFactory for ElementFactory {
    fn create(&self, document: &Document) -> Result<(NodeId, Option<Activator>), ReactiveError> {
        let element = document.create_element(self.tag.as_str());
        for (name, value) in &self.attributes {
            document.set_attribute(element, name.as_str(), value.as_str())?;
        }
        let mut pending = Vec::new();
        for child in &self.children {
            match child {
                Child::Text(text) => {
                    let node = document.create_text(text.as_str());
                    document.append_child(element, node)?;
                }
                Child::Bound(expression) => {
                    let node = document.create_text("");
                    document.append_child(element, node)?;
                    pending.push(Pending::Bind(node, expression.clone()));
                }
                Child::Factory(factory) => {
                    let (node, activator) = factory.create(document)?;
                    document.append_child(element, node)?;
                    if let Some(activator) = activator {
                        pending.push(Pending::Activate(node, activator));
                    }
                }
                Child::Directive { name, spec } => {
                    let marker = document.create_anchor(name.as_str());
                    document.append_child(element, marker)?;
                    pending.push(Pending::Directive(marker, name.clone(), spec.clone()));
                }
            }
        }
        if pending.is_empty() {
            return Ok((element, None));
        }
        let activator: Activator = Box::new(move |activation: &Activation<'_>| -> Result<Box<dyn Disposable>, ReactiveError> {
            let mut bag = DisposeBag::new();
            for item in pending {
                match item {
                    Pending::Activate(node, activate) => {
                        let nested = Activation { node, ..*activation };
                        let teardown = activate(&nested)?;
                        activation.document.attach_disposable(node, teardown)?;
                    }
                    Pending::Bind(node, expression) => {
                        let binding = TextBinding::new(
                            activation.document,
                            node,
                            expression,
                            activation.scope,
                            activation.scheduler,
                        )?;
                        bag.push(Box::new(binding));
                    }
                    Pending::Directive(marker, name, spec) => {
                        let ctx = DirectiveContext {
                            document: activation.document.clone(),
                            parent: activation.node,
                            position: Position::Replace(marker),
                            host: activation.host.clone(),
                            scope: activation.scope.clone(),
                            scheduler: activation.scheduler.cloned(),
                            registry: activation.registry.clone(),
                        };
                        let directive = activation.registry.create(&name, &ctx, spec)?;
                        bag.push(Box::new(directive));
                    }
                }
            }
            Ok(Box::new(bag) as Box<dyn Disposable>)
        });
        Ok((element, Some(activator)))
    }
}

impl fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFactory")
            .field("tag", &self.tag)
            .field("attributes", &self.attributes)
            .field("children", &self.children.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TextFactory / FnFactory
// ---------------------------------------------------------------------------

/// A single text node bound to an expression.
#[derive(Debug, Clone)]
pub struct TextFactory {
    expression: Expression,
}

impl TextFactory {
    #[must_use]
    pub fn new(expression: Expression) -> Self {
        Self { expression }
    }
}

impl NodeFactory for TextFactory {
    fn create(&self, document: &Document) -> Result<(NodeId, Option<Activator>), ReactiveError> {
        let node = document.create_text("");
        let expression = self.expression.clone();
        let activator: Activator = Box::new(move |activation: &Activation<'_>| -> Result<Box<dyn Disposable>, ReactiveError> {
            let binding = TextBinding::new(
                activation.document,
                activation.node,
                expression,
                activation.scope,
                activation.scheduler,
            )?;
            Ok(Box::new(binding) as Box<dyn Disposable>)
        });
        Ok((node, Some(activator)))
    }
}

/// A factory backed by a closure.
pub struct FnFactory<F> {
    build: F,
}

impl<F> FnFactory<F>
where
    F: Fn(&Document) -> Result<(NodeId, Option<Activator>), ReactiveError>,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

impl<F> NodeFactory for FnFactory<F>
where
    F: Fn(&Document) -> Result<(NodeId, Option<Activator>), ReactiveError>,
{
    fn create(&self, document: &Document) -> Result<(NodeId, Option<Activator>), ReactiveError> {
        (self.build)(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_runtime::Object;

    #[test]
    fn static_element_needs_no_activation() {
        let doc = Document::new();
        let factory = ElementFactory::new("li").attr("class", "row").text("hi");
        let (node, activator) = factory.create(&doc).unwrap();
        assert!(activator.is_none());
        assert_eq!(doc.markup(node), "<li class=\"row\">hi</li>");
    }

    #[test]
    fn bound_text_is_filled_on_activation() {
        let doc = Document::new();
        let data = Object::from_pairs([("name", "ada")]);
        let scope = Scope::new(data.clone());
        let host = Host::new();
        let registry = DirectiveRegistry::with_builtins();
        let factory = ElementFactory::new("p").text("hello ").bind_text(Expression::path("name"));
        let (node, activator) = factory.create(&doc).unwrap();
        assert_eq!(doc.markup(node), "<p>hello </p>");

        let activate = activator.unwrap();
        let teardown = activate(&Activation {
            document: &doc,
            node,
            host: &host,
            scope: &scope,
            registry: &registry,
            scheduler: None,
        })
        .unwrap();
        doc.attach_disposable(node, teardown).unwrap();
        assert_eq!(doc.markup(node), "<p>hello ada</p>");

        data.set("name", "grace");
        assert_eq!(doc.markup(node), "<p>hello grace</p>");

        doc.dispose(node);
        data.set("name", "linus");
        assert!(!doc.is_alive(node));
    }

    #[test]
    fn fn_factory_delegates() {
        let doc = Document::new();
        let factory = FnFactory::new(|doc: &Document| Ok((doc.create_text("raw"), None)));
        let (node, activator) = factory.create(&doc).unwrap();
        assert!(activator.is_none());
        assert_eq!(doc.text(node).as_deref(), Some("raw"));
    }
}
