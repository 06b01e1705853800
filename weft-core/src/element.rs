//! Elements and Output
//!
//! A render function returns an [`Element`] tree. Plain nodes and text pass
//! straight through to the committed [`Output`]; component elements become
//! child instances that the runtime reconciles against the previous render.
//!
//! # Component identity
//!
//! A child instance is reused only when the new element has the same
//! [`ComponentIdentity`] (render function and props type) and the same key
//! (or position, for unkeyed children). Anything else unmounts the old
//! instance and mounts a fresh one.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::RenderError;
use crate::graph::InstanceId;
use crate::scope::{BoundaryReset, Scope};

/// What a render function returns.
pub type RenderResult = Result<Element, RenderError>;

/// Signature of a function component.
pub type RenderFn<P> = fn(&mut Scope<'_>, &P) -> RenderResult;

/// Identity used to decide whether a child instance can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentIdentity {
    props: TypeId,
    render: usize,
}

/// Type-erased render entry point.
pub trait ErasedRender {
    fn render(&self, scope: &mut Scope<'_>, props: &dyn Any) -> RenderResult;
}

struct FnRender<P> {
    name: &'static str,
    f: RenderFn<P>,
}

impl<P: 'static> ErasedRender for FnRender<P> {
    fn render(&self, scope: &mut Scope<'_>, props: &dyn Any) -> RenderResult {
        let props = props.downcast_ref::<P>().ok_or_else(|| {
            RenderError::message(format!("props of `{}` have an unexpected type", self.name))
        })?;
        (self.f)(scope, props)
    }
}

fn props_equal<P: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<P>(), b.downcast_ref::<P>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A component to be rendered as a child instance.
#[derive(Clone)]
pub struct ComponentElement {
    name: &'static str,
    identity: ComponentIdentity,
    key: Option<String>,
    props: Rc<dyn Any>,
    render: Rc<dyn ErasedRender>,
    props_eq: Option<fn(&dyn Any, &dyn Any) -> bool>,
    boundary: bool,
}

impl ComponentElement {
    pub fn new<P: 'static>(name: &'static str, render: RenderFn<P>, props: P) -> Self {
        Self {
            name,
            identity: ComponentIdentity {
                props: TypeId::of::<P>(),
                render: render as usize,
            },
            key: None,
            props: Rc::new(props),
            render: Rc::new(FnRender { name, f: render }),
            props_eq: None,
            boundary: false,
        }
    }

    /// A component that skips re-rendering when its props compare equal and
    /// nothing inside it changed.
    pub fn memo<P: PartialEq + 'static>(name: &'static str, render: RenderFn<P>, props: P) -> Self {
        let mut element = Self::new(name, render, props);
        element.props_eq = Some(props_equal::<P>);
        element
    }

    /// A fault boundary around `child`.
    pub fn boundary<F>(fallback: F, child: Element) -> Self
    where
        F: Fn(&RenderError, &BoundaryReset) -> Element + 'static,
    {
        let mut element = Self::new(
            "ErrorBoundary",
            render_boundary,
            BoundaryProps {
                fallback: Rc::new(fallback),
                child,
            },
        );
        element.boundary = true;
        element
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn identity(&self) -> ComponentIdentity {
        self.identity
    }

    pub fn is_boundary(&self) -> bool {
        self.boundary
    }

    pub fn is_memo(&self) -> bool {
        self.props_eq.is_some()
    }

    pub(crate) fn props(&self) -> Rc<dyn Any> {
        Rc::clone(&self.props)
    }

    pub(crate) fn render_fn(&self) -> Rc<dyn ErasedRender> {
        Rc::clone(&self.render)
    }

    /// Whether `other` carries props equal to ours (memo components only).
    pub(crate) fn same_props(&self, other: &Self) -> bool {
        match self.props_eq {
            Some(eq) => {
                self.identity == other.identity && eq(self.props.as_ref(), other.props.as_ref())
            }
            None => false,
        }
    }
}

impl fmt::Debug for ComponentElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentElement")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("memo", &self.is_memo())
            .field("boundary", &self.boundary)
            .finish()
    }
}

/// A host node: tag, attributes and children.
#[derive(Debug, Clone, Default)]
pub struct NodeElement {
    pub tag: String,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<Element>,
}

impl NodeElement {
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: impl Into<Element>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Element>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }
}

/// The result of a render.
#[derive(Debug, Clone, Default)]
pub enum Element {
    #[default]
    Empty,
    Text(String),
    Node(NodeElement),
    Fragment(Vec<Element>),
    Component(ComponentElement),
}

impl Element {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Start a host node. Finish with `.into()` or pass it where an
    /// `Into<Element>` is expected.
    pub fn node(tag: impl Into<String>) -> NodeElement {
        NodeElement {
            tag: tag.into(),
            ..NodeElement::default()
        }
    }

    pub fn fragment<I>(children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Element>,
    {
        Self::Fragment(children.into_iter().map(Into::into).collect())
    }

    pub fn component<P: 'static>(name: &'static str, render: RenderFn<P>, props: P) -> Self {
        Self::Component(ComponentElement::new(name, render, props))
    }

    pub fn memo<P: PartialEq + 'static>(name: &'static str, render: RenderFn<P>, props: P) -> Self {
        Self::Component(ComponentElement::memo(name, render, props))
    }

    pub fn boundary<F>(fallback: F, child: impl Into<Element>) -> Self
    where
        F: Fn(&RenderError, &BoundaryReset) -> Element + 'static,
    {
        Self::Component(ComponentElement::boundary(fallback, child.into()))
    }

    /// Attach a reconciliation key. No effect on non-component elements.
    pub fn with_key(self, key: impl Into<String>) -> Self {
        match self {
            Self::Component(c) => Self::Component(c.with_key(key)),
            other => other,
        }
    }
}

impl From<NodeElement> for Element {
    fn from(node: NodeElement) -> Self {
        Self::Node(node)
    }
}

impl From<ComponentElement> for Element {
    fn from(component: ComponentElement) -> Self {
        Self::Component(component)
    }
}

impl From<&str> for Element {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Element {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

// ----------------------------------------------------------------------------
// Fault boundary
// ----------------------------------------------------------------------------

type Fallback = Rc<dyn Fn(&RenderError, &BoundaryReset) -> Element>;

struct BoundaryProps {
    fallback: Fallback,
    child: Element,
}

fn render_boundary(scope: &mut Scope<'_>, props: &BoundaryProps) -> RenderResult {
    match scope.caught_error() {
        Some(error) => {
            let reset = scope.boundary_reset();
            Ok((props.fallback)(&error, &reset))
        }
        None => Ok(props.child.clone()),
    }
}

// ----------------------------------------------------------------------------
// Committed output
// ----------------------------------------------------------------------------

/// The finalized tree handed to the commit collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    Empty,
    Text {
        text: String,
    },
    Node {
        tag: String,
        attrs: IndexMap<String, String>,
        children: Vec<Output>,
    },
    Fragment {
        children: Vec<Output>,
    },
}

impl Output {
    /// Concatenated text of the whole tree, in document order.
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Self::Empty => {}
            Self::Text { text } => out.push_str(text),
            Self::Node { children, .. } | Self::Fragment { children } => {
                for child in children {
                    child.collect_text(out);
                }
            }
        }
    }

    /// Find the first node with the given tag, depth first.
    pub fn find(&self, tag: &str) -> Option<&Output> {
        match self {
            Self::Node { tag: t, .. } if t == tag => Some(self),
            Self::Node { children, .. } | Self::Fragment { children } => {
                children.iter().find_map(|c| c.find(tag))
            }
            _ => None,
        }
    }
}

/// Rendered output of one instance with child instances left as references.
#[derive(Debug, Clone)]
pub(crate) enum Template {
    Empty,
    Text(String),
    Node {
        tag: String,
        attrs: IndexMap<String, String>,
        children: Vec<Template>,
    },
    Fragment(Vec<Template>),
    Child(InstanceId),
}

impl Template {
    /// Resolve child references into a full output tree.
    pub(crate) fn compose<F>(&self, resolve: &F) -> Output
    where
        F: Fn(InstanceId) -> Output,
    {
        match self {
            Self::Empty => Output::Empty,
            Self::Text(text) => Output::Text { text: text.clone() },
            Self::Node {
                tag,
                attrs,
                children,
            } => Output::Node {
                tag: tag.clone(),
                attrs: attrs.clone(),
                children: children.iter().map(|c| c.compose(resolve)).collect(),
            },
            Self::Fragment(children) => Output::Fragment {
                children: children.iter().map(|c| c.compose(resolve)).collect(),
            },
            Self::Child(id) => resolve(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting(_: &mut Scope<'_>, name: &String) -> RenderResult {
        Ok(Element::text(format!("hello {name}")))
    }

    fn farewell(_: &mut Scope<'_>, name: &String) -> RenderResult {
        Ok(Element::text(format!("bye {name}")))
    }

    #[test]
    fn identity_depends_on_render_fn_and_props_type() {
        let a = ComponentElement::new("Greeting", greeting, "a".to_string());
        let b = ComponentElement::new("Greeting", greeting, "b".to_string());
        let c = ComponentElement::new("Farewell", farewell, "a".to_string());

        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn memo_elements_compare_props() {
        let a = ComponentElement::memo("Greeting", greeting, "a".to_string());
        let same = ComponentElement::memo("Greeting", greeting, "a".to_string());
        let other = ComponentElement::memo("Greeting", greeting, "b".to_string());
        let plain = ComponentElement::new("Greeting", greeting, "a".to_string());

        assert!(a.same_props(&same));
        assert!(!a.same_props(&other));
        assert!(!plain.same_props(&a));
    }

    #[test]
    fn keys_only_apply_to_components() {
        let keyed = Element::component("Greeting", greeting, "x".to_string()).with_key("row-1");
        match keyed {
            Element::Component(c) => assert_eq!(c.key(), Some("row-1")),
            other => panic!("unexpected element {other:?}"),
        }
        assert!(matches!(Element::text("t").with_key("k"), Element::Text(_)));
    }

    #[test]
    fn node_builder_collects_attrs_and_children() {
        let node = Element::node("ul")
            .attr("class", "list")
            .children(["one", "two"])
            .child(Element::text("three"));

        assert_eq!(node.attrs.get("class").map(String::as_str), Some("list"));
        assert_eq!(node.children.len(), 3);
    }

    #[test]
    fn templates_compose_child_output() {
        let child = InstanceId::new();
        let template = Template::Node {
            tag: "div".into(),
            attrs: IndexMap::new(),
            children: vec![Template::Text("a".into()), Template::Child(child)],
        };

        let output = template.compose(&|id| {
            assert_eq!(id, child);
            Output::Text { text: "b".into() }
        });

        assert_eq!(output.text_content(), "ab");
        assert!(output.find("div").is_some());
        assert!(output.find("span").is_none());
    }

    #[test]
    fn output_serializes_with_type_tags() {
        let output = Output::Fragment {
            children: vec![Output::Text { text: "x".into() }, Output::Empty],
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["type"], "fragment");
        assert_eq!(json["children"][0]["text"], "x");
        assert_eq!(json["children"][1]["type"], "empty");
    }
}
