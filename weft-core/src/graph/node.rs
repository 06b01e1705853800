//! Component Instances
//!
//! This module defines the node type of the instance tree: one running
//! occurrence of a component with its cells, its last rendered template and
//! its place in the tree.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::element::{ComponentElement, ComponentIdentity, ErasedRender, Template};
use crate::error::RenderError;
use crate::reactive::{ChannelId, EffectCell, MemoCell, Provided, StateSlot, Suspendable};

/// Unique identifier for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Generate a new unique instance ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mount epoch of an instance. Wakes carry it to detect stale resumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of an instance.
///
/// ```text
/// Mounting -> Rendering <-> Idle -> Unmounting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Allocated; the first render has not completed.
    Mounting,
    /// A render pass is running.
    Rendering,
    /// Mounted and waiting for the next render request.
    Idle,
    /// Cleanups are running; the instance is leaving the tree.
    Unmounting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mounting => "mounting",
            Self::Rendering => "rendering",
            Self::Idle => "idle",
            Self::Unmounting => "unmounting",
        }
    }
}

/// Kind tag of a cell, used to detect hooks declared out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    State,
    Memo,
    Ref,
    Effect,
    Provide,
    Context,
    Future,
    Store,
}

impl CellKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Memo => "memo",
            Self::Ref => "ref",
            Self::Effect => "effect",
            Self::Provide => "provide",
            Self::Context => "context",
            Self::Future => "future",
            Self::Store => "store",
        }
    }
}

/// One positional cell.
pub enum Cell {
    State(Rc<dyn StateSlot>),
    Memo(MemoCell),
    Ref(Rc<dyn Any>),
    Effect(EffectCell),
    Provide(ChannelId),
    Context(ChannelId),
    Future(Box<dyn Suspendable>),
    Store(TypeId),
}

impl Cell {
    pub fn kind(&self) -> CellKind {
        match self {
            Self::State(_) => CellKind::State,
            Self::Memo(_) => CellKind::Memo,
            Self::Ref(_) => CellKind::Ref,
            Self::Effect(_) => CellKind::Effect,
            Self::Provide(_) => CellKind::Provide,
            Self::Context(_) => CellKind::Context,
            Self::Future(_) => CellKind::Future,
            Self::Store(_) => CellKind::Store,
        }
    }
}

/// Fault boundary bookkeeping.
#[derive(Debug, Default)]
pub struct BoundaryState {
    /// The error currently shown through the fallback.
    pub caught: Option<RenderError>,
}

/// A component instance in the tree.
pub struct Instance {
    id: InstanceId,
    generation: Generation,
    pub(crate) root: InstanceId,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) depth: u32,
    pub(crate) key: Option<String>,
    pub(crate) element: ComponentElement,
    pub(crate) phase: Phase,
    pub(crate) cells: Vec<Cell>,
    /// Number of hooks declared by the last completed render.
    pub(crate) hook_count: Option<usize>,
    pub(crate) template: Option<Template>,
    pub(crate) children: Vec<InstanceId>,
    pub(crate) provided: IndexMap<ChannelId, Provided>,
    /// Channels read during the last render and the instance that served
    /// each one (`None` when the channel default was used).
    pub(crate) consumed: SmallVec<[(ChannelId, Option<InstanceId>); 2]>,
    pub(crate) boundary: Option<BoundaryState>,
    pub(crate) suspended: bool,
    /// Hook misuse made this instance unusable; it keeps its last output.
    pub(crate) failed: bool,
    pub(crate) render_count: u64,
}

impl Instance {
    pub(crate) fn new(
        element: ComponentElement,
        parent: Option<InstanceId>,
        root: Option<InstanceId>,
        depth: u32,
    ) -> Self {
        let id = InstanceId::new();
        let boundary = element.is_boundary().then(BoundaryState::default);
        Self {
            id,
            generation: Generation::next(),
            root: root.unwrap_or(id),
            parent,
            depth,
            key: element.key().map(str::to_owned),
            element,
            phase: Phase::Mounting,
            cells: Vec::new(),
            hook_count: None,
            template: None,
            children: Vec::new(),
            provided: IndexMap::new(),
            consumed: SmallVec::new(),
            boundary,
            suspended: false,
            failed: false,
            render_count: 0,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn name(&self) -> &'static str {
        self.element.name()
    }

    pub fn identity(&self) -> ComponentIdentity {
        self.element.identity()
    }

    pub(crate) fn render_fn(&self) -> Rc<dyn ErasedRender> {
        self.element.render_fn()
    }

    pub(crate) fn props(&self) -> Rc<dyn Any> {
        self.element.props()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_mounted(&self) -> bool {
        !matches!(self.phase, Phase::Mounting | Phase::Unmounting)
    }

    /// The error a fault boundary is currently displaying.
    pub fn caught_error(&self) -> Option<&RenderError> {
        self.boundary.as_ref().and_then(|b| b.caught.as_ref())
    }

    /// Whether this instance can catch a render error right now.
    pub fn can_catch(&self) -> bool {
        matches!(&self.boundary, Some(b) if b.caught.is_none())
    }

    /// Whether this instance read `channel` from `provider` last render.
    pub fn consumes(&self, channel: ChannelId, provider: InstanceId) -> bool {
        self.consumed
            .iter()
            .any(|(c, p)| *c == channel && *p == Some(provider))
    }

    pub fn cell_kinds(&self) -> Vec<CellKind> {
        self.cells.iter().map(Cell::kind).collect()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("phase", &self.phase)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("cells", &self.cell_kinds())
            .field("render_count", &self.render_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;

    fn render_leaf(_: &mut crate::scope::Scope<'_>, _: &()) -> crate::element::RenderResult {
        Ok(Element::Empty)
    }

    fn leaf() -> ComponentElement {
        ComponentElement::new("Leaf", render_leaf, ())
    }

    #[test]
    fn instance_ids_are_unique() {
        let id1 = InstanceId::new();
        let id2 = InstanceId::new();
        assert_ne!(id1, id2);
        assert_eq!(format!("{}", InstanceId(7)), "#7");
    }

    #[test]
    fn generations_increase() {
        let a = Generation::next();
        let b = Generation::next();
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn root_instance_is_its_own_root() {
        let instance = Instance::new(leaf(), None, None, 0);
        assert_eq!(instance.root, instance.id());
        assert_eq!(instance.phase(), Phase::Mounting);
        assert!(!instance.is_mounted());
        assert!(!instance.can_catch());
    }

    #[test]
    fn boundary_instances_catch_until_an_error_is_shown() {
        let element = ComponentElement::boundary(|_, _| Element::text("oops"), Element::Empty);
        let mut instance = Instance::new(element, None, None, 0);
        assert!(instance.can_catch());

        instance.boundary.as_mut().unwrap().caught = Some(RenderError::message("boom"));
        assert!(!instance.can_catch());
        assert_eq!(instance.caught_error(), Some(&RenderError::message("boom")));
    }

    #[test]
    fn consumption_is_tracked_per_provider() {
        let mut instance = Instance::new(leaf(), None, None, 0);
        let provider = InstanceId::new();
        let channel = crate::reactive::Channel::<u8>::new("c").id();

        instance.consumed.push((channel, Some(provider)));
        assert!(instance.consumes(channel, provider));
        assert!(!instance.consumes(channel, InstanceId::new()));
    }
}
