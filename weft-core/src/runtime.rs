//! Runtime
//!
//! The runtime owns every mounted instance tree and drives them through
//! render, commit and effects.
//!
//! # How a Flush Works
//!
//! 1. Wakes from resolved futures are turned into render requests. Wakes
//!    for instances that are gone (or were remounted) are stale and recorded
//!    as diagnostics.
//!
//! 2. Dirty instances render shallowest first. Rendering an instance
//!    reconciles its children, which renders them in turn, so most dirty
//!    descendants are absorbed into an ancestor's pass.
//!
//! 3. Each root that rendered is committed: its templates are composed into
//!    an [`Output`] and handed to the root's [`Committer`].
//!
//! 4. Instances that left the tree run their effect cleanups.
//!
//! 5. Effects queued by the renders run, children before parents. An effect
//!    that sets state schedules another round, up to the configured limit of
//!    renders per instance.
//!
//! # Errors
//!
//! A render error climbs to the nearest fault boundary that is not already
//! showing an error. The boundary drops its subtree and renders its
//! fallback. Without such a boundary the whole root is torn down and the
//! error is returned from `flush`. Effect errors are never caught by
//! boundaries.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::config::RuntimeConfig;
use crate::element::{ComponentElement, Element, Output, Template};
use crate::error::{ErrorReport, ErrorSink, RuntimeError, TracingSink, UsageError};
use crate::graph::{Cell, Instance, InstanceId, PendingEffect, Phase, RenderQueue, Teardown};
use crate::reactive::{RenderContext, Store, StoreHandle, StoreSlot, WakeQueue};
use crate::scope::{store_cell, Scope};
use crate::snapshot::TreeSnapshot;

/// Receives the output of a root every time it is committed.
pub trait Committer {
    fn commit(&mut self, root: InstanceId, output: &Output);
}

impl<F> Committer for F
where
    F: FnMut(InstanceId, &Output),
{
    fn commit(&mut self, root: InstanceId, output: &Output) {
        self(root, output)
    }
}

/// Handle to a mounted root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    root: InstanceId,
}

impl InstanceHandle {
    pub fn id(&self) -> InstanceId {
        self.root
    }
}

type Tree = IndexMap<InstanceId, Instance>;

/// State shared between the runtime and the scopes it hands out.
pub(crate) struct Shared {
    pub(crate) config: RuntimeConfig,
    pub(crate) tree: RefCell<Tree>,
    pub(crate) queue: Rc<RefCell<RenderQueue>>,
    pub(crate) wakes: Arc<WakeQueue>,
    /// Stores per root, created lazily.
    pub(crate) stores: RefCell<HashMap<InstanceId, HashMap<TypeId, Rc<dyn StoreSlot>>>>,
    committers: RefCell<HashMap<InstanceId, Box<dyn Committer>>>,
    sink: Box<dyn ErrorSink>,
    diagnostics: RefCell<Vec<RuntimeError>>,
}

/// Bookkeeping for one call to [`Runtime::flush`].
#[derive(Default)]
struct Tick {
    renders: HashMap<InstanceId, usize>,
    usage: Option<RuntimeError>,
    touched: IndexSet<InstanceId>,
}

/// Children of an instance being reconciled.
struct Reconcile {
    parent: InstanceId,
    root: InstanceId,
    depth: u32,
    keyed: HashMap<String, InstanceId>,
    unkeyed: VecDeque<InstanceId>,
    children: Vec<InstanceId>,
}

/// The component runtime.
pub struct Runtime {
    shared: Shared,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    /// Create a runtime that reports errors through `tracing`.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_sink(config, TracingSink)
    }

    /// Create a runtime with a custom error sink.
    pub fn with_sink(config: RuntimeConfig, sink: impl ErrorSink + 'static) -> Self {
        Self {
            shared: Shared {
                config,
                tree: RefCell::new(IndexMap::new()),
                queue: Rc::new(RefCell::new(RenderQueue::new())),
                wakes: WakeQueue::new(),
                stores: RefCell::new(HashMap::new()),
                committers: RefCell::new(HashMap::new()),
                sink: Box::new(sink),
                diagnostics: RefCell::new(Vec::new()),
            },
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    // ------------------------------------------------------------------
    // Host API
    // ------------------------------------------------------------------

    /// Mount `element` as a new root and render it.
    ///
    /// The first output goes to `committer` before this returns. If the
    /// initial flush fails inside the new root, the root is unmounted again
    /// and the error is returned. Failures of other roots met on the way are
    /// kept for [`Runtime::take_diagnostics`].
    pub fn mount(
        &self,
        element: ComponentElement,
        committer: impl Committer + 'static,
    ) -> Result<InstanceHandle, RuntimeError> {
        let instance = Instance::new(element, None, None, 0);
        let root = instance.id();
        tracing::debug!(root = %root, component = instance.name(), "mounting root");

        self.shared.tree.borrow_mut().insert(root, instance);
        self.shared
            .committers
            .borrow_mut()
            .insert(root, Box::new(committer));
        self.shared.queue.borrow_mut().request(root);

        let handle = InstanceHandle { root };
        loop {
            let error = match self.flush() {
                Ok(()) => return Ok(handle),
                Err(error) => error,
            };

            // An uncaught render error already tore the new root down.
            if !self.is_root(root) {
                return Err(error);
            }
            if self.owned_by(root, &error) {
                self.unmount(handle)?;
                return Err(error);
            }

            // Another root failed. Keep it for the host and make sure the
            // new root still gets its first render.
            tracing::debug!(root = %root, %error, "error from another root while mounting");
            self.shared.diagnostics.borrow_mut().push(error);
            if !self.shared.queue.borrow().is_dirty(root) {
                return Ok(handle);
            }
        }
    }

    /// Tear a root down. Effect cleanups run children first, each
    /// instance's in reverse declaration order.
    pub fn unmount(&self, handle: InstanceHandle) -> Result<(), RuntimeError> {
        let root = handle.root;
        if !self.is_root(root) {
            return Err(RuntimeError::UnknownRoot(root));
        }

        tracing::debug!(root = %root, "unmounting root");
        self.drop_root(root);
        Ok(())
    }

    /// Process all pending work: wakes, renders, commits, teardowns and
    /// effects, until nothing is left to do.
    pub fn flush(&self) -> Result<(), RuntimeError> {
        let mut tick = Tick::default();

        loop {
            self.take_wakes();
            self.take_resets();

            if let Err(error) = self.render_pending(&mut tick) {
                self.abort_tick(&error, &mut tick);
                return Err(error);
            }

            self.commit(&mut tick);
            self.run_teardowns();
            self.run_effects()?;

            if self.shared.queue.borrow().is_idle() && self.shared.wakes.is_empty() {
                break;
            }
        }

        match tick.usage {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Flush until no instance is suspended, waiting for wakes in between.
    ///
    /// Never returns while a suspended future stays pending.
    pub async fn settle(&self) -> Result<(), RuntimeError> {
        loop {
            self.flush()?;
            if !self.is_suspended() {
                return Ok(());
            }
            self.shared.wakes.notified().await;
        }
    }

    /// Clear the caught error of a fault boundary. Its child renders again
    /// on the next flush.
    pub fn reset_boundary(&self, boundary: InstanceId) -> Result<(), RuntimeError> {
        let is_boundary = self
            .shared
            .tree
            .borrow()
            .get(&boundary)
            .is_some_and(|i| i.boundary.is_some());
        if !is_boundary {
            return Err(RuntimeError::UnknownInstance(boundary));
        }

        self.shared.queue.borrow_mut().request_reset(boundary);
        Ok(())
    }

    /// Access the store `S` of a root from outside the tree.
    pub fn store<S: Store>(&self, handle: InstanceHandle) -> Result<StoreHandle<S>, RuntimeError> {
        if !self.is_root(handle.root) {
            return Err(RuntimeError::UnknownRoot(handle.root));
        }
        let cell = store_cell::<S>(&self.shared, handle.root);
        Ok(StoreHandle::new(cell, Rc::downgrade(&self.shared.queue)))
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// How many times an instance has rendered.
    pub fn render_count(&self, instance: InstanceId) -> Option<u64> {
        self.shared
            .tree
            .borrow()
            .get(&instance)
            .map(|i| i.render_count)
    }

    /// The output a root would commit right now.
    pub fn output(&self, handle: InstanceHandle) -> Option<Output> {
        let tree = self.shared.tree.borrow();
        tree.contains_key(&handle.root)
            .then(|| compose(&tree, handle.root))
    }

    pub fn snapshot(&self, handle: InstanceHandle) -> Option<TreeSnapshot> {
        TreeSnapshot::capture(&self.shared.tree.borrow(), handle.root)
    }

    /// Ids of the instances under `parent`, in template order.
    pub fn children(&self, parent: InstanceId) -> Vec<InstanceId> {
        self.shared
            .tree
            .borrow()
            .get(&parent)
            .map(|i| i.children.clone())
            .unwrap_or_default()
    }

    /// Whether any instance is waiting on a future.
    pub fn is_suspended(&self) -> bool {
        self.shared.tree.borrow().values().any(|i| i.suspended)
    }

    pub fn instance_count(&self) -> usize {
        self.shared.tree.borrow().len()
    }

    /// Drain problems the host did not get as a return value: stale
    /// resumptions, and errors of other roots that surfaced during `mount`.
    pub fn take_diagnostics(&self) -> Vec<RuntimeError> {
        std::mem::take(&mut *self.shared.diagnostics.borrow_mut())
    }

    // ------------------------------------------------------------------
    // Render phase
    // ------------------------------------------------------------------

    fn render_pending(&self, tick: &mut Tick) -> Result<(), RuntimeError> {
        loop {
            let order = {
                let tree = self.shared.tree.borrow();
                let mut queue = self.shared.queue.borrow_mut();
                queue.promote_rerenders();
                queue.dirty_by_depth(|id| tree.get(&id).map(|i| i.depth))
            };
            if order.is_empty() {
                return Ok(());
            }

            for id in order {
                // Already rendered as part of an ancestor's pass.
                if !self.shared.queue.borrow().is_dirty(id) {
                    continue;
                }
                let Some(root) = self.root_of(id) else {
                    self.shared.queue.borrow_mut().mark_clean(id);
                    continue;
                };

                if let Err(error) = self.render_instance(id, tick) {
                    self.escalate(error, tick)?;
                }
                tick.touched.insert(root);
            }
        }
    }

    fn render_instance(&self, id: InstanceId, tick: &mut Tick) -> Result<(), RuntimeError> {
        self.shared.queue.borrow_mut().mark_clean(id);

        let name = match self.shared.tree.borrow().get(&id) {
            Some(instance) if !instance.failed => instance.name(),
            _ => return Ok(()),
        };

        let renders = tick.renders.entry(id).or_insert(0);
        *renders += 1;
        if *renders > self.shared.config.max_nested_updates {
            return Err(RuntimeError::TooManyUpdates {
                instance: id,
                component: name,
                limit: self.shared.config.max_nested_updates,
            });
        }

        let (mut scope, render, props, hook_count) = {
            let mut tree = self.shared.tree.borrow_mut();
            let Some(instance) = tree.get_mut(&id) else {
                return Ok(());
            };

            let cells = std::mem::take(&mut instance.cells);
            for cell in &cells {
                if let Cell::State(slot) = cell {
                    slot.apply_pending();
                }
            }
            instance.phase = Phase::Rendering;

            let scope = Scope::new(
                &self.shared,
                id,
                instance.generation(),
                instance.root,
                instance.parent,
                cells,
            );
            (scope, instance.render_fn(), instance.props(), instance.hook_count)
        };

        if self.shared.config.trace_renders {
            tracing::trace!(instance = %id, component = name, "render");
        }

        let result = {
            let _context = RenderContext::enter(id);
            render.render(&mut scope, props.as_ref())
        };
        let mut parts = scope.finish();

        if result.is_ok() && parts.usage.is_none() {
            if let Some(previous) = hook_count.filter(|n| *n != parts.declared) {
                parts.usage = Some(UsageError::HookCountChanged {
                    previous,
                    current: parts.declared,
                });
            }
        }

        let keep_effects = result.is_ok() && parts.usage.is_none();
        {
            let mut tree = self.shared.tree.borrow_mut();
            let Some(instance) = tree.get_mut(&id) else {
                return Ok(());
            };
            instance.cells = parts.cells;
            instance.consumed = parts.consumed;
            instance.render_count += 1;
            instance.phase = match instance.template {
                Some(_) => Phase::Idle,
                None => Phase::Mounting,
            };
            if !keep_effects {
                discard_effects(instance, &parts.effects);
            }
            if parts.usage.is_some() {
                instance.failed = true;
            }
            if matches!(&result, Err(e) if e.is_suspended()) {
                instance.suspended = true;
            }
        }

        if let Some(source) = parts.usage {
            let error = RuntimeError::Usage {
                instance: id,
                component: name,
                source,
            };
            self.report(&error, false);
            tick.usage.get_or_insert(error);
            return Ok(());
        }

        let element = match result {
            Ok(element) => element,
            Err(source) if source.is_suspended() => {
                tracing::trace!(instance = %id, component = name, "render suspended");
                return Ok(());
            }
            Err(source) => {
                return Err(RuntimeError::Render {
                    instance: id,
                    component: name,
                    source,
                })
            }
        };

        let template = match self.reconcile(id, element, tick) {
            Ok(template) => template,
            Err(error) => {
                if let Some(instance) = self.shared.tree.borrow_mut().get_mut(&id) {
                    discard_effects(instance, &parts.effects);
                }
                if error.is_catchable() && self.can_catch(id) {
                    return self.catch(id, error, tick);
                }
                return Err(error);
            }
        };

        if let Some(instance) = self.shared.tree.borrow_mut().get_mut(&id) {
            instance.template = Some(template);
            instance.hook_count = Some(parts.declared);
            instance.suspended = false;
            instance.phase = Phase::Idle;
        }

        // Children queued theirs while reconciling, so parents run last.
        let mut queue = self.shared.queue.borrow_mut();
        for cell in parts.effects {
            queue.push_effect(PendingEffect { instance: id, cell });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn reconcile(
        &self,
        parent: InstanceId,
        element: Element,
        tick: &mut Tick,
    ) -> Result<Template, RuntimeError> {
        let (mut cx, previous) = {
            let tree = self.shared.tree.borrow();
            let Some(instance) = tree.get(&parent) else {
                return Ok(Template::Empty);
            };

            let mut cx = Reconcile {
                parent,
                root: instance.root,
                depth: instance.depth + 1,
                keyed: HashMap::new(),
                unkeyed: VecDeque::new(),
                children: Vec::new(),
            };
            for child in &instance.children {
                match tree.get(child).map(|c| c.key.clone()) {
                    Some(Some(key)) => {
                        cx.keyed.insert(key, *child);
                    }
                    Some(None) => cx.unkeyed.push_back(*child),
                    None => {}
                }
            }
            (cx, instance.children.clone())
        };

        let template = self.build(element, &mut cx, tick)?;

        let stale: Vec<_> = previous
            .into_iter()
            .filter(|child| !cx.children.contains(child))
            .collect();
        for child in stale {
            let teardowns = self.detach(child);
            let mut queue = self.shared.queue.borrow_mut();
            for teardown in teardowns {
                queue.push_teardown(teardown);
            }
        }

        if let Some(instance) = self.shared.tree.borrow_mut().get_mut(&parent) {
            instance.children = cx.children;
        }
        Ok(template)
    }

    fn build(
        &self,
        element: Element,
        cx: &mut Reconcile,
        tick: &mut Tick,
    ) -> Result<Template, RuntimeError> {
        Ok(match element {
            Element::Empty => Template::Empty,
            Element::Text(text) => Template::Text(text),
            Element::Node(node) => Template::Node {
                tag: node.tag,
                attrs: node.attrs,
                children: node
                    .children
                    .into_iter()
                    .map(|child| self.build(child, cx, tick))
                    .collect::<Result<_, _>>()?,
            },
            Element::Fragment(children) => Template::Fragment(
                children
                    .into_iter()
                    .map(|child| self.build(child, cx, tick))
                    .collect::<Result<_, _>>()?,
            ),
            Element::Component(component) => Template::Child(self.place(component, cx, tick)?),
        })
    }

    /// Reuse a matching previous child or mount a new one, then render it.
    fn place(
        &self,
        element: ComponentElement,
        cx: &mut Reconcile,
        tick: &mut Tick,
    ) -> Result<InstanceId, RuntimeError> {
        let candidate = match element.key() {
            Some(key) => cx.keyed.remove(key),
            None => cx.unkeyed.pop_front(),
        };

        let placement = {
            let mut tree = self.shared.tree.borrow_mut();
            match candidate.and_then(|id| tree.get_mut(&id)) {
                Some(instance) if instance.identity() == element.identity() => {
                    let id = instance.id();
                    let skip = instance.element.same_props(&element)
                        && instance.template.is_some()
                        && !instance.suspended
                        && !self.shared.queue.borrow().is_dirty(id);
                    instance.element = element;
                    Ok((id, skip))
                }
                _ => Err(element),
            }
        };

        match placement {
            Ok((id, skip)) => {
                cx.children.push(id);
                if skip {
                    tracing::trace!(instance = %id, "memoized child skipped");
                } else {
                    self.render_instance(id, tick)?;
                }
                Ok(id)
            }
            Err(element) => {
                let instance = Instance::new(element, Some(cx.parent), Some(cx.root), cx.depth);
                let id = instance.id();
                tracing::debug!(
                    instance = %id,
                    component = instance.name(),
                    parent = %cx.parent,
                    "mounting child"
                );
                self.shared.tree.borrow_mut().insert(id, instance);
                cx.children.push(id);
                self.render_instance(id, tick)?;
                Ok(id)
            }
        }
    }

    /// Remove an instance and its descendants from the tree and collect
    /// their cleanups, children first.
    fn detach(&self, id: InstanceId) -> Vec<Teardown> {
        let mut tree = self.shared.tree.borrow_mut();
        let mut queue = self.shared.queue.borrow_mut();
        let stores = self.shared.stores.borrow();

        subtree_postorder(&tree, id)
            .into_iter()
            .filter_map(|id| {
                let mut instance = tree.shift_remove(&id)?;
                instance.phase = Phase::Unmounting;
                queue.forget_instance(id);
                if let Some(slots) = stores.get(&instance.root) {
                    for slot in slots.values() {
                        slot.unsubscribe(id);
                    }
                }

                let cleanups = instance
                    .cells
                    .iter_mut()
                    .rev()
                    .filter_map(|cell| match cell {
                        Cell::Effect(effect) => effect.take_cleanup(),
                        _ => None,
                    })
                    .collect();

                tracing::debug!(instance = %id, component = instance.name(), "unmounting");
                Some(Teardown {
                    instance: id,
                    component: instance.name(),
                    cleanups,
                    cells: std::mem::take(&mut instance.cells),
                })
            })
            .collect()
    }

    fn detach_children(&self, parent: InstanceId) -> Vec<Teardown> {
        let children: Vec<_> = self
            .shared
            .tree
            .borrow()
            .values()
            .filter(|i| i.parent == Some(parent))
            .map(Instance::id)
            .collect();

        children
            .into_iter()
            .flat_map(|child| self.detach(child))
            .collect()
    }

    fn drop_root(&self, root: InstanceId) {
        let teardowns = self.detach(root);
        self.shared.committers.borrow_mut().remove(&root);
        self.shared.stores.borrow_mut().remove(&root);
        for teardown in teardowns {
            run_teardown(teardown);
        }
    }

    // ------------------------------------------------------------------
    // Fault boundaries
    // ------------------------------------------------------------------

    fn can_catch(&self, id: InstanceId) -> bool {
        self.shared
            .tree
            .borrow()
            .get(&id)
            .is_some_and(Instance::can_catch)
    }

    fn nearest_boundary(&self, from: InstanceId) -> Option<InstanceId> {
        let tree = self.shared.tree.borrow();
        let mut cursor = tree.get(&from).and_then(|i| i.parent);
        while let Some(id) = cursor {
            let instance = tree.get(&id)?;
            if instance.can_catch() {
                return Some(id);
            }
            cursor = instance.parent;
        }
        None
    }

    /// Show `error` through the fallback of `boundary`.
    fn catch(
        &self,
        boundary: InstanceId,
        error: RuntimeError,
        tick: &mut Tick,
    ) -> Result<(), RuntimeError> {
        let source = match &error {
            RuntimeError::Render { source, .. } => Some(source.clone()),
            _ => None,
        };
        let Some(source) = source else {
            return Err(error);
        };

        tracing::debug!(boundary = %boundary, %error, "fault boundary caught render error");
        self.report(&error, true);

        let teardowns = self.detach_children(boundary);
        {
            let mut queue = self.shared.queue.borrow_mut();
            for teardown in teardowns {
                queue.push_teardown(teardown);
            }
        }
        if let Some(instance) = self.shared.tree.borrow_mut().get_mut(&boundary) {
            instance.children.clear();
            if let Some(state) = instance.boundary.as_mut() {
                state.caught = Some(source);
            }
        }

        self.render_instance(boundary, tick)
    }

    /// Route an error that escaped a pass to a boundary above it, or fail
    /// the root.
    fn escalate(&self, mut error: RuntimeError, tick: &mut Tick) -> Result<(), RuntimeError> {
        loop {
            let failed = match error.instance() {
                Some(failed) if error.is_catchable() => failed,
                _ => return Err(error),
            };

            match self.nearest_boundary(failed) {
                Some(boundary) => match self.catch(boundary, error, tick) {
                    Ok(()) => return Ok(()),
                    Err(next) => error = next,
                },
                None => {
                    self.fail_root(failed, &error);
                    return Err(error);
                }
            }
        }
    }

    fn fail_root(&self, failed: InstanceId, error: &RuntimeError) {
        self.report(error, false);
        let Some(root) = self.root_of(failed) else {
            return;
        };
        tracing::debug!(root = %root, "uncaught render error; tearing down root");
        self.drop_root(root);
    }

    // ------------------------------------------------------------------
    // Commit and effects
    // ------------------------------------------------------------------

    fn commit(&self, tick: &mut Tick) {
        for root in tick.touched.drain(..) {
            let output = {
                let tree = self.shared.tree.borrow();
                if !tree.contains_key(&root) {
                    continue;
                }
                compose(&tree, root)
            };

            let committer = self.shared.committers.borrow_mut().remove(&root);
            if let Some(mut committer) = committer {
                tracing::debug!(root = %root, "commit");
                committer.commit(root, &output);
                if self.is_root(root) {
                    self.shared.committers.borrow_mut().insert(root, committer);
                }
            }
        }
    }

    fn run_teardowns(&self) {
        let teardowns = self.shared.queue.borrow_mut().take_teardowns();
        for teardown in teardowns {
            run_teardown(teardown);
        }
    }

    fn run_effects(&self) -> Result<(), RuntimeError> {
        let mut pending = self.shared.queue.borrow_mut().take_effects().into_iter();

        while let Some(effect) = pending.next() {
            let job = {
                let mut tree = self.shared.tree.borrow_mut();
                tree.get_mut(&effect.instance).and_then(|instance| {
                    let name = instance.name();
                    match instance.cells.get_mut(effect.cell) {
                        Some(Cell::Effect(cell)) => cell.begin_run().map(|job| (name, job)),
                        _ => None,
                    }
                })
            };
            let Some((component, (cleanup, callback))) = job else {
                continue;
            };

            if let Some(cleanup) = cleanup {
                cleanup.run();
            }
            let result = callback();

            let mut tree = self.shared.tree.borrow_mut();
            let cell = tree
                .get_mut(&effect.instance)
                .and_then(|instance| match instance.cells.get_mut(effect.cell) {
                    Some(Cell::Effect(cell)) => Some(cell),
                    _ => None,
                });

            match (result, cell) {
                (Ok(cleanup), Some(cell)) => cell.finish_run(cleanup),
                (Ok(cleanup), None) => {
                    drop(tree);
                    // The instance left while its effect ran.
                    if let Some(cleanup) = cleanup {
                        cleanup.run();
                    }
                }
                (Err(source), cell) => {
                    if let Some(cell) = cell {
                        cell.finish_run(None);
                    }
                    drop(tree);

                    let error = RuntimeError::Effect {
                        instance: effect.instance,
                        component,
                        source,
                    };
                    self.report(&error, false);
                    self.shared
                        .queue
                        .borrow_mut()
                        .requeue_effects(pending.collect());
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Finish what can be finished after a render error escaped the pass.
    ///
    /// Roots that rendered before the failure are committed and run their
    /// effects, so no effect outlives its commit. Work that was not reached
    /// stays queued unless the tick hit the update limit.
    fn abort_tick(&self, error: &RuntimeError, tick: &mut Tick) {
        if let RuntimeError::TooManyUpdates { instance, .. } = error {
            self.report(error, false);
            let runaway = self.root_of(*instance);
            let tree = self.shared.tree.borrow();
            let mut queue = self.shared.queue.borrow_mut();
            queue.clear_renders();
            queue.retain_effects(|e| {
                runaway.is_none() || tree.get(&e.instance).map(|i| i.root) != runaway
            });
        }

        self.commit(tick);
        self.run_teardowns();
        if let Err(effect) = self.run_effects() {
            // Already reported to the sink; the render error takes precedence.
            tracing::debug!(error = %effect, "effect failed while finishing an aborted tick");
        }
    }

    // ------------------------------------------------------------------
    // Wakes and resets
    // ------------------------------------------------------------------

    fn take_wakes(&self) {
        for wake in self.shared.wakes.drain() {
            let live = self
                .shared
                .tree
                .borrow()
                .get(&wake.instance)
                .is_some_and(|i| i.generation() == wake.generation);

            if live {
                self.shared.queue.borrow_mut().request(wake.instance);
                continue;
            }

            tracing::warn!(
                instance = %wake.instance,
                generation = %wake.generation,
                "ignoring resumption of an unmounted instance"
            );
            let error = RuntimeError::StaleResumption {
                instance: wake.instance,
                generation: wake.generation,
            };
            self.report(&error, false);
            self.shared.diagnostics.borrow_mut().push(error);
        }
    }

    fn take_resets(&self) {
        let resets = self.shared.queue.borrow_mut().take_resets();
        for boundary in resets {
            let cleared = self
                .shared
                .tree
                .borrow_mut()
                .get_mut(&boundary)
                .and_then(|i| i.boundary.as_mut())
                .is_some_and(|state| state.caught.take().is_some());

            if cleared {
                tracing::debug!(boundary = %boundary, "fault boundary reset");
                self.shared.queue.borrow_mut().request(boundary);
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn report(&self, error: &RuntimeError, caught: bool) {
        self.shared.sink.report(&ErrorReport { error, caught });
    }

    fn root_of(&self, id: InstanceId) -> Option<InstanceId> {
        self.shared.tree.borrow().get(&id).map(|i| i.root)
    }

    /// Whether `error` is attributed to an instance under `root`.
    fn owned_by(&self, root: InstanceId, error: &RuntimeError) -> bool {
        error.instance().and_then(|id| self.root_of(id)) == Some(root)
    }

    fn is_root(&self, id: InstanceId) -> bool {
        self.shared
            .tree
            .borrow()
            .get(&id)
            .is_some_and(|i| i.parent.is_none())
    }
}

fn discard_effects(instance: &mut Instance, effects: &[usize]) {
    for &index in effects {
        if let Some(Cell::Effect(cell)) = instance.cells.get_mut(index) {
            cell.discard_pending();
        }
    }
}

fn run_teardown(teardown: Teardown) {
    tracing::trace!(
        instance = %teardown.instance,
        component = teardown.component,
        cleanups = teardown.cleanups.len(),
        "running cleanups"
    );
    for cleanup in teardown.cleanups {
        cleanup.run();
    }
    drop(teardown.cells);
}

/// Compose the committed output of `id` and everything below it.
fn compose(tree: &Tree, id: InstanceId) -> Output {
    match tree.get(&id).and_then(|i| i.template.as_ref()) {
        Some(template) => template.compose(&|child| compose(tree, child)),
        None => Output::Empty,
    }
}

/// `root` and its descendants, every instance after all of its children.
fn subtree_postorder(tree: &Tree, root: InstanceId) -> Vec<InstanceId> {
    let mut children: HashMap<InstanceId, Vec<InstanceId>> = HashMap::new();
    for (id, instance) in tree {
        if let Some(parent) = instance.parent {
            children.entry(parent).or_default().push(*id);
        }
    }

    let mut order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !tree.contains_key(&id) {
            continue;
        }
        stack.push((id, true));
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().rev().map(|kid| (*kid, false)));
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use crate::element::RenderResult;
    use crate::error::RenderError;
    use crate::reactive::Cleanup;
    use std::cell::Cell as StdCell;

    fn noop_commit(_: InstanceId, _: &Output) {}

    fn label(_: &mut Scope<'_>, text: &&'static str) -> RenderResult {
        Ok(Element::text(*text))
    }

    fn pair(_: &mut Scope<'_>, _: &()) -> RenderResult {
        Ok(Element::node("div")
            .child(Element::component("Label", label, "a"))
            .child(Element::component("Label", label, "b"))
            .into())
    }

    #[test]
    fn mount_commits_composed_output() {
        let runtime = Runtime::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        let root = runtime
            .mount(ComponentElement::new("Pair", pair, ()), move |_: InstanceId, out: &Output| {
                sink.borrow_mut().push(out.text_content())
            })
            .unwrap();

        assert_eq!(*seen.borrow(), vec!["ab".to_string()]);
        assert_eq!(runtime.children(root.id()).len(), 2);
        assert_eq!(runtime.instance_count(), 3);
    }

    #[test]
    fn unmount_unknown_root_fails() {
        let runtime = Runtime::default();
        let root = runtime
            .mount(ComponentElement::new("Pair", pair, ()), noop_commit)
            .unwrap();
        let child = runtime.children(root.id())[0];

        runtime.unmount(root).unwrap();
        assert_eq!(runtime.instance_count(), 0);
        assert!(matches!(
            runtime.unmount(root),
            Err(RuntimeError::UnknownRoot(_))
        ));
        assert!(matches!(
            runtime.unmount(InstanceHandle { root: child }),
            Err(RuntimeError::UnknownRoot(_))
        ));
    }

    fn flaky(_: &mut Scope<'_>, fail: &bool) -> RenderResult {
        if *fail {
            Err(RenderError::message("flaky failed"))
        } else {
            Ok(Element::text("fine"))
        }
    }

    #[test]
    fn uncaught_render_error_tears_the_root_down() {
        let runtime = Runtime::default();
        let result = runtime.mount(ComponentElement::new("Flaky", flaky, true), noop_commit);

        match result {
            Err(RuntimeError::Render { component, .. }) => assert_eq!(component, "Flaky"),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(runtime.instance_count(), 0);
    }

    fn conditional(scope: &mut Scope<'_>, flip: &Rc<StdCell<bool>>) -> RenderResult {
        if flip.get() {
            scope.use_ref(0_u8);
        } else {
            scope.use_state(0_u8);
        }
        Ok(Element::text("x"))
    }

    #[test]
    fn changing_hook_order_fails_the_instance() {
        let runtime = Runtime::default();
        let flip = Rc::new(StdCell::new(false));
        let root = runtime
            .mount(
                ComponentElement::new("Conditional", conditional, flip.clone()),
                noop_commit,
            )
            .unwrap();

        flip.set(true);
        runtime.shared.queue.borrow_mut().request(root.id());
        match runtime.flush() {
            Err(RuntimeError::Usage { source, .. }) => assert_eq!(
                source,
                UsageError::HookOrder {
                    index: 0,
                    previous: "state",
                    current: "ref"
                }
            ),
            other => panic!("unexpected result {other:?}"),
        }

        // Failed instances keep their output and stop rendering.
        runtime.shared.queue.borrow_mut().request(root.id());
        runtime.flush().unwrap();
        assert_eq!(runtime.render_count(root.id()), Some(2));
        assert_eq!(runtime.output(root).unwrap().text_content(), "x");
    }

    fn cleanup_order(scope: &mut Scope<'_>, log: &Rc<RefCell<Vec<&'static str>>>) -> RenderResult {
        for name in ["E1", "E2", "E3"] {
            let log = log.clone();
            scope.use_effect(deps![], move || {
                Ok(Some(Cleanup::new(move || log.borrow_mut().push(name))))
            });
        }
        Ok(Element::Empty)
    }

    #[test]
    fn unmount_runs_cleanups_in_reverse_declaration_order() {
        let runtime = Runtime::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = runtime
            .mount(
                ComponentElement::new("Effects", cleanup_order, log.clone()),
                noop_commit,
            )
            .unwrap();

        assert!(log.borrow().is_empty());
        runtime.unmount(root).unwrap();
        assert_eq!(*log.borrow(), vec!["E3", "E2", "E1"]);
    }

    #[test]
    fn postorder_lists_children_before_parents() {
        let runtime = Runtime::default();
        let root = runtime
            .mount(ComponentElement::new("Pair", pair, ()), noop_commit)
            .unwrap();
        let children = runtime.children(root.id());

        let order = subtree_postorder(&runtime.shared.tree.borrow(), root.id());
        assert_eq!(order, vec![children[0], children[1], root.id()]);
    }
}
