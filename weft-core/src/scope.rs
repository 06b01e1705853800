//! Hook Scope
//!
//! A [`Scope`] is handed to every render function. Each `use_*` call claims
//! the next positional cell of the rendering instance: the first render
//! creates cells, later renders read them back in declaration order.
//!
//! # Misuse
//!
//! A hook that finds a cell of another kind (or another value type) at its
//! position records a [`UsageError`] and falls back to a detached cell that
//! lives only for this call. The render still completes so the error can be
//! attributed, but the instance is failed afterwards and keeps its last
//! output. Once a usage error has been recorded every following hook is
//! detached too, since positions no longer line up.

use std::any::TypeId;
use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::Poll;

use smallvec::SmallVec;

use crate::error::{MissingProviderError, RenderError, UsageError};
use crate::graph::{Cell, CellKind, Generation, InstanceId, RenderQueue};
use crate::reactive::{
    Callback, Channel, ChannelId, DepList, DepsChange, EffectCell, EffectFn, EffectResult,
    FutureCell, MemoCell, MutableRef, Provided, Setter, StateCell, Store, StoreCell, StoreHandle,
    StoreSlot,
};
use crate::runtime::Shared;

/// Where a hook found its cell.
enum Slot {
    Existing(usize),
    Fresh,
    Detached,
}

/// Per-render hook API.
pub struct Scope<'a> {
    shared: &'a Shared,
    id: InstanceId,
    generation: Generation,
    root: InstanceId,
    parent: Option<InstanceId>,
    cells: Vec<Cell>,
    index: usize,
    usage: Option<UsageError>,
    effects: Vec<usize>,
    consumed: SmallVec<[(ChannelId, Option<InstanceId>); 2]>,
}

/// What the runtime needs back once the render function returned.
pub(crate) struct ScopeParts {
    pub cells: Vec<Cell>,
    pub declared: usize,
    pub usage: Option<UsageError>,
    pub effects: Vec<usize>,
    pub consumed: SmallVec<[(ChannelId, Option<InstanceId>); 2]>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        shared: &'a Shared,
        id: InstanceId,
        generation: Generation,
        root: InstanceId,
        parent: Option<InstanceId>,
        cells: Vec<Cell>,
    ) -> Self {
        Self {
            shared,
            id,
            generation,
            root,
            parent,
            cells,
            index: 0,
            usage: None,
            effects: Vec::new(),
            consumed: SmallVec::new(),
        }
    }

    pub(crate) fn finish(self) -> ScopeParts {
        ScopeParts {
            cells: self.cells,
            declared: self.index,
            usage: self.usage,
            effects: self.effects,
            consumed: self.consumed,
        }
    }

    /// The rendering instance.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    fn queue(&self) -> Weak<RefCell<RenderQueue>> {
        Rc::downgrade(&self.shared.queue)
    }

    fn fail(&mut self, error: UsageError) {
        if self.usage.is_none() {
            tracing::debug!(instance = %self.id, %error, "hook misuse");
            self.usage = Some(error);
        }
    }

    fn claim(&mut self, kind: CellKind) -> Slot {
        let index = self.index;
        self.index += 1;

        if self.usage.is_some() {
            return Slot::Detached;
        }

        match self.cells.get(index).map(Cell::kind) {
            Some(found) if found == kind => Slot::Existing(index),
            Some(found) => {
                self.fail(UsageError::HookOrder {
                    index,
                    previous: found.as_str(),
                    current: kind.as_str(),
                });
                Slot::Detached
            }
            None => Slot::Fresh,
        }
    }

    fn mismatch(&mut self, index: usize) {
        self.fail(UsageError::HookTypeMismatch { index });
    }

    fn check_deps(&mut self, index: usize, change: DepsChange) {
        if let DepsChange::LengthChanged { previous, current } = change {
            self.fail(UsageError::DependencyLengthChanged {
                index,
                previous,
                current,
            });
        }
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Declare a state cell. Returns the value as of the start of this
    /// render and a setter that queues updates for the next one.
    pub fn use_state<T: Clone + 'static>(&mut self, initial: T) -> (T, Setter<T>) {
        self.use_state_with(move || initial)
    }

    /// Like [`use_state`](Self::use_state) with a lazily computed initial
    /// value. `init` only runs when the cell is created.
    pub fn use_state_with<T, F>(&mut self, init: F) -> (T, Setter<T>)
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        let index = self.index;
        let existing = match self.claim(CellKind::State) {
            Slot::Existing(i) => match &self.cells[i] {
                Cell::State(slot) => Rc::clone(slot).as_any().downcast::<StateCell<T>>().ok(),
                _ => None,
            },
            Slot::Fresh => {
                let cell = StateCell::new(init());
                self.cells.push(Cell::State(cell.clone()));
                return (cell.get(), Setter::new(&cell, self.queue(), self.id));
            }
            Slot::Detached => {
                let cell = StateCell::new(init());
                return (cell.get(), Setter::new(&cell, Weak::new(), self.id));
            }
        };

        let cell = match existing {
            Some(cell) => cell,
            None => {
                self.mismatch(index);
                let cell = StateCell::new(init());
                return (cell.get(), Setter::new(&cell, Weak::new(), self.id));
            }
        };
        (cell.get(), Setter::new(&cell, self.queue(), self.id))
    }

    // ------------------------------------------------------------------
    // Memo
    // ------------------------------------------------------------------

    /// Cache a derived value. `compute` runs on the first render and
    /// whenever `deps` differ from the previous render's list.
    pub fn use_memo<T, F>(&mut self, deps: DepList, compute: F) -> Rc<T>
    where
        T: 'static,
        F: FnOnce() -> T,
    {
        let index = self.index;
        match self.claim(CellKind::Memo) {
            Slot::Existing(i) => {
                let resolved = match &mut self.cells[i] {
                    Cell::Memo(cell) => cell.resolve(deps, compute),
                    _ => Err(compute),
                };
                match resolved {
                    Ok((value, change)) => {
                        self.check_deps(index, change);
                        value
                    }
                    Err(compute) => {
                        self.mismatch(index);
                        Rc::new(compute())
                    }
                }
            }
            Slot::Fresh => {
                let mut cell = MemoCell::new();
                let value = match cell.resolve(deps, compute) {
                    Ok((value, _)) => value,
                    Err(compute) => Rc::new(compute()),
                };
                self.cells.push(Cell::Memo(cell));
                value
            }
            Slot::Detached => Rc::new(compute()),
        }
    }

    /// Memoize a callback. The returned handle keeps its identity while
    /// `deps` are unchanged.
    pub fn use_callback<A, R, F>(&mut self, deps: DepList, f: F) -> Callback<A, R>
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> R + 'static,
    {
        let callback = self.use_memo(deps, move || Callback::new(f));
        (*callback).clone()
    }

    // ------------------------------------------------------------------
    // Refs
    // ------------------------------------------------------------------

    /// Declare a ref. The same slot comes back on every render; writing it
    /// never schedules a render.
    pub fn use_ref<T: 'static>(&mut self, initial: T) -> MutableRef<T> {
        self.use_ref_with(move || initial)
    }

    pub fn use_ref_with<T, F>(&mut self, init: F) -> MutableRef<T>
    where
        T: 'static,
        F: FnOnce() -> T,
    {
        let index = self.index;
        match self.claim(CellKind::Ref) {
            Slot::Existing(i) => {
                let found = match &self.cells[i] {
                    Cell::Ref(slot) => slot.downcast_ref::<MutableRef<T>>().cloned(),
                    _ => None,
                };
                found.unwrap_or_else(|| {
                    self.mismatch(index);
                    MutableRef::new(init())
                })
            }
            Slot::Fresh => {
                let reference = MutableRef::new(init());
                self.cells.push(Cell::Ref(Rc::new(reference.clone())));
                reference
            }
            Slot::Detached => MutableRef::new(init()),
        }
    }

    /// Use the ref a parent handed down, or a ref of this instance's own.
    ///
    /// The own ref is declared either way so hook positions do not depend on
    /// whether the parent forwarded one.
    pub fn use_forwarded_ref<T: 'static>(
        &mut self,
        forwarded: Option<&MutableRef<T>>,
        initial: T,
    ) -> MutableRef<T> {
        let own = self.use_ref(initial);
        forwarded.cloned().unwrap_or(own)
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Run `effect` after the commit when `deps` changed (or on mount).
    /// An empty list runs once after mount.
    pub fn use_effect<F>(&mut self, deps: DepList, effect: F)
    where
        F: FnOnce() -> EffectResult + 'static,
    {
        self.effect(Some(deps), Box::new(effect));
    }

    /// Run `effect` after every commit of this instance.
    pub fn use_effect_always<F>(&mut self, effect: F)
    where
        F: FnOnce() -> EffectResult + 'static,
    {
        self.effect(None, Box::new(effect));
    }

    fn effect(&mut self, deps: Option<DepList>, callback: EffectFn) {
        let index = self.index;
        match self.claim(CellKind::Effect) {
            Slot::Existing(i) => {
                let change = match &mut self.cells[i] {
                    Cell::Effect(cell) => cell.offer(deps, callback),
                    _ => return,
                };
                self.check_deps(index, change);
                if change.needs_run() {
                    self.effects.push(i);
                }
            }
            Slot::Fresh => {
                let mut cell = EffectCell::new();
                cell.offer(deps, callback);
                self.effects.push(self.cells.len());
                self.cells.push(Cell::Effect(cell));
            }
            Slot::Detached => {}
        }
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Publish `value` on `channel` for this instance's subtree.
    ///
    /// When the value differs from the one published last render, every
    /// descendant that read it from this instance is scheduled.
    pub fn provide<T>(&mut self, channel: &Channel<T>, value: T)
    where
        T: PartialEq + 'static,
    {
        let index = self.index;
        match self.claim(CellKind::Provide) {
            Slot::Existing(i) => {
                if !matches!(self.cells[i], Cell::Provide(id) if id == channel.id()) {
                    self.mismatch(index);
                    return;
                }
            }
            Slot::Fresh => self.cells.push(Cell::Provide(channel.id())),
            Slot::Detached => return,
        }

        let mut tree = self.shared.tree.borrow_mut();
        let Some(instance) = tree.get_mut(&self.id) else {
            return;
        };

        let changed = match instance.provided.get_mut(&channel.id()) {
            Some(current) if current.downcast::<T>() == Some(&value) => false,
            Some(current) => {
                current.value = Rc::new(value);
                current.version += 1;
                true
            }
            None => {
                instance
                    .provided
                    .insert(channel.id(), Provided::new(Rc::new(value)));
                false
            }
        };

        if changed {
            let consumers: Vec<_> = tree
                .values()
                .filter(|other| other.consumes(channel.id(), self.id))
                .map(|other| other.id())
                .collect();
            tracing::trace!(
                provider = %self.id,
                channel = channel.name(),
                consumers = consumers.len(),
                "context value changed"
            );
            let mut queue = self.shared.queue.borrow_mut();
            for consumer in consumers {
                queue.request(consumer);
            }
        }
    }

    /// Resolve `channel` from the nearest ancestor that provides it, falling
    /// back to the channel default.
    pub fn use_context<T>(&mut self, channel: &Channel<T>) -> Result<T, MissingProviderError>
    where
        T: Clone + 'static,
    {
        let index = self.index;
        match self.claim(CellKind::Context) {
            Slot::Existing(i) => {
                if !matches!(self.cells[i], Cell::Context(id) if id == channel.id()) {
                    self.mismatch(index);
                }
            }
            Slot::Fresh => self.cells.push(Cell::Context(channel.id())),
            Slot::Detached => {}
        }

        let tree = self.shared.tree.borrow();
        let mut cursor = self.parent;
        while let Some(id) = cursor {
            let Some(ancestor) = tree.get(&id) else {
                break;
            };
            if let Some(value) = ancestor
                .provided
                .get(&channel.id())
                .and_then(|p| p.downcast::<T>())
            {
                self.consumed.push((channel.id(), Some(id)));
                return Ok(value.clone());
            }
            cursor = ancestor.parent;
        }

        self.consumed.push((channel.id(), None));
        channel.default_value().cloned().ok_or(MissingProviderError {
            channel: channel.name(),
        })
    }

    // ------------------------------------------------------------------
    // Suspension
    // ------------------------------------------------------------------

    /// Read the value of a future, suspending this render until it resolves.
    ///
    /// `factory` runs once, when the cell is created. While the future is
    /// pending the hook returns [`RenderError::Suspended`]; propagate it with
    /// `?` and the instance keeps its previous output until woken.
    pub fn use_future<T, Fut, F>(&mut self, factory: F) -> Result<T, RenderError>
    where
        T: Clone + 'static,
        Fut: Future<Output = T> + 'static,
        F: FnOnce() -> Fut,
    {
        let index = self.index;
        let waker = self.shared.wakes.waker_for(self.id, self.generation);

        let polled = match self.claim(CellKind::Future) {
            Slot::Existing(i) => {
                let polled = match &mut self.cells[i] {
                    Cell::Future(slot) => slot
                        .as_any_mut()
                        .downcast_mut::<FutureCell<T>>()
                        .map(|cell| cell.poll_value(&waker)),
                    _ => None,
                };
                match polled {
                    Some(polled) => polled,
                    None => {
                        self.mismatch(index);
                        FutureCell::new(factory()).poll_value(&waker)
                    }
                }
            }
            Slot::Fresh => {
                let mut cell = FutureCell::new(factory());
                let polled = cell.poll_value(&waker);
                self.cells.push(Cell::Future(Box::new(cell)));
                polled
            }
            Slot::Detached => FutureCell::new(factory()).poll_value(&waker),
        };

        match polled {
            Poll::Ready(value) => Ok(value),
            Poll::Pending => Err(RenderError::Suspended),
        }
    }

    // ------------------------------------------------------------------
    // Stores
    // ------------------------------------------------------------------

    /// Subscribe to the root-scoped store `S`, creating it on first use.
    pub fn use_store<S: Store>(&mut self) -> StoreHandle<S> {
        let index = self.index;
        let key = TypeId::of::<S>();
        match self.claim(CellKind::Store) {
            Slot::Existing(i) => {
                if !matches!(self.cells[i], Cell::Store(found) if found == key) {
                    self.mismatch(index);
                }
            }
            Slot::Fresh => self.cells.push(Cell::Store(key)),
            Slot::Detached => {}
        }

        let cell = store_cell::<S>(self.shared, self.root);
        if self.usage.is_none() {
            cell.subscribe(self.id);
        }
        StoreHandle::new(cell, self.queue())
    }

    // ------------------------------------------------------------------
    // Fault boundaries
    // ------------------------------------------------------------------

    /// The error this instance caught, when it is a fault boundary showing
    /// its fallback.
    pub fn caught_error(&self) -> Option<RenderError> {
        self.shared
            .tree
            .borrow()
            .get(&self.id)
            .and_then(|instance| instance.caught_error().cloned())
    }

    /// A handle that clears this boundary's caught error.
    pub fn boundary_reset(&self) -> BoundaryReset {
        BoundaryReset {
            queue: self.queue(),
            instance: self.id,
        }
    }
}

/// Fetch (or lazily create) the store `S` of `root`.
pub(crate) fn store_cell<S: Store>(shared: &Shared, root: InstanceId) -> Rc<StoreCell<S>> {
    let mut stores = shared.stores.borrow_mut();
    let slot = stores
        .entry(root)
        .or_default()
        .entry(TypeId::of::<S>())
        .or_insert_with(|| StoreCell::<S>::new() as Rc<dyn StoreSlot>);

    match Rc::clone(slot).as_any().downcast::<StoreCell<S>>() {
        Ok(cell) => cell,
        Err(_) => {
            let cell = StoreCell::<S>::new();
            *slot = cell.clone() as Rc<dyn StoreSlot>;
            cell
        }
    }
}

/// Clears the caught error of a fault boundary so it retries its child on
/// the next flush.
#[derive(Debug, Clone)]
pub struct BoundaryReset {
    queue: Weak<RefCell<RenderQueue>>,
    instance: InstanceId,
}

impl BoundaryReset {
    pub fn boundary(&self) -> InstanceId {
        self.instance
    }

    pub fn reset(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.borrow_mut().request_reset(self.instance);
        }
    }
}
