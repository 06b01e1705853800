//! State Cells
//!
//! A state cell holds the committed value of one `use_state` hook and the
//! updates queued against it since the instance last rendered.
//!
//! # Batching
//!
//! Setters never touch the value directly. They append to the pending queue
//! and ask the scheduler for a render. When the instance next renders, the
//! whole queue is applied in enqueue order before the render function runs,
//! so every read inside that render sees the same value, and updates queued
//! during the render wait for the following pass.

use std::any::Any;
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use crate::graph::{InstanceId, RenderQueue};

/// One queued update.
enum Update<T> {
    Replace(T),
    Apply(Box<dyn FnOnce(&T) -> T>),
}

/// Storage for one state hook.
pub struct StateCell<T> {
    value: RefCell<T>,
    pending: RefCell<Vec<Update<T>>>,
}

impl<T: 'static> StateCell<T> {
    pub fn new(value: T) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            pending: RefCell::new(Vec::new()),
        })
    }

    fn enqueue(&self, update: Update<T>) {
        self.pending.borrow_mut().push(update);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl<T: Clone + 'static> StateCell<T> {
    /// The committed value.
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }
}

/// Type-erased view used by the runtime to flush queues at render start.
pub trait StateSlot {
    /// Apply every queued update in order. Returns how many were applied.
    fn apply_pending(&self) -> usize;

    fn as_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: 'static> StateSlot for StateCell<T> {
    fn apply_pending(&self) -> usize {
        // Take the queue first: an updater may enqueue more updates.
        let updates = std::mem::take(&mut *self.pending.borrow_mut());
        let applied = updates.len();

        for update in updates {
            match update {
                Update::Replace(value) => *self.value.borrow_mut() = value,
                Update::Apply(f) => {
                    let next = f(&self.value.borrow());
                    *self.value.borrow_mut() = next;
                }
            }
        }

        applied
    }

    fn as_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Handle returned by `use_state`. Stable for the lifetime of the instance.
pub struct Setter<T> {
    cell: Weak<StateCell<T>>,
    queue: Weak<RefCell<RenderQueue>>,
    instance: InstanceId,
}

impl<T: 'static> Setter<T> {
    pub(crate) fn new(
        cell: &Rc<StateCell<T>>,
        queue: Weak<RefCell<RenderQueue>>,
        instance: InstanceId,
    ) -> Self {
        Self {
            cell: Rc::downgrade(cell),
            queue,
            instance,
        }
    }

    /// The instance that owns the state.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Queue a replacement value.
    pub fn set(&self, value: T) {
        self.push(Update::Replace(value));
    }

    /// Queue a functional update. It receives the result of the previous
    /// queued update (or the committed value).
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T + 'static,
    {
        self.push(Update::Apply(Box::new(f)));
    }

    fn push(&self, update: Update<T>) {
        let Some(cell) = self.cell.upgrade() else {
            tracing::warn!(instance = %self.instance, "state update on an unmounted instance ignored");
            return;
        };
        cell.enqueue(update);

        if let Some(queue) = self.queue.upgrade() {
            queue.borrow_mut().request(self.instance);
        }
    }

    /// Whether two setters drive the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            queue: self.queue.clone(),
            instance: self.instance,
        }
    }
}

impl<T> Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("instance", &self.instance)
            .field("live", &(self.cell.strong_count() > 0))
            .finish()
    }
}
