//! Root-Scoped Stores
//!
//! A store is shared state that lives outside any single component, in the
//! style of a small global store library. It is not truly global: each
//! mounted root lazily creates its own instance on first use and drops it
//! when the root unmounts.
//!
//! Unlike component state, store writes apply immediately. Every instance
//! that called `use_store` for the store type is scheduled to re-render.

use std::any::Any;
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use crate::graph::{InstanceId, RenderQueue};

/// A store type. `init` builds the value a root starts with.
///
/// ```rust,ignore
/// #[derive(Clone, Default)]
/// struct Counter { count: i32 }
///
/// impl Store for Counter {
///     fn init() -> Self { Self::default() }
/// }
///
/// let counter = scope.use_store::<Counter>();
/// counter.update(|c| c.count += 1);
/// ```
pub trait Store: Clone + 'static {
    fn init() -> Self;
}

/// Backing storage of one store within one root.
pub struct StoreCell<S> {
    value: RefCell<S>,
    subscribers: RefCell<IndexSet<InstanceId>>,
}

impl<S: Store> StoreCell<S> {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(S::init()),
            subscribers: RefCell::new(IndexSet::new()),
        })
    }

    pub fn subscribe(&self, instance: InstanceId) {
        self.subscribers.borrow_mut().insert(instance);
    }
}

/// Type-erased view kept by the root.
pub trait StoreSlot {
    fn unsubscribe(&self, instance: InstanceId);
    fn subscriber_count(&self) -> usize;
    fn as_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<S: Store> StoreSlot for StoreCell<S> {
    fn unsubscribe(&self, instance: InstanceId) {
        self.subscribers.borrow_mut().shift_remove(&instance);
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn as_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Access to a store from a component or from outside the tree.
pub struct StoreHandle<S> {
    cell: Rc<StoreCell<S>>,
    queue: Weak<RefCell<RenderQueue>>,
}

impl<S: Store> StoreHandle<S> {
    pub(crate) fn new(cell: Rc<StoreCell<S>>, queue: Weak<RefCell<RenderQueue>>) -> Self {
        Self { cell, queue }
    }

    pub fn get(&self) -> S {
        self.cell.value.borrow().clone()
    }

    /// Read through a projection without cloning the whole state.
    pub fn select<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.cell.value.borrow())
    }

    pub fn set(&self, value: S) {
        *self.cell.value.borrow_mut() = value;
        self.notify();
    }

    pub fn update(&self, f: impl FnOnce(&mut S)) {
        f(&mut self.cell.value.borrow_mut());
        self.notify();
    }

    fn notify(&self) {
        let Some(queue) = self.queue.upgrade() else {
            return;
        };
        let subscribers: Vec<_> = self.cell.subscribers.borrow().iter().copied().collect();
        let mut queue = queue.borrow_mut();
        for instance in subscribers {
            queue.request(instance);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.cell.subscriber_count()
    }
}

impl<S> Clone for StoreHandle<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            queue: self.queue.clone(),
        }
    }
}

impl<S: Debug> Debug for StoreHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("value", &*self.cell.value.borrow())
            .field("subscribers", &self.cell.subscribers.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter {
        count: i32,
    }

    impl Store for Counter {
        fn init() -> Self {
            Self { count: 0 }
        }
    }

    #[test]
    fn writes_apply_immediately_and_schedule_subscribers() {
        let queue = Rc::new(RefCell::new(RenderQueue::new()));
        let cell = StoreCell::<Counter>::new();
        let reader = InstanceId::new();
        cell.subscribe(reader);

        let handle = StoreHandle::new(cell, Rc::downgrade(&queue));
        handle.update(|c| c.count += 2);

        assert_eq!(handle.get(), Counter { count: 2 });
        assert_eq!(handle.select(|c| c.count), 2);
        assert!(queue.borrow().is_dirty(reader));
    }

    #[test]
    fn unsubscribed_instances_are_not_scheduled() {
        let queue = Rc::new(RefCell::new(RenderQueue::new()));
        let cell = StoreCell::<Counter>::new();
        let reader = InstanceId::new();
        cell.subscribe(reader);
        cell.unsubscribe(reader);

        let handle = StoreHandle::new(cell, Rc::downgrade(&queue));
        handle.set(Counter { count: 5 });

        assert_eq!(handle.subscriber_count(), 0);
        assert!(!queue.borrow().has_dirty());
    }
}
