//! Ref cells: mutable slots that survive re-renders and never schedule one.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::deps::Dep;

/// A mutable slot owned by an instance (or handed down by a parent).
///
/// Writes are synchronous and never schedule a render. Reads always see the
/// last write, including writes made by effects after the previous commit.
pub struct MutableRef<T> {
    current: Rc<RefCell<T>>,
}

impl<T: 'static> MutableRef<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: Rc::new(RefCell::new(value)),
        }
    }

    pub fn set(&self, value: T) {
        *self.current.borrow_mut() = value;
    }

    /// Replace the value, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        self.current.replace(value)
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.current.borrow())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.current.borrow_mut())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.current, &other.current)
    }
}

impl<T: Clone + 'static> MutableRef<T> {
    pub fn current(&self) -> T {
        self.current.borrow().clone()
    }
}

impl<T> Clone for MutableRef<T> {
    fn clone(&self) -> Self {
        Self {
            current: Rc::clone(&self.current),
        }
    }
}

impl<T: Debug> Debug for MutableRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current.try_borrow() {
            Ok(value) => f.debug_tuple("MutableRef").field(&*value).finish(),
            Err(_) => f.write_str("MutableRef(<borrowed>)"),
        }
    }
}

impl<T: 'static> From<&MutableRef<T>> for Dep {
    fn from(r: &MutableRef<T>) -> Self {
        Dep::Identity(r.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_visible_immediately() {
        let r = MutableRef::new(0);
        r.set(3);
        assert_eq!(r.current(), 3);

        r.with_mut(|v| *v += 1);
        assert_eq!(r.current(), 4);
        assert_eq!(r.replace(9), 4);
        assert_eq!(r.with(|v| *v), 9);
    }

    #[test]
    fn clones_share_the_slot() {
        let a = MutableRef::new(String::from("idle"));
        let b = a.clone();

        b.set(String::from("focused"));
        assert_eq!(a.current(), "focused");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&MutableRef::new(String::new())));
    }
}
