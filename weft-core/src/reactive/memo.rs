//! Memo Cells
//!
//! A memo cell caches a value derived during render together with the
//! dependency list it was computed from.
//!
//! # How Memos Work
//!
//! 1. On the first render the compute function always runs.
//!
//! 2. On later renders the new dependency list is compared position by
//!    position with the cached one.
//!
//! 3. If nothing changed, the cached `Rc` is handed back untouched, so
//!    callers can rely on identity (`Rc::ptr_eq`).
//!
//! 4. Otherwise the value is recomputed synchronously, right there in the
//!    render. Memos are never deferred.
//!
//! A dependency list whose length changes between renders is a usage error:
//! positional comparison is meaningless once the positions shift.

use std::any::Any;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::deps::{compare, Dep, DepList, DepsChange};

/// Dirty state of a memo cell as seen by the last render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// Never computed.
    Empty,
    /// Last render reused the cached value.
    Cached,
    /// Last render recomputed.
    Recomputed,
}

/// Storage for one memo or callback hook.
pub struct MemoCell {
    value: Option<Rc<dyn Any>>,
    deps: Option<DepList>,
    state: MemoState,
    computations: u64,
}

impl MemoCell {
    pub fn new() -> Self {
        Self {
            value: None,
            deps: None,
            state: MemoState::Empty,
            computations: 0,
        }
    }

    pub fn state(&self) -> MemoState {
        self.state
    }

    /// How many times the compute function has run.
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// Return the cached value or recompute it.
    ///
    /// The returned [`DepsChange`] lets the caller report a length change;
    /// the value is still recomputed in that case so the render can finish.
    /// When the cell holds a value of another type, `compute` is handed back
    /// untouched.
    pub fn resolve<T, F>(&mut self, deps: DepList, compute: F) -> Result<(Rc<T>, DepsChange), F>
    where
        T: 'static,
        F: FnOnce() -> T,
    {
        let cached = match self.value.clone().map(|v| v.downcast::<T>()) {
            Some(Ok(value)) => Some(value),
            Some(Err(_)) => return Err(compute),
            None => None,
        };

        let change = compare(self.deps.as_deref(), &deps);
        if let (false, Some(value)) = (change.needs_run(), cached) {
            self.state = MemoState::Cached;
            return Ok((value, change));
        }

        let value = Rc::new(compute());
        self.value = Some(value.clone());
        self.deps = Some(deps);
        self.state = MemoState::Recomputed;
        self.computations += 1;
        Ok((value, change))
    }

    pub fn deps(&self) -> Option<&[Dep]> {
        self.deps.as_deref()
    }
}

impl Default for MemoCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCell")
            .field("state", &self.state)
            .field("deps", &self.deps)
            .field("computations", &self.computations)
            .finish()
    }
}

struct CallbackInner<A, R> {
    f: Box<dyn Fn(A) -> R>,
}

/// A shared function with identity, produced by `use_callback`.
///
/// Clones point at the same function; [`Callback::ptr_eq`] tells whether two
/// callbacks came from the same memoized computation.
pub struct Callback<A, R = ()> {
    inner: Rc<CallbackInner<A, R>>,
}

impl<A: 'static, R: 'static> Callback<A, R> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(A) -> R + 'static,
    {
        Self {
            inner: Rc::new(CallbackInner { f: Box::new(f) }),
        }
    }

    pub fn call(&self, arg: A) -> R {
        (self.inner.f)(arg)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A, R> Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.inner))
    }
}

impl<A: 'static, R: 'static> PartialEq for Callback<A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<A: 'static, R: 'static> From<&Callback<A, R>> for Dep {
    fn from(callback: &Callback<A, R>) -> Self {
        Dep::Identity(callback.inner.clone())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use std::cell::Cell;

    fn resolve<T: 'static>(cell: &mut MemoCell, deps: DepList, f: impl FnOnce() -> T) -> (Rc<T>, DepsChange) {
        match cell.resolve(deps, f) {
            Ok(resolved) => resolved,
            Err(_) => panic!("memo cell holds another type"),
        }
    }

    #[test]
    fn memo_computes_on_first_resolve() {
        let mut cell = MemoCell::new();
        assert_eq!(cell.state(), MemoState::Empty);

        let (value, change) = resolve(&mut cell, deps![1], || 42);
        assert_eq!(*value, 42);
        assert_eq!(change, DepsChange::Initial);
        assert_eq!(cell.state(), MemoState::Recomputed);
    }

    #[test]
    fn memo_returns_same_rc_when_deps_unchanged() {
        let calls = Cell::new(0);
        let mut cell = MemoCell::new();

        let compute = || {
            calls.set(calls.get() + 1);
            vec![1, 2, 3]
        };

        let (first, _) = resolve(&mut cell, deps![7, "a"], compute);
        let (second, change) = resolve::<Vec<i32>>(&mut cell, deps![7, "a"], || unreachable!());

        assert_eq!(change, DepsChange::Unchanged);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(calls.get(), 1);
        assert_eq!(cell.state(), MemoState::Cached);
    }

    #[test]
    fn memo_recomputes_when_a_dep_changes() {
        let mut cell = MemoCell::new();

        resolve(&mut cell, deps![1], || 10);
        let (value, change) = resolve(&mut cell, deps![2], || 20);

        assert_eq!(change, DepsChange::Changed);
        assert_eq!(*value, 20);
        assert_eq!(cell.computations(), 2);
    }

    #[test]
    fn length_change_is_reported_but_still_computes() {
        let mut cell = MemoCell::new();

        resolve(&mut cell, deps![1], || 1);
        let (value, change) = resolve(&mut cell, deps![1, 2], || 2);

        assert!(matches!(change, DepsChange::LengthChanged { .. }));
        assert_eq!(*value, 2);
    }

    #[test]
    fn type_mismatch_hands_the_compute_fn_back() {
        let mut cell = MemoCell::new();
        resolve(&mut cell, deps![], || 1_u8);

        let rejected = cell.resolve::<String, _>(deps![], || String::from("x"));
        match rejected {
            Err(compute) => assert_eq!(compute(), "x"),
            Ok(_) => panic!("expected a type mismatch"),
        }
        assert_eq!(cell.computations(), 1);
    }

    #[test]
    fn callback_identity_follows_clones() {
        let a = Callback::new(|n: i32| n + 1);
        let b = a.clone();
        let c = Callback::new(|n: i32| n + 1);

        assert_eq!(a.call(1), 2);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(Dep::from(&a), Dep::from(&b));
        assert_ne!(Dep::from(&a), Dep::from(&c));
    }
}
