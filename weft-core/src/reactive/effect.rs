//! Effect Cells
//!
//! An effect is a side-effecting callback that runs after a commit whenever
//! its dependency list changed (or on every commit when it has none).
//!
//! # Lifecycle of one cell
//!
//! ```text
//! Idle --render with changed deps--> Pending --after commit--> Running --> Idle
//! ```
//!
//! Before the callback runs, the cleanup returned by its previous run is
//! invoked. On unmount the outstanding cleanups of an instance run in reverse
//! declaration order.
//!
//! # Differences from Memo
//!
//! - Memos run during render; effects run strictly after the commit.
//! - Memos produce a value; effects produce an optional cleanup.
//! - Effect errors are never caught by fault boundaries.

use std::fmt::{self, Debug};

use crate::error::EffectError;

use super::deps::{compare, DepList, DepsChange};

/// A cleanup returned by an effect.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self(Box::new(f))
    }

    pub fn run(self) {
        (self.0)()
    }
}

impl Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// What an effect callback returns.
pub type EffectResult = Result<Option<Cleanup>, EffectError>;

pub type EffectFn = Box<dyn FnOnce() -> EffectResult>;

/// Scheduler state of one effect cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectPhase {
    Idle,
    /// Queued by the last render, waiting for the commit.
    Pending,
    Running,
}

/// Storage for one effect hook.
pub struct EffectCell {
    /// `None` for effects that run after every commit.
    deps: Option<DepList>,
    has_run: bool,
    pending: Option<EffectFn>,
    cleanup: Option<Cleanup>,
    phase: EffectPhase,
    runs: u64,
}

impl EffectCell {
    pub fn new() -> Self {
        Self {
            deps: None,
            has_run: false,
            pending: None,
            cleanup: None,
            phase: EffectPhase::Idle,
            runs: 0,
        }
    }

    pub fn phase(&self) -> EffectPhase {
        self.phase
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Offer this render's callback. Returns the comparison result; when it
    /// says the effect must run, the callback is stored and the cell becomes
    /// `Pending`.
    ///
    /// `deps == None` schedules the effect unconditionally.
    pub fn offer(&mut self, deps: Option<DepList>, callback: EffectFn) -> DepsChange {
        let change = match (&deps, self.has_run) {
            (_, false) => DepsChange::Initial,
            (None, true) => DepsChange::Changed,
            (Some(current), true) => match compare(self.deps.as_deref(), current) {
                // A cell that switched from "always" to a list has no list to
                // compare with; treat it as changed.
                DepsChange::Initial => DepsChange::Changed,
                other => other,
            },
        };

        if change.needs_run() {
            self.deps = deps;
            self.pending = Some(callback);
            self.phase = EffectPhase::Pending;
        }

        change
    }

    /// Take what the runner needs: the previous cleanup and the new callback.
    pub(crate) fn begin_run(&mut self) -> Option<(Option<Cleanup>, EffectFn)> {
        let callback = self.pending.take()?;
        self.phase = EffectPhase::Running;
        Some((self.cleanup.take(), callback))
    }

    /// Store the outcome of a run.
    pub fn finish_run(&mut self, cleanup: Option<Cleanup>) {
        self.cleanup = cleanup;
        self.has_run = true;
        self.phase = EffectPhase::Idle;
        self.runs += 1;
    }

    /// Drop a queued callback that will never run (discarded render).
    pub fn discard_pending(&mut self) {
        if self.pending.take().is_some() {
            self.phase = EffectPhase::Idle;
        }
    }

    /// Take the outstanding cleanup for unmount.
    pub fn take_cleanup(&mut self) -> Option<Cleanup> {
        self.pending = None;
        self.phase = EffectPhase::Idle;
        self.cleanup.take()
    }
}

impl Default for EffectCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for EffectCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectCell")
            .field("phase", &self.phase)
            .field("deps", &self.deps)
            .field("runs", &self.runs)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn noop() -> EffectFn {
        Box::new(|| Ok(None))
    }

    fn run(cell: &mut EffectCell) {
        let (cleanup, callback) = cell.begin_run().expect("effect should be pending");
        if let Some(cleanup) = cleanup {
            cleanup.run();
        }
        let next = callback().expect("effect should succeed");
        cell.finish_run(next);
    }

    #[test]
    fn first_offer_always_schedules() {
        let mut cell = EffectCell::new();
        assert_eq!(cell.offer(Some(deps![]), noop()), DepsChange::Initial);
        assert_eq!(cell.phase(), EffectPhase::Pending);

        run(&mut cell);
        assert_eq!(cell.phase(), EffectPhase::Idle);
        assert_eq!(cell.runs(), 1);
    }

    #[test]
    fn empty_deps_run_once() {
        let mut cell = EffectCell::new();
        cell.offer(Some(deps![]), noop());
        run(&mut cell);

        assert_eq!(cell.offer(Some(deps![]), noop()), DepsChange::Unchanged);
        assert!(cell.begin_run().is_none());
    }

    #[test]
    fn missing_deps_run_every_time() {
        let mut cell = EffectCell::new();
        for _ in 0..3 {
            assert!(cell.offer(None, noop()).needs_run());
            run(&mut cell);
        }
        assert_eq!(cell.runs(), 3);
    }

    #[test]
    fn previous_cleanup_runs_before_next_callback() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut cell = EffectCell::new();

        for n in 0..2 {
            let log = log.clone();
            cell.offer(
                Some(deps![n]),
                Box::new(move || {
                    log.borrow_mut().push(format!("run {n}"));
                    let log = log.clone();
                    Ok(Some(Cleanup::new(move || {
                        log.borrow_mut().push(format!("cleanup {n}"))
                    })))
                }),
            );
            run(&mut cell);
        }

        assert_eq!(*log.borrow(), vec!["run 0", "cleanup 0", "run 1"]);
        assert!(cell.has_cleanup());
        cell.take_cleanup().unwrap().run();
        assert_eq!(log.borrow().last().unwrap(), "cleanup 1");
    }

    #[test]
    fn discarded_callbacks_never_run() {
        let mut cell = EffectCell::new();
        cell.offer(Some(deps![1]), noop());
        cell.discard_pending();

        assert_eq!(cell.phase(), EffectPhase::Idle);
        assert!(cell.begin_run().is_none());
        // Never ran, so the next offer is still the initial one.
        assert_eq!(cell.offer(Some(deps![1]), noop()), DepsChange::Initial);
    }
}
