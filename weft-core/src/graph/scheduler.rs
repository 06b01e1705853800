//! Render Queue
//!
//! The queue collects everything a scheduling tick has to process:
//!
//! 1. Instances marked dirty by setters, stores, context changes or wakes.
//! 2. Instances whose own render requested another pass (coalesced).
//! 3. Effects whose dependencies changed, in the order they must run.
//! 4. Teardowns of instances removed during reconciliation.
//!
//! # Ordering
//!
//! Dirty instances are processed shallowest first. A parent re-render
//! re-renders its non-memoized children, so by the time a dirty child comes
//! up it has usually been handled already and is skipped. This is the tree
//! special case of a topological sort: depth is the only ordering needed.

use indexmap::IndexSet;

use crate::reactive::{Cleanup, RenderContext};

use super::node::{Cell, InstanceId};

/// Cleanups of an instance that left the tree, in the order they must run.
///
/// The instance's cells travel along and are released only after the
/// cleanups ran.
pub struct Teardown {
    pub instance: InstanceId,
    pub component: &'static str,
    pub cleanups: Vec<Cleanup>,
    pub cells: Vec<Cell>,
}

/// An effect cell waiting for the commit to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEffect {
    pub instance: InstanceId,
    /// Position of the effect cell in the instance's cell list.
    pub cell: usize,
}

/// Work queued for the next scheduling tick.
#[derive(Default)]
pub struct RenderQueue {
    dirty: IndexSet<InstanceId>,
    rerender_after: IndexSet<InstanceId>,
    resets: IndexSet<InstanceId>,
    effects: Vec<PendingEffect>,
    teardowns: Vec<Teardown>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a render of `instance`.
    ///
    /// A request made while the instance itself is rendering is coalesced
    /// into a single follow-up pass instead of starting a nested render.
    /// Returns true if the request was newly recorded.
    pub fn request(&mut self, instance: InstanceId) -> bool {
        if RenderContext::is_rendering(instance) {
            self.rerender_after.insert(instance)
        } else {
            self.dirty.insert(instance)
        }
    }

    /// Ask a fault boundary to drop its caught error and retry its child.
    pub fn request_reset(&mut self, boundary: InstanceId) -> bool {
        self.resets.insert(boundary)
    }

    pub fn take_resets(&mut self) -> Vec<InstanceId> {
        self.resets.drain(..).collect()
    }

    pub fn is_dirty(&self, instance: InstanceId) -> bool {
        self.dirty.contains(&instance)
    }

    /// Clear the dirty mark of an instance that is about to render.
    pub fn mark_clean(&mut self, instance: InstanceId) {
        self.dirty.shift_remove(&instance);
    }

    /// Move coalesced render-phase requests into the dirty set.
    pub fn promote_rerenders(&mut self) {
        let pending: Vec<_> = self.rerender_after.drain(..).collect();
        self.dirty.extend(pending);
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Snapshot the dirty set, shallowest instance first.
    ///
    /// `depth_of` returns `None` for instances that no longer exist; those
    /// are dropped from the queue.
    pub fn dirty_by_depth<F>(&mut self, depth_of: F) -> Vec<InstanceId>
    where
        F: Fn(InstanceId) -> Option<u32>,
    {
        let mut live = Vec::with_capacity(self.dirty.len());
        self.dirty.retain(|id| match depth_of(*id) {
            Some(depth) => {
                live.push((depth, *id));
                true
            }
            None => false,
        });
        // Stable: equal depths keep scheduling order.
        live.sort_by_key(|(depth, _)| *depth);
        live.into_iter().map(|(_, id)| id).collect()
    }

    pub fn push_effect(&mut self, effect: PendingEffect) {
        self.effects.push(effect);
    }

    pub fn take_effects(&mut self) -> Vec<PendingEffect> {
        std::mem::take(&mut self.effects)
    }

    /// Put back effects that did not get to run, ahead of newer ones.
    pub fn requeue_effects(&mut self, mut remaining: Vec<PendingEffect>) {
        remaining.append(&mut self.effects);
        self.effects = remaining;
    }

    /// Drop queued effects of an instance that is going away.
    pub fn forget_instance(&mut self, instance: InstanceId) {
        self.dirty.shift_remove(&instance);
        self.rerender_after.shift_remove(&instance);
        self.resets.shift_remove(&instance);
        self.effects.retain(|e| e.instance != instance);
    }

    pub fn push_teardown(&mut self, teardown: Teardown) {
        self.teardowns.push(teardown);
    }

    pub fn take_teardowns(&mut self) -> Vec<Teardown> {
        std::mem::take(&mut self.teardowns)
    }

    /// Abandon all scheduled renders. Used when a tick aborts.
    pub fn clear_renders(&mut self) {
        self.dirty.clear();
        self.rerender_after.clear();
    }

    /// Keep only the queued effects `keep` accepts.
    pub fn retain_effects<F>(&mut self, keep: F)
    where
        F: FnMut(&PendingEffect) -> bool,
    {
        self.effects.retain(keep);
    }

    pub fn is_idle(&self) -> bool {
        self.dirty.is_empty()
            && self.rerender_after.is_empty()
            && self.resets.is_empty()
            && self.effects.is_empty()
            && self.teardowns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn requests_are_deduplicated() {
        let mut queue = RenderQueue::new();
        let id = InstanceId::new();

        assert!(queue.request(id));
        assert!(!queue.request(id));
        assert!(queue.is_dirty(id));

        queue.mark_clean(id);
        assert!(!queue.has_dirty());
    }

    #[test]
    fn dirty_instances_come_out_shallowest_first() {
        let mut queue = RenderQueue::new();
        let leaf = InstanceId::new();
        let root = InstanceId::new();
        let middle = InstanceId::new();
        let gone = InstanceId::new();

        let depths: HashMap<_, _> = [(leaf, 2), (root, 0), (middle, 1)].into_iter().collect();

        queue.request(leaf);
        queue.request(gone);
        queue.request(root);
        queue.request(middle);

        let order = queue.dirty_by_depth(|id| depths.get(&id).copied());
        assert_eq!(order, vec![root, middle, leaf]);
        // Unknown instances are dropped, live ones stay dirty until rendered.
        assert!(!queue.is_dirty(gone));
        assert!(queue.is_dirty(leaf));
    }

    #[test]
    fn render_phase_requests_are_coalesced() {
        let mut queue = RenderQueue::new();
        let id = InstanceId::new();

        {
            let _ctx = RenderContext::enter(id);
            assert!(queue.request(id));
            assert!(!queue.request(id));
        }

        assert!(!queue.is_dirty(id));
        queue.promote_rerenders();
        assert!(queue.is_dirty(id));
    }

    #[test]
    fn requeued_effects_run_before_newer_ones() {
        let mut queue = RenderQueue::new();
        let a = InstanceId::new();
        let b = InstanceId::new();

        queue.push_effect(PendingEffect { instance: b, cell: 0 });
        queue.requeue_effects(vec![PendingEffect { instance: a, cell: 1 }]);

        let effects = queue.take_effects();
        assert_eq!(effects[0].instance, a);
        assert_eq!(effects[1].instance, b);
    }

    #[test]
    fn forgetting_an_instance_drops_its_work() {
        let mut queue = RenderQueue::new();
        let id = InstanceId::new();

        queue.request(id);
        queue.push_effect(PendingEffect { instance: id, cell: 0 });
        queue.forget_instance(id);

        assert!(queue.is_idle());
    }

    #[test]
    fn aborting_renders_keeps_chosen_effects() {
        let mut queue = RenderQueue::new();
        let healthy = InstanceId::new();
        let runaway = InstanceId::new();

        queue.request(runaway);
        queue.push_effect(PendingEffect { instance: healthy, cell: 0 });
        queue.push_effect(PendingEffect { instance: runaway, cell: 0 });

        queue.clear_renders();
        queue.retain_effects(|e| e.instance != runaway);

        assert!(!queue.has_dirty());
        assert_eq!(
            queue.take_effects(),
            vec![PendingEffect { instance: healthy, cell: 0 }]
        );
    }
}
