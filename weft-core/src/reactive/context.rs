//! Render Context
//!
//! The render context tracks which instance is currently rendering. Setters
//! consult it to tell a render-phase update of the instance's own state
//! (coalesced into a follow-up pass) apart from an ordinary update.
//!
//! # Implementation
//!
//! A thread-local stack holds one entry per active render pass. Rendering a
//! parent pushes its id, rendering a child pushes the child's id on top, and
//! the guard pops on drop, even when the render function panics.

use std::cell::RefCell;

use crate::graph::InstanceId;

thread_local! {
    static RENDER_STACK: RefCell<Vec<InstanceId>> = const { RefCell::new(Vec::new()) };
}

/// Guard for an active render pass. Pops the stack when dropped.
pub struct RenderContext {
    instance: InstanceId,
}

impl RenderContext {
    /// Mark `instance` as the innermost rendering instance.
    pub fn enter(instance: InstanceId) -> Self {
        RENDER_STACK.with(|stack| stack.borrow_mut().push(instance));
        Self { instance }
    }

    /// Whether any render pass is running on this thread.
    pub fn is_active() -> bool {
        RENDER_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The innermost rendering instance, if any.
    pub fn current() -> Option<InstanceId> {
        RENDER_STACK.with(|stack| stack.borrow().last().copied())
    }

    /// Whether `instance` is the one whose render function is executing.
    pub fn is_rendering(instance: InstanceId) -> bool {
        Self::current() == Some(instance)
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        RENDER_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.instance),
                "RenderContext mismatch: expected {:?}, got {:?}",
                self.instance,
                popped
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_rendering_instance() {
        let id = InstanceId::new();

        assert!(!RenderContext::is_active());
        assert!(RenderContext::current().is_none());

        {
            let _ctx = RenderContext::enter(id);
            assert!(RenderContext::is_active());
            assert!(RenderContext::is_rendering(id));
        }

        assert!(!RenderContext::is_active());
        assert!(!RenderContext::is_rendering(id));
    }

    #[test]
    fn nested_renders_restore_outer_instance() {
        let parent = InstanceId::new();
        let child = InstanceId::new();

        let _outer = RenderContext::enter(parent);
        {
            let _inner = RenderContext::enter(child);
            assert_eq!(RenderContext::current(), Some(child));
            assert!(!RenderContext::is_rendering(parent));
        }
        assert_eq!(RenderContext::current(), Some(parent));
    }
}
