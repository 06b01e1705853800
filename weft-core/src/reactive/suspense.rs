//! Suspension
//!
//! `use_future` lets a render wait on an asynchronous value. The future is
//! created once per cell and polled during render. While it is pending the
//! render bails out with `RenderError::Suspended`; when it completes, its
//! waker records `(instance, generation)` in the wake queue and the next
//! flush re-renders the instance.
//!
//! # Staleness
//!
//! Every mounted instance carries a [`Generation`]. A wake whose generation
//! no longer matches a mounted instance is stale: the runtime does not
//! render anything for it and reports it as a diagnostic instead.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_util::future::LocalBoxFuture;
use futures_util::task::{waker, ArcWake};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::graph::{Generation, InstanceId};

/// A resumption request delivered by a waker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wake {
    pub instance: InstanceId,
    pub generation: Generation,
}

/// Thread-safe inbox for wakes.
///
/// Wakers may fire from any thread (a tokio worker completing a fetch, for
/// example), so this is the one piece of runtime state behind a lock.
#[derive(Debug, Default)]
pub struct WakeQueue {
    pending: Mutex<Vec<Wake>>,
    notify: Notify,
}

impl WakeQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, wake: Wake) {
        {
            let mut pending = self.pending.lock();
            if !pending.contains(&wake) {
                pending.push(wake);
            }
        }
        self.notify.notify_one();
    }

    pub fn drain(&self) -> Vec<Wake> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Wait until at least one wake has been pushed since the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Build a waker that resumes `instance`.
    pub fn waker_for(self: &Arc<Self>, instance: InstanceId, generation: Generation) -> Waker {
        waker(Arc::new(InstanceWaker {
            queue: Arc::clone(self),
            wake: Wake {
                instance,
                generation,
            },
        }))
    }
}

struct InstanceWaker {
    queue: Arc<WakeQueue>,
    wake: Wake,
}

impl ArcWake for InstanceWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.queue.push(arc_self.wake);
    }
}

/// Storage for one `use_future` hook.
pub enum FutureCell<T> {
    Pending(LocalBoxFuture<'static, T>),
    Ready(T),
}

impl<T: Clone + 'static> FutureCell<T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self::Pending(future.boxed_local())
    }

    /// Poll once if still pending. Returns the value when available.
    pub fn poll_value(&mut self, waker: &Waker) -> Poll<T> {
        if let Self::Pending(future) = self {
            let mut cx = Context::from_waker(waker);
            let polled = future.as_mut().poll(&mut cx);
            match polled {
                Poll::Ready(value) => *self = Self::Ready(value),
                Poll::Pending => return Poll::Pending,
            }
        }

        match self {
            Self::Ready(value) => Poll::Ready(value.clone()),
            Self::Pending(_) => Poll::Pending,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Type-erased access so the runtime can report suspension state.
pub trait Suspendable {
    fn is_ready(&self) -> bool;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Clone + 'static> Suspendable for FutureCell<T> {
    fn is_ready(&self) -> bool {
        FutureCell::is_ready(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::pin::Pin;
    use std::rc::Rc;

    /// A future completed by hand, exposing the waker it was polled with.
    struct Manual {
        state: Rc<RefCell<(Option<u32>, Option<Waker>)>>,
    }

    impl Future for Manual {
        type Output = u32;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u32> {
            let mut state = self.state.borrow_mut();
            let ready = state.0;
            match ready {
                Some(v) => Poll::Ready(v),
                None => {
                    state.1 = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        }
    }

    #[test]
    fn waker_pushes_instance_and_generation() {
        let queue = WakeQueue::new();
        let instance = InstanceId::new();
        let generation = Generation::next();

        let w = queue.waker_for(instance, generation);
        w.wake_by_ref();
        w.wake();

        let wakes = queue.drain();
        assert_eq!(wakes, vec![Wake { instance, generation }]);
        assert!(queue.is_empty());
    }

    #[test]
    fn future_cell_resolves_once_completed() {
        let state = Rc::new(RefCell::new((None, None)));
        let mut cell = FutureCell::new(Manual { state: state.clone() });
        let queue = WakeQueue::new();
        let instance = InstanceId::new();
        let w = queue.waker_for(instance, Generation::next());

        assert!(cell.poll_value(&w).is_pending());
        assert!(!cell.is_ready());

        let stored = {
            let mut s = state.borrow_mut();
            s.0 = Some(11);
            s.1.take().unwrap()
        };
        stored.wake();
        assert_eq!(queue.drain().len(), 1);

        assert_eq!(cell.poll_value(&w), Poll::Ready(11));
        // Ready values are served from the cell afterwards.
        assert_eq!(cell.poll_value(&w), Poll::Ready(11));
        assert!(cell.is_ready());
    }
}
