//! Weft Core
//!
//! This crate provides the runtime for Weft, a component hooks engine.
//! It implements:
//!
//! - Positional hook cells (state, memo, ref, effect, context)
//! - Batched state updates and a depth-ordered render queue
//! - Effects with cleanups, run after the commit
//! - Context channels with per-consumer invalidation
//! - Fault boundaries around render errors
//! - Suspension on futures, with stale resumption detection
//!
//! Rendering to a real UI is out of scope: every committed [`Output`] is
//! handed to a [`Committer`] supplied by the host.
//!
//! # Architecture
//!
//! - `reactive`: the cells behind each hook
//! - `graph`: instances and the render queue
//! - `element`: what render functions return, and the committed output
//! - `scope`: the hook API handed to render functions
//! - `runtime`: mount, flush, commit and unmount
//!
//! # Example
//!
//! ```rust
//! use weft_core::{ComponentElement, Element, InstanceId, Output, RenderResult, Runtime, Scope};
//!
//! fn counter(scope: &mut Scope<'_>, start: &i32) -> RenderResult {
//!     let (count, set_count) = scope.use_state(*start);
//!     if count == *start {
//!         set_count.update(|n| n + 1);
//!     }
//!     Ok(Element::text(count.to_string()))
//! }
//!
//! let runtime = Runtime::default();
//! let root = runtime
//!     .mount(ComponentElement::new("Counter", counter, 0), |_: InstanceId, _: &Output| {})
//!     .unwrap();
//!
//! // The render-phase update was folded into a follow-up pass.
//! assert_eq!(runtime.output(root).unwrap().text_content(), "1");
//! ```

pub mod class;
pub mod config;
pub mod element;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod runtime;
pub mod scope;
pub mod snapshot;

pub use class::{ClassComponent, ClassHandle};
pub use config::RuntimeConfig;
pub use element::{ComponentElement, Element, NodeElement, Output, RenderFn, RenderResult};
pub use error::{
    EffectError, ErrorReport, ErrorSink, MissingProviderError, RenderError, RuntimeError,
    TracingSink, UsageError,
};
pub use graph::InstanceId;
pub use reactive::{
    Callback, Channel, Cleanup, Dep, DepList, EffectResult, MutableRef, Setter, Store, StoreHandle,
};
pub use runtime::{Committer, InstanceHandle, Runtime};
pub use scope::{BoundaryReset, Scope};
pub use snapshot::{InstanceSnapshot, TreeSnapshot};
