//! Hook Cells
//!
//! This module implements the per-instance storage behind every hook: state,
//! memo, ref, effect, context and suspension cells, plus root-scoped stores.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A cell is a positional slot owned by one component instance. The first
//! render of an instance creates its cells in declaration order; every later
//! render reads them back in the same order. Declaring hooks conditionally
//! breaks that correspondence and is reported as a usage error.
//!
//! ## State
//!
//! State cells queue updates and apply them when the instance next renders,
//! so a render always sees a consistent snapshot.
//!
//! ## Memos and Effects
//!
//! Both are guarded by a dependency list compared position by position. Memos
//! recompute during render; effects run after the commit, cleaning up their
//! previous run first.
//!
//! ## Refs
//!
//! Refs are plain mutable slots. Writing one never schedules a render.
//!
//! ## Channels
//!
//! Channels broadcast a value from an instance to its subtree. Consumers are
//! tracked so only instances that actually read a channel re-render when its
//! value changes.

mod channel;
mod context;
mod deps;
mod effect;
mod memo;
mod reference;
mod state;
mod store;
mod suspense;

pub use channel::{Channel, ChannelId, Provided};
pub use context::RenderContext;
pub use deps::{compare, Dep, DepList, DepsChange};
pub use effect::{Cleanup, EffectCell, EffectFn, EffectPhase, EffectResult};
pub use memo::{Callback, MemoCell, MemoState};
pub use reference::MutableRef;
pub use state::{Setter, StateCell, StateSlot};
pub use store::{Store, StoreCell, StoreHandle, StoreSlot};
pub use suspense::{FutureCell, Suspendable, Wake, WakeQueue};
