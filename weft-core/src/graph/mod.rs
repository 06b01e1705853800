//! Instance Tree
//!
//! This module holds the structures the runtime schedules over: component
//! instances and the queue of work for the next tick.
//!
//! # Overview
//!
//! Instances form a tree. Each instance knows its parent (for context
//! lookup and fault boundary search) and its children in template order.
//! The tree only changes during reconciliation, after a parent renders.
//!
//! # Design Decisions
//!
//! 1. Instances live in a flat map indexed by [`InstanceId`] rather than in
//!    nested owned nodes. Parents refer to children by id, and children refer
//!    to parents by id, so there are no reference cycles to break.
//!
//! 2. Render order is by depth, shallowest first. A parent's render reaches
//!    its children anyway, so most dirty descendants are absorbed into the
//!    parent's pass.

mod node;
mod scheduler;

pub use node::{BoundaryState, Cell, CellKind, Generation, Instance, InstanceId, Phase};
pub use scheduler::{PendingEffect, RenderQueue, Teardown};
