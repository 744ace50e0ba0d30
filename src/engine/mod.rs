//! Model Engine - Nodes, behaviors and cascades.
//!
//! The engine manages the tree itself:
//! - Node: Shared handle with flags, ordered/keyed children, attachments
//! - Behavior: Per-node hooks and declarations (`NodeBehavior`)
//! - Fields: Static tables declaring each behavior's scopes and services
//! - Cascade: Mount, power, analyze and refresh traversals
//!
//! # Architecture
//!
//! Nodes are `Rc` handles. A parent owns its children; a child holds a weak
//! link back. Every mutation that can affect rendering or derived state
//! raises flags on the node, and those flags bubble to the root, where the
//! root's [`Scheduler`](crate::Scheduler) picks them up:
//!
//! ```text
//! child.require_update(NEEDS_MUTATE)
//!   child  : NEEDS_MUTATE | NEEDS_ANALYZE
//!   parent : NEEDS_ANALYZE
//!   root   : NEEDS_ANALYZE  ──► scheduler.request_update(..)
//! ```

mod behavior;
mod cascade;
pub(crate) mod fields;
mod node;

pub use behavior::*;
pub use cascade::Stage;
pub use fields::{FieldDescriptor, FieldKind, FieldTable, SCHEDULER_SERVICE};
pub use node::*;
