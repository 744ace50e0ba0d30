//! State Module - Inherited per-node cells
//!
//! Nodes carry named cells that can inherit from a same-kind cell on an
//! ancestor:
//!
//! - **Scope** - A reactive value, mirrored down to every non-overridden sub-scope
//! - **Service** - A shared manager (e.g. the scheduler) resolved the same way
//! - **Attachment** - The lifecycle trait both implement
//!
//! # Binding
//!
//! ```text
//! A.theme = "dark"          (root of the chain)
//! └── B.theme  inherits ─► A.theme   adopts "dark"
//!     └── C.theme  inherits ─► B.theme   adopts "dark"
//! ```
//!
//! Binding happens when the owner mounts and is undone when it unmounts.
//! Setting a value explicitly marks the cell overridden; an overridden cell
//! keeps its own value and becomes the source for its own subtree.

mod attachment;
mod scope;
mod service;

pub use attachment::*;
pub use scope::*;
pub use service::*;

use std::rc::Rc;

use crate::engine::Node;

bitflags::bitflags! {
    /// Status bits of a scope or service.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CellFlags: u8 {
        /// The value was set locally and no longer follows the super cell.
        const OVERRIDDEN = 1 << 0;
        /// The value changed during the current pass.
        const MUTATING = 1 << 1;
        /// The owner is mounted and the cell has tried to bind.
        const MOUNTED = 1 << 2;
    }
}

/// Find the nearest strict ancestor of `owner` providing `name`.
///
/// Ancestors that declare the field materialize it on the way.
pub(crate) fn find_super(owner: &Node, name: &str) -> Option<(Node, Rc<dyn Attachment>)> {
    let mut current = owner.parent();
    while let Some(ancestor) = current {
        if let Some(attachment) = ancestor.materialize(name) {
            return Some((ancestor, attachment));
        }
        current = ancestor.parent();
    }
    None
}
