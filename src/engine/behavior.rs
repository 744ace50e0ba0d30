//! Node Behavior and Observer traits.
//!
//! A [`NodeBehavior`] is the per-node customization point: it declares the
//! node's fields and update flags, and receives every lifecycle and phase
//! hook. All methods have no-op defaults, so a behavior only overrides what
//! it needs.
//!
//! A [`NodeObserver`] is an external listener. It sees the will/did half of
//! the same hooks, after the behavior's own hook has run.
//!
//! # Hook Order
//!
//! ```text
//! will_analyze
//!   will_mutate → will_aggregate → will_correlate
//!   on_analyze
//!   on_mutate → on_aggregate → on_correlate
//!   (children)
//!   did_correlate → did_aggregate → did_mutate
//! did_analyze
//! ```
//!
//! Only the sub-stages actually requested for the node run. Refresh follows
//! the same shape with validate → reconcile.

use crate::engine::{FieldTable, Node};
use crate::types::{FlagSet, UpdateContext};

/// Per-node customization hooks.
///
/// Hooks receive the node they belong to. Panicking from a hook aborts the
/// enclosing cascade; the node's transient flags are still cleared on the
/// way out.
#[allow(unused_variables)]
pub trait NodeBehavior: 'static {
    // =========================================================================
    // Declarations
    // =========================================================================

    /// Scopes and services this behavior declares.
    fn fields(&self) -> &FieldTable {
        FieldTable::empty()
    }

    /// Update flags requested when the node mounts.
    fn mount_flags(&self) -> FlagSet {
        FlagSet::empty()
    }

    /// Update flags requested when the node powers.
    fn power_flags(&self) -> FlagSet {
        FlagSet::empty()
    }

    /// Update flags requested on this node when a child is inserted.
    fn insert_child_flags(&self) -> FlagSet {
        FlagSet::empty()
    }

    /// Update flags requested on this node when a child is removed.
    fn remove_child_flags(&self) -> FlagSet {
        FlagSet::empty()
    }

    fn start_consuming_flags(&self) -> FlagSet {
        FlagSet::empty()
    }

    fn stop_consuming_flags(&self) -> FlagSet {
        FlagSet::empty()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn will_mount(&self, node: &Node) {}
    fn on_mount(&self, node: &Node) {}
    fn did_mount(&self, node: &Node) {}

    fn will_unmount(&self, node: &Node) {}
    fn on_unmount(&self, node: &Node) {}
    fn did_unmount(&self, node: &Node) {}

    fn will_power(&self, node: &Node) {}
    fn on_power(&self, node: &Node) {}
    fn did_power(&self, node: &Node) {}

    fn will_unpower(&self, node: &Node) {}
    fn on_unpower(&self, node: &Node) {}
    fn did_unpower(&self, node: &Node) {}

    fn will_attach_parent(&self, node: &Node, parent: &Node) {}
    fn did_attach_parent(&self, node: &Node, parent: &Node) {}
    fn will_detach_parent(&self, node: &Node, parent: &Node) {}
    fn did_detach_parent(&self, node: &Node, parent: &Node) {}

    fn will_insert_child(&self, node: &Node, child: &Node, target: Option<&Node>) {}
    fn on_insert_child(&self, node: &Node, child: &Node, target: Option<&Node>) {}
    fn did_insert_child(&self, node: &Node, child: &Node, target: Option<&Node>) {}

    fn will_remove_child(&self, node: &Node, child: &Node) {}
    fn on_remove_child(&self, node: &Node, child: &Node) {}
    fn did_remove_child(&self, node: &Node, child: &Node) {}

    fn will_start_consuming(&self, node: &Node) {}
    fn did_start_consuming(&self, node: &Node) {}
    fn will_stop_consuming(&self, node: &Node) {}
    fn did_stop_consuming(&self, node: &Node) {}

    // =========================================================================
    // Update Requests
    // =========================================================================

    /// Extra flags to set on `node` when `target` (itself or a descendant)
    /// requests `flags`.
    ///
    /// The default promotes any sub-stage flag into its generic family flag,
    /// which is what lets ancestors forward a pass to their children.
    fn modify_update(&self, node: &Node, target: &Node, flags: FlagSet) -> FlagSet {
        flags.generic_update_flags()
    }

    /// Widen the context before the node's analyze/refresh cascade runs.
    fn extend_context(&self, node: &Node, context: UpdateContext) -> UpdateContext {
        context
    }

    // =========================================================================
    // Analyze Phase
    // =========================================================================

    /// Adjust the flags an analyze cascade will run with.
    fn needs_analyze(&self, node: &Node, flags: FlagSet, context: &UpdateContext) -> FlagSet {
        flags
    }

    fn will_analyze(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn on_analyze(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn did_analyze(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}

    fn will_mutate(&self, node: &Node, context: &UpdateContext) {}
    fn on_mutate(&self, node: &Node, context: &UpdateContext) {}
    fn did_mutate(&self, node: &Node, context: &UpdateContext) {}

    fn will_aggregate(&self, node: &Node, context: &UpdateContext) {}
    fn on_aggregate(&self, node: &Node, context: &UpdateContext) {}
    fn did_aggregate(&self, node: &Node, context: &UpdateContext) {}

    fn will_correlate(&self, node: &Node, context: &UpdateContext) {}
    fn on_correlate(&self, node: &Node, context: &UpdateContext) {}
    fn did_correlate(&self, node: &Node, context: &UpdateContext) {}

    // =========================================================================
    // Refresh Phase
    // =========================================================================

    /// Adjust the flags a refresh cascade will run with.
    fn needs_refresh(&self, node: &Node, flags: FlagSet, context: &UpdateContext) -> FlagSet {
        flags
    }

    fn will_refresh(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn on_refresh(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn did_refresh(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}

    fn will_validate(&self, node: &Node, context: &UpdateContext) {}
    fn on_validate(&self, node: &Node, context: &UpdateContext) {}
    fn did_validate(&self, node: &Node, context: &UpdateContext) {}

    fn will_reconcile(&self, node: &Node, context: &UpdateContext) {}
    fn on_reconcile(&self, node: &Node, context: &UpdateContext) {}
    fn did_reconcile(&self, node: &Node, context: &UpdateContext) {}
}

/// Behavior of a plain node.
impl NodeBehavior for () {}

/// External listener for node lifecycle and phase notifications.
#[allow(unused_variables)]
pub trait NodeObserver {
    fn node_will_mount(&self, node: &Node) {}
    fn node_did_mount(&self, node: &Node) {}
    fn node_will_unmount(&self, node: &Node) {}
    fn node_did_unmount(&self, node: &Node) {}

    fn node_will_power(&self, node: &Node) {}
    fn node_did_power(&self, node: &Node) {}
    fn node_will_unpower(&self, node: &Node) {}
    fn node_did_unpower(&self, node: &Node) {}

    fn node_will_attach_parent(&self, node: &Node, parent: &Node) {}
    fn node_did_attach_parent(&self, node: &Node, parent: &Node) {}
    fn node_will_detach_parent(&self, node: &Node, parent: &Node) {}
    fn node_did_detach_parent(&self, node: &Node, parent: &Node) {}

    fn node_will_insert_child(&self, node: &Node, child: &Node, target: Option<&Node>) {}
    fn node_did_insert_child(&self, node: &Node, child: &Node, target: Option<&Node>) {}
    fn node_will_remove_child(&self, node: &Node, child: &Node) {}
    fn node_did_remove_child(&self, node: &Node, child: &Node) {}

    fn node_will_start_consuming(&self, node: &Node) {}
    fn node_did_start_consuming(&self, node: &Node) {}
    fn node_will_stop_consuming(&self, node: &Node) {}
    fn node_did_stop_consuming(&self, node: &Node) {}

    fn node_will_analyze(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn node_did_analyze(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn node_will_mutate(&self, node: &Node, context: &UpdateContext) {}
    fn node_did_mutate(&self, node: &Node, context: &UpdateContext) {}
    fn node_will_aggregate(&self, node: &Node, context: &UpdateContext) {}
    fn node_did_aggregate(&self, node: &Node, context: &UpdateContext) {}
    fn node_will_correlate(&self, node: &Node, context: &UpdateContext) {}
    fn node_did_correlate(&self, node: &Node, context: &UpdateContext) {}

    fn node_will_refresh(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn node_did_refresh(&self, node: &Node, flags: FlagSet, context: &UpdateContext) {}
    fn node_will_validate(&self, node: &Node, context: &UpdateContext) {}
    fn node_did_validate(&self, node: &Node, context: &UpdateContext) {}
    fn node_will_reconcile(&self, node: &Node, context: &UpdateContext) {}
    fn node_did_reconcile(&self, node: &Node, context: &UpdateContext) {}
}
