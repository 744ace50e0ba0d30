//! Cascades - Recursive lifecycle and update traversals.
//!
//! Every cascade follows the same shape: set the node's status, run the
//! `will` hooks, do the node's own work, recurse into a snapshot of the
//! children, then run the `did` hooks. While a cascade runs on a node its
//! `TRAVERSING` flag is set, so a [`Node::remove`] issued from a hook is
//! deferred until the parent's iteration reaches that child again.
//!
//! # Update Phases
//!
//! Analyze and refresh are driven by the [`Scheduler`](crate::Scheduler) and
//! share one implementation parameterized by phase:
//!
//! ```text
//! analyze:  mutate → aggregate → correlate
//! refresh:  validate → reconcile
//! ```
//!
//! A stage runs on a node when the node itself needs it or when its parent
//! forwarded it. Stages a parent runs are forwarded to every child.

use crate::engine::fields::SCHEDULER_SERVICE;
use crate::engine::{Node, NodeBehavior};
use crate::error::TreeError;
use crate::pipeline::Scheduler;
use crate::state::Service;
use crate::types::{FlagSet, UpdateContext};

// =============================================================================
// Flag Guard
// =============================================================================

/// Clears transient flags when a cascade exits, including by unwinding.
///
/// Only flags the guard actually added are cleared, so nested cascades
/// don't strip a flag an outer cascade still relies on.
struct FlagGuard<'a> {
    node: &'a Node,
    added: FlagSet,
}

impl<'a> FlagGuard<'a> {
    fn set(node: &'a Node, flags: FlagSet) -> Self {
        let added = flags - node.flags();
        node.insert_flags(added);
        Self { node, added }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.node.remove_flags(self.added);
    }
}

/// Re-marks a node whose phase exited early while work remains below it.
///
/// Keeps the chain from a dirty descendant to its root dirty, so the
/// scheduler can still see work a failed pass never reached.
struct PendingGuard<'a> {
    node: &'a Node,
    phase: Phase,
    complete: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.complete {
            return;
        }
        let mask = self.phase.mask();
        let pending = self.node.flags().intersects(mask)
            || self
                .node
                .children()
                .iter()
                .any(|child| child.flags().intersects(mask));
        if pending {
            tracing::debug!(node = %self.node, phase = self.phase.name(), "phase interrupted with work pending");
            self.node.insert_flags(self.phase.generic());
        }
    }
}

// =============================================================================
// Phases and Stages
// =============================================================================

/// Sub-stage of an update phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Mutate,
    Aggregate,
    Correlate,
    Validate,
    Reconcile,
}

impl Stage {
    /// Analyze sub-stages in execution order.
    pub const ANALYZE: [Stage; 3] = [Stage::Mutate, Stage::Aggregate, Stage::Correlate];

    /// Refresh sub-stages in execution order.
    pub const REFRESH: [Stage; 2] = [Stage::Validate, Stage::Reconcile];

    /// The flag that requests this stage.
    pub const fn flag(self) -> FlagSet {
        match self {
            Stage::Mutate => FlagSet::NEEDS_MUTATE,
            Stage::Aggregate => FlagSet::NEEDS_AGGREGATE,
            Stage::Correlate => FlagSet::NEEDS_CORRELATE,
            Stage::Validate => FlagSet::NEEDS_VALIDATE,
            Stage::Reconcile => FlagSet::NEEDS_RECONCILE,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Stage::Mutate => "mutate",
            Stage::Aggregate => "aggregate",
            Stage::Correlate => "correlate",
            Stage::Validate => "validate",
            Stage::Reconcile => "reconcile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Analyze,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Will,
    On,
    Did,
}

impl Phase {
    fn generic(self) -> FlagSet {
        match self {
            Phase::Analyze => FlagSet::NEEDS_ANALYZE,
            Phase::Refresh => FlagSet::NEEDS_REFRESH,
        }
    }

    fn mask(self) -> FlagSet {
        match self {
            Phase::Analyze => FlagSet::ANALYZE_MASK,
            Phase::Refresh => FlagSet::REFRESH_MASK,
        }
    }

    fn active(self) -> FlagSet {
        match self {
            Phase::Analyze => FlagSet::ANALYZING,
            Phase::Refresh => FlagSet::REFRESHING,
        }
    }

    fn stages(self) -> &'static [Stage] {
        match self {
            Phase::Analyze => &Stage::ANALYZE,
            Phase::Refresh => &Stage::REFRESH,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Phase::Analyze => "analyze",
            Phase::Refresh => "refresh",
        }
    }
}

impl Node {
    // =========================================================================
    // Mount / Unmount
    // =========================================================================

    /// Mount this node and its subtree.
    ///
    /// Mounting binds the node's scopes and services to their ancestors,
    /// registers a root with its scheduler, and starts consumption if the
    /// node has consumers.
    pub fn cascade_mount(&self) -> Result<(), TreeError> {
        if self.is_mounted() {
            return Err(TreeError::AlreadyMounted);
        }
        self.insert_flags(FlagSet::MOUNTED);
        let _guard = FlagGuard::set(self, FlagSet::TRAVERSING);
        tracing::trace!(node = %self, "mounting");

        let behavior = self.behavior().clone();
        behavior.will_mount(self);
        self.notify_observers(|o| o.node_will_mount(self));

        self.on_mount(behavior.as_ref());
        self.mount_children()?;

        behavior.did_mount(self);
        self.notify_observers(|o| o.node_did_mount(self));
        Ok(())
    }

    fn on_mount(&self, behavior: &dyn NodeBehavior) {
        for attachment in self.attachments() {
            attachment.mount(self);
        }
        if self.is_root() {
            if let Some(scheduler) = self.scheduler() {
                scheduler.insert_root(self);
            }
        }
        if self.consumer_count() > 0 {
            self.start_consuming();
        }

        behavior.on_mount(self);
        self.require_update(behavior.mount_flags());

        // Flags requested while detached never reached the new ancestors.
        if let Some(parent) = self.parent() {
            let pending = self.flags() & FlagSet::UPDATE_MASK;
            if !pending.is_empty() {
                parent.request_update(self, pending, false);
            }
        }
    }

    fn mount_children(&self) -> Result<(), TreeError> {
        for child in self.children() {
            if !child.is_child_of(self) || child.is_mounted() {
                continue;
            }
            child.cascade_mount()?;
            self.finish_pending_removal(&child)?;
        }
        Ok(())
    }

    /// Unmount this node and its subtree.
    ///
    /// Children unmount before the node's own `on_unmount` runs. Afterwards
    /// only `REMOVING` and embedder bits survive in the flag word.
    pub fn cascade_unmount(&self) -> Result<(), TreeError> {
        if !self.is_mounted() {
            return Err(TreeError::AlreadyUnmounted);
        }
        self.remove_flags(FlagSet::MOUNTED);
        let _guard = FlagGuard::set(self, FlagSet::TRAVERSING);
        tracing::trace!(node = %self, "unmounting");

        let behavior = self.behavior().clone();
        behavior.will_unmount(self);
        self.notify_observers(|o| o.node_will_unmount(self));

        self.unmount_children()?;
        self.on_unmount(behavior.as_ref());

        behavior.did_unmount(self);
        self.notify_observers(|o| o.node_did_unmount(self));
        Ok(())
    }

    fn on_unmount(&self, behavior: &dyn NodeBehavior) {
        behavior.on_unmount(self);
        self.stop_consuming();

        if self.is_root() {
            let service = self
                .attachment(SCHEDULER_SERVICE)
                .and_then(Service::<Scheduler>::from_attachment);
            if let Some(service) = service {
                service.manager().remove_root(self);
            }
        }
        for attachment in self.attachments() {
            attachment.unmount(self);
        }

        self.set_flags(self.flags() & (FlagSet::PERSISTENT | FlagSet::TRAVERSING));
    }

    fn unmount_children(&self) -> Result<(), TreeError> {
        for child in self.children() {
            if !child.is_child_of(self) || !child.is_mounted() {
                continue;
            }
            child.cascade_unmount()?;
            self.finish_pending_removal(&child)?;
        }
        Ok(())
    }

    // =========================================================================
    // Power / Unpower
    // =========================================================================

    /// Power this node and its subtree.
    pub fn cascade_power(&self) -> Result<(), TreeError> {
        if self.is_powered() {
            return Err(TreeError::AlreadyPowered);
        }
        self.insert_flags(FlagSet::POWERED);
        let _guard = FlagGuard::set(self, FlagSet::TRAVERSING);

        let behavior = self.behavior().clone();
        behavior.will_power(self);
        self.notify_observers(|o| o.node_will_power(self));

        for attachment in self.attachments() {
            attachment.power(self);
        }
        behavior.on_power(self);
        self.require_update(behavior.power_flags());

        for child in self.children() {
            if !child.is_child_of(self) || child.is_powered() {
                continue;
            }
            child.cascade_power()?;
            self.finish_pending_removal(&child)?;
        }

        behavior.did_power(self);
        self.notify_observers(|o| o.node_did_power(self));
        Ok(())
    }

    /// Unpower this node and its subtree. Children unpower first.
    pub fn cascade_unpower(&self) -> Result<(), TreeError> {
        if !self.is_powered() {
            return Err(TreeError::AlreadyUnpowered);
        }
        self.remove_flags(FlagSet::POWERED);
        let _guard = FlagGuard::set(self, FlagSet::TRAVERSING);

        let behavior = self.behavior().clone();
        behavior.will_unpower(self);
        self.notify_observers(|o| o.node_will_unpower(self));

        for child in self.children() {
            if !child.is_child_of(self) || !child.is_powered() {
                continue;
            }
            child.cascade_unpower()?;
            self.finish_pending_removal(&child)?;
        }

        behavior.on_unpower(self);
        for attachment in self.attachments() {
            attachment.unpower(self);
        }

        behavior.did_unpower(self);
        self.notify_observers(|o| o.node_did_unpower(self));
        Ok(())
    }

    // =========================================================================
    // Analyze / Refresh
    // =========================================================================

    /// Run the analyze phase over this subtree.
    ///
    /// `flags` are the stage flags forwarded by the parent (or the
    /// scheduler). The node's own pending analyze flags are merged in.
    pub fn cascade_analyze(&self, flags: FlagSet, context: &UpdateContext) -> Result<(), TreeError> {
        self.cascade_phase(Phase::Analyze, flags, context)
    }

    /// Run the refresh phase over this subtree.
    pub fn cascade_refresh(&self, flags: FlagSet, context: &UpdateContext) -> Result<(), TreeError> {
        self.cascade_phase(Phase::Refresh, flags, context)
    }

    fn cascade_phase(&self, phase: Phase, flags: FlagSet, context: &UpdateContext) -> Result<(), TreeError> {
        let behavior = self.behavior().clone();
        let context = behavior.extend_context(self, context.clone());
        let flags = (flags - phase.generic()) | (self.flags() & FlagSet::UPDATE_MASK);
        let flags = match phase {
            Phase::Analyze => behavior.needs_analyze(self, flags, &context),
            Phase::Refresh => behavior.needs_refresh(self, flags, &context),
        };
        if flags.intersects(phase.mask()) {
            self.run_phase(phase, behavior.as_ref(), flags, &context)
        } else {
            Ok(())
        }
    }

    fn run_phase(
        &self,
        phase: Phase,
        behavior: &dyn NodeBehavior,
        flags: FlagSet,
        context: &UpdateContext,
    ) -> Result<(), TreeError> {
        if self.flags().contains(phase.active()) {
            return Err(TreeError::Reentrant(phase.name()));
        }
        let _guard = FlagGuard::set(self, FlagSet::TRAVERSING | phase.active());
        self.remove_flags(phase.generic());
        let mut pending = PendingGuard {
            node: self,
            phase,
            complete: false,
        };
        tracing::trace!(node = %self, phase = phase.name(), ?flags, "cascading");

        self.phase_hook(behavior, phase, Hook::Will, flags, context);

        // Hooks may have requested further stages on this node.
        let own = self.flags();
        let mut flags = flags;
        let mut stages = Vec::with_capacity(phase.stages().len());
        for &stage in phase.stages() {
            if (own | flags).contains(stage.flag()) {
                flags |= stage.flag();
                self.remove_flags(stage.flag());
                stages.push(stage);
                self.stage_hook(behavior, stage, Hook::Will, context);
            }
        }

        self.phase_hook(behavior, phase, Hook::On, flags, context);
        for &stage in &stages {
            self.stage_hook(behavior, stage, Hook::On, context);
        }

        for child in self.children() {
            if !child.is_child_of(self) {
                continue;
            }
            child.cascade_phase(phase, flags, context)?;
            self.finish_pending_removal(&child)?;
        }

        for &stage in stages.iter().rev() {
            self.stage_hook(behavior, stage, Hook::Did, context);
        }
        self.phase_hook(behavior, phase, Hook::Did, flags, context);
        pending.complete = true;
        Ok(())
    }

    fn phase_hook(
        &self,
        behavior: &dyn NodeBehavior,
        phase: Phase,
        hook: Hook,
        flags: FlagSet,
        context: &UpdateContext,
    ) {
        match (phase, hook) {
            (Phase::Analyze, Hook::Will) => {
                behavior.will_analyze(self, flags, context);
                self.notify_observers(|o| o.node_will_analyze(self, flags, context));
            }
            (Phase::Analyze, Hook::On) => behavior.on_analyze(self, flags, context),
            (Phase::Analyze, Hook::Did) => {
                behavior.did_analyze(self, flags, context);
                self.notify_observers(|o| o.node_did_analyze(self, flags, context));
            }
            (Phase::Refresh, Hook::Will) => {
                behavior.will_refresh(self, flags, context);
                self.notify_observers(|o| o.node_will_refresh(self, flags, context));
            }
            (Phase::Refresh, Hook::On) => behavior.on_refresh(self, flags, context),
            (Phase::Refresh, Hook::Did) => {
                behavior.did_refresh(self, flags, context);
                self.notify_observers(|o| o.node_did_refresh(self, flags, context));
            }
        }
    }

    fn stage_hook(&self, behavior: &dyn NodeBehavior, stage: Stage, hook: Hook, context: &UpdateContext) {
        match (stage, hook) {
            (Stage::Mutate, Hook::Will) => {
                behavior.will_mutate(self, context);
                self.notify_observers(|o| o.node_will_mutate(self, context));
            }
            (Stage::Mutate, Hook::On) => behavior.on_mutate(self, context),
            (Stage::Mutate, Hook::Did) => {
                for attachment in self.attachments() {
                    attachment.did_mutate(self);
                }
                behavior.did_mutate(self, context);
                self.notify_observers(|o| o.node_did_mutate(self, context));
            }
            (Stage::Aggregate, Hook::Will) => {
                behavior.will_aggregate(self, context);
                self.notify_observers(|o| o.node_will_aggregate(self, context));
            }
            (Stage::Aggregate, Hook::On) => behavior.on_aggregate(self, context),
            (Stage::Aggregate, Hook::Did) => {
                behavior.did_aggregate(self, context);
                self.notify_observers(|o| o.node_did_aggregate(self, context));
            }
            (Stage::Correlate, Hook::Will) => {
                behavior.will_correlate(self, context);
                self.notify_observers(|o| o.node_will_correlate(self, context));
            }
            (Stage::Correlate, Hook::On) => behavior.on_correlate(self, context),
            (Stage::Correlate, Hook::Did) => {
                behavior.did_correlate(self, context);
                self.notify_observers(|o| o.node_did_correlate(self, context));
            }
            (Stage::Validate, Hook::Will) => {
                behavior.will_validate(self, context);
                self.notify_observers(|o| o.node_will_validate(self, context));
            }
            (Stage::Validate, Hook::On) => behavior.on_validate(self, context),
            (Stage::Validate, Hook::Did) => {
                behavior.did_validate(self, context);
                self.notify_observers(|o| o.node_did_validate(self, context));
            }
            (Stage::Reconcile, Hook::Will) => {
                behavior.will_reconcile(self, context);
                self.notify_observers(|o| o.node_will_reconcile(self, context));
            }
            (Stage::Reconcile, Hook::On) => behavior.on_reconcile(self, context),
            (Stage::Reconcile, Hook::Did) => {
                behavior.did_reconcile(self, context);
                self.notify_observers(|o| o.node_did_reconcile(self, context));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
