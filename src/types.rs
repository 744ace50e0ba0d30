//! Core types for spark-model.
//!
//! These types define the vocabulary shared by nodes, scopes and the
//! scheduler: the flag word every node carries, the inheritance selector
//! used by scopes and services, and the context handed to update passes.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

// =============================================================================
// Flags (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Lifecycle status and pending-work markers carried by every node.
    ///
    /// The low byte holds status bits. The next two nibbles hold the
    /// analyze family (generic + mutate/aggregate/correlate) and the refresh
    /// family (generic + validate/reconcile). Bits 24-31 are free for
    /// embedders and are never touched by the core.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlagSet: u32 {
        const MOUNTED = 1 << 0;
        const POWERED = 1 << 1;
        const CONSUMING = 1 << 2;
        const TRAVERSING = 1 << 3;
        const ANALYZING = 1 << 4;
        const REFRESHING = 1 << 5;
        const REMOVING = 1 << 6;
        const IMMEDIATE = 1 << 7;

        const UPDATING = Self::ANALYZING.bits() | Self::REFRESHING.bits();
        const STATUS_MASK = 0xff;

        const NEEDS_ANALYZE = 1 << 8;
        const NEEDS_MUTATE = 1 << 9;
        const NEEDS_AGGREGATE = 1 << 10;
        const NEEDS_CORRELATE = 1 << 11;
        const ANALYZE_MASK = Self::NEEDS_ANALYZE.bits()
            | Self::NEEDS_MUTATE.bits()
            | Self::NEEDS_AGGREGATE.bits()
            | Self::NEEDS_CORRELATE.bits();

        const NEEDS_REFRESH = 1 << 12;
        const NEEDS_VALIDATE = 1 << 13;
        const NEEDS_RECONCILE = 1 << 14;
        const REFRESH_MASK = Self::NEEDS_REFRESH.bits()
            | Self::NEEDS_VALIDATE.bits()
            | Self::NEEDS_RECONCILE.bits();

        const UPDATE_MASK = Self::ANALYZE_MASK.bits() | Self::REFRESH_MASK.bits();

        /// Every bit owned by the core.
        const CORE_MASK = (1 << 24) - 1;

        const _ = !0;
    }
}

impl FlagSet {
    /// Flags that survive a full unmount.
    pub const PERSISTENT: Self = Self::REMOVING.union(Self::CORE_MASK.complement());

    /// Promote any analyze/refresh sub-flag into its generic family flag.
    ///
    /// `NEEDS_MUTATE` yields `NEEDS_ANALYZE`, `NEEDS_VALIDATE` yields
    /// `NEEDS_REFRESH`, and so on. Non-update bits are dropped.
    pub const fn generic_update_flags(self) -> Self {
        let mut flags = Self::empty();
        if self.intersects(Self::ANALYZE_MASK) {
            flags = flags.union(Self::NEEDS_ANALYZE);
        }
        if self.intersects(Self::REFRESH_MASK) {
            flags = flags.union(Self::NEEDS_REFRESH);
        }
        flags
    }
}

// =============================================================================
// Inheritance Selector
// =============================================================================

/// Which ancestor cell a scope or service inherits from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Inherits {
    /// No inheritance; the cell is always the root of its own chain.
    #[default]
    None,
    /// Inherit the same-named cell from the nearest ancestor exposing one.
    Same,
    /// Inherit a differently named cell.
    Named(String),
}

impl Inherits {
    /// Resolve the name to look up on ancestors, given the cell's own name.
    pub fn super_name<'a>(&'a self, own_name: &'a str) -> Option<&'a str> {
        match self {
            Self::None => None,
            Self::Same => Some(own_name),
            Self::Named(name) => Some(name),
        }
    }
}

impl From<bool> for Inherits {
    fn from(inherits: bool) -> Self {
        if inherits { Self::Same } else { Self::None }
    }
}

impl From<&str> for Inherits {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for Inherits {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

// =============================================================================
// Update Context
// =============================================================================

/// Context handed to every analyze/refresh cascade.
///
/// The core only guarantees `timestamp`. Behaviors widen the context by
/// inserting typed extensions in `NodeBehavior::extend_context`; the
/// extensions are shared with every descendant visited by the same pass.
#[derive(Clone, Default)]
pub struct UpdateContext {
    /// Clock reading taken when the pass started for this root.
    pub timestamp: Duration,
    extensions: HashMap<TypeId, Rc<dyn Any>>,
}

impl UpdateContext {
    /// Create a context stamped with the given clock reading.
    pub fn new(timestamp: Duration) -> Self {
        Self {
            timestamp,
            extensions: HashMap::new(),
        }
    }

    /// Return a copy of this context carrying `value`.
    ///
    /// An existing extension of the same type is replaced.
    pub fn with<T: Any>(mut self, value: T) -> Self {
        self.extensions.insert(TypeId::of::<T>(), Rc::new(value));
        self
    }

    /// Look up an extension by type.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Check whether an extension of the given type is present.
    pub fn contains<T: Any>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for UpdateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateContext")
            .field("timestamp", &self.timestamp)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
