//! Error types.
//!
//! [`TreeError`] covers programmer-misuse faults: calls that violate a tree
//! invariant and are reported at the call site instead of being retried.
//! [`ConfigError`] covers scheduler configuration parsing and validation.

use thiserror::Error;

/// Invariant violations raised by tree and cascade operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// `cascade_mount` called on a node that is already mounted.
    #[error("node is already mounted")]
    AlreadyMounted,

    /// `cascade_unmount` called on a node that is not mounted.
    #[error("node is already unmounted")]
    AlreadyUnmounted,

    /// `cascade_power` called on a node that is already powered.
    #[error("node is already powered")]
    AlreadyPowered,

    /// `cascade_unpower` called on a node that is not powered.
    #[error("node is already unpowered")]
    AlreadyUnpowered,

    /// The node passed as a child or insertion target is not a child of
    /// the node being mutated.
    #[error("{0} is not a child of this node")]
    NotAChild(String),

    /// Inserting the node would make it its own ancestor.
    #[error("cannot insert a node into its own subtree")]
    CyclicInsert,

    /// A cascade was started on a node already running the same phase.
    #[error("{0} cascade re-entered while already in progress")]
    Reentrant(&'static str),
}

/// Errors produced while loading a [`SchedulerConfig`](crate::SchedulerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("invalid scheduler config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A lower bound exceeds its upper bound.
    #[error("{name}: minimum ({min_ms} ms) exceeds maximum ({max_ms} ms)")]
    InvertedBounds {
        /// Name of the offending bound pair.
        name: &'static str,
        /// Configured minimum.
        min_ms: u128,
        /// Configured maximum.
        max_ms: u128,
    },

    /// `max_flush_passes` must allow at least one pass.
    #[error("max_flush_passes must be at least 1")]
    NoFlushPasses,
}
