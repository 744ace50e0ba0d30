//! # spark-model
//!
//! Reactive model tree for Rust.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals) for
//! fine-grained reactivity of scoped values.
//!
//! ## Architecture
//!
//! A tree of [`Node`]s, each carrying a flag word, ordered and keyed
//! children, and lazily materialized cells. Cells come in two kinds:
//! [`Scope`]s hold reactive values that inherit down the tree, and
//! [`Service`]s hold shared managers resolved the same way.
//!
//! Mutations raise update flags that bubble to the root, where a
//! [`Scheduler`] batches them into two phases:
//! ```text
//! analyze (mutate → aggregate → correlate) → refresh (validate → reconcile)
//! ```
//! The delay between passes adapts to how long analyze passes take.
//!
//! ## Modules
//!
//! - [`types`] - Core types (FlagSet, Inherits, UpdateContext)
//! - [`engine`] - Nodes, behaviors, field tables, cascades
//! - [`state`] - Scopes, services, attachments
//! - [`pipeline`] - Scheduler, clocks, scheduler configuration
//! - [`error`] - Error types

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use engine::{
    FieldDescriptor, FieldKind, FieldTable, Node, NodeBehavior, NodeObserver, Stage, WeakNode,
    SCHEDULER_SERVICE,
};

pub use error::{ConfigError, TreeError};

pub use pipeline::{Clock, ManualClock, Scheduler, SchedulerConfig, SchedulerObserver, SystemClock};

pub use state::{Attachment, CellFlags, Scope, Service};
