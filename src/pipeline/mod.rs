//! Update Pipeline
//!
//! This module drives the model tree's update phases from the host's event
//! loop.
//!
//! # Pipeline Architecture
//!
//! ```text
//! Node::require_update → ancestors → Scheduler::request_update → deadline
//!                                                                  │
//! host: Scheduler::tick() ── analyze pass ── refresh pass ◄────────┘
//! ```
//!
//! ## Key Design Principles
//!
//! - **Host-driven time**: the scheduler records deadlines, the host polls
//! - **Adaptive cadence**: measured analyze cost feeds the next delay
//! - **One pass at a time**: passes never nest on the same scheduler

mod clock;
mod config;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use scheduler::{Scheduler, SchedulerObserver};
