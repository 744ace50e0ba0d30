//! Scheduler - Adaptive two-phase update loop for root nodes.
//!
//! The scheduler owns a set of mounted roots and the aggregated update
//! flags they have raised. It never blocks: it records deadlines and the
//! host drives it by calling [`Scheduler::tick`] when
//! [`Scheduler::next_deadline`] has passed.
//!
//! # Control Loop
//!
//! ```text
//! request_update ──► analyze deadline (now + delay)
//!                        │
//!                  analyze pass ── elapsed > delay ? delay × 2 : delay ÷ 2
//!                        │
//!          refresh pending? ──► refresh deadline (now + min_refresh_interval)
//!                        │
//!                  refresh pass ──► analyze pending? ──► analyze deadline
//! ```
//!
//! The delay is clamped to the configured update bounds. Immediate requests
//! skip the timer and run inline when no pass is in flight and the current
//! delay is within `max_analyze_interval`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::engine::Node;
use crate::error::TreeError;
use crate::pipeline::{Clock, SchedulerConfig, SystemClock};
use crate::types::{FlagSet, UpdateContext};

/// Smallest delay a doubling can produce, so the delay can leave zero.
const GROWTH_FLOOR: Duration = Duration::from_millis(2);

/// Listener for scheduler-level events.
#[allow(unused_variables)]
pub trait SchedulerObserver {
    fn scheduler_did_attach_root(&self, scheduler: &Scheduler, root: &Node) {}
    fn scheduler_did_detach_root(&self, scheduler: &Scheduler, root: &Node) {}
    fn scheduler_did_power(&self, scheduler: &Scheduler) {}
    fn scheduler_did_unpower(&self, scheduler: &Scheduler) {}
    fn scheduler_will_analyze(&self, scheduler: &Scheduler) {}
    fn scheduler_did_analyze(&self, scheduler: &Scheduler, elapsed: Duration) {}
    fn scheduler_will_refresh(&self, scheduler: &Scheduler) {}
    fn scheduler_did_refresh(&self, scheduler: &Scheduler, elapsed: Duration) {}
}

// =============================================================================
// Scheduler
// =============================================================================

struct SchedulerInner {
    config: SchedulerConfig,
    clock: Box<dyn Clock>,
    roots: RefCell<Vec<Node>>,
    flags: Cell<FlagSet>,
    powered: Cell<bool>,
    update_delay: Cell<Duration>,
    analyze_deadline: Cell<Option<Duration>>,
    refresh_deadline: Cell<Option<Duration>>,
    observers: RefCell<Vec<Rc<dyn SchedulerObserver>>>,
}

/// Handle to a scheduler. Clones share the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

thread_local! {
    static SHARED: Scheduler = Scheduler::new(SchedulerConfig::default(), SystemClock::new());
}

/// Clears scheduler flags set for the duration of a pass, even on unwind.
///
/// A pass guard also re-aggregates the roots' flags and re-arms a deadline
/// when its pass unwinds, since `finish_pass` never runs in that case.
struct PassGuard<'a> {
    scheduler: &'a Scheduler,
    added: FlagSet,
    recover: Option<Next>,
}

impl<'a> PassGuard<'a> {
    fn set(scheduler: &'a Scheduler, flags: FlagSet) -> Self {
        let added = flags - scheduler.flags();
        scheduler.insert_flags(added);
        Self {
            scheduler,
            added,
            recover: None,
        }
    }

    fn pass(scheduler: &'a Scheduler, flags: FlagSet, order: Next) -> Self {
        let mut guard = Self::set(scheduler, flags);
        guard.recover = Some(order);
        guard
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.remove_flags(self.added);
        if let Some(order) = self.recover {
            if std::thread::panicking() {
                tracing::error!("update pass unwound; rescheduling pending work");
                self.scheduler.sync_flags();
                self.scheduler.schedule_next(order);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    AnalyzeFirst,
    RefreshFirst,
}

impl Scheduler {
    /// Create a powered scheduler with no roots.
    pub fn new(config: SchedulerConfig, clock: impl Clock + 'static) -> Self {
        let delay = config.min_update_interval;
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                clock: Box::new(clock),
                roots: RefCell::new(Vec::new()),
                flags: Cell::new(FlagSet::empty()),
                powered: Cell::new(true),
                update_delay: Cell::new(delay),
                analyze_deadline: Cell::new(None),
                refresh_deadline: Cell::new(None),
                observers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The thread's default scheduler, used by roots without their own.
    pub fn shared() -> Self {
        SHARED.with(Scheduler::clone)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Aggregated update flags plus pass status bits.
    pub fn flags(&self) -> FlagSet {
        self.inner.flags.get()
    }

    fn insert_flags(&self, flags: FlagSet) {
        self.inner.flags.set(self.flags() | flags);
    }

    fn remove_flags(&self, flags: FlagSet) {
        self.inner.flags.set(self.flags() - flags);
    }

    /// Current adaptive delay.
    pub fn update_delay(&self) -> Duration {
        self.inner.update_delay.get()
    }

    pub fn is_powered(&self) -> bool {
        self.inner.powered.get()
    }

    pub fn is_updating(&self) -> bool {
        self.flags().intersects(FlagSet::UPDATING)
    }

    pub fn analyze_deadline(&self) -> Option<Duration> {
        self.inner.analyze_deadline.get()
    }

    pub fn refresh_deadline(&self) -> Option<Duration> {
        self.inner.refresh_deadline.get()
    }

    /// Earliest pending deadline, if any pass is scheduled.
    pub fn next_deadline(&self) -> Option<Duration> {
        match (self.analyze_deadline(), self.refresh_deadline()) {
            (Some(a), Some(r)) => Some(a.min(r)),
            (a, r) => a.or(r),
        }
    }

    // =========================================================================
    // Roots
    // =========================================================================

    /// Register a mounted root and pick up the updates it already needs.
    pub fn insert_root(&self, root: &Node) {
        {
            let mut roots = self.inner.roots.borrow_mut();
            if roots.contains(root) {
                return;
            }
            roots.push(root.clone());
        }
        tracing::debug!(root = %root, roots = self.root_count(), "root attached");
        self.notify(|o| o.scheduler_did_attach_root(self, root));

        let pending = root.flags() & FlagSet::UPDATE_MASK;
        if !pending.is_empty() {
            self.request_update(root, pending, false);
        }
    }

    pub fn remove_root(&self, root: &Node) {
        let removed = {
            let mut roots = self.inner.roots.borrow_mut();
            let before = roots.len();
            roots.retain(|existing| existing != root);
            roots.len() != before
        };
        if !removed {
            return;
        }
        tracing::debug!(root = %root, roots = self.root_count(), "root detached");
        self.notify(|o| o.scheduler_did_detach_root(self, root));
        if !self.is_updating() {
            self.sync_flags();
            if !self.flags().intersects(FlagSet::UPDATE_MASK) {
                self.cancel_timers();
            }
        }
    }

    /// Snapshot of the registered roots.
    pub fn roots(&self) -> Vec<Node> {
        self.inner.roots.borrow().clone()
    }

    pub fn root_count(&self) -> usize {
        self.inner.roots.borrow().len()
    }

    /// Rebuild the aggregated update flags from the roots' own flags.
    fn sync_flags(&self) {
        let pending = self
            .roots()
            .iter()
            .fold(FlagSet::empty(), |flags, root| flags | (root.flags() & FlagSet::UPDATE_MASK));
        let status = self.flags() - FlagSet::UPDATE_MASK;
        self.inner.flags.set(status | pending | pending.generic_update_flags());
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Record that `target`'s tree needs `flags`.
    ///
    /// With `immediate`, a pass runs before this returns when nothing is in
    /// flight and the current delay is interactive. Otherwise a deadline is
    /// set if none is pending.
    pub fn request_update(&self, target: &Node, flags: FlagSet, immediate: bool) {
        let flags = flags & FlagSet::UPDATE_MASK;
        self.insert_flags(flags | flags.generic_update_flags());
        tracing::trace!(node = %target, ?flags, immediate, "update requested");

        if immediate && self.can_run_immediately() {
            self.run_immediate();
        } else {
            self.schedule_update();
        }
    }

    fn can_run_immediately(&self) -> bool {
        self.is_powered()
            && !self.flags().intersects(FlagSet::UPDATING | FlagSet::IMMEDIATE)
            && self.update_delay() <= self.inner.config.max_analyze_interval
    }

    fn run_immediate(&self) {
        let result = {
            let _guard = PassGuard::set(self, FlagSet::IMMEDIATE);
            self.run_pending_passes()
        };
        if let Err(error) = result {
            tracing::error!(%error, "immediate update pass failed");
            self.sync_flags();
            self.schedule_update();
        }
    }

    fn run_pending_passes(&self) -> Result<(), TreeError> {
        if self.flags().intersects(FlagSet::ANALYZE_MASK) {
            self.run_analyze_pass()?;
        }
        if self.flags().intersects(FlagSet::REFRESH_MASK) {
            self.run_refresh_pass()?;
        }
        Ok(())
    }

    fn schedule_update(&self) {
        if !self.is_powered() || self.is_updating() || self.next_deadline().is_some() {
            return;
        }
        let pending = self.flags();
        let now = self.now();
        if pending.intersects(FlagSet::ANALYZE_MASK) {
            self.inner.analyze_deadline.set(Some(now + self.update_delay()));
        } else if pending.intersects(FlagSet::REFRESH_MASK) {
            let config = &self.inner.config;
            let wait = self
                .update_delay()
                .min(config.max_refresh_interval)
                .max(config.min_refresh_interval);
            self.inner.refresh_deadline.set(Some(now + wait));
        }
    }

    fn cancel_timers(&self) {
        self.inner.analyze_deadline.set(None);
        self.inner.refresh_deadline.set(None);
    }

    fn schedule_next(&self, order: Next) {
        self.cancel_timers();
        if !self.is_powered() {
            return;
        }
        let pending = self.flags();
        let now = self.now();
        let config = &self.inner.config;
        let analyze_wait = if pending.contains(FlagSet::IMMEDIATE) {
            config.min_analyze_interval
        } else {
            self.update_delay()
        };

        let analyze = pending.intersects(FlagSet::ANALYZE_MASK);
        let refresh = pending.intersects(FlagSet::REFRESH_MASK);
        match order {
            Next::RefreshFirst if refresh => {
                self.inner.refresh_deadline.set(Some(now + config.min_refresh_interval));
            }
            Next::AnalyzeFirst if analyze => {
                self.inner.analyze_deadline.set(Some(now + analyze_wait));
            }
            _ if analyze => self.inner.analyze_deadline.set(Some(now + analyze_wait)),
            _ if refresh => {
                self.inner.refresh_deadline.set(Some(now + config.min_refresh_interval));
            }
            _ => {}
        }
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// Analyze every root with pending analyze flags, then adapt the delay.
    ///
    /// Does nothing while another pass is in flight.
    pub fn run_analyze_pass(&self) -> Result<(), TreeError> {
        if self.is_updating() {
            return Ok(());
        }
        let result = {
            let _guard = PassGuard::pass(self, FlagSet::ANALYZING, Next::RefreshFirst);
            self.remove_flags(FlagSet::ANALYZE_MASK);
            self.inner.analyze_deadline.set(None);
            self.notify(|o| o.scheduler_will_analyze(self));

            let started = self.now();
            let result = self.cascade_roots(FlagSet::ANALYZE_MASK, |root, context| {
                root.cascade_analyze(FlagSet::empty(), context)
            });
            let elapsed = self.now().saturating_sub(started);
            self.adapt_delay(elapsed);
            self.notify(|o| o.scheduler_did_analyze(self, elapsed));
            result
        };
        self.finish_pass(result, Next::RefreshFirst)
    }

    /// Refresh every root with pending refresh flags.
    pub fn run_refresh_pass(&self) -> Result<(), TreeError> {
        if self.is_updating() {
            return Ok(());
        }
        let result = {
            let _guard = PassGuard::pass(self, FlagSet::REFRESHING, Next::AnalyzeFirst);
            self.remove_flags(FlagSet::REFRESH_MASK);
            self.inner.refresh_deadline.set(None);
            self.notify(|o| o.scheduler_will_refresh(self));

            let started = self.now();
            let result = self.cascade_roots(FlagSet::REFRESH_MASK, |root, context| {
                root.cascade_refresh(FlagSet::empty(), context)
            });
            let elapsed = self.now().saturating_sub(started);
            tracing::debug!(?elapsed, "refresh pass complete");
            self.notify(|o| o.scheduler_did_refresh(self, elapsed));
            result
        };
        self.finish_pass(result, Next::AnalyzeFirst)
    }

    fn cascade_roots(
        &self,
        mask: FlagSet,
        cascade: impl Fn(&Node, &UpdateContext) -> Result<(), TreeError>,
    ) -> Result<(), TreeError> {
        for root in self.roots() {
            if !root.flags().intersects(mask) {
                continue;
            }
            let context = UpdateContext::new(self.now());
            cascade(&root, &context)?;
        }
        Ok(())
    }

    fn finish_pass(&self, result: Result<(), TreeError>, order: Next) -> Result<(), TreeError> {
        if result.is_err() {
            self.sync_flags();
        }
        self.schedule_next(order);
        result
    }

    fn adapt_delay(&self, elapsed: Duration) {
        let delay = self.update_delay();
        let next = if elapsed > delay {
            delay.saturating_mul(2).max(GROWTH_FLOOR)
        } else {
            delay / 2
        };
        let next = self.inner.config.clamp_update_delay(next);
        if next != delay {
            tracing::debug!(?elapsed, ?delay, ?next, "update delay adjusted");
        }
        self.inner.update_delay.set(next);
    }

    // =========================================================================
    // Host Driving
    // =========================================================================

    /// Run the pass whose deadline has passed, if any.
    ///
    /// Returns whether a pass ran.
    pub fn tick(&self) -> Result<bool, TreeError> {
        let now = self.now();
        let due = |deadline: Option<Duration>| deadline.filter(|&d| d <= now);
        match (due(self.analyze_deadline()), due(self.refresh_deadline())) {
            (Some(a), Some(r)) if r < a => self.run_refresh_pass().map(|_| true),
            (Some(_), _) => self.run_analyze_pass().map(|_| true),
            (None, Some(_)) => self.run_refresh_pass().map(|_| true),
            (None, None) => Ok(false),
        }
    }

    /// Run passes back to back until no update flags remain.
    ///
    /// Ignores deadlines. Stops after `max_flush_passes` passes and returns
    /// how many ran.
    pub fn flush(&self) -> Result<usize, TreeError> {
        let limit = self.inner.config.max_flush_passes;
        let mut passes = 0;
        while passes < limit {
            let pending = self.flags();
            if pending.intersects(FlagSet::ANALYZE_MASK) {
                self.run_analyze_pass()?;
            } else if pending.intersects(FlagSet::REFRESH_MASK) {
                self.run_refresh_pass()?;
            } else {
                break;
            }
            passes += 1;
        }
        if self.flags().intersects(FlagSet::UPDATE_MASK) {
            tracing::warn!(passes, flags = ?self.flags(), "flush stopped with updates still pending");
        }
        Ok(passes)
    }

    // =========================================================================
    // Power
    // =========================================================================

    pub fn set_powered(&self, powered: bool) -> Result<(), TreeError> {
        if powered { self.power() } else { self.unpower() }
    }

    /// Power every mounted root and resume scheduling.
    pub fn power(&self) -> Result<(), TreeError> {
        if self.is_powered() {
            return Ok(());
        }
        self.inner.powered.set(true);
        for root in self.roots() {
            if root.is_mounted() && !root.is_powered() {
                root.cascade_power()?;
            }
        }
        tracing::debug!(roots = self.root_count(), "scheduler powered");
        self.notify(|o| o.scheduler_did_power(self));
        self.schedule_update();
        Ok(())
    }

    /// Cancel pending passes, reset the delay and unpower every root.
    pub fn unpower(&self) -> Result<(), TreeError> {
        if !self.is_powered() {
            return Ok(());
        }
        self.inner.powered.set(false);
        self.cancel_timers();
        self.inner.update_delay.set(self.inner.config.min_update_interval);
        for root in self.roots() {
            if root.is_powered() {
                root.cascade_unpower()?;
            }
        }
        tracing::debug!(roots = self.root_count(), "scheduler unpowered");
        self.notify(|o| o.scheduler_did_unpower(self));
        Ok(())
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn observe(&self, observer: Rc<dyn SchedulerObserver>) {
        let mut observers = self.inner.observers.borrow_mut();
        if !observers.iter().any(|existing| Rc::ptr_eq(existing, &observer)) {
            observers.push(observer);
        }
    }

    pub fn unobserve(&self, observer: &Rc<dyn SchedulerObserver>) {
        self.inner
            .observers
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, observer));
    }

    fn notify(&self, notify: impl Fn(&dyn SchedulerObserver)) {
        let observers = self.inner.observers.borrow().clone();
        for observer in &observers {
            notify(observer.as_ref());
        }
    }
}

impl PartialEq for Scheduler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scheduler {}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("flags", &self.flags())
            .field("powered", &self.is_powered())
            .field("update_delay", &self.update_delay())
            .field("roots", &self.root_count())
            .field("analyze_deadline", &self.analyze_deadline())
            .field("refresh_deadline", &self.refresh_deadline())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
