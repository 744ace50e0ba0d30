//! Integration tests for the adaptive scheduler.
//!
//! Pass cost is simulated by a behavior that advances a `ManualClock`
//! while it mutates, so every delay adjustment is deterministic.

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::Duration;

use proptest::prelude::*;

use spark_model::{
    Clock, FlagSet, ManualClock, Node, NodeBehavior, Scheduler, SchedulerConfig,
    SchedulerObserver, UpdateContext,
};

/// Mutate hook that takes `cost` of simulated time.
struct Costly {
    clock: ManualClock,
    cost: Rc<Cell<Duration>>,
}

impl NodeBehavior for Costly {
    fn on_mutate(&self, _: &Node, _: &UpdateContext) {
        self.clock.advance(self.cost.get());
    }
}

struct Harness {
    scheduler: Scheduler,
    clock: ManualClock,
    cost: Rc<Cell<Duration>>,
    root: Node,
}

impl Harness {
    fn new(config: SchedulerConfig) -> Self {
        let clock = ManualClock::new();
        let cost = Rc::new(Cell::new(Duration::ZERO));
        let scheduler = Scheduler::new(config, clock.clone());
        let root = Node::with_behavior(Costly {
            clock: clock.clone(),
            cost: cost.clone(),
        });
        root.set_scheduler(&scheduler);
        root.mount().unwrap();
        Self {
            scheduler,
            clock,
            cost,
            root,
        }
    }

    /// Run one analyze pass that takes `cost` and return the new delay.
    fn pass(&self, cost: Duration) -> Duration {
        self.cost.set(cost);
        self.root.require_update(FlagSet::NEEDS_MUTATE);
        self.scheduler.run_analyze_pass().unwrap();
        self.scheduler.update_delay()
    }
}

fn config_160() -> SchedulerConfig {
    SchedulerConfig::from_toml_str("min_update_interval = 0\nmax_update_interval = 160\n").unwrap()
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[test]
fn test_delay_doubles_to_the_cap_and_halves_back() {
    let harness = Harness::new(config_160());
    let slow = ms(1000);

    let grown: Vec<_> = (0..9).map(|_| harness.pass(slow)).collect();
    assert_eq!(
        grown,
        [ms(2), ms(4), ms(8), ms(16), ms(32), ms(64), ms(128), ms(160), ms(160)]
    );

    let shrunk: Vec<_> = (0..4).map(|_| harness.pass(Duration::ZERO)).collect();
    assert_eq!(shrunk, [ms(80), ms(40), ms(20), ms(10)]);
}

#[test]
fn test_scenario_mutate_pass_with_160ms_cap() {
    let harness = Harness::new(config_160());
    for _ in 0..7 {
        harness.pass(ms(500));
    }
    assert_eq!(harness.scheduler.update_delay(), ms(128));

    harness.cost.set(ms(200));
    harness.root.require_update(FlagSet::NEEDS_MUTATE);
    assert!(harness
        .scheduler
        .flags()
        .contains(FlagSet::NEEDS_ANALYZE | FlagSet::NEEDS_MUTATE));

    harness.scheduler.run_analyze_pass().unwrap();
    assert!(!harness.root.flags().contains(FlagSet::NEEDS_MUTATE));
    assert_eq!(harness.scheduler.update_delay(), ms(160));
}

#[test]
fn test_scheduled_pass_waits_for_the_delay() {
    let harness = Harness::new(config_160());
    harness.pass(ms(50));
    harness.pass(ms(50));
    assert_eq!(harness.scheduler.update_delay(), ms(4));

    let requested_at = harness.clock.now();
    harness.root.require_update(FlagSet::NEEDS_MUTATE);
    assert_eq!(harness.scheduler.next_deadline(), Some(requested_at + ms(4)));

    harness.clock.advance(ms(3));
    assert_eq!(harness.scheduler.tick(), Ok(false));
    assert!(harness.root.flags().contains(FlagSet::NEEDS_MUTATE));

    harness.clock.advance(ms(1));
    assert_eq!(harness.scheduler.tick(), Ok(true));
    assert!(!harness.root.flags().intersects(FlagSet::UPDATE_MASK));
}

#[test]
fn test_immediate_request_runs_inline() {
    let harness = Harness::new(SchedulerConfig::default());
    harness.root.require_update_immediate(FlagSet::NEEDS_MUTATE | FlagSet::NEEDS_RECONCILE);

    assert!(!harness.root.flags().intersects(FlagSet::UPDATE_MASK));
    assert!(!harness.scheduler.flags().intersects(FlagSet::UPDATE_MASK | FlagSet::IMMEDIATE));
    assert_eq!(harness.scheduler.next_deadline(), None);
}

#[test]
fn test_immediate_request_defers_when_delay_is_not_interactive() {
    let harness = Harness::new(SchedulerConfig::default());
    for _ in 0..6 {
        harness.pass(ms(500));
    }
    assert!(harness.scheduler.update_delay() > harness.scheduler.config().max_analyze_interval);

    harness.root.require_update_immediate(FlagSet::NEEDS_MUTATE);
    assert!(harness.root.flags().contains(FlagSet::NEEDS_MUTATE));
    assert!(harness.scheduler.analyze_deadline().is_some());
}

struct RequestDuringPass {
    requested: Cell<bool>,
}

impl NodeBehavior for RequestDuringPass {
    fn on_mutate(&self, node: &Node, _: &UpdateContext) {
        if !self.requested.replace(true) {
            node.require_update_immediate(FlagSet::NEEDS_CORRELATE);
        }
    }
}

#[test]
fn test_requests_during_a_pass_are_scheduled_not_nested() {
    let clock = ManualClock::new();
    let scheduler = Scheduler::new(SchedulerConfig::default(), clock.clone());
    let root = Node::with_behavior(RequestDuringPass {
        requested: Cell::new(false),
    });
    root.set_scheduler(&scheduler);
    root.mount().unwrap();

    root.require_update(FlagSet::NEEDS_MUTATE);
    scheduler.run_analyze_pass().unwrap();

    assert!(root.flags().contains(FlagSet::NEEDS_CORRELATE));
    assert_eq!(scheduler.analyze_deadline(), Some(clock.now()));

    assert_eq!(scheduler.tick(), Ok(true));
    assert!(!root.flags().intersects(FlagSet::UPDATE_MASK));
}

#[test]
fn test_independent_schedulers_do_not_interfere() {
    let left = Harness::new(config_160());
    let right = Harness::new(config_160());

    left.root.require_update(FlagSet::NEEDS_MUTATE);
    right.root.require_update(FlagSet::NEEDS_MUTATE);
    assert_eq!(left.scheduler.flush(), Ok(1));

    assert!(!left.root.flags().intersects(FlagSet::UPDATE_MASK));
    assert!(right.root.flags().contains(FlagSet::NEEDS_MUTATE));
    assert!(right.scheduler.analyze_deadline().is_some());
}

struct PanicOnMutate;

impl NodeBehavior for PanicOnMutate {
    fn on_mutate(&self, _: &Node, _: &UpdateContext) {
        panic!("mutate hook failed");
    }
}

#[test]
fn test_panicking_hook_does_not_wedge_the_scheduler() {
    let scheduler = Scheduler::new(SchedulerConfig::default(), ManualClock::new());
    let root = Node::new();
    let child = Node::with_behavior(PanicOnMutate);
    root.append_child(&child, None).unwrap();
    root.set_scheduler(&scheduler);
    root.mount().unwrap();

    child.require_update(FlagSet::NEEDS_MUTATE);
    let outcome = catch_unwind(AssertUnwindSafe(|| scheduler.tick()));
    assert!(outcome.is_err());

    assert!(!scheduler.is_updating());
    assert!(!root.flags().intersects(FlagSet::TRAVERSING | FlagSet::ANALYZING));
    assert!(!child.flags().intersects(FlagSet::TRAVERSING | FlagSet::ANALYZING));
}

#[test]
fn test_failed_pass_leaves_unreached_work_scheduled() {
    let clock = ManualClock::new();
    let scheduler = Scheduler::new(SchedulerConfig::default(), clock.clone());
    let root = Node::new();
    let bad = Node::with_behavior(PanicOnMutate);
    let good = Node::new();
    let grandchild = Node::new();
    root.append_child(&bad, Some("bad")).unwrap();
    root.append_child(&good, Some("good")).unwrap();
    good.append_child(&grandchild, None).unwrap();
    root.set_scheduler(&scheduler);
    root.mount().unwrap();

    bad.require_update(FlagSet::NEEDS_MUTATE);
    good.require_update(FlagSet::NEEDS_MUTATE);
    let outcome = catch_unwind(AssertUnwindSafe(|| scheduler.tick()));
    assert!(outcome.is_err());

    // The pass died before reaching `good`, so its work is still visible.
    assert!(good.flags().contains(FlagSet::NEEDS_ANALYZE | FlagSet::NEEDS_MUTATE));
    assert!(root.flags().contains(FlagSet::NEEDS_ANALYZE));
    assert!(scheduler.flags().contains(FlagSet::NEEDS_ANALYZE));
    assert!(scheduler.analyze_deadline().is_some());

    grandchild.require_update(FlagSet::NEEDS_MUTATE);
    assert_eq!(scheduler.flush(), Ok(1));
    for node in [&root, &bad, &good, &grandchild] {
        assert!(!node.flags().intersects(FlagSet::UPDATE_MASK));
    }
    assert!(!scheduler.flags().intersects(FlagSet::UPDATE_MASK));
}

#[derive(Default)]
struct PassLog(RefCell<Vec<&'static str>>);

impl SchedulerObserver for PassLog {
    fn scheduler_did_attach_root(&self, _: &Scheduler, _: &Node) {
        self.0.borrow_mut().push("attach");
    }
    fn scheduler_will_analyze(&self, _: &Scheduler) {
        self.0.borrow_mut().push("will_analyze");
    }
    fn scheduler_did_analyze(&self, _: &Scheduler, _: Duration) {
        self.0.borrow_mut().push("did_analyze");
    }
    fn scheduler_will_refresh(&self, _: &Scheduler) {
        self.0.borrow_mut().push("will_refresh");
    }
    fn scheduler_did_refresh(&self, _: &Scheduler, _: Duration) {
        self.0.borrow_mut().push("did_refresh");
    }
    fn scheduler_did_unpower(&self, _: &Scheduler) {
        self.0.borrow_mut().push("unpower");
    }
    fn scheduler_did_detach_root(&self, _: &Scheduler, _: &Node) {
        self.0.borrow_mut().push("detach");
    }
}

#[test]
fn test_scheduler_observer_sees_passes() {
    let scheduler = Scheduler::new(SchedulerConfig::default(), ManualClock::new());
    let log = Rc::new(PassLog::default());
    scheduler.observe(log.clone());

    let root = Node::new();
    root.set_scheduler(&scheduler);
    root.mount().unwrap();
    root.require_update(FlagSet::NEEDS_AGGREGATE | FlagSet::NEEDS_VALIDATE);
    scheduler.flush().unwrap();
    scheduler.unpower().unwrap();
    root.unmount().unwrap();

    assert_eq!(
        *log.0.borrow(),
        [
            "attach",
            "will_analyze",
            "did_analyze",
            "will_refresh",
            "did_refresh",
            "unpower",
            "detach",
        ]
    );
}

proptest! {
    #[test]
    fn adaptive_delay_stays_in_bounds(
        min_ms in 0u64..20,
        span_ms in 0u64..200,
        costs in prop::collection::vec(0u64..400, 1..40),
    ) {
        let config = SchedulerConfig {
            min_update_interval: ms(min_ms),
            max_update_interval: ms(min_ms + span_ms),
            ..SchedulerConfig::default()
        };
        let min = config.min_update_interval;
        let max = config.max_update_interval;
        let harness = Harness::new(config);

        for cost in costs {
            let cost = ms(cost);
            let before = harness.scheduler.update_delay();
            let after = harness.pass(cost);

            prop_assert!(after >= min && after <= max);
            let expected = if cost > before {
                (before * 2).max(ms(2)).min(max).max(min)
            } else {
                (before / 2).min(max).max(min)
            };
            prop_assert_eq!(after, expected);
        }
    }
}
