//! Integration tests for scope inheritance across the node tree.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

use spark_model::{
    FieldKind, FieldTable, FlagSet, Inherits, ManualClock, Node, NodeBehavior, Scheduler,
    SchedulerConfig, Scope,
};
use spark_signals::effect;

static PANEL_FIELDS: LazyLock<FieldTable> = LazyLock::new(|| {
    FieldTable::new()
        .scope::<String>("theme", Inherits::Same, || "light".to_string())
        .scope::<u32>("depth", Inherits::None, || 0)
});

static ACCENT_FIELDS: LazyLock<FieldTable> = LazyLock::new(|| {
    FieldTable::new()
        .scope::<String>("accent", "theme", String::new)
        .extend(&PANEL_FIELDS)
});

struct Panel;

impl NodeBehavior for Panel {
    fn fields(&self) -> &FieldTable {
        &PANEL_FIELDS
    }
}

struct Accent;

impl NodeBehavior for Accent {
    fn fields(&self) -> &FieldTable {
        &ACCENT_FIELDS
    }
}

fn scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig::default(), ManualClock::new())
}

fn theme(node: &Node) -> Scope<String> {
    node.scope::<String>("theme").unwrap()
}

/// Build `a -> b -> c` and mount it on `scheduler`.
fn chain(scheduler: &Scheduler) -> (Node, Node, Node) {
    let a = Node::with_behavior(Panel);
    let b = Node::with_behavior(Panel);
    let c = Node::with_behavior(Panel);
    a.append_child(&b, Some("b")).unwrap();
    b.append_child(&c, Some("c")).unwrap();
    a.set_scheduler(scheduler);
    a.mount().unwrap();
    (a, b, c)
}

#[test]
fn test_inherited_value_is_visible_immediately() {
    let scheduler = scheduler();
    let (a, b, c) = chain(&scheduler);
    let c_theme = theme(&c);
    assert_eq!(c_theme.get(), "light");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let signal = c_theme.signal();
    let sink = seen.clone();
    let _stop = effect(move || {
        sink.borrow_mut().push(signal.get());
    });

    theme(&a).set_state("dark".to_string());

    assert_eq!(c_theme.get(), "dark");
    assert_eq!(theme(&b).get(), "dark");
    assert_eq!(*seen.borrow(), ["light".to_string(), "dark".to_string()]);

    // Every changed owner asked for a mutate pass.
    for node in [&a, &b, &c] {
        assert!(node.flags().contains(FlagSet::NEEDS_MUTATE));
    }
    assert!(scheduler.flags().contains(FlagSet::NEEDS_ANALYZE));
    a.unmount().unwrap();
}

#[test]
fn test_effects_never_see_a_half_updated_chain() {
    let scheduler = scheduler();
    let (a, _b, c) = chain(&scheduler);
    let a_signal = theme(&a).signal();
    let c_signal = theme(&c).signal();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let _stop = effect(move || {
        sink.borrow_mut().push((a_signal.get(), c_signal.get()));
    });

    theme(&a).set_state("dark".to_string());
    theme(&a).set_state("contrast".to_string());

    let seen = seen.borrow();
    assert!(seen.iter().all(|(a, c)| a == c), "mixed values observed: {seen:?}");
    assert_eq!(
        seen.last(),
        Some(&("contrast".to_string(), "contrast".to_string()))
    );
    drop(seen);
    a.unmount().unwrap();
}

#[test]
fn test_override_shields_its_subtree_only() {
    let scheduler = scheduler();
    let (a, b, c) = chain(&scheduler);
    let d = Node::with_behavior(Panel);
    a.append_child(&d, Some("d")).unwrap();
    assert_eq!(theme(&d).get(), "light");

    theme(&b).set_state("solarized".to_string());
    theme(&a).set_state("dark".to_string());

    assert_eq!(theme(&a).get(), "dark");
    assert_eq!(theme(&b).get(), "solarized");
    assert_eq!(theme(&c).get(), "solarized");
    assert_eq!(theme(&d).get(), "dark");

    theme(&b).reset_inherited();
    assert_eq!(theme(&c).get(), "dark");
    a.unmount().unwrap();
}

#[test]
fn test_nodes_without_the_field_are_skipped() {
    let scheduler = scheduler();
    let a = Node::with_behavior(Panel);
    let plain = Node::new();
    let c = Node::with_behavior(Panel);
    a.append_child(&plain, None).unwrap();
    plain.append_child(&c, None).unwrap();
    a.set_scheduler(&scheduler);
    a.mount().unwrap();

    theme(&a).set_state("dark".to_string());
    assert_eq!(theme(&c).get(), "dark");
    assert_eq!(theme(&c).super_scope(), Some(theme(&a)));
    assert!(plain.scope::<String>("theme").is_none());
    a.unmount().unwrap();
}

#[test]
fn test_declared_but_unmaterialized_scopes_bind_on_demand() {
    let scheduler = scheduler();
    let (a, _b, c) = chain(&scheduler);

    // Nothing has asked for "theme" yet on any node.
    assert!(a.attachment("theme").is_none());
    assert_eq!(theme(&c).get(), "light");
    assert!(a.attachment("theme").is_some());
    assert_eq!(theme(&a).sub_scope_count(), 1);
    a.unmount().unwrap();
}

#[test]
fn test_uninherited_scopes_stay_local() {
    let scheduler = scheduler();
    let (a, _b, c) = chain(&scheduler);
    a.scope::<u32>("depth").unwrap().set_state(5);
    assert_eq!(c.scope::<u32>("depth").unwrap().get(), 0);
    assert!(c.scope::<u32>("depth").unwrap().super_scope().is_none());
    a.unmount().unwrap();
}

#[test]
fn test_named_inheritance_and_extended_tables() {
    let scheduler = scheduler();
    let a = Node::with_behavior(Panel);
    let b = Node::with_behavior(Accent);
    a.append_child(&b, None).unwrap();
    a.set_scheduler(&scheduler);
    a.mount().unwrap();

    let accent = b.scope::<String>("accent").unwrap();
    assert_eq!(accent.get(), "light");
    assert_eq!(accent.inherits(), Inherits::from("theme"));
    assert_eq!(b.field("depth").map(|f| f.kind), Some(FieldKind::Scope));

    theme(&a).set_state("dark".to_string());
    assert_eq!(accent.get(), "dark");
    a.unmount().unwrap();
}

#[test]
fn test_missing_and_mistyped_lookups_return_none() {
    let node = Node::with_behavior(Panel);
    assert!(node.scope::<String>("missing").is_none());
    assert!(node.scope::<u32>("theme").is_none());
    assert!(node.scope::<String>("theme").is_some());
}

#[test]
fn test_moving_a_subtree_rebinds_it() {
    let scheduler = scheduler();
    let (a, _b, c) = chain(&scheduler);
    let other = Node::with_behavior(Panel);
    other.set_scheduler(&scheduler);
    other.mount().unwrap();
    theme(&other).set_state("contrast".to_string());

    other.append_child(&c, None).unwrap();
    assert_eq!(theme(&c).get(), "contrast");
    assert_eq!(theme(&c).super_scope(), Some(theme(&other)));

    theme(&a).set_state("dark".to_string());
    assert_eq!(theme(&c).get(), "contrast");

    a.unmount().unwrap();
    other.unmount().unwrap();
}

#[test]
fn test_mutating_clears_after_the_mutate_stage() {
    let scheduler = scheduler();
    let (a, b, _c) = chain(&scheduler);
    theme(&a).set_state("dark".to_string());
    assert!(theme(&b).is_mutating());

    scheduler.flush().unwrap();
    assert!(!theme(&a).is_mutating());
    assert!(!theme(&b).is_mutating());
    assert!(!b.flags().intersects(FlagSet::UPDATE_MASK));
    a.unmount().unwrap();
}

#[test]
fn test_custom_update_flags() {
    let scheduler = scheduler();
    let (a, _b, _c) = chain(&scheduler);
    let depth = a.scope::<u32>("depth").unwrap();
    depth.set_update_flags(FlagSet::NEEDS_VALIDATE);

    depth.set_state(3);
    assert!(a.flags().contains(FlagSet::NEEDS_VALIDATE | FlagSet::NEEDS_REFRESH));
    assert!(!a.flags().contains(FlagSet::NEEDS_MUTATE));
    a.unmount().unwrap();
}
