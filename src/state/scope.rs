//! Scope - A reactive per-node value that can inherit from an ancestor.
//!
//! # Example
//!
//! ```ignore
//! use spark_model::{Inherits, Node};
//!
//! let root = Node::new();
//! let child = Node::new();
//! root.append_child(&child, None)?;
//! root.define_scope("theme", Inherits::None, "light".to_string());
//! let theme = child.define_scope("theme", Inherits::Same, String::new());
//! root.mount()?;
//!
//! assert_eq!(theme.get(), "light");
//! root.scope::<String>("theme").unwrap().set_state("dark".to_string());
//! assert_eq!(theme.get(), "dark");
//! ```
//!
//! Propagation is synchronous: by the time `set_state` returns every
//! non-overridden sub-scope holds the new value, and each owner whose
//! value changed has requested its scope's update flags. The whole chain
//! is written in one signal batch, so effects never see it half updated.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use spark_signals::{batch, signal, untrack, Signal};

use crate::engine::{Node, WeakNode};
use crate::state::{find_super, Attachment, CellFlags};
use crate::types::{FlagSet, Inherits};

pub(crate) struct ScopeCell<T: Clone + PartialEq + 'static> {
    name: String,
    owner: WeakNode,
    inherits: RefCell<Inherits>,
    flags: Cell<CellFlags>,
    update_flags: Cell<FlagSet>,
    state: Signal<T>,
    super_scope: RefCell<Option<Scope<T>>>,
    sub_scopes: RefCell<Vec<Weak<ScopeCell<T>>>>,
    this: Weak<ScopeCell<T>>,
}

/// Handle to a scope cell. Clones share the cell.
pub struct Scope<T: Clone + PartialEq + 'static>(Rc<ScopeCell<T>>);

impl<T: Clone + PartialEq + 'static> Scope<T> {
    /// Create an unbound scope owned by `owner`.
    pub fn new(owner: &Node, name: &str, inherits: Inherits, value: T) -> Self {
        Self(Rc::new_cyclic(|this| ScopeCell {
            name: name.to_string(),
            owner: owner.downgrade(),
            inherits: RefCell::new(inherits),
            flags: Cell::new(CellFlags::empty()),
            update_flags: Cell::new(FlagSet::NEEDS_MUTATE),
            state: signal(value),
            super_scope: RefCell::new(None),
            sub_scopes: RefCell::new(Vec::new()),
            this: this.clone(),
        }))
    }

    /// Recover a typed scope from an attachment, if it is one.
    pub fn from_attachment(attachment: Rc<dyn Attachment>) -> Option<Self> {
        attachment.into_any().downcast::<ScopeCell<T>>().ok().map(Self)
    }

    pub fn into_attachment(self) -> Rc<dyn Attachment> {
        self.0
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn owner(&self) -> Option<Node> {
        self.0.owner.upgrade()
    }

    /// Current value. Reading inside an effect tracks the scope.
    pub fn get(&self) -> T {
        self.0.state.get()
    }

    /// The signal backing this scope.
    pub fn signal(&self) -> Signal<T> {
        self.0.state.clone()
    }

    /// Set a local value, detaching this scope from its super scope's value.
    pub fn set_state(&self, value: T) {
        self.insert_flags(CellFlags::OVERRIDDEN);
        self.0.apply(value);
    }

    /// Adopt `value` as if it came from the super scope.
    ///
    /// Ignored while the scope is overridden.
    pub fn set_inherited_state(&self, value: T) {
        if !self.is_overridden() {
            self.0.apply(value);
        }
    }

    /// Drop the local override and follow the super scope again.
    pub fn reset_inherited(&self) {
        self.remove_flags(CellFlags::OVERRIDDEN);
        let inherited = self.super_scope().map(|scope| scope.0.peek());
        if let Some(value) = inherited {
            self.0.apply(value);
        }
    }

    pub fn inherits(&self) -> Inherits {
        self.0.inherits.borrow().clone()
    }

    /// Change which ancestor scope this one follows, rebinding if mounted.
    pub fn set_inherits(&self, inherits: impl Into<Inherits>) {
        let inherits = inherits.into();
        if *self.0.inherits.borrow() == inherits {
            return;
        }
        let mounted = self.0.flags.get().contains(CellFlags::MOUNTED);
        if mounted {
            self.0.unbind();
        }
        *self.0.inherits.borrow_mut() = inherits;
        if mounted {
            if let Some(owner) = self.owner() {
                self.0.bind(&owner);
            }
        }
    }

    pub fn is_overridden(&self) -> bool {
        self.0.flags.get().contains(CellFlags::OVERRIDDEN)
    }

    /// Bound to a super scope and following its value.
    pub fn is_inherited(&self) -> bool {
        !self.is_overridden() && self.0.super_scope.borrow().is_some()
    }

    pub fn is_mutating(&self) -> bool {
        self.0.flags.get().contains(CellFlags::MUTATING)
    }

    pub fn flags(&self) -> CellFlags {
        self.0.flags.get()
    }

    pub fn super_scope(&self) -> Option<Scope<T>> {
        self.0.super_scope.borrow().clone()
    }

    pub fn sub_scope_count(&self) -> usize {
        self.0
            .sub_scopes
            .borrow()
            .iter()
            .filter(|sub| sub.strong_count() > 0)
            .count()
    }

    pub fn update_flags(&self) -> FlagSet {
        self.0.update_flags.get()
    }

    /// Flags required on the owner whenever the value changes.
    pub fn set_update_flags(&self, flags: FlagSet) {
        self.0.update_flags.set(flags);
    }

    fn insert_flags(&self, flags: CellFlags) {
        self.0.flags.set(self.0.flags.get() | flags);
    }

    fn remove_flags(&self, flags: CellFlags) {
        self.0.flags.set(self.0.flags.get() - flags);
    }
}

impl<T: Clone + PartialEq + 'static> ScopeCell<T> {
    /// Current value without subscribing the running effect.
    fn peek(&self) -> T {
        untrack(|| self.state.get())
    }

    /// Set the value and push it down the chain as one batch, so effects
    /// only run once every sub-scope holds it.
    fn apply(&self, value: T) {
        batch(|| self.propagate(value));
    }

    fn propagate(&self, value: T) {
        if self.peek() == value {
            return;
        }
        self.state.set(value.clone());
        self.flags.set(self.flags.get() | CellFlags::MUTATING);
        if let Some(owner) = self.owner.upgrade() {
            owner.require_update(self.update_flags.get());
        }

        let subs: Vec<_> = {
            let mut sub_scopes = self.sub_scopes.borrow_mut();
            sub_scopes.retain(|sub| sub.strong_count() > 0);
            sub_scopes.iter().filter_map(Weak::upgrade).collect()
        };
        for sub in subs {
            if !sub.flags.get().contains(CellFlags::OVERRIDDEN) {
                sub.propagate(value.clone());
            }
        }
    }

    fn bind(&self, owner: &Node) {
        let inherits = self.inherits.borrow().clone();
        let Some(super_name) = inherits.super_name(&self.name) else {
            return;
        };
        let Some((ancestor, attachment)) = find_super(owner, super_name) else {
            return;
        };
        let Some(super_scope) = Scope::<T>::from_attachment(attachment) else {
            tracing::warn!(
                node = %owner,
                ancestor = %ancestor,
                scope = %self.name,
                super_name,
                "inherited scope has a different value type; leaving unbound"
            );
            return;
        };

        super_scope.0.sub_scopes.borrow_mut().push(self.this.clone());
        let value = super_scope.0.peek();
        *self.super_scope.borrow_mut() = Some(super_scope);
        if !self.flags.get().contains(CellFlags::OVERRIDDEN) {
            self.apply(value);
        }
    }

    fn unbind(&self) {
        let Some(super_scope) = self.super_scope.borrow_mut().take() else {
            return;
        };
        super_scope
            .0
            .sub_scopes
            .borrow_mut()
            .retain(|sub| sub.strong_count() > 0 && !Weak::ptr_eq(sub, &self.this));
    }
}

impl<T: Clone + PartialEq + 'static> Attachment for ScopeCell<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn mount(&self, owner: &Node) {
        if self.flags.get().contains(CellFlags::MOUNTED) {
            return;
        }
        self.flags.set(self.flags.get() | CellFlags::MOUNTED);
        self.bind(owner);
    }

    fn unmount(&self, _owner: &Node) {
        self.unbind();
        self.flags.set(self.flags.get() - CellFlags::MOUNTED - CellFlags::MUTATING);
    }

    fn did_mutate(&self, _owner: &Node) {
        self.flags.set(self.flags.get() - CellFlags::MUTATING);
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Scope<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + PartialEq + 'static> PartialEq for Scope<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone + PartialEq + 'static> fmt::Debug for Scope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.0.name)
            .field("inherits", &self.0.inherits.borrow())
            .field("flags", &self.0.flags.get())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use spark_signals::effect;

    #[test]
    fn test_unbound_scope_holds_its_value() {
        let node = Node::new();
        let scope = node.define_scope("depth", Inherits::None, 3u32);

        assert_eq!(scope.get(), 3);
        assert!(!scope.is_overridden());
        assert!(!scope.is_inherited());

        scope.set_state(4);
        assert_eq!(scope.get(), 4);
        assert!(scope.is_overridden());
        assert!(scope.is_mutating());
        assert!(node.flags().contains(FlagSet::NEEDS_MUTATE));
    }

    #[test]
    fn test_setting_same_value_is_not_a_mutation() {
        let node = Node::new();
        let scope = node.define_scope("depth", Inherits::None, 3u32);
        scope.set_state(3);
        assert!(!scope.is_mutating());
        assert!(!node.flags().contains(FlagSet::NEEDS_MUTATE));
    }

    #[test]
    fn test_mount_binds_and_adopts() {
        let root = Node::new();
        let child = Node::new();
        root.append_child(&child, None).unwrap();
        let source = root.define_scope("theme", Inherits::None, "light".to_string());
        let follower = child.define_scope("theme", Inherits::Same, String::new());

        root.cascade_mount().unwrap();
        assert_eq!(follower.get(), "light");
        assert_eq!(follower.super_scope(), Some(source.clone()));
        assert_eq!(source.sub_scope_count(), 1);
        assert!(follower.is_inherited());

        source.set_state("dark".to_string());
        assert_eq!(follower.get(), "dark");

        root.cascade_unmount().unwrap();
        assert!(follower.super_scope().is_none());
        assert_eq!(source.sub_scope_count(), 0);
    }

    #[test]
    fn test_override_and_reset() {
        let root = Node::new();
        let child = Node::new();
        root.append_child(&child, None).unwrap();
        let source = root.define_scope("size", Inherits::None, 10i32);
        let follower = child.define_scope("size", Inherits::Same, 0i32);
        root.cascade_mount().unwrap();

        follower.set_state(99);
        source.set_state(11);
        assert_eq!(follower.get(), 99);

        follower.reset_inherited();
        assert_eq!(follower.get(), 11);
        assert!(follower.is_inherited());

        root.cascade_unmount().unwrap();
    }

    #[test]
    fn test_type_mismatch_leaves_scope_unbound() {
        let root = Node::new();
        let child = Node::new();
        root.append_child(&child, None).unwrap();
        root.define_scope("value", Inherits::None, 1u8);
        let follower = child.define_scope("value", Inherits::Same, "own".to_string());

        root.cascade_mount().unwrap();
        assert!(follower.super_scope().is_none());
        assert_eq!(follower.get(), "own");
        root.cascade_unmount().unwrap();
    }

    #[test]
    fn test_set_inherits_rebinds() {
        let root = Node::new();
        let child = Node::new();
        root.append_child(&child, None).unwrap();
        root.define_scope("primary", Inherits::None, 1u32);
        root.define_scope("secondary", Inherits::None, 2u32);
        let follower = child.define_scope("color", "primary", 0u32);

        root.cascade_mount().unwrap();
        assert_eq!(follower.get(), 1);

        follower.set_inherits("secondary");
        assert_eq!(follower.get(), 2);
        assert_eq!(follower.super_scope().map(|s| s.name().to_string()).as_deref(), Some("secondary"));

        root.cascade_unmount().unwrap();
    }

    #[test]
    fn test_effects_track_scope_values() {
        let node = Node::new();
        let scope = node.define_scope("count", Inherits::None, 0u32);
        let seen = Rc::new(Cell::new(0u32));

        let signal = scope.signal();
        let sink = seen.clone();
        let _stop = effect(move || {
            sink.set(signal.get());
        });

        scope.set_state(7);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_writing_a_scope_does_not_track_it() {
        let node = Node::new();
        let scope = node.define_scope("count", Inherits::None, 0u32);
        let runs = Rc::new(Cell::new(0u32));

        let writer = scope.clone();
        let counter = runs.clone();
        let _stop = effect(move || {
            counter.set(counter.get() + 1);
            writer.set_state(5);
        });
        assert_eq!(runs.get(), 1);
        assert_eq!(scope.get(), 5);

        scope.set_state(9);
        assert_eq!(runs.get(), 1);
        assert_eq!(scope.get(), 9);
    }
}
