//! Service - A shared manager resolved through the node tree.
//!
//! A service follows the same binding protocol as a scope, but holds a
//! manager handle instead of reactive state and never requests updates.
//! Every node carries the built-in `"scheduler"` service, which is how a
//! subtree finds the [`Scheduler`](crate::Scheduler) driving it.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::engine::{Node, WeakNode};
use crate::state::{find_super, Attachment, CellFlags};
use crate::types::Inherits;

pub(crate) struct ServiceCell<M: Clone + PartialEq + 'static> {
    name: String,
    owner: WeakNode,
    inherits: RefCell<Inherits>,
    flags: Cell<CellFlags>,
    /// Manager used while the service is unbound.
    local: RefCell<M>,
    manager: RefCell<M>,
    super_service: RefCell<Option<Service<M>>>,
    sub_services: RefCell<Vec<Weak<ServiceCell<M>>>>,
    this: Weak<ServiceCell<M>>,
}

/// Handle to a service cell. Clones share the cell.
pub struct Service<M: Clone + PartialEq + 'static>(Rc<ServiceCell<M>>);

impl<M: Clone + PartialEq + 'static> Service<M> {
    /// Create an unbound service whose local manager is `manager`.
    pub fn new(owner: &Node, name: &str, inherits: Inherits, manager: M) -> Self {
        Self(Rc::new_cyclic(|this| ServiceCell {
            name: name.to_string(),
            owner: owner.downgrade(),
            inherits: RefCell::new(inherits),
            flags: Cell::new(CellFlags::empty()),
            local: RefCell::new(manager.clone()),
            manager: RefCell::new(manager),
            super_service: RefCell::new(None),
            sub_services: RefCell::new(Vec::new()),
            this: this.clone(),
        }))
    }

    pub fn from_attachment(attachment: Rc<dyn Attachment>) -> Option<Self> {
        attachment.into_any().downcast::<ServiceCell<M>>().ok().map(Self)
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

    /// The manager in effect: inherited when bound, local otherwise.
    pub fn manager(&self) -> M {
        self.0.manager.borrow().clone()
    }

    /// Use `manager` here and in every sub-service that isn't overridden.
    pub fn set_manager(&self, manager: M) {
        self.0.flags.set(self.0.flags.get() | CellFlags::OVERRIDDEN);
        *self.0.local.borrow_mut() = manager.clone();
        self.0.apply(manager);
    }

    /// Drop the local override and follow the super service again.
    pub fn reset_inherited(&self) {
        self.0.flags.set(self.0.flags.get() - CellFlags::OVERRIDDEN);
        let inherited = self.super_service().map(|service| service.manager());
        if let Some(manager) = inherited {
            self.0.apply(manager);
        }
    }

    pub fn inherits(&self) -> Inherits {
        self.0.inherits.borrow().clone()
    }

    pub fn is_overridden(&self) -> bool {
        self.0.flags.get().contains(CellFlags::OVERRIDDEN)
    }

    pub fn is_inherited(&self) -> bool {
        !self.is_overridden() && self.0.super_service.borrow().is_some()
    }

    pub fn super_service(&self) -> Option<Service<M>> {
        self.0.super_service.borrow().clone()
    }

    pub fn sub_service_count(&self) -> usize {
        self.0
            .sub_services
            .borrow()
            .iter()
            .filter(|sub| sub.strong_count() > 0)
            .count()
    }
}

impl<M: Clone + PartialEq + 'static> ServiceCell<M> {
    fn apply(&self, manager: M) {
        if *self.manager.borrow() == manager {
            return;
        }
        *self.manager.borrow_mut() = manager.clone();

        let subs: Vec<_> = {
            let mut sub_services = self.sub_services.borrow_mut();
            sub_services.retain(|sub| sub.strong_count() > 0);
            sub_services.iter().filter_map(Weak::upgrade).collect()
        };
        for sub in subs {
            if !sub.flags.get().contains(CellFlags::OVERRIDDEN) {
                sub.apply(manager.clone());
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
        let Some(super_service) = Service::<M>::from_attachment(attachment) else {
            tracing::warn!(
                node = %owner,
                ancestor = %ancestor,
                service = %self.name,
                super_name,
                "inherited service has a different manager type; leaving unbound"
            );
            return;
        };

        super_service.0.sub_services.borrow_mut().push(self.this.clone());
        let manager = super_service.manager();
        *self.super_service.borrow_mut() = Some(super_service);
        if !self.flags.get().contains(CellFlags::OVERRIDDEN) {
            self.apply(manager);
        }
    }

    fn unbind(&self) {
        let Some(super_service) = self.super_service.borrow_mut().take() else {
            return;
        };
        super_service
            .0
            .sub_services
            .borrow_mut()
            .retain(|sub| sub.strong_count() > 0 && !Weak::ptr_eq(sub, &self.this));
        if !self.flags.get().contains(CellFlags::OVERRIDDEN) {
            let local = self.local.borrow().clone();
            self.apply(local);
        }
    }
}

impl<M: Clone + PartialEq + 'static> Attachment for ServiceCell<M> {
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
        self.flags.set(self.flags.get() - CellFlags::MOUNTED);
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<M: Clone + PartialEq + 'static> Clone for Service<M> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<M: Clone + PartialEq + 'static> PartialEq for Service<M> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<M: Clone + PartialEq + 'static> fmt::Debug for Service<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.0.name)
            .field("inherits", &self.0.inherits.borrow())
            .field("flags", &self.0.flags.get())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
