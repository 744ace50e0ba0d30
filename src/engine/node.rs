//! Node - A tree element with flags, children and lazily created cells.
//!
//! [`Node`] is a cheap handle (`Rc`) to shared node state. Cloning it clones
//! the handle, not the node. Parents own their children; children point back
//! at their parent weakly.
//!
//! # Structure
//!
//! ```text
//! root (no parent, registered with a Scheduler while mounted)
//! ├── "header"  (keyed child)
//! ├── (unkeyed child)
//! └── "body"
//!     └── ...
//! ```
//!
//! # Removal During Traversal
//!
//! A node that is being traversed (its `TRAVERSING` flag is set) cannot be
//! pulled out of its parent's child list: somebody up the stack is iterating
//! it. [`Node::remove`] only marks such a node `REMOVING`, and the parent
//! finishes the removal right after the child's cascade call returns.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::engine::fields::SCHEDULER_SERVICE;
use crate::engine::{FieldDescriptor, NodeBehavior, NodeObserver};
use crate::error::TreeError;
use crate::pipeline::Scheduler;
use crate::state::{Attachment, Scope, Service};
use crate::types::{FlagSet, Inherits};

// =============================================================================
// Node State
// =============================================================================

pub(crate) struct NodeInner {
    flags: Cell<FlagSet>,
    key: RefCell<Option<String>>,
    parent: RefCell<Weak<NodeInner>>,
    children: RefCell<Vec<Node>>,
    keyed: RefCell<HashMap<String, Node>>,
    observers: RefCell<Vec<Rc<dyn NodeObserver>>>,
    consumers: RefCell<Vec<Rc<dyn Any>>>,
    /// Materialized cells in creation order.
    attachments: RefCell<Vec<Rc<dyn Attachment>>>,
    behavior: Rc<dyn NodeBehavior>,
}

/// Handle to a node in a model tree.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Rc<NodeInner>,
}

/// Non-owning handle to a node.
#[derive(Clone, Default)]
pub struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({node})"),
            None => f.write_str("WeakNode(<dropped>)"),
        }
    }
}

impl Node {
    /// Create a detached node with no behavior.
    pub fn new() -> Self {
        Self::with_behavior(())
    }

    /// Create a detached node driven by `behavior`.
    pub fn with_behavior(behavior: impl NodeBehavior) -> Self {
        Self::from_behavior(Rc::new(behavior))
    }

    /// Create a detached node sharing an existing behavior instance.
    pub fn from_behavior(behavior: Rc<dyn NodeBehavior>) -> Self {
        Self {
            inner: Rc::new(NodeInner {
                flags: Cell::new(FlagSet::empty()),
                key: RefCell::new(None),
                parent: RefCell::new(Weak::new()),
                children: RefCell::new(Vec::new()),
                keyed: RefCell::new(HashMap::new()),
                observers: RefCell::new(Vec::new()),
                consumers: RefCell::new(Vec::new()),
                attachments: RefCell::new(Vec::new()),
                behavior,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.inner))
    }

    pub fn behavior(&self) -> &Rc<dyn NodeBehavior> {
        &self.inner.behavior
    }

    // =========================================================================
    // Flags
    // =========================================================================

    pub fn flags(&self) -> FlagSet {
        self.inner.flags.get()
    }

    /// Overwrite the flag word.
    ///
    /// Core bits are maintained by the cascades; embedders normally only
    /// touch bits outside `FlagSet::CORE_MASK`.
    pub fn set_flags(&self, flags: FlagSet) {
        self.inner.flags.set(flags);
    }

    pub(crate) fn insert_flags(&self, flags: FlagSet) {
        self.set_flags(self.flags() | flags);
    }

    pub(crate) fn remove_flags(&self, flags: FlagSet) {
        self.set_flags(self.flags() - flags);
    }

    pub fn is_mounted(&self) -> bool {
        self.flags().contains(FlagSet::MOUNTED)
    }

    pub fn is_powered(&self) -> bool {
        self.flags().contains(FlagSet::POWERED)
    }

    pub fn is_consuming(&self) -> bool {
        self.flags().contains(FlagSet::CONSUMING)
    }

    pub fn is_traversing(&self) -> bool {
        self.flags().contains(FlagSet::TRAVERSING)
    }

    // =========================================================================
    // Structure Queries
    // =========================================================================

    pub fn key(&self) -> Option<String> {
        self.inner.key.borrow().clone()
    }

    pub(crate) fn set_key(&self, key: Option<String>) {
        *self.inner.key.borrow_mut() = key;
    }

    pub fn parent(&self) -> Option<Node> {
        self.inner.parent.borrow().upgrade().map(|inner| Node { inner })
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Check whether `self` is a direct child of `parent`.
    pub fn is_child_of(&self, parent: &Node) -> bool {
        self.parent().is_some_and(|p| p == *parent)
    }

    /// Check whether `self` is a strict ancestor of `node`.
    pub fn is_ancestor_of(&self, node: &Node) -> bool {
        let mut current = node.parent();
        while let Some(ancestor) = current {
            if ancestor == *self {
                return true;
            }
            current = ancestor.parent();
        }
        false
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Snapshot of the children in order.
    pub fn children(&self) -> Vec<Node> {
        self.inner.children.borrow().clone()
    }

    pub fn child(&self, key: &str) -> Option<Node> {
        self.inner.keyed.borrow().get(key).cloned()
    }

    pub fn child_at(&self, index: usize) -> Option<Node> {
        self.inner.children.borrow().get(index).cloned()
    }

    pub fn first_child(&self) -> Option<Node> {
        self.inner.children.borrow().first().cloned()
    }

    pub fn last_child(&self) -> Option<Node> {
        self.inner.children.borrow().last().cloned()
    }

    pub fn next_sibling(&self) -> Option<Node> {
        let parent = self.parent()?;
        let children = parent.inner.children.borrow();
        let index = children.iter().position(|child| child == self)?;
        children.get(index + 1).cloned()
    }

    pub fn previous_sibling(&self) -> Option<Node> {
        let parent = self.parent()?;
        let children = parent.inner.children.borrow();
        let index = children.iter().position(|child| child == self)?;
        index.checked_sub(1).and_then(|i| children.get(i).cloned())
    }

    // =========================================================================
    // Structure Mutation
    // =========================================================================

    pub fn append_child(&self, child: &Node, key: Option<&str>) -> Result<(), TreeError> {
        self.insert_child(child, None, key)
    }

    pub fn prepend_child(&self, child: &Node, key: Option<&str>) -> Result<(), TreeError> {
        let target = self.first_child();
        self.insert_child(child, target.as_ref(), key)
    }

    /// Insert `child` before `target` (or at the end), optionally keyed.
    ///
    /// The child is first detached from wherever it currently lives. A
    /// sibling already holding `key` is removed. If this node is mounted or
    /// powered, the child is mounted or powered as part of the insertion.
    pub fn insert_child(
        &self,
        child: &Node,
        target: Option<&Node>,
        key: Option<&str>,
    ) -> Result<(), TreeError> {
        if child == self || child.is_ancestor_of(self) {
            return Err(TreeError::CyclicInsert);
        }
        if let Some(target) = target {
            if !target.is_child_of(self) {
                return Err(TreeError::NotAChild(target.to_string()));
            }
        }

        let mut target = target.cloned();
        if target.as_ref() == Some(child) {
            target = child.next_sibling();
        }

        match child.parent() {
            Some(old_parent) => {
                old_parent.remove_child(child)?;
            }
            None if child.is_mounted() => child.unmount()?,
            None => {}
        }

        if let Some(key) = key {
            if let Some(existing) = self.child(key) {
                if target.as_ref() == Some(&existing) {
                    target = existing.next_sibling();
                }
                self.remove_child(&existing)?;
            }
        }

        child.set_key(key.map(str::to_string));
        self.will_insert_child(child, target.as_ref());
        {
            let mut children = self.inner.children.borrow_mut();
            let index = target
                .as_ref()
                .and_then(|target| children.iter().position(|c| c == target))
                .unwrap_or(children.len());
            children.insert(index, child.clone());
        }
        if let Some(key) = key {
            self.inner
                .keyed
                .borrow_mut()
                .insert(key.to_string(), child.clone());
        }

        child.attach_parent(self)?;
        self.on_insert_child(child, target.as_ref());
        self.did_insert_child(child, target.as_ref());
        self.finish_pending_removal(child)
    }

    /// Put `child` under `key`, replacing (and returning) the previous holder.
    ///
    /// Passing `None` just removes the keyed child.
    pub fn set_child(&self, key: &str, child: Option<&Node>) -> Result<Option<Node>, TreeError> {
        let old = self.child(key);
        match child {
            Some(child) if old.as_ref() == Some(child) => Ok(None),
            Some(child) => {
                let target = old.as_ref().and_then(Node::next_sibling);
                let target = target.filter(|target| target != child);
                self.insert_child(child, target.as_ref(), Some(key))?;
                Ok(old)
            }
            None => {
                if let Some(old) = &old {
                    self.remove_child(old)?;
                }
                Ok(old)
            }
        }
    }

    /// Swap `old` for `new` at the same position and key.
    pub fn replace_child(&self, new: &Node, old: &Node) -> Result<Node, TreeError> {
        if !old.is_child_of(self) {
            return Err(TreeError::NotAChild(old.to_string()));
        }
        if new == old {
            return Ok(old.clone());
        }
        let target = old.next_sibling().filter(|target| target != new);
        let key = old.key();
        self.remove_child(old)?;
        self.insert_child(new, target.as_ref(), key.as_deref())?;
        Ok(old.clone())
    }

    /// Detach `child` from this node, unpowering and unmounting it first.
    pub fn remove_child(&self, child: &Node) -> Result<Node, TreeError> {
        if !child.is_child_of(self) {
            return Err(TreeError::NotAChild(child.to_string()));
        }

        self.will_remove_child(child);
        child.detach_parent(self)?;

        self.inner.children.borrow_mut().retain(|c| c != child);
        if let Some(key) = child.key() {
            let mut keyed = self.inner.keyed.borrow_mut();
            if keyed.get(&key) == Some(child) {
                keyed.remove(&key);
            }
        }
        child.remove_flags(FlagSet::REMOVING);

        self.on_remove_child(child);
        self.did_remove_child(child);
        child.set_key(None);
        Ok(child.clone())
    }

    pub fn remove_child_key(&self, key: &str) -> Result<Option<Node>, TreeError> {
        match self.child(key) {
            Some(child) => self.remove_child(&child).map(Some),
            None => Ok(None),
        }
    }

    /// Remove every child. Children being traversed are marked instead.
    pub fn remove_children(&self) -> Result<(), TreeError> {
        for child in self.children() {
            if !child.is_child_of(self) {
                continue;
            }
            if child.is_traversing() {
                child.insert_flags(FlagSet::REMOVING);
            } else {
                self.remove_child(&child)?;
            }
        }
        Ok(())
    }

    /// Remove this node from its parent.
    ///
    /// Outside a traversal the removal is immediate. While the node is being
    /// traversed it is only marked `REMOVING`; the iterating parent completes
    /// the removal once the node's cascade returns. Roots are left alone.
    pub fn remove(&self) -> Result<(), TreeError> {
        let Some(parent) = self.parent() else {
            return Ok(());
        };
        if self.is_traversing() {
            tracing::trace!(node = %self, "deferring removal until traversal completes");
            self.insert_flags(FlagSet::REMOVING);
            Ok(())
        } else {
            parent.remove_child(self).map(|_| ())
        }
    }

    /// Complete a removal deferred by [`Node::remove`].
    pub(crate) fn finish_pending_removal(&self, child: &Node) -> Result<(), TreeError> {
        if child.flags().contains(FlagSet::REMOVING) && child.is_child_of(self) {
            child.remove_flags(FlagSet::REMOVING);
            self.remove_child(child)?;
        }
        Ok(())
    }

    fn attach_parent(&self, parent: &Node) -> Result<(), TreeError> {
        self.will_attach_parent(parent);
        *self.inner.parent.borrow_mut() = Rc::downgrade(&parent.inner);
        if parent.is_mounted() && !self.is_mounted() {
            self.cascade_mount()?;
        }
        if parent.is_powered() && !self.is_powered() {
            self.cascade_power()?;
        }
        self.did_attach_parent(parent);
        Ok(())
    }

    fn detach_parent(&self, parent: &Node) -> Result<(), TreeError> {
        self.will_detach_parent(parent);
        if self.is_powered() {
            self.cascade_unpower()?;
        }
        if self.is_mounted() {
            self.cascade_unmount()?;
        }
        *self.inner.parent.borrow_mut() = Weak::new();
        self.did_detach_parent(parent);
        Ok(())
    }

    // =========================================================================
    // Root Lifecycle
    // =========================================================================

    /// Mount a root node, powering it when its scheduler is powered.
    ///
    /// Does nothing for child nodes (they follow their parent) or for a
    /// root that is already mounted.
    pub fn mount(&self) -> Result<(), TreeError> {
        if self.parent().is_some() || self.is_mounted() {
            return Ok(());
        }
        self.cascade_mount()?;
        let powered = self.scheduler().is_some_and(|s| s.is_powered());
        if powered && !self.is_powered() {
            self.cascade_power()?;
        }
        Ok(())
    }

    /// Unpower and unmount a root node.
    pub fn unmount(&self) -> Result<(), TreeError> {
        if self.parent().is_some() || !self.is_mounted() {
            return Ok(());
        }
        if self.is_powered() {
            self.cascade_unpower()?;
        }
        self.cascade_unmount()
    }

    // =========================================================================
    // Update Requests
    // =========================================================================

    /// Mark this node dirty with `flags` and notify its ancestors.
    pub fn require_update(&self, flags: FlagSet) {
        self.require_update_with(flags, false);
    }

    /// Like [`Node::require_update`], but asks the scheduler to run a pass
    /// right away when it can.
    pub fn require_update_immediate(&self, flags: FlagSet) {
        self.require_update_with(flags, true);
    }

    fn require_update_with(&self, flags: FlagSet, immediate: bool) {
        let delta = (flags & FlagSet::UPDATE_MASK) - self.flags();
        if !delta.is_empty() || immediate {
            self.insert_flags(delta);
            self.request_update(self, delta, immediate);
        }
    }

    /// Forward an update request from `target` (this node or a descendant)
    /// towards the scheduler.
    pub fn request_update(&self, target: &Node, flags: FlagSet, immediate: bool) {
        let flags = flags & FlagSet::UPDATE_MASK;
        let additional = self.inner.behavior.modify_update(self, target, flags) & FlagSet::UPDATE_MASK;
        let delta = additional - self.flags();
        if delta.is_empty() && !immediate {
            return;
        }
        self.insert_flags(delta);

        let flags = flags | additional;
        match self.parent() {
            Some(parent) => parent.request_update(target, flags, immediate),
            None if self.is_mounted() => {
                if let Some(scheduler) = self.scheduler() {
                    scheduler.request_update(target, flags, immediate);
                }
            }
            None => {}
        }
    }

    // =========================================================================
    // Scheduler
    // =========================================================================

    /// The scheduler this node's updates are driven by.
    ///
    /// Inherited from the nearest ancestor; a root without an explicit
    /// scheduler uses [`Scheduler::shared`].
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.service::<Scheduler>(SCHEDULER_SERVICE)
            .map(|service| service.manager())
    }

    /// Drive this node (and, for a root, its subtree) with `scheduler`.
    pub fn set_scheduler(&self, scheduler: &Scheduler) {
        let Some(service) = self.service::<Scheduler>(SCHEDULER_SERVICE) else {
            return;
        };
        let registered = self.is_root() && self.is_mounted();
        if registered {
            let current = service.manager();
            if current == *scheduler {
                service.set_manager(scheduler.clone());
                return;
            }
            current.remove_root(self);
        }
        service.set_manager(scheduler.clone());
        if registered {
            scheduler.insert_root(self);
        }
    }

    // =========================================================================
    // Attachments (scopes, services, collaborator hooks)
    // =========================================================================

    /// Look up an already materialized attachment.
    pub fn attachment(&self, name: &str) -> Option<Rc<dyn Attachment>> {
        self.inner
            .attachments
            .borrow()
            .iter()
            .find(|attachment| attachment.name() == name)
            .cloned()
    }

    /// Snapshot of every materialized attachment.
    pub fn attachments(&self) -> Vec<Rc<dyn Attachment>> {
        self.inner.attachments.borrow().clone()
    }

    /// Install an attachment, replacing one with the same name.
    ///
    /// The attachment is bound right away when the node is mounted.
    pub fn set_attachment(&self, attachment: Rc<dyn Attachment>) {
        let old = {
            let mut attachments = self.inner.attachments.borrow_mut();
            let position = attachments
                .iter()
                .position(|existing| existing.name() == attachment.name());
            match position {
                Some(index) => Some(std::mem::replace(&mut attachments[index], attachment.clone())),
                None => {
                    attachments.push(attachment.clone());
                    None
                }
            }
        };
        if self.is_mounted() {
            if let Some(old) = old {
                old.unmount(self);
            }
            attachment.mount(self);
            if self.is_powered() {
                attachment.power(self);
            }
        }
    }

    /// Field declaration for `name`, from the behavior or the core table.
    pub fn field(&self, name: &str) -> Option<FieldDescriptor> {
        self.inner
            .behavior
            .fields()
            .get(name)
            .or_else(|| crate::engine::FieldTable::core().get(name))
            .cloned()
    }

    /// Return the attachment named `name`, creating it from its declaration
    /// if needed.
    pub fn materialize(&self, name: &str) -> Option<Rc<dyn Attachment>> {
        if let Some(existing) = self.attachment(name) {
            return Some(existing);
        }
        let Some(field) = self.field(name) else {
            tracing::debug!(node = %self, field = name, "no declaration for field");
            return None;
        };
        tracing::trace!(node = %self, field = name, "materializing field");
        let attachment = field.instantiate(self);
        self.set_attachment(attachment.clone());
        Some(attachment)
    }

    /// The scope named `name` holding values of type `T`.
    pub fn scope<T>(&self, name: &str) -> Option<Scope<T>>
    where
        T: Clone + PartialEq + 'static,
    {
        let attachment = self.materialize(name)?;
        let scope = Scope::from_attachment(attachment);
        if scope.is_none() {
            tracing::debug!(node = %self, field = name, "attachment is not a scope of the requested type");
        }
        scope
    }

    /// Define a scope at runtime without a table declaration.
    ///
    /// Returns the existing scope if one of the same name and type exists.
    pub fn define_scope<T>(&self, name: &str, inherits: impl Into<Inherits>, value: T) -> Scope<T>
    where
        T: Clone + PartialEq + 'static,
    {
        if let Some(existing) = self.attachment(name).and_then(Scope::from_attachment) {
            return existing;
        }
        let scope = Scope::new(self, name, inherits.into(), value);
        self.set_attachment(scope.clone().into_attachment());
        scope
    }

    /// The service named `name` managing resources of type `M`.
    pub fn service<M>(&self, name: &str) -> Option<Service<M>>
    where
        M: Clone + PartialEq + 'static,
    {
        let attachment = self.materialize(name)?;
        let service = Service::from_attachment(attachment);
        if service.is_none() {
            tracing::debug!(node = %self, field = name, "attachment is not a service of the requested type");
        }
        service
    }

    /// Define a service at runtime without a table declaration.
    pub fn define_service<M>(&self, name: &str, inherits: impl Into<Inherits>, manager: M) -> Service<M>
    where
        M: Clone + PartialEq + 'static,
    {
        if let Some(existing) = self.attachment(name).and_then(Service::from_attachment) {
            return existing;
        }
        let service = Service::new(self, name, inherits.into(), manager);
        self.set_attachment(service.clone().into_attachment());
        service
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn observe(&self, observer: Rc<dyn NodeObserver>) {
        let mut observers = self.inner.observers.borrow_mut();
        if !observers.iter().any(|existing| Rc::ptr_eq(existing, &observer)) {
            observers.push(observer);
        }
    }

    pub fn unobserve(&self, observer: &Rc<dyn NodeObserver>) {
        self.inner
            .observers
            .borrow_mut()
            .retain(|existing| !Rc::ptr_eq(existing, observer));
    }

    pub(crate) fn notify_observers(&self, notify: impl Fn(&dyn NodeObserver)) {
        let observers = self.inner.observers.borrow().clone();
        for observer in &observers {
            notify(observer.as_ref());
        }
    }

    // =========================================================================
    // Consumers
    // =========================================================================

    /// Register a consumer. The first consumer of a mounted node starts it
    /// consuming.
    pub fn consume(&self, consumer: Rc<dyn Any>) {
        let count = {
            let mut consumers = self.inner.consumers.borrow_mut();
            if consumers.iter().any(|existing| Rc::ptr_eq(existing, &consumer)) {
                return;
            }
            consumers.push(consumer);
            consumers.len()
        };
        if count == 1 && self.is_mounted() {
            self.start_consuming();
        }
    }

    /// Deregister a consumer. Removing the last one stops consumption.
    pub fn unconsume(&self, consumer: &Rc<dyn Any>) {
        let remaining = {
            let mut consumers = self.inner.consumers.borrow_mut();
            let before = consumers.len();
            consumers.retain(|existing| !Rc::ptr_eq(existing, consumer));
            if consumers.len() == before {
                return;
            }
            consumers.len()
        };
        if remaining == 0 {
            self.stop_consuming();
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.inner.consumers.borrow().len()
    }

    pub(crate) fn start_consuming(&self) {
        if self.is_consuming() {
            return;
        }
        let behavior = &self.inner.behavior;
        behavior.will_start_consuming(self);
        self.notify_observers(|o| o.node_will_start_consuming(self));
        self.insert_flags(FlagSet::CONSUMING);
        self.require_update(behavior.start_consuming_flags());
        behavior.did_start_consuming(self);
        self.notify_observers(|o| o.node_did_start_consuming(self));
    }

    pub(crate) fn stop_consuming(&self) {
        if !self.is_consuming() {
            return;
        }
        let behavior = &self.inner.behavior;
        behavior.will_stop_consuming(self);
        self.notify_observers(|o| o.node_will_stop_consuming(self));
        self.remove_flags(FlagSet::CONSUMING);
        self.require_update(behavior.stop_consuming_flags());
        behavior.did_stop_consuming(self);
        self.notify_observers(|o| o.node_did_stop_consuming(self));
    }

    // =========================================================================
    // Structural Hooks
    // =========================================================================

    fn will_attach_parent(&self, parent: &Node) {
        self.inner.behavior.will_attach_parent(self, parent);
        self.notify_observers(|o| o.node_will_attach_parent(self, parent));
    }

    fn did_attach_parent(&self, parent: &Node) {
        self.inner.behavior.did_attach_parent(self, parent);
        self.notify_observers(|o| o.node_did_attach_parent(self, parent));
    }

    fn will_detach_parent(&self, parent: &Node) {
        self.inner.behavior.will_detach_parent(self, parent);
        self.notify_observers(|o| o.node_will_detach_parent(self, parent));
    }

    fn did_detach_parent(&self, parent: &Node) {
        self.inner.behavior.did_detach_parent(self, parent);
        self.notify_observers(|o| o.node_did_detach_parent(self, parent));
    }

    fn will_insert_child(&self, child: &Node, target: Option<&Node>) {
        self.inner.behavior.will_insert_child(self, child, target);
        self.notify_observers(|o| o.node_will_insert_child(self, child, target));
    }

    fn on_insert_child(&self, child: &Node, target: Option<&Node>) {
        let behavior = &self.inner.behavior;
        behavior.on_insert_child(self, child, target);
        self.require_update(behavior.insert_child_flags());
    }

    fn did_insert_child(&self, child: &Node, target: Option<&Node>) {
        self.inner.behavior.did_insert_child(self, child, target);
        self.notify_observers(|o| o.node_did_insert_child(self, child, target));
    }

    fn will_remove_child(&self, child: &Node) {
        self.inner.behavior.will_remove_child(self, child);
        self.notify_observers(|o| o.node_will_remove_child(self, child));
    }

    fn on_remove_child(&self, child: &Node) {
        let behavior = &self.inner.behavior;
        behavior.on_remove_child(self, child);
        self.require_update(behavior.remove_child_flags());
    }

    fn did_remove_child(&self, child: &Node) {
        self.inner.behavior.did_remove_child(self, child);
        self.notify_observers(|o| o.node_did_remove_child(self, child));
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.key.borrow().as_deref() {
            Some(key) => write!(f, "node \"{key}\""),
            None => write!(f, "node@{:p}", Rc::as_ptr(&self.inner)),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.inner.key.borrow())
            .field("flags", &self.flags())
            .field("children", &self.child_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
