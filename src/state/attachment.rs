//! Attachment trait - anything a node carries that follows its lifecycle.

use std::any::Any;
use std::rc::Rc;

use crate::engine::Node;

/// A named per-node cell that is notified of the owner's lifecycle.
///
/// Scopes and services are attachments. Embedders can install their own
/// with [`Node::set_attachment`] to hook the same transitions.
#[allow(unused_variables)]
pub trait Attachment: 'static {
    fn name(&self) -> &str;

    /// The owner mounted, or the attachment was installed on a mounted owner.
    fn mount(&self, owner: &Node) {}

    /// The owner unmounted.
    fn unmount(&self, owner: &Node) {}

    fn power(&self, owner: &Node) {}

    fn unpower(&self, owner: &Node) {}

    /// The owner's mutate stage finished.
    fn did_mutate(&self, owner: &Node) {}

    /// Upcast for downcasting to the concrete cell type.
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}
