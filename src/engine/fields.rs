//! Field Table - Declared scopes and services per behavior type.
//!
//! A behavior type declares its reactive fields once, in a static table:
//!
//! ```ignore
//! use std::sync::LazyLock;
//! use spark_model::{FieldTable, Inherits, NodeBehavior};
//!
//! static PANEL_FIELDS: LazyLock<FieldTable> = LazyLock::new(|| {
//!     FieldTable::new()
//!         .scope::<u8>("depth", Inherits::None, || 0)
//!         .scope::<String>("theme", Inherits::Same, || "light".to_string())
//! });
//!
//! struct Panel;
//!
//! impl NodeBehavior for Panel {
//!     fn fields(&self) -> &FieldTable {
//!         &PANEL_FIELDS
//!     }
//! }
//! ```
//!
//! Nodes materialize a declared cell the first time something asks for it,
//! either the node itself or a descendant resolving its inheritance chain.

use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

use crate::engine::Node;
use crate::pipeline::Scheduler;
use crate::state::{Attachment, Scope, Service};
use crate::types::Inherits;

/// Name of the service every node uses to reach its scheduler.
pub const SCHEDULER_SERVICE: &str = "scheduler";

type Initializer = Arc<dyn Fn(&Node, &FieldDescriptor) -> Rc<dyn Attachment> + Send + Sync>;

// =============================================================================
// Field Descriptor
// =============================================================================

/// What kind of cell a field materializes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Scope,
    Service,
}

/// One declared field: name, kind, inheritance selector and initializer.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub inherits: Inherits,
    init: Initializer,
}

impl FieldDescriptor {
    /// Build the cell for `owner`.
    pub fn instantiate(&self, owner: &Node) -> Rc<dyn Attachment> {
        (self.init)(owner, self)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inherits", &self.inherits)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Field Table
// =============================================================================

/// Ordered set of field declarations for one behavior type.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    fields: Vec<FieldDescriptor>,
}

static EMPTY_FIELDS: FieldTable = FieldTable::new();

static CORE_FIELDS: LazyLock<FieldTable> = LazyLock::new(|| {
    FieldTable::new().service::<Scheduler>(SCHEDULER_SERVICE, Inherits::Same, Scheduler::shared)
});

impl FieldTable {
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// The table used by behaviors that declare nothing.
    pub fn empty() -> &'static Self {
        &EMPTY_FIELDS
    }

    /// Fields every node carries regardless of behavior.
    pub fn core() -> &'static Self {
        &CORE_FIELDS
    }

    /// Copy every declaration of `base` into this table.
    ///
    /// Declarations already present here win, so a derived table can
    /// redeclare a base field with a different initializer.
    pub fn extend(mut self, base: &Self) -> Self {
        for field in &base.fields {
            if self.get(&field.name).is_none() {
                self.fields.push(field.clone());
            }
        }
        self
    }

    /// Declare a scope holding values of type `T`.
    pub fn scope<T>(self, name: &str, inherits: impl Into<Inherits>, init: fn() -> T) -> Self
    where
        T: Clone + PartialEq + 'static,
    {
        let init: Initializer = Arc::new(move |owner: &Node, field: &FieldDescriptor| {
            Scope::new(owner, &field.name, field.inherits.clone(), init()).into_attachment()
        });
        self.declare(name, FieldKind::Scope, inherits.into(), init)
    }

    /// Declare a service managing a shared resource of type `M`.
    pub fn service<M>(self, name: &str, inherits: impl Into<Inherits>, init: fn() -> M) -> Self
    where
        M: Clone + PartialEq + 'static,
    {
        let init: Initializer = Arc::new(move |owner: &Node, field: &FieldDescriptor| {
            Service::new(owner, &field.name, field.inherits.clone(), init()).into_attachment()
        });
        self.declare(name, FieldKind::Service, inherits.into(), init)
    }

    fn declare(mut self, name: &str, kind: FieldKind, inherits: Inherits, init: Initializer) -> Self {
        let field = FieldDescriptor {
            name: name.to_string(),
            kind,
            inherits,
            init,
        };
        match self.fields.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
