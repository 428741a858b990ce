//! The descriptor protocol: one trait, implemented per variant.
//!
//! Operations are declared once, here. Each descriptor implements the subset
//! that applies to its variant; everything else falls through to a default
//! that either answers "not this shape" (`Option::None`) or panics with a
//! named unsupported-operation diagnostic, which is the internal-error
//! surface (the fiber scheduler converts such panics into a single fiber's
//! termination).
//!
//! Cross-crate extension: `core-code` adds function and code descriptors,
//! `core-exec` adds continuation and fiber descriptors. They implement this
//! trait and are downcast where their concrete payload is needed via
//! [`Descriptor::as_any`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::atom::AtomData;
use crate::map::MapPayload;
use crate::object::ObjectPayload;
use crate::phrase::PhraseData;
use crate::set::SetPayload;
use crate::types::TypeData;
use crate::variable::VariablePayload;
use crate::{Mutability, Value};

/// Variant tag. Closed within the runtime; descriptors from other crates
/// reuse the tags named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Nil,
    Integer,
    Infinity,
    Double,
    Character,
    Atom,
    Tuple,
    Map,
    Set,
    Object,
    Variable,
    Phrase,
    Type,
    RawFunction,
    Function,
    Continuation,
    Fiber,
    Indirection,
}

/// Scalar payload view used by numeric double-dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Integer(i64),
    Infinity { positive: bool },
    Double(f64),
    Character(char),
}

pub trait Descriptor: Send + Sync + 'static {
    fn tag(&self) -> Tag;

    /// The type of the value this descriptor carries.
    fn kind(&self, this: &Value) -> Value;

    /// Content hash. Must agree across all representations of the same
    /// logical content.
    fn hash_value(&self, this: &Value) -> u32;

    /// Double-dispatched equality. `this` and `other` are both canonical
    /// (already traversed).
    fn equals(&self, this: &Value, other: &Value) -> bool;

    /// Visit every value directly referenced by the payload. Used by the
    /// deep mutability transitions and by the serializer's reachability
    /// walk.
    fn visit_children(&self, _visit: &mut dyn FnMut(&Value)) {}

    /// Produce a mutable copy of `this`. Only variants that support
    /// copy-on-write (tuples, maps, sets, continuations) implement it.
    fn copy_mutable(&self, _this: &Value) -> Value {
        panic!("unsupported operation `copy_mutable` on {:?}", self.tag());
    }

    /// Representation quality vote used on successful equality: answer true
    /// when this representation should become the canonical one.
    fn is_better_representation_than(&self, _other: &dyn Descriptor) -> bool {
        false
    }

    fn describe(&self, this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let _ = this;
        write!(f, "«{:?}»", self.tag())
    }

    fn as_any(&self) -> &dyn Any;

    // ---------------------------------------------------------------------
    // Shape views. Defaults answer "not this shape".
    // ---------------------------------------------------------------------

    /// Tuple length, in elements, when this value is tuple-like.
    fn tuple_len(&self) -> Option<usize> {
        None
    }

    /// One-based tuple subscript. `None` when not tuple-like; out-of-range
    /// subscripts on tuple-like values panic (caller contract).
    fn tuple_at(&self, _index: usize) -> Option<Value> {
        None
    }

    fn map_payload(&self) -> Option<&MapPayload> {
        None
    }

    fn object_payload(&self) -> Option<&ObjectPayload> {
        None
    }

    fn set_payload(&self) -> Option<&SetPayload> {
        None
    }

    fn type_data(&self) -> Option<Arc<TypeData>> {
        None
    }

    fn atom_data(&self) -> Option<&AtomData> {
        None
    }

    fn numeric(&self) -> Option<Numeric> {
        None
    }

    fn variable_payload(&self) -> Option<&VariablePayload> {
        None
    }

    fn phrase_data(&self) -> Option<&PhraseData> {
        None
    }

    fn indirection_target(&self) -> Option<Value> {
        None
    }
}

/// Transparent forwarding to a canonical representative. Installed when an
/// equality comparison finds a better representation of the same content.
pub struct IndirectionDescriptor {
    target: Value,
}

impl IndirectionDescriptor {
    pub fn new(target: Value) -> Arc<dyn Descriptor> {
        Arc::new(IndirectionDescriptor { target })
    }
}

impl Descriptor for IndirectionDescriptor {
    fn tag(&self) -> Tag {
        Tag::Indirection
    }

    fn kind(&self, _this: &Value) -> Value {
        self.target.kind()
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        self.target.hash_value()
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        self.target.equals(other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        visit(&self.target);
    }

    fn indirection_target(&self) -> Option<Value> {
        Some(self.target.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// -------------------------------------------------------------------------
// Hash plumbing shared by the descriptor implementations.
// -------------------------------------------------------------------------

/// Mix one more component into a running content hash. Multiplicative mixing
/// keeps element order significant.
pub fn hash_combine(running: u32, next: u32) -> u32 {
    running
        .rotate_left(5)
        .wrapping_mul(0x9E37_79B9)
        .wrapping_add(next ^ 0x85EB_CA6B)
}

/// Seed for aggregate hashes, keyed by variant so that, say, the empty tuple
/// and the empty set disagree.
pub fn hash_seed(tag: Tag) -> u32 {
    hash_combine(0x6B43_A9B5, tag as u32 + 1)
}

/// Convenience for building a fresh mutable cell.
pub fn new_value(descriptor: impl Descriptor) -> Value {
    Value::with_descriptor(Mutability::Mutable, Arc::new(descriptor))
}

/// Convenience for building a fresh immutable cell (scalars, types, atoms:
/// anything born frozen).
pub fn new_immutable(descriptor: impl Descriptor) -> Value {
    Value::with_descriptor(Mutability::Immutable, Arc::new(descriptor))
}
