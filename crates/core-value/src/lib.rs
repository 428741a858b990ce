//! core-value: the uniform value representation and the structural type
//! lattice.
//!
//! Every runtime value is a cheaply clonable handle to a heap cell. The cell
//! carries three things: a swappable *descriptor* (a trait object owning both
//! the payload and the polymorphic behavior), a one-way mutability state, and
//! a lazily computed hash. Swapping the descriptor changes representation
//! (including collapsing into an indirection to a better-represented equal
//! value) without changing identity, because identity is the cell.
//!
//! Mutability transitions are strictly one-way:
//! mutable → immutable → shared. An immutable value may be freely aliased
//! within a fiber; a shared value may be observed by many fibers and must be
//! reached only through synchronized structures (variables, method sets).
//!
//! Equality is double-dispatched through the descriptors so that mixed
//! representations of the same logical content (a byte string and an object
//! tuple of characters, say) compare equal; on a successful comparison the
//! worse-represented side becomes an indirection to the better one.
//!
//! The type lattice lives in [`types`]; types are themselves values carrying
//! a `TypeDescriptor`.

pub mod atom;
pub mod descriptor;
pub mod map;
pub mod object;
pub mod phrase;
pub mod scalar;
pub mod set;
pub mod tuple;
pub mod types;
pub mod variable;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use descriptor::{Descriptor, Tag};

pub use atom::AtomData;
pub use descriptor::Numeric;
pub use phrase::{DeclarationKind, PhraseData};
pub use types::{ExtInt, KindError, PhraseTypeKind, RangeData, SimpleKind, TypeData};
pub use variable::VariableAccessError;

/// One-way lifecycle of a value cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Mutability {
    /// Uniquely owned, freely updatable in place.
    Mutable = 0,
    /// Aliased within one fiber; no in-place updates.
    Immutable = 1,
    /// Visible to more than one fiber; updates only through synchronized
    /// carriers.
    Shared = 2,
}

impl Mutability {
    fn from_u8(raw: u8) -> Mutability {
        match raw {
            0 => Mutability::Mutable,
            1 => Mutability::Immutable,
            _ => Mutability::Shared,
        }
    }
}

/// Sentinel meaning "hash not yet computed". A real hash that collides with
/// the sentinel is remapped in [`Value::hash_value`].
const HASH_UNSET: u32 = 0;
const HASH_SUBSTITUTE: u32 = 0x5050_5050;

struct ValueCell {
    mutability: AtomicU8,
    cached_hash: AtomicU32,
    descriptor: RwLock<Arc<dyn Descriptor>>,
}

/// A handle to one runtime value. Clones share the cell.
#[derive(Clone)]
pub struct Value {
    cell: Arc<ValueCell>,
}

impl Value {
    /// Wrap a freshly built descriptor in a new cell.
    pub fn with_descriptor(mutability: Mutability, descriptor: Arc<dyn Descriptor>) -> Value {
        Value {
            cell: Arc::new(ValueCell {
                mutability: AtomicU8::new(mutability as u8),
                cached_hash: AtomicU32::new(HASH_UNSET),
                descriptor: RwLock::new(descriptor),
            }),
        }
    }

    /// The current descriptor. Callers must not hold the returned `Arc`
    /// across a representation switch they themselves trigger.
    pub fn descriptor(&self) -> Arc<dyn Descriptor> {
        self.cell
            .descriptor
            .read()
            .expect("descriptor lock poisoned")
            .clone()
    }

    pub fn tag(&self) -> Tag {
        self.descriptor().tag()
    }

    /// Follow indirection descriptors to the canonical representative.
    /// Idempotent: the result never carries an indirection descriptor.
    pub fn traversed(&self) -> Value {
        let mut current = self.clone();
        loop {
            let next = match current.descriptor().indirection_target() {
                Some(target) => target,
                None => return current,
            };
            current = next;
        }
    }

    /// Identity: same canonical cell.
    pub fn same_identity_as(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.traversed().cell, &other.traversed().cell)
    }

    pub fn mutability(&self) -> Mutability {
        Mutability::from_u8(self.cell.mutability.load(Ordering::Acquire))
    }

    pub fn is_mutable(&self) -> bool {
        self.mutability() == Mutability::Mutable
    }

    pub fn is_shared(&self) -> bool {
        self.mutability() == Mutability::Shared
    }

    /// Freeze this value and everything reachable from it. Returns the
    /// receiver for chaining. Safe on cyclic structures: the state is
    /// advanced before children are visited.
    pub fn make_immutable(&self) -> Value {
        if self.mutability() == Mutability::Mutable {
            self.cell
                .mutability
                .store(Mutability::Immutable as u8, Ordering::Release);
            let descriptor = self.descriptor();
            descriptor.visit_children(&mut |child| {
                child.make_immutable();
            });
        }
        self.clone()
    }

    /// Promote this value and everything reachable from it to the shared
    /// state, required before the value crosses a fiber boundary.
    pub fn make_shared(&self) -> Value {
        if self.mutability() != Mutability::Shared {
            self.cell
                .mutability
                .store(Mutability::Shared as u8, Ordering::Release);
            let descriptor = self.descriptor();
            descriptor.visit_children(&mut |child| {
                child.make_shared();
            });
        }
        self.clone()
    }

    /// A value that may be updated in place: the receiver itself when it is
    /// still mutable, otherwise a mutable copy produced by the descriptor.
    pub fn ensure_mutable(&self) -> Value {
        let canonical = self.traversed();
        if canonical.is_mutable() {
            canonical
        } else {
            let descriptor = canonical.descriptor();
            descriptor.copy_mutable(&canonical)
        }
    }

    /// The value's type.
    pub fn kind(&self) -> Value {
        let canonical = self.traversed();
        let descriptor = canonical.descriptor();
        descriptor.kind(&canonical)
    }

    /// Content hash, stable across representation switches and frozen once
    /// the value is no longer mutable.
    pub fn hash_value(&self) -> u32 {
        let canonical = self.traversed();
        if canonical.mutability() == Mutability::Mutable {
            // Content may still change; do not cache.
            return canonical.compute_hash();
        }
        let cached = canonical.cell.cached_hash.load(Ordering::Acquire);
        if cached != HASH_UNSET {
            return cached;
        }
        let mut computed = canonical.compute_hash();
        if computed == HASH_UNSET {
            computed = HASH_SUBSTITUTE;
        }
        canonical
            .cell
            .cached_hash
            .store(computed, Ordering::Release);
        computed
    }

    fn compute_hash(&self) -> u32 {
        let descriptor = self.descriptor();
        descriptor.hash_value(self)
    }

    /// Logical equality, double-dispatched through the descriptors. Equal
    /// values of different representations may canonicalize as a side
    /// effect.
    pub fn equals(&self, other: &Value) -> bool {
        let a = self.traversed();
        let b = other.traversed();
        if Arc::ptr_eq(&a.cell, &b.cell) {
            return true;
        }
        let descriptor = a.descriptor();
        descriptor.equals(&a, &b)
    }

    /// Replace this cell's behavior with an indirection to `canonical`.
    /// Shared cells are left alone: another fiber may be mid-read.
    pub fn become_indirection_to(&self, canonical: &Value) {
        if Arc::ptr_eq(&self.cell, &canonical.cell) || self.is_shared() {
            return;
        }
        tracing::trace!(target: "value.repr", from = ?self.tag(), "indirection installed");
        let indirection = descriptor::IndirectionDescriptor::new(canonical.clone());
        *self
            .cell
            .descriptor
            .write()
            .expect("descriptor lock poisoned") = indirection;
    }

    /// Swap in a different descriptor of the same logical content (a
    /// representation change, not a semantic one).
    pub fn change_descriptor(&self, replacement: Arc<dyn Descriptor>) {
        *self
            .cell
            .descriptor
            .write()
            .expect("descriptor lock poisoned") = replacement;
    }

    // ---------------------------------------------------------------------
    // Type lattice forwarding (see `types::lattice`).
    // ---------------------------------------------------------------------

    pub fn is_type(&self) -> bool {
        self.descriptor().type_data().is_some()
    }

    pub fn is_subtype_of(&self, other: &Value) -> bool {
        types::lattice::is_subtype(self, other)
    }

    pub fn type_union(&self, other: &Value) -> Value {
        types::lattice::union(self, other)
    }

    pub fn type_intersection(&self, other: &Value) -> Value {
        types::lattice::intersection(self, other)
    }

    /// Membership test: is this value an instance of the given type?
    pub fn is_instance_of(&self, ty: &Value) -> bool {
        types::lattice::is_instance(self, ty)
    }

    // ---------------------------------------------------------------------
    // Common shape probes.
    // ---------------------------------------------------------------------

    pub fn is_nil(&self) -> bool {
        self.tag() == Tag::Nil
    }

    pub fn is_atom(&self) -> bool {
        self.tag() == Tag::Atom
    }

    pub fn is_tuple(&self) -> bool {
        self.descriptor().tuple_len().is_some()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.equals(other)
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_value());
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let canonical = self.traversed();
        let descriptor = canonical.descriptor();
        descriptor.describe(&canonical, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mutability_transitions_are_one_way() {
        let t = tuple::tuple_from_values(vec![scalar::integer(1), scalar::integer(2)]);
        assert_eq!(t.mutability(), Mutability::Mutable);
        t.make_immutable();
        assert_eq!(t.mutability(), Mutability::Immutable);
        t.make_shared();
        assert_eq!(t.mutability(), Mutability::Shared);
        // A second freeze is a no-op, never a regression.
        t.make_immutable();
        assert_eq!(t.mutability(), Mutability::Shared);
    }

    #[test]
    fn make_immutable_reaches_children() {
        let inner = tuple::tuple_from_values(vec![scalar::integer(7)]);
        let outer = tuple::tuple_from_values(vec![inner.clone()]);
        outer.make_immutable();
        assert_eq!(inner.mutability(), Mutability::Immutable);
    }

    #[test]
    fn hash_is_frozen_after_freeze() {
        let t = tuple::tuple_from_values(vec![scalar::integer(3)]).make_immutable();
        let before = t.hash_value();
        assert_eq!(before, t.hash_value());
    }

    #[test]
    fn identity_survives_indirection() {
        let a = tuple::byte_string("abc");
        let b = tuple::tuple_from_values(vec![
            scalar::character('a'),
            scalar::character('b'),
            scalar::character('c'),
        ]);
        assert!(a.equals(&b));
        // Whichever side collapsed, both handles still denote one value.
        assert!(a.same_identity_as(&b));
    }

    #[test]
    fn ensure_mutable_copies_frozen_tuples() {
        let t = tuple::tuple_from_values(vec![scalar::integer(1)]).make_immutable();
        let copy = t.ensure_mutable();
        assert!(copy.is_mutable());
        assert!(copy.equals(&t));
        assert!(!copy.same_identity_as(&t));
    }
}
