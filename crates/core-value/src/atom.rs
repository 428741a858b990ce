//! Atoms: globally unique names. Method identifiers, object-type field
//! keys, and error keys are all atoms.
//!
//! Atoms compare by identity; the name is diagnostic and serializer-visible
//! but two atoms of the same name are still distinct values unless one cell
//! is reached twice. The serializer preserves in-process identity through
//! the runtime's atom index.

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed, new_immutable};
use crate::types;
use crate::Value;

#[derive(Debug, Clone)]
pub struct AtomData {
    pub name: String,
    /// Module that issued the atom, when issued during a load.
    pub issuer: Option<String>,
    /// Special atoms (the booleans, the runtime's own keys) refuse method
    /// redefinition; the loader surfaces this as the special-atom error
    /// code.
    pub special: bool,
}

struct AtomDescriptor {
    data: AtomData,
}

impl Descriptor for AtomDescriptor {
    fn tag(&self) -> Tag {
        Tag::Atom
    }

    fn kind(&self, _this: &Value) -> Value {
        types::atom_type()
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        // Name-keyed for serializer determinism; identity still separates
        // same-named atoms through equality.
        let mut h = hash_seed(Tag::Atom);
        for b in self.data.name.bytes() {
            h = hash_combine(h, b as u32);
        }
        h
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        other.tag() == Tag::Atom && this.same_identity_as(other)
    }

    fn atom_data(&self) -> Option<&AtomData> {
        Some(&self.data)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.data.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Mint a fresh atom. Every call produces a distinct value, even for a
/// repeated name.
pub fn fresh_atom(name: impl Into<String>) -> Value {
    new_immutable(AtomDescriptor {
        data: AtomData {
            name: name.into(),
            issuer: None,
            special: false,
        },
    })
}

/// Mint a fresh atom recording its issuing module.
pub fn atom_for_module(name: impl Into<String>, issuer: impl Into<String>) -> Value {
    new_immutable(AtomDescriptor {
        data: AtomData {
            name: name.into(),
            issuer: Some(issuer.into()),
            special: false,
        },
    })
}

fn special_atom(name: &str) -> Value {
    new_immutable(AtomDescriptor {
        data: AtomData {
            name: name.to_owned(),
            issuer: None,
            special: true,
        },
    })
    .make_shared()
}

/// The canonical true value.
pub fn true_value() -> Value {
    static TRUE: OnceLock<Value> = OnceLock::new();
    TRUE.get_or_init(|| special_atom("true")).clone()
}

/// The canonical false value.
pub fn false_value() -> Value {
    static FALSE: OnceLock<Value> = OnceLock::new();
    FALSE.get_or_init(|| special_atom("false")).clone()
}

pub fn boolean(flag: bool) -> Value {
    if flag { true_value() } else { false_value() }
}

pub fn name_of(atom: &Value) -> Option<String> {
    atom.descriptor().atom_data().map(|d| d.name.clone())
}

pub fn is_special(atom: &Value) -> bool {
    atom.descriptor()
        .atom_data()
        .map(|d| d.special)
        .unwrap_or(false)
}
