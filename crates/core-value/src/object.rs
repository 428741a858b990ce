//! Object descriptor: a record of field atoms to field values.
//!
//! Objects are the user-visible record values; their types map each field
//! atom to a field type and subtype structurally (width and depth).

use std::any::Any;
use std::fmt;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed, new_value};
use crate::types;
use crate::Value;

pub struct ObjectPayload {
    /// Sorted by field-atom name for deterministic iteration.
    fields: Vec<(Value, Value)>,
}

impl ObjectPayload {
    pub fn field(&self, atom: &Value) -> Option<Value> {
        self.fields
            .iter()
            .find(|(field_atom, _)| field_atom.equals(atom))
            .map(|(_, value)| value.clone())
    }

    pub fn fields(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

struct ObjectDescriptor {
    payload: ObjectPayload,
}

impl Descriptor for ObjectDescriptor {
    fn tag(&self) -> Tag {
        Tag::Object
    }

    fn kind(&self, _this: &Value) -> Value {
        types::object_type(
            self.payload
                .fields()
                .map(|(atom, value)| (atom.clone(), value.kind()))
                .collect(),
        )
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        let mut acc = 0u32;
        for (atom, value) in self.payload.fields() {
            acc = acc.wrapping_add(hash_combine(atom.hash_value(), value.hash_value()));
        }
        hash_combine(hash_seed(Tag::Object), acc)
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        let other_descriptor = other.descriptor();
        let Some(peer) = other_descriptor.object_payload() else {
            return false;
        };
        peer.len() == self.payload.len()
            && self
                .payload
                .fields()
                .all(|(atom, value)| peer.field(atom).is_some_and(|v| v.equals(value)))
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        for (atom, value) in self.payload.fields() {
            visit(atom);
            visit(value);
        }
    }

    fn object_payload(&self) -> Option<&ObjectPayload> {
        Some(&self.payload)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object[{}]", self.payload.len())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Build an object from field bindings. Later bindings of an equal atom
/// win; fields sort by atom name as in the corresponding object types.
pub fn object_from_fields(fields: Vec<(Value, Value)>) -> Value {
    let mut merged: Vec<(Value, Value)> = Vec::with_capacity(fields.len());
    for (atom, value) in fields {
        match merged.iter_mut().find(|(seen, _)| seen.equals(&atom)) {
            Some((_, slot)) => *slot = value,
            None => merged.push((atom.make_immutable(), value)),
        }
    }
    merged.sort_by(|(a, _), (b, _)| {
        let name_a = crate::atom::name_of(a).unwrap_or_default();
        let name_b = crate::atom::name_of(b).unwrap_or_default();
        name_a
            .cmp(&name_b)
            .then_with(|| a.hash_value().cmp(&b.hash_value()))
    });
    new_value(ObjectDescriptor {
        payload: ObjectPayload { fields: merged },
    })
}

pub fn object_field(object: &Value, atom: &Value) -> Option<Value> {
    object
        .traversed()
        .descriptor()
        .object_payload()
        .expect("field of object")
        .field(atom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{atom, scalar};

    #[test]
    fn field_access_and_equality() {
        let x = atom::fresh_atom("x");
        let y = atom::fresh_atom("y");
        let a = object_from_fields(vec![
            (x.clone(), scalar::integer(1)),
            (y.clone(), scalar::integer(2)),
        ]);
        let b = object_from_fields(vec![
            (y.clone(), scalar::integer(2)),
            (x.clone(), scalar::integer(1)),
        ]);
        assert!(a.equals(&b));
        assert_eq!(a.hash_value(), b.hash_value());
        assert!(object_field(&a, &x).unwrap().equals(&scalar::integer(1)));
    }

    #[test]
    fn object_types_subtype_by_width() {
        let x = atom::fresh_atom("x");
        let y = atom::fresh_atom("y");
        let instance = object_from_fields(vec![
            (x.clone(), scalar::integer(1)),
            (y.clone(), scalar::integer(2)),
        ]);
        let narrow = types::object_type(vec![(x.clone(), types::integers())]);
        assert!(instance.is_instance_of(&narrow));
        assert!(instance.kind().is_subtype_of(&narrow));
    }
}
