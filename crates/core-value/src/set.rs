//! Set descriptor: a hashed collection of distinct values.

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;

use ahash::AHashMap;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed, new_value};
use crate::types;
use crate::Value;

pub struct SetPayload {
    items: Vec<Value>,
    index: AHashMap<Value, usize>,
}

impl SetPayload {
    fn from_items(items: Vec<Value>) -> SetPayload {
        let mut index = AHashMap::with_capacity(items.len());
        for (slot, item) in items.iter().enumerate() {
            index.insert(item.clone(), slot);
        }
        SetPayload { items, index }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.index.contains_key(value)
    }

    pub fn items(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }
}

struct SetDescriptor {
    payload: SetPayload,
}

impl Descriptor for SetDescriptor {
    fn tag(&self) -> Tag {
        Tag::Set
    }

    fn kind(&self, _this: &Value) -> Value {
        let mut element = types::bottom_type();
        for item in self.payload.items() {
            element = element.type_union(&item.kind());
        }
        types::set_type(
            types::RangeData::degenerate(self.payload.len() as i64),
            element,
        )
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        let mut acc = 0u32;
        for item in self.payload.items() {
            acc = acc.wrapping_add(item.hash_value());
        }
        hash_combine(hash_seed(Tag::Set), acc)
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        let other_descriptor = other.descriptor();
        let Some(peer) = other_descriptor.set_payload() else {
            return false;
        };
        peer.len() == self.payload.len()
            && self.payload.items().all(|item| peer.contains(item))
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        for item in self.payload.items() {
            visit(item);
        }
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        new_value(SetDescriptor {
            payload: SetPayload::from_items(self.payload.items.clone()),
        })
    }

    fn set_payload(&self) -> Option<&SetPayload> {
        Some(&self.payload)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "∅{{")?;
        for (slot, item) in self.payload.items().enumerate() {
            if slot > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", item)?;
        }
        write!(f, "}}")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn empty_set() -> Value {
    static EMPTY: OnceLock<Value> = OnceLock::new();
    EMPTY
        .get_or_init(|| set_from_items(Vec::new()).make_shared())
        .clone()
}

/// Build a mutable set; duplicates collapse, elements are frozen on entry.
pub fn set_from_items(items: Vec<Value>) -> Value {
    let mut distinct: Vec<Value> = Vec::with_capacity(items.len());
    let mut index: AHashMap<Value, usize> = AHashMap::with_capacity(items.len());
    for item in items {
        let item = item.make_immutable();
        if !index.contains_key(&item) {
            index.insert(item.clone(), distinct.len());
            distinct.push(item);
        }
    }
    new_value(SetDescriptor {
        payload: SetPayload::from_items(distinct),
    })
}

pub fn set_size(set: &Value) -> usize {
    set.traversed()
        .descriptor()
        .set_payload()
        .expect("size of set")
        .len()
}

pub fn set_contains(set: &Value, value: &Value) -> bool {
    set.traversed()
        .descriptor()
        .set_payload()
        .expect("membership in set")
        .contains(value)
}

pub fn set_with(set: &Value, value: Value) -> Value {
    let mut items = set_items(set);
    items.push(value);
    set_from_items(items)
}

pub fn set_without(set: &Value, value: &Value) -> Value {
    let items = set_items(set)
        .into_iter()
        .filter(|item| !item.equals(value))
        .collect();
    set_from_items(items)
}

pub fn set_items(set: &Value) -> Vec<Value> {
    set.traversed()
        .descriptor()
        .set_payload()
        .expect("items of set")
        .items
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar;

    #[test]
    fn duplicates_collapse() {
        let s = set_from_items(vec![
            scalar::integer(1),
            scalar::integer(1),
            scalar::integer(2),
        ]);
        assert_eq!(set_size(&s), 2);
        assert!(set_contains(&s, &scalar::integer(1)));
    }

    #[test]
    fn equality_is_membership() {
        let a = set_from_items(vec![scalar::integer(1), scalar::integer(2)]);
        let b = set_from_items(vec![scalar::integer(2), scalar::integer(1)]);
        assert!(a.equals(&b));
        assert_eq!(a.hash_value(), b.hash_value());
        let c = set_with(&a, scalar::integer(3));
        assert!(!a.equals(&c));
        assert!(set_without(&c, &scalar::integer(3)).equals(&a));
    }
}
