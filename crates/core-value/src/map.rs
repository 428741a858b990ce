//! Map descriptor: a hashed association from value keys to values.
//!
//! Updates are copy-on-write at the value layer: `map_at_put` answers a new
//! map holding the change. Insertion order is preserved so iteration, and
//! therefore serialization, is deterministic.

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;

use ahash::AHashMap;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed, new_value};
use crate::types;
use crate::Value;

pub struct MapPayload {
    entries: Vec<(Value, Value)>,
    index: AHashMap<Value, usize>,
}

impl MapPayload {
    fn from_entries(entries: Vec<(Value, Value)>) -> MapPayload {
        let mut index = AHashMap::with_capacity(entries.len());
        for (slot, (key, _)) in entries.iter().enumerate() {
            index.insert(key.clone(), slot);
        }
        MapPayload { entries, index }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index.get(key).map(|slot| &self.entries[*slot].1)
    }

    pub fn entries(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

struct MapDescriptor {
    payload: MapPayload,
}

impl Descriptor for MapDescriptor {
    fn tag(&self) -> Tag {
        Tag::Map
    }

    fn kind(&self, _this: &Value) -> Value {
        let mut key_type = types::bottom_type();
        let mut value_type = types::bottom_type();
        for (key, value) in self.payload.entries() {
            key_type = key_type.type_union(&key.kind());
            value_type = value_type.type_union(&value.kind());
        }
        types::map_type(
            types::RangeData::degenerate(self.payload.len() as i64),
            key_type,
            value_type,
        )
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        // Order-independent: entry order is an artifact of construction.
        let mut h = hash_seed(Tag::Map);
        let mut acc = 0u32;
        for (key, value) in self.payload.entries() {
            acc = acc.wrapping_add(hash_combine(key.hash_value(), value.hash_value()));
        }
        h = hash_combine(h, acc);
        h
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        let other_descriptor = other.descriptor();
        let Some(peer) = other_descriptor.map_payload() else {
            return false;
        };
        if peer.len() != self.payload.len() {
            return false;
        }
        self.payload
            .entries()
            .all(|(key, value)| peer.get(key).is_some_and(|v| v.equals(value)))
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        for (key, value) in self.payload.entries() {
            visit(key);
            visit(value);
        }
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        new_value(MapDescriptor {
            payload: MapPayload::from_entries(self.payload.entries.clone()),
        })
    }

    fn map_payload(&self) -> Option<&MapPayload> {
        Some(&self.payload)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (slot, (key, value)) in self.payload.entries().enumerate() {
            if slot > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}→{:?}", key, value)?;
        }
        write!(f, "}}")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn empty_map() -> Value {
    static EMPTY: OnceLock<Value> = OnceLock::new();
    EMPTY
        .get_or_init(|| map_from_entries(Vec::new()).make_shared())
        .clone()
}

/// Build a mutable map. Later bindings of an equal key win. Keys are frozen
/// on entry: a key whose content drifts would corrupt the index.
pub fn map_from_entries(entries: Vec<(Value, Value)>) -> Value {
    let mut deduped: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
    let mut index: AHashMap<Value, usize> = AHashMap::with_capacity(entries.len());
    for (key, value) in entries {
        let key = key.make_immutable();
        match index.get(&key) {
            Some(slot) => deduped[*slot].1 = value,
            None => {
                index.insert(key.clone(), deduped.len());
                deduped.push((key, value));
            }
        }
    }
    new_value(MapDescriptor {
        payload: MapPayload::from_entries(deduped),
    })
}

pub fn map_size(map: &Value) -> usize {
    map.traversed()
        .descriptor()
        .map_payload()
        .expect("size of map")
        .len()
}

pub fn map_at(map: &Value, key: &Value) -> Option<Value> {
    map.traversed()
        .descriptor()
        .map_payload()
        .expect("lookup in map")
        .get(key)
        .cloned()
}

/// Copy-on-write bind.
pub fn map_at_put(map: &Value, key: Value, value: Value) -> Value {
    let canonical = map.traversed();
    let descriptor = canonical.descriptor();
    let payload = descriptor.map_payload().expect("bind in map");
    let mut entries = payload.entries.clone();
    let key = key.make_immutable();
    match payload.index.get(&key) {
        Some(slot) => entries[*slot].1 = value,
        None => entries.push((key, value)),
    }
    new_value(MapDescriptor {
        payload: MapPayload::from_entries(entries),
    })
}

/// Copy-on-write unbind; answers the receiver's content sans `key`.
pub fn map_without(map: &Value, key: &Value) -> Value {
    let canonical = map.traversed();
    let descriptor = canonical.descriptor();
    let payload = descriptor.map_payload().expect("unbind in map");
    let entries = payload
        .entries
        .iter()
        .filter(|(k, _)| !k.equals(key))
        .cloned()
        .collect();
    new_value(MapDescriptor {
        payload: MapPayload::from_entries(entries),
    })
}

pub fn map_entries(map: &Value) -> Vec<(Value, Value)> {
    map.traversed()
        .descriptor()
        .map_payload()
        .expect("entries of map")
        .entries
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar;
    use crate::tuple;

    #[test]
    fn bind_lookup_unbind() {
        let m = map_from_entries(vec![(tuple::string_value("a"), scalar::integer(1))]);
        let m2 = map_at_put(&m, tuple::string_value("b"), scalar::integer(2));
        assert_eq!(map_size(&m), 1);
        assert_eq!(map_size(&m2), 2);
        assert!(map_at(&m2, &tuple::string_value("b")).unwrap().equals(&scalar::integer(2)));
        let m3 = map_without(&m2, &tuple::string_value("a"));
        assert!(map_at(&m3, &tuple::string_value("a")).is_none());
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = map_from_entries(vec![
            (scalar::integer(1), scalar::integer(10)),
            (scalar::integer(2), scalar::integer(20)),
        ]);
        let b = map_from_entries(vec![
            (scalar::integer(2), scalar::integer(20)),
            (scalar::integer(1), scalar::integer(10)),
        ]);
        assert!(a.equals(&b));
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn keys_compare_by_content_across_representations() {
        let rope = tuple::concatenate(&tuple::string_value("ke"), &tuple::string_value("y"));
        let m = map_from_entries(vec![(tuple::string_value("key"), scalar::integer(5))]);
        assert!(map_at(&m, &rope).unwrap().equals(&scalar::integer(5)));
    }
}
