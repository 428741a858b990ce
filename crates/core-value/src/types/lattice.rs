//! The lattice operations: subtype, union, intersection, and instance
//! membership. All four are total (no query is an error) and are defined
//! by cases over the product of type variants.

use crate::descriptor::{Numeric, Tag};
use crate::types::{self, ExtInt, TypeData, any_type, bottom_type, enumeration_of, meta, range_type};
use crate::Value;

pub fn is_bottom_type(ty: &Value) -> bool {
    ty.descriptor()
        .type_data()
        .map(|data| data.is_bottom())
        .unwrap_or(false)
}

/// `index` is one-based; answers bottom beyond the last possible index.
fn type_at(data: &TypeData, index: usize) -> Value {
    match data {
        TypeData::Tuple {
            sizes,
            leading,
            default,
        } => {
            let max_index = match sizes.upper {
                ExtInt::Fin(u) if sizes.upper_inclusive => u,
                ExtInt::Fin(u) => u - 1,
                ExtInt::PosInf => i64::MAX,
                ExtInt::NegInf => -1,
            };
            if index as i64 > max_index {
                bottom_type()
            } else {
                leading
                    .get(index - 1)
                    .cloned()
                    .unwrap_or_else(|| default.clone())
            }
        }
        _ => unreachable!("type_at on a non-tuple type"),
    }
}

// -------------------------------------------------------------------------
// Instance membership
// -------------------------------------------------------------------------

pub fn is_instance(value: &Value, ty: &Value) -> bool {
    let value = value.traversed();
    let data = ty
        .descriptor()
        .type_data()
        .expect("instance test against a non-type");
    match data.as_ref() {
        TypeData::Any => true,
        TypeData::Simple(kind) => {
            let tag = value.tag();
            match kind {
                types::SimpleKind::Character => tag == Tag::Character,
                types::SimpleKind::Double => tag == Tag::Double,
                types::SimpleKind::Atom => tag == Tag::Atom,
            }
        }
        TypeData::IntegerRange(range) => match value.descriptor().numeric() {
            Some(Numeric::Integer(v)) => range.contains(ExtInt::Fin(v)),
            Some(Numeric::Infinity { positive }) => range.contains(if positive {
                ExtInt::PosInf
            } else {
                ExtInt::NegInf
            }),
            _ => false,
        },
        TypeData::Tuple { sizes, .. } => {
            let descriptor = value.descriptor();
            let Some(len) = descriptor.tuple_len() else {
                return false;
            };
            if !sizes.contains(ExtInt::Fin(len as i64)) {
                return false;
            }
            (1..=len).all(|index| {
                let element = descriptor.tuple_at(index).expect("subscript");
                is_instance(&element, &type_at(data.as_ref(), index))
            })
        }
        TypeData::Map { sizes, key, value: value_type } => {
            let descriptor = value.descriptor();
            let Some(payload) = descriptor.map_payload() else {
                return false;
            };
            sizes.contains(ExtInt::Fin(payload.len() as i64))
                && payload
                    .entries()
                    .all(|(k, v)| is_instance(k, key) && is_instance(v, value_type))
        }
        TypeData::Set { sizes, element } => {
            let descriptor = value.descriptor();
            let Some(payload) = descriptor.set_payload() else {
                return false;
            };
            sizes.contains(ExtInt::Fin(payload.len() as i64))
                && payload.items().all(|item| is_instance(item, element))
        }
        TypeData::Function { .. } => {
            value.tag() == Tag::Function && is_subtype(&value.kind(), ty)
        }
        TypeData::Variable { .. } => {
            value.tag() == Tag::Variable && is_subtype(&value.kind(), ty)
        }
        TypeData::Continuation { .. } => {
            value.tag() == Tag::Continuation && is_subtype(&value.kind(), ty)
        }
        TypeData::Object { fields } => {
            let descriptor = value.descriptor();
            let Some(payload) = descriptor.object_payload() else {
                return false;
            };
            fields.iter().all(|(atom, field_type)| {
                payload
                    .field(atom)
                    .is_some_and(|field| is_instance(&field, field_type))
            })
        }
        TypeData::Phrase { kind, yields } => {
            let descriptor = value.descriptor();
            let Some(phrase) = descriptor.phrase_data() else {
                return false;
            };
            phrase.phrase_kind().is_subkind_of(*kind)
                && is_subtype(&phrase.yield_type(), yields)
        }
        TypeData::Enumeration { instances } => {
            instances.iter().any(|instance| instance.equals(&value))
        }
        TypeData::Meta { instance } => value.is_type() && is_subtype(&value, instance),
    }
}

// -------------------------------------------------------------------------
// Subtype
// -------------------------------------------------------------------------

pub fn is_subtype(s: &Value, t: &Value) -> bool {
    if s.same_identity_as(t) {
        return true;
    }
    let s_data = s
        .descriptor()
        .type_data()
        .expect("subtype test on a non-type");
    let t_data = t
        .descriptor()
        .type_data()
        .expect("subtype test against a non-type");
    match (s_data.as_ref(), t_data.as_ref()) {
        (_, TypeData::Any) => true,
        // An enumeration (bottom included) fits wherever all members fit.
        (TypeData::Enumeration { instances }, _) => {
            instances.iter().all(|instance| is_instance(instance, t))
        }
        (TypeData::Any, _) => false,
        (_, TypeData::Enumeration { .. }) => false,
        (TypeData::Meta { instance: a }, TypeData::Meta { instance: b }) => is_subtype(a, b),
        (TypeData::Meta { .. }, _) | (_, TypeData::Meta { .. }) => false,
        (TypeData::Simple(a), TypeData::Simple(b)) => a == b,
        (TypeData::IntegerRange(a), TypeData::IntegerRange(b)) => a.is_subrange_of(b),
        (
            TypeData::Tuple { sizes: s_sizes, leading: s_leading, .. },
            TypeData::Tuple { sizes: t_sizes, leading: t_leading, .. },
        ) => {
            if !s_sizes.is_subrange_of(t_sizes) {
                return false;
            }
            let probe = s_leading.len().max(t_leading.len()) + 1;
            (1..=probe).all(|index| {
                is_subtype(
                    &type_at(s_data.as_ref(), index),
                    &type_at(t_data.as_ref(), index),
                )
            })
        }
        (
            TypeData::Map { sizes: a_sizes, key: a_key, value: a_value },
            TypeData::Map { sizes: b_sizes, key: b_key, value: b_value },
        ) => {
            a_sizes.is_subrange_of(b_sizes)
                && is_subtype(a_key, b_key)
                && is_subtype(a_value, b_value)
        }
        (
            TypeData::Set { sizes: a_sizes, element: a_element },
            TypeData::Set { sizes: b_sizes, element: b_element },
        ) => a_sizes.is_subrange_of(b_sizes) && is_subtype(a_element, b_element),
        (
            TypeData::Function { args: a_args, returns: a_returns },
            TypeData::Function { args: b_args, returns: b_returns },
        ) => {
            // Contravariant in the argument tuple, covariant in the return.
            is_subtype(b_args, a_args) && is_subtype(a_returns, b_returns)
        }
        (
            TypeData::Variable { read: a_read, write: a_write },
            TypeData::Variable { read: b_read, write: b_write },
        ) => is_subtype(a_read, b_read) && is_subtype(b_write, a_write),
        (TypeData::Object { fields: a_fields }, TypeData::Object { fields: b_fields }) => {
            b_fields.iter().all(|(atom, b_type)| {
                a_fields
                    .iter()
                    .find(|(a_atom, _)| a_atom.equals(atom))
                    .is_some_and(|(_, a_type)| is_subtype(a_type, b_type))
            })
        }
        (
            TypeData::Continuation { function_type: a },
            TypeData::Continuation { function_type: b },
        ) => is_subtype(a, b),
        (
            TypeData::Phrase { kind: a_kind, yields: a_yields },
            TypeData::Phrase { kind: b_kind, yields: b_yields },
        ) => a_kind.is_subkind_of(*b_kind) && is_subtype(a_yields, b_yields),
        _ => false,
    }
}

// -------------------------------------------------------------------------
// Union
// -------------------------------------------------------------------------

fn union_enumeration_with(instances: &[Value], other: &Value) -> Value {
    if instances
        .iter()
        .all(|instance| is_instance(instance, other))
    {
        return other.clone();
    }
    instances
        .iter()
        .fold(other.clone(), |acc, instance| union(&acc, &instance.kind()))
}

pub fn union(s: &Value, t: &Value) -> Value {
    if s.same_identity_as(t) {
        return s.clone();
    }
    let s_data = s.descriptor().type_data().expect("union of a non-type");
    let t_data = t.descriptor().type_data().expect("union with a non-type");
    match (s_data.as_ref(), t_data.as_ref()) {
        (TypeData::Any, _) | (_, TypeData::Any) => any_type(),
        (TypeData::Enumeration { instances }, _) if instances.is_empty() => t.clone(),
        (_, TypeData::Enumeration { instances }) if instances.is_empty() => s.clone(),
        (
            TypeData::Enumeration { instances: a },
            TypeData::Enumeration { instances: b },
        ) => {
            let mut all = a.clone();
            all.extend(b.iter().cloned());
            enumeration_of(all)
        }
        (TypeData::Enumeration { instances }, _) => union_enumeration_with(instances, t),
        (_, TypeData::Enumeration { instances }) => union_enumeration_with(instances, s),
        (TypeData::Meta { instance: a }, TypeData::Meta { instance: b }) => {
            meta(union(a, b))
        }
        (TypeData::Simple(a), TypeData::Simple(b)) if a == b => s.clone(),
        (TypeData::IntegerRange(a), TypeData::IntegerRange(b)) => range_type(a.hull(b)),
        (TypeData::Tuple { sizes: a_sizes, leading: a_leading, default: a_default },
         TypeData::Tuple { sizes: b_sizes, leading: b_leading, default: b_default }) => {
            let probe = a_leading.len().max(b_leading.len());
            let leading = (1..=probe)
                .map(|index| {
                    union(
                        &type_at(s_data.as_ref(), index),
                        &type_at(t_data.as_ref(), index),
                    )
                })
                .collect();
            types::tuple_type(a_sizes.hull(b_sizes), leading, union(a_default, b_default))
        }
        (TypeData::Map { sizes: a_sizes, key: a_key, value: a_value },
         TypeData::Map { sizes: b_sizes, key: b_key, value: b_value }) => types::map_type(
            a_sizes.hull(b_sizes),
            union(a_key, b_key),
            union(a_value, b_value),
        ),
        (TypeData::Set { sizes: a_sizes, element: a_element },
         TypeData::Set { sizes: b_sizes, element: b_element }) => {
            types::set_type(a_sizes.hull(b_sizes), union(a_element, b_element))
        }
        (TypeData::Function { args: a_args, returns: a_returns },
         TypeData::Function { args: b_args, returns: b_returns }) => {
            // Dual of subtype: arguments narrow, returns widen.
            types::function_type(
                intersection(a_args, b_args),
                union(a_returns, b_returns),
            )
        }
        (TypeData::Variable { read: a_read, write: a_write },
         TypeData::Variable { read: b_read, write: b_write }) => {
            types::variable_type(union(a_read, b_read), intersection(a_write, b_write))
        }
        (TypeData::Object { fields: a_fields }, TypeData::Object { fields: b_fields }) => {
            // Width narrows to the common fields.
            let fields = a_fields
                .iter()
                .filter_map(|(atom, a_type)| {
                    b_fields
                        .iter()
                        .find(|(b_atom, _)| b_atom.equals(atom))
                        .map(|(_, b_type)| (atom.clone(), union(a_type, b_type)))
                })
                .collect();
            types::object_type(fields)
        }
        (TypeData::Continuation { function_type: a },
         TypeData::Continuation { function_type: b }) => {
            types::continuation_type(union(a, b))
        }
        (TypeData::Phrase { kind: a_kind, yields: a_yields },
         TypeData::Phrase { kind: b_kind, yields: b_yields }) => types::phrase_type(
            a_kind.common_ancestor(*b_kind),
            union(a_yields, b_yields),
        ),
        _ => any_type(),
    }
}

// -------------------------------------------------------------------------
// Intersection
// -------------------------------------------------------------------------

pub fn intersection(s: &Value, t: &Value) -> Value {
    if s.same_identity_as(t) {
        return s.clone();
    }
    let s_data = s
        .descriptor()
        .type_data()
        .expect("intersection of a non-type");
    let t_data = t
        .descriptor()
        .type_data()
        .expect("intersection with a non-type");
    match (s_data.as_ref(), t_data.as_ref()) {
        (TypeData::Any, _) => t.clone(),
        (_, TypeData::Any) => s.clone(),
        (
            TypeData::Enumeration { instances: a },
            TypeData::Enumeration { instances: b },
        ) => enumeration_of(
            a.iter()
                .filter(|instance| b.iter().any(|other| other.equals(instance)))
                .cloned()
                .collect(),
        ),
        (TypeData::Enumeration { instances }, _) => enumeration_of(
            instances
                .iter()
                .filter(|instance| is_instance(instance, t))
                .cloned()
                .collect(),
        ),
        (_, TypeData::Enumeration { instances }) => enumeration_of(
            instances
                .iter()
                .filter(|instance| is_instance(instance, s))
                .cloned()
                .collect(),
        ),
        (TypeData::Meta { instance: a }, TypeData::Meta { instance: b }) => {
            meta(intersection(a, b))
        }
        (TypeData::Meta { .. }, _) | (_, TypeData::Meta { .. }) => bottom_type(),
        (TypeData::Simple(a), TypeData::Simple(b)) => {
            if a == b {
                s.clone()
            } else {
                bottom_type()
            }
        }
        (TypeData::IntegerRange(a), TypeData::IntegerRange(b)) => match a.intersect(b) {
            Some(range) => range_type(range),
            None => bottom_type(),
        },
        (TypeData::Tuple { sizes: a_sizes, leading: a_leading, default: a_default },
         TypeData::Tuple { sizes: b_sizes, leading: b_leading, default: b_default }) => {
            let Some(sizes) = a_sizes.intersect(b_sizes) else {
                return bottom_type();
            };
            let probe = a_leading.len().max(b_leading.len());
            let leading = (1..=probe)
                .map(|index| {
                    intersection(
                        &type_at(s_data.as_ref(), index),
                        &type_at(t_data.as_ref(), index),
                    )
                })
                .collect();
            types::tuple_type(sizes, leading, intersection(a_default, b_default))
        }
        (TypeData::Map { sizes: a_sizes, key: a_key, value: a_value },
         TypeData::Map { sizes: b_sizes, key: b_key, value: b_value }) => {
            match a_sizes.intersect(b_sizes) {
                Some(sizes) => types::map_type(
                    sizes,
                    intersection(a_key, b_key),
                    intersection(a_value, b_value),
                ),
                None => bottom_type(),
            }
        }
        (TypeData::Set { sizes: a_sizes, element: a_element },
         TypeData::Set { sizes: b_sizes, element: b_element }) => {
            match a_sizes.intersect(b_sizes) {
                Some(sizes) => types::set_type(sizes, intersection(a_element, b_element)),
                None => bottom_type(),
            }
        }
        (TypeData::Function { args: a_args, returns: a_returns },
         TypeData::Function { args: b_args, returns: b_returns }) => types::function_type(
            union(a_args, b_args),
            intersection(a_returns, b_returns),
        ),
        (TypeData::Variable { read: a_read, write: a_write },
         TypeData::Variable { read: b_read, write: b_write }) => {
            types::variable_type(intersection(a_read, b_read), union(a_write, b_write))
        }
        (TypeData::Object { fields: a_fields }, TypeData::Object { fields: b_fields }) => {
            // Depth: all fields, intersecting where both sides agree.
            let mut fields: Vec<(Value, Value)> = a_fields.clone();
            for (atom, b_type) in b_fields {
                match fields.iter_mut().find(|(a_atom, _)| a_atom.equals(atom)) {
                    Some((_, a_type)) => *a_type = intersection(a_type, b_type),
                    None => fields.push((atom.clone(), b_type.clone())),
                }
            }
            types::object_type(fields)
        }
        (TypeData::Continuation { function_type: a },
         TypeData::Continuation { function_type: b }) => {
            types::continuation_type(intersection(a, b))
        }
        (TypeData::Phrase { kind: a_kind, yields: a_yields },
         TypeData::Phrase { kind: b_kind, yields: b_yields }) => {
            let kind = if a_kind.is_subkind_of(*b_kind) {
                *a_kind
            } else if b_kind.is_subkind_of(*a_kind) {
                *b_kind
            } else {
                return bottom_type();
            };
            types::phrase_type(kind, intersection(a_yields, b_yields))
        }
        _ => bottom_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scalar, tuple};
    use proptest::prelude::*;

    fn int_range(lo: i64, hi: i64) -> Value {
        types::integer_range(ExtInt::Fin(lo), true, ExtInt::Fin(hi), true)
    }

    #[test]
    fn top_and_bottom_bracket_everything() {
        let samples = [
            int_range(1, 10),
            types::string_type(),
            types::boolean_type(),
            types::function_type_from(vec![types::integers()], types::integers()),
            types::any_type(),
            types::bottom_type(),
        ];
        for ty in &samples {
            assert!(is_subtype(&types::bottom_type(), ty), "⊥ ≤ {:?}", ty);
            assert!(is_subtype(ty, &types::any_type()), "{:?} ≤ any", ty);
        }
    }

    #[test]
    fn range_algebra() {
        let a = int_range(1, 10);
        let b = int_range(5, 20);
        let both = intersection(&a, &b);
        assert!(both.equals(&int_range(5, 10)));
        let either = union(&a, &b);
        assert!(either.equals(&int_range(1, 20)));
        assert!(is_subtype(&both, &a));
        assert!(is_subtype(&a, &either));
        // Disjoint ranges collapse to bottom.
        assert!(is_bottom_type(&intersection(&int_range(1, 2), &int_range(5, 6))));
    }

    #[test]
    fn infinities_respect_inclusivity() {
        let finite = types::integers();
        let extended = types::extended_integers();
        assert!(is_subtype(&finite, &extended));
        assert!(!is_subtype(&extended, &finite));
        assert!(scalar::positive_infinity().is_instance_of(&extended));
        assert!(!scalar::positive_infinity().is_instance_of(&finite));
    }

    #[test]
    fn function_types_are_contravariant_in_arguments() {
        let narrow = types::function_type_from(vec![int_range(0, 100)], types::integers());
        let wide = types::function_type_from(vec![types::integers()], types::integers());
        // A function accepting all integers serves where one accepting
        // 0..100 is required.
        assert!(is_subtype(&wide, &narrow));
        assert!(!is_subtype(&narrow, &wide));
    }

    #[test]
    fn enumeration_normalization() {
        // Empty is bottom.
        assert!(is_bottom_type(&enumeration_of(vec![])));
        // A singleton of a non-type is an instance type.
        let one = types::instance_type(scalar::integer(7));
        assert!(scalar::integer(7).is_instance_of(&one));
        assert!(!scalar::integer(8).is_instance_of(&one));
        // All-types becomes a metatype on the union.
        let meta_ty = enumeration_of(vec![int_range(1, 2), int_range(5, 6)]);
        assert!(int_range(1, 2).is_instance_of(&meta_ty));
        assert!(int_range(1, 6).is_instance_of(&meta_ty));
        // Mixed collapses to any.
        let mixed = enumeration_of(vec![scalar::integer(1), int_range(1, 2)]);
        assert!(mixed.equals(&any_type()));
    }

    #[test]
    fn singleton_enumeration_equals_instance_type() {
        let a = types::instance_type(scalar::integer(3));
        let b = enumeration_of(vec![scalar::integer(3)]);
        assert!(a.equals(&b));
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn tuple_types_probe_leading_and_tail() {
        let pair = types::tuple_type_fixed(vec![int_range(1, 5), types::string_type()]);
        let wider = types::tuple_type_fixed(vec![types::integers(), types::string_type()]);
        assert!(is_subtype(&pair, &wider));
        assert!(!is_subtype(&wider, &pair));
        let value = tuple::tuple_from_values(vec![
            scalar::integer(3),
            tuple::string_value("ok"),
        ]);
        assert!(value.is_instance_of(&pair));
    }

    #[test]
    fn string_values_inhabit_string_type() {
        assert!(tuple::string_value("hello").is_instance_of(&types::string_type()));
        assert!(!tuple::byte_tuple(vec![1, 2]).is_instance_of(&types::string_type()));
    }

    #[test]
    fn metatypes_are_covariant() {
        let small = meta(int_range(1, 5));
        let large = meta(types::integers());
        assert!(is_subtype(&small, &large));
        assert!(!is_subtype(&large, &small));
        assert!(int_range(2, 3).is_instance_of(&large));
    }

    proptest! {
        #[test]
        fn lattice_laws_on_ranges(
            a_lo in -50i64..50, a_len in 0i64..40,
            b_lo in -50i64..50, b_len in 0i64..40,
            c_lo in -50i64..50, c_len in 0i64..40,
        ) {
            let s = int_range(a_lo, a_lo + a_len);
            let t = int_range(b_lo, b_lo + b_len);
            let u = int_range(c_lo, c_lo + c_len);
            // Reflexivity.
            prop_assert!(is_subtype(&s, &s));
            // Meet is a lower bound, join an upper bound.
            let both = intersection(&s, &t);
            prop_assert!(is_subtype(&both, &s));
            prop_assert!(is_subtype(&both, &t));
            let either = union(&s, &t);
            prop_assert!(is_subtype(&s, &either));
            prop_assert!(is_subtype(&t, &either));
            // Transitivity along a constructed chain.
            if is_subtype(&s, &t) && is_subtype(&t, &u) {
                prop_assert!(is_subtype(&s, &u));
            }
            // Antisymmetry means equality.
            if is_subtype(&s, &t) && is_subtype(&t, &s) {
                prop_assert!(s.equals(&t));
            }
        }
    }
}
