//! Signature comparison: the five-way classification that drives decision
//! tree construction.

use core_value::Value;
use core_value::types::lattice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeComparison {
    /// The intersection is bottom: no value satisfies both.
    Disjoint,
    SameType,
    /// The first properly contains the second.
    ProperAncestorType,
    /// The first is properly contained in the second.
    ProperDescendantType,
    /// Overlapping but incomparable.
    UnrelatedType,
}

/// Classify `s` against `t`. Both are types (argument-tuple types when
/// comparing whole signatures).
pub fn compare_types(s: &Value, t: &Value) -> TypeComparison {
    if lattice::is_bottom_type(&s.type_intersection(t)) {
        return TypeComparison::Disjoint;
    }
    match (s.is_subtype_of(t), t.is_subtype_of(s)) {
        (true, true) => TypeComparison::SameType,
        (false, true) => TypeComparison::ProperAncestorType,
        (true, false) => TypeComparison::ProperDescendantType,
        (false, false) => TypeComparison::UnrelatedType,
    }
}
