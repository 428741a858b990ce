//! Scalar descriptors: nil, integers, the two signed infinities, doubles,
//! and characters.
//!
//! Numeric width is fixed at 64-bit signed integers plus IEEE doubles; the
//! infinities are distinct values so integer-range bounds can name them.

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;

use crate::descriptor::{Descriptor, Numeric, Tag, hash_combine, hash_seed, new_immutable};
use crate::types;
use crate::{ExtInt, Value};

// -------------------------------------------------------------------------
// Nil
// -------------------------------------------------------------------------

struct NilDescriptor;

impl Descriptor for NilDescriptor {
    fn tag(&self) -> Tag {
        Tag::Nil
    }

    fn kind(&self, this: &Value) -> Value {
        types::instance_type(this.clone())
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        hash_seed(Tag::Nil)
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        other.tag() == Tag::Nil
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nil")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The unique nil value.
pub fn nil() -> Value {
    static NIL: OnceLock<Value> = OnceLock::new();
    NIL.get_or_init(|| new_immutable(NilDescriptor).make_shared())
        .clone()
}

// -------------------------------------------------------------------------
// Integers and infinities
// -------------------------------------------------------------------------

struct IntegerDescriptor {
    value: i64,
}

impl Descriptor for IntegerDescriptor {
    fn tag(&self) -> Tag {
        Tag::Integer
    }

    fn kind(&self, _this: &Value) -> Value {
        types::single_int(self.value)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        let bits = self.value as u64;
        hash_combine(hash_seed(Tag::Integer), (bits ^ (bits >> 32)) as u32)
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        matches!(
            other.descriptor().numeric(),
            Some(Numeric::Integer(v)) if v == self.value
        )
    }

    fn numeric(&self) -> Option<Numeric> {
        Some(Numeric::Integer(self.value))
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct InfinityDescriptor {
    positive: bool,
}

impl Descriptor for InfinityDescriptor {
    fn tag(&self) -> Tag {
        Tag::Infinity
    }

    fn kind(&self, _this: &Value) -> Value {
        let end = if self.positive {
            ExtInt::PosInf
        } else {
            ExtInt::NegInf
        };
        types::integer_range(end, true, end, true)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        hash_combine(hash_seed(Tag::Infinity), self.positive as u32)
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        matches!(
            other.descriptor().numeric(),
            Some(Numeric::Infinity { positive }) if positive == self.positive
        )
    }

    fn numeric(&self) -> Option<Numeric> {
        Some(Numeric::Infinity {
            positive: self.positive,
        })
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}∞", if self.positive { "" } else { "-" })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn integer(value: i64) -> Value {
    new_immutable(IntegerDescriptor { value })
}

pub fn positive_infinity() -> Value {
    static POS: OnceLock<Value> = OnceLock::new();
    POS.get_or_init(|| new_immutable(InfinityDescriptor { positive: true }).make_shared())
        .clone()
}

pub fn negative_infinity() -> Value {
    static NEG: OnceLock<Value> = OnceLock::new();
    NEG.get_or_init(|| new_immutable(InfinityDescriptor { positive: false }).make_shared())
        .clone()
}

// -------------------------------------------------------------------------
// Doubles
// -------------------------------------------------------------------------

struct DoubleDescriptor {
    value: f64,
}

impl Descriptor for DoubleDescriptor {
    fn tag(&self) -> Tag {
        Tag::Double
    }

    fn kind(&self, _this: &Value) -> Value {
        types::double_type()
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        let bits = self.value.to_bits();
        hash_combine(hash_seed(Tag::Double), (bits ^ (bits >> 32)) as u32)
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        // Bitwise, so that equality stays reflexive (NaN included) and
        // consistent with the hash.
        matches!(
            other.descriptor().numeric(),
            Some(Numeric::Double(v)) if v.to_bits() == self.value.to_bits()
        )
    }

    fn numeric(&self) -> Option<Numeric> {
        Some(Numeric::Double(self.value))
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn double(value: f64) -> Value {
    new_immutable(DoubleDescriptor { value })
}

// -------------------------------------------------------------------------
// Characters
// -------------------------------------------------------------------------

struct CharacterDescriptor {
    value: char,
}

impl Descriptor for CharacterDescriptor {
    fn tag(&self) -> Tag {
        Tag::Character
    }

    fn kind(&self, _this: &Value) -> Value {
        types::character_type()
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        hash_combine(hash_seed(Tag::Character), self.value as u32)
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        matches!(
            other.descriptor().numeric(),
            Some(Numeric::Character(v)) if v == self.value
        )
    }

    fn numeric(&self) -> Option<Numeric> {
        Some(Numeric::Character(self.value))
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "¢{:?}", self.value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn character(value: char) -> Value {
    new_immutable(CharacterDescriptor { value })
}

// -------------------------------------------------------------------------
// Extraction helpers
// -------------------------------------------------------------------------

pub fn int_of(value: &Value) -> Option<i64> {
    match value.descriptor().numeric() {
        Some(Numeric::Integer(v)) => Some(v),
        _ => None,
    }
}

pub fn double_of(value: &Value) -> Option<f64> {
    match value.descriptor().numeric() {
        Some(Numeric::Double(v)) => Some(v),
        _ => None,
    }
}

pub fn char_of(value: &Value) -> Option<char> {
    match value.descriptor().numeric() {
        Some(Numeric::Character(v)) => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_compare_by_value() {
        assert!(integer(5).equals(&integer(5)));
        assert!(!integer(5).equals(&integer(6)));
        assert_eq!(integer(5).hash_value(), integer(5).hash_value());
    }

    #[test]
    fn infinities_are_singletons() {
        assert!(positive_infinity().same_identity_as(&positive_infinity()));
        assert!(!positive_infinity().equals(&negative_infinity()));
    }

    #[test]
    fn integer_kind_is_the_degenerate_range() {
        let k = integer(42).kind();
        assert_eq!(types::lower_bound(&k).unwrap(), ExtInt::Fin(42));
        assert_eq!(types::upper_bound(&k).unwrap(), ExtInt::Fin(42));
    }

    #[test]
    fn nil_is_its_own_instance() {
        assert!(nil().is_instance_of(&nil().kind()));
        assert!(!integer(0).is_instance_of(&nil().kind()));
    }

    #[test]
    fn doubles_hash_consistently_with_equality() {
        let a = double(1.5);
        let b = double(1.5);
        assert!(a.equals(&b));
        assert_eq!(a.hash_value(), b.hash_value());
    }
}
