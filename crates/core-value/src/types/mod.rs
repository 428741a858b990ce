//! Types as values: the descriptor, the closed `TypeData` sum, the
//! normalizing constructors, and the extraction accessors.
//!
//! The lattice operations (subtype, union, intersection, instance tests)
//! live in [`lattice`]; everything here is representation.
//!
//! Normalization happens at construction so that structurally different
//! spellings of the same type hash alike: integer ranges fold exclusive
//! finite bounds into inclusive ones and collapse to bottom when empty;
//! tuple types trim redundant leading entries and collapse impossible
//! sizes; enumerations dedupe, collapse to bottom when empty, become a
//! metatype on the union when every member is a type, and widen to `any`
//! when members mix types and non-types.

pub mod lattice;

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed};
use crate::phrase::DeclarationKind;
use crate::{Mutability, Value};

/// Failure surface for the extraction accessors: asking a non-range type
/// for a bound, a non-singleton enumeration for its instance, and so on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KindError {
    #[error("wrong kind of type: expected {expected}")]
    WrongKindOfType { expected: &'static str },
}

fn wrong(expected: &'static str) -> KindError {
    KindError::WrongKindOfType { expected }
}

// -------------------------------------------------------------------------
// Extended integers and ranges
// -------------------------------------------------------------------------

/// An integer extended with the two signed infinities, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtInt {
    NegInf,
    Fin(i64),
    PosInf,
}

impl ExtInt {
    pub fn is_finite(self) -> bool {
        matches!(self, ExtInt::Fin(_))
    }

    pub fn finite(self) -> Option<i64> {
        match self {
            ExtInt::Fin(v) => Some(v),
            _ => None,
        }
    }
}

/// A normalized bound pair. Finite bounds are always inclusive after
/// normalization; infinite bounds keep their inclusivity (an inclusive
/// infinity admits the infinity value itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeData {
    pub lower: ExtInt,
    pub lower_inclusive: bool,
    pub upper: ExtInt,
    pub upper_inclusive: bool,
}

impl RangeData {
    /// Normalize; `None` means the range is empty.
    pub fn new(
        lower: ExtInt,
        lower_inclusive: bool,
        upper: ExtInt,
        upper_inclusive: bool,
    ) -> Option<RangeData> {
        // Fold finite exclusive bounds inward.
        let (lower, lower_inclusive) = match (lower, lower_inclusive) {
            (ExtInt::Fin(v), false) => match v.checked_add(1) {
                Some(v1) => (ExtInt::Fin(v1), true),
                None => return None,
            },
            other => other,
        };
        let (upper, upper_inclusive) = match (upper, upper_inclusive) {
            (ExtInt::Fin(v), false) => match v.checked_sub(1) {
                Some(v1) => (ExtInt::Fin(v1), true),
                None => return None,
            },
            other => other,
        };
        let empty = match lower.cmp(&upper) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => !(lower_inclusive && upper_inclusive),
            std::cmp::Ordering::Less => false,
        };
        if empty {
            return None;
        }
        Some(RangeData {
            lower,
            lower_inclusive,
            upper,
            upper_inclusive,
        })
    }

    pub fn degenerate(value: i64) -> RangeData {
        RangeData {
            lower: ExtInt::Fin(value),
            lower_inclusive: true,
            upper: ExtInt::Fin(value),
            upper_inclusive: true,
        }
    }

    pub fn contains(&self, value: ExtInt) -> bool {
        let above_lower = match value.cmp(&self.lower) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.lower_inclusive,
            std::cmp::Ordering::Less => false,
        };
        let below_upper = match value.cmp(&self.upper) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.upper_inclusive,
            std::cmp::Ordering::Greater => false,
        };
        above_lower && below_upper
    }

    pub fn is_subrange_of(&self, other: &RangeData) -> bool {
        let lower_ok = match self.lower.cmp(&other.lower) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => other.lower_inclusive || !self.lower_inclusive,
            std::cmp::Ordering::Less => false,
        };
        let upper_ok = match self.upper.cmp(&other.upper) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => other.upper_inclusive || !self.upper_inclusive,
            std::cmp::Ordering::Greater => false,
        };
        lower_ok && upper_ok
    }

    pub fn intersect(&self, other: &RangeData) -> Option<RangeData> {
        let (lower, lower_inclusive) = match self.lower.cmp(&other.lower) {
            std::cmp::Ordering::Greater => (self.lower, self.lower_inclusive),
            std::cmp::Ordering::Less => (other.lower, other.lower_inclusive),
            std::cmp::Ordering::Equal => {
                (self.lower, self.lower_inclusive && other.lower_inclusive)
            }
        };
        let (upper, upper_inclusive) = match self.upper.cmp(&other.upper) {
            std::cmp::Ordering::Less => (self.upper, self.upper_inclusive),
            std::cmp::Ordering::Greater => (other.upper, other.upper_inclusive),
            std::cmp::Ordering::Equal => {
                (self.upper, self.upper_inclusive && other.upper_inclusive)
            }
        };
        RangeData::new(lower, lower_inclusive, upper, upper_inclusive)
    }

    /// Smallest range covering both (the hull; any gap is absorbed).
    pub fn hull(&self, other: &RangeData) -> RangeData {
        let (lower, lower_inclusive) = match self.lower.cmp(&other.lower) {
            std::cmp::Ordering::Less => (self.lower, self.lower_inclusive),
            std::cmp::Ordering::Greater => (other.lower, other.lower_inclusive),
            std::cmp::Ordering::Equal => {
                (self.lower, self.lower_inclusive || other.lower_inclusive)
            }
        };
        let (upper, upper_inclusive) = match self.upper.cmp(&other.upper) {
            std::cmp::Ordering::Greater => (self.upper, self.upper_inclusive),
            std::cmp::Ordering::Less => (other.upper, other.upper_inclusive),
            std::cmp::Ordering::Equal => {
                (self.upper, self.upper_inclusive || other.upper_inclusive)
            }
        };
        RangeData {
            lower,
            lower_inclusive,
            upper,
            upper_inclusive,
        }
    }

    fn hash(&self) -> u32 {
        let mut h = 0x9D_77u32;
        let ord = |e: ExtInt| -> u32 {
            match e {
                ExtInt::NegInf => 0xAAAA_0001,
                ExtInt::PosInf => 0xAAAA_0002,
                ExtInt::Fin(v) => {
                    let bits = v as u64;
                    (bits ^ (bits >> 32)) as u32
                }
            }
        };
        h = hash_combine(h, ord(self.lower));
        h = hash_combine(h, self.lower_inclusive as u32);
        h = hash_combine(h, ord(self.upper));
        h = hash_combine(h, self.upper_inclusive as u32);
        h
    }
}

// -------------------------------------------------------------------------
// Phrase-kind hierarchy
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhraseTypeKind {
    ParsePhrase,
    Expression,
    Literal,
    VariableUse,
    List,
    Sequence,
    FirstOfSequence,
    Assignment,
    Reference,
    Block,
    SuperCast,
    Send,
    MacroSubstitution,
    Declaration(DeclarationKind),
}

impl PhraseTypeKind {
    pub fn parent(self) -> Option<PhraseTypeKind> {
        use PhraseTypeKind::*;
        match self {
            ParsePhrase => None,
            Expression | Sequence | Declaration(_) => Some(ParsePhrase),
            Literal | VariableUse | List | FirstOfSequence | Assignment | Reference | Block
            | SuperCast | Send | MacroSubstitution => Some(Expression),
        }
    }

    pub fn is_subkind_of(self, other: PhraseTypeKind) -> bool {
        let mut cursor = Some(self);
        while let Some(kind) = cursor {
            if kind == other {
                return true;
            }
            cursor = kind.parent();
        }
        false
    }

    /// Nearest common ancestor; total because the hierarchy is rooted.
    pub fn common_ancestor(self, other: PhraseTypeKind) -> PhraseTypeKind {
        let mut cursor = Some(self);
        while let Some(kind) = cursor {
            if other.is_subkind_of(kind) {
                return kind;
            }
            cursor = kind.parent();
        }
        PhraseTypeKind::ParsePhrase
    }

    pub fn ordinal(self) -> u32 {
        use PhraseTypeKind::*;
        match self {
            ParsePhrase => 0,
            Expression => 1,
            Literal => 2,
            VariableUse => 3,
            List => 4,
            Sequence => 5,
            FirstOfSequence => 6,
            Assignment => 7,
            Reference => 8,
            Block => 9,
            SuperCast => 10,
            Send => 11,
            MacroSubstitution => 12,
            Declaration(kind) => 16 + kind as u32,
        }
    }
}

// -------------------------------------------------------------------------
// Simple kinds
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleKind {
    Character,
    Double,
    Atom,
}

// -------------------------------------------------------------------------
// The type sum
// -------------------------------------------------------------------------

#[derive(Clone)]
pub enum TypeData {
    Any,
    Simple(SimpleKind),
    IntegerRange(RangeData),
    Tuple {
        sizes: RangeData,
        leading: Vec<Value>,
        default: Value,
    },
    Map {
        sizes: RangeData,
        key: Value,
        value: Value,
    },
    Set {
        sizes: RangeData,
        element: Value,
    },
    Function {
        /// The tuple type of the argument list.
        args: Value,
        returns: Value,
    },
    Variable {
        read: Value,
        write: Value,
    },
    Object {
        /// Field atom → field type, sorted by atom name for canonical order.
        fields: Vec<(Value, Value)>,
    },
    Continuation {
        function_type: Value,
    },
    Phrase {
        kind: PhraseTypeKind,
        yields: Value,
    },
    /// Explicit finite instance set; size 0 is bottom.
    Enumeration {
        instances: Vec<Value>,
    },
    /// The type whose instances are `instance` and its subtypes.
    Meta {
        instance: Value,
    },
}

impl TypeData {
    pub fn is_bottom(&self) -> bool {
        matches!(self, TypeData::Enumeration { instances } if instances.is_empty())
    }

    fn variant_seed(&self) -> u32 {
        match self {
            TypeData::Any => 1,
            TypeData::Simple(_) => 2,
            TypeData::IntegerRange(_) => 3,
            TypeData::Tuple { .. } => 4,
            TypeData::Map { .. } => 5,
            TypeData::Set { .. } => 6,
            TypeData::Function { .. } => 7,
            TypeData::Variable { .. } => 8,
            TypeData::Object { .. } => 9,
            TypeData::Continuation { .. } => 10,
            TypeData::Phrase { .. } => 11,
            TypeData::Enumeration { .. } => 12,
            TypeData::Meta { .. } => 13,
        }
    }

    fn structural_hash(&self) -> u32 {
        let mut h = hash_combine(hash_seed(Tag::Type), self.variant_seed());
        match self {
            TypeData::Any => {}
            TypeData::Simple(kind) => h = hash_combine(h, *kind as u32),
            TypeData::IntegerRange(range) => h = hash_combine(h, range.hash()),
            TypeData::Tuple {
                sizes,
                leading,
                default,
            } => {
                h = hash_combine(h, sizes.hash());
                for t in leading {
                    h = hash_combine(h, t.hash_value());
                }
                h = hash_combine(h, default.hash_value());
            }
            TypeData::Map { sizes, key, value } => {
                h = hash_combine(h, sizes.hash());
                h = hash_combine(h, key.hash_value());
                h = hash_combine(h, value.hash_value());
            }
            TypeData::Set { sizes, element } => {
                h = hash_combine(h, sizes.hash());
                h = hash_combine(h, element.hash_value());
            }
            TypeData::Function { args, returns } => {
                h = hash_combine(h, args.hash_value());
                h = hash_combine(h, returns.hash_value());
            }
            TypeData::Variable { read, write } => {
                h = hash_combine(h, read.hash_value());
                h = hash_combine(h, write.hash_value());
            }
            TypeData::Object { fields } => {
                let mut acc = 0u32;
                for (atom, ty) in fields {
                    acc = acc.wrapping_add(hash_combine(atom.hash_value(), ty.hash_value()));
                }
                h = hash_combine(h, acc);
            }
            TypeData::Continuation { function_type } => {
                h = hash_combine(h, function_type.hash_value());
            }
            TypeData::Phrase { kind, yields } => {
                h = hash_combine(h, kind.ordinal());
                h = hash_combine(h, yields.hash_value());
            }
            TypeData::Enumeration { instances } => {
                let mut acc = 0u32;
                for instance in instances {
                    acc = acc.wrapping_add(instance.hash_value());
                }
                h = hash_combine(h, acc);
            }
            TypeData::Meta { instance } => {
                h = hash_combine(h, instance.hash_value());
            }
        }
        h
    }

    fn children(&self) -> Vec<Value> {
        match self {
            TypeData::Any | TypeData::Simple(_) | TypeData::IntegerRange(_) => Vec::new(),
            TypeData::Tuple {
                leading, default, ..
            } => {
                let mut all = leading.clone();
                all.push(default.clone());
                all
            }
            TypeData::Map { key, value, .. } => vec![key.clone(), value.clone()],
            TypeData::Set { element, .. } => vec![element.clone()],
            TypeData::Function { args, returns } => vec![args.clone(), returns.clone()],
            TypeData::Variable { read, write } => vec![read.clone(), write.clone()],
            TypeData::Object { fields } => fields
                .iter()
                .flat_map(|(atom, ty)| [atom.clone(), ty.clone()])
                .collect(),
            TypeData::Continuation { function_type } => vec![function_type.clone()],
            TypeData::Phrase { yields, .. } => vec![yields.clone()],
            TypeData::Enumeration { instances } => instances.clone(),
            TypeData::Meta { instance } => vec![instance.clone()],
        }
    }
}

pub struct TypeDescriptor {
    data: Arc<TypeData>,
}

impl Descriptor for TypeDescriptor {
    fn tag(&self) -> Tag {
        Tag::Type
    }

    fn kind(&self, this: &Value) -> Value {
        // A type's type is its metatype.
        meta(this.clone())
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        self.data.structural_hash()
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        if other.descriptor().type_data().is_none() {
            return false;
        }
        lattice::is_subtype(this, other) && lattice::is_subtype(other, this)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        for child in self.data.children() {
            visit(&child);
        }
    }

    fn type_data(&self) -> Option<Arc<TypeData>> {
        Some(self.data.clone())
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.as_ref() {
            TypeData::Any => write!(f, "any"),
            TypeData::Simple(kind) => write!(f, "{:?}", kind),
            TypeData::IntegerRange(r) => write!(
                f,
                "[{:?}{}..{}{:?}]",
                r.lower,
                if r.lower_inclusive { "" } else { "!" },
                if r.upper_inclusive { "" } else { "!" },
                r.upper
            ),
            TypeData::Tuple { sizes, .. } => write!(f, "tuple({:?}..{:?})", sizes.lower, sizes.upper),
            TypeData::Map { .. } => write!(f, "map-type"),
            TypeData::Set { .. } => write!(f, "set-type"),
            TypeData::Function { .. } => write!(f, "function-type"),
            TypeData::Variable { .. } => write!(f, "variable-type"),
            TypeData::Object { .. } => write!(f, "object-type"),
            TypeData::Continuation { .. } => write!(f, "continuation-type"),
            TypeData::Phrase { kind, .. } => write!(f, "{:?}-phrase-type", kind),
            TypeData::Enumeration { instances } if instances.is_empty() => write!(f, "⊥"),
            TypeData::Enumeration { instances } => write!(f, "enum[{}]", instances.len()),
            TypeData::Meta { .. } => write!(f, "meta"),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn type_value(data: TypeData) -> Value {
    Value::with_descriptor(
        Mutability::Immutable,
        Arc::new(TypeDescriptor {
            data: Arc::new(data),
        }),
    )
}

// -------------------------------------------------------------------------
// Constructors
// -------------------------------------------------------------------------

pub fn any_type() -> Value {
    static ANY: OnceLock<Value> = OnceLock::new();
    ANY.get_or_init(|| type_value(TypeData::Any).make_shared())
        .clone()
}

/// The uninstantiable bottom: the empty enumeration.
pub fn bottom_type() -> Value {
    static BOTTOM: OnceLock<Value> = OnceLock::new();
    BOTTOM
        .get_or_init(|| {
            type_value(TypeData::Enumeration {
                instances: Vec::new(),
            })
            .make_shared()
        })
        .clone()
}

pub fn character_type() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| type_value(TypeData::Simple(SimpleKind::Character)).make_shared())
        .clone()
}

pub fn double_type() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| type_value(TypeData::Simple(SimpleKind::Double)).make_shared())
        .clone()
}

pub fn atom_type() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| type_value(TypeData::Simple(SimpleKind::Atom)).make_shared())
        .clone()
}

/// The two-member enumeration over the boolean atoms.
pub fn boolean_type() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| {
        enumeration_of(vec![crate::atom::true_value(), crate::atom::false_value()])
            .make_shared()
    })
    .clone()
}

pub fn integer_range(
    lower: ExtInt,
    lower_inclusive: bool,
    upper: ExtInt,
    upper_inclusive: bool,
) -> Value {
    match RangeData::new(lower, lower_inclusive, upper, upper_inclusive) {
        Some(range) => type_value(TypeData::IntegerRange(range)),
        None => bottom_type(),
    }
}

pub fn range_type(range: RangeData) -> Value {
    type_value(TypeData::IntegerRange(range))
}

/// All finite integers.
pub fn integers() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| {
        integer_range(ExtInt::NegInf, false, ExtInt::PosInf, false).make_shared()
    })
    .clone()
}

/// Integers plus the two infinities.
pub fn extended_integers() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| integer_range(ExtInt::NegInf, true, ExtInt::PosInf, true).make_shared())
        .clone()
}

pub fn whole_numbers() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| {
        integer_range(ExtInt::Fin(0), true, ExtInt::PosInf, false).make_shared()
    })
    .clone()
}

pub fn natural_numbers() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| {
        integer_range(ExtInt::Fin(1), true, ExtInt::PosInf, false).make_shared()
    })
    .clone()
}

pub fn bytes_type() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| {
        integer_range(ExtInt::Fin(0), true, ExtInt::Fin(255), true).make_shared()
    })
    .clone()
}

pub fn single_int(value: i64) -> Value {
    type_value(TypeData::IntegerRange(RangeData::degenerate(value)))
}

/// Normalizing tuple-type constructor.
pub fn tuple_type(sizes: RangeData, mut leading: Vec<Value>, default: Value) -> Value {
    // Sizes must describe tuple lengths.
    let Some(mut sizes) = sizes.intersect(&RangeData {
        lower: ExtInt::Fin(0),
        lower_inclusive: true,
        upper: ExtInt::PosInf,
        upper_inclusive: false,
    }) else {
        return bottom_type();
    };
    // A bottom leading entry at index i caps the size below i.
    let mut default = default;
    if let Some(slot) = leading.iter().position(lattice::is_bottom_type) {
        let cap = RangeData::new(ExtInt::Fin(0), true, ExtInt::Fin(slot as i64), true)
            .expect("cap range");
        sizes = match sizes.intersect(&cap) {
            Some(s) => s,
            None => return bottom_type(),
        };
        leading.truncate(slot);
    }
    if lattice::is_bottom_type(&default) {
        let cap = RangeData::new(
            ExtInt::Fin(0),
            true,
            ExtInt::Fin(leading.len() as i64),
            true,
        )
        .expect("cap range");
        sizes = match sizes.intersect(&cap) {
            Some(s) => s,
            None => return bottom_type(),
        };
    }
    // Clamp leading to the largest possible index.
    if let ExtInt::Fin(upper) = sizes.upper {
        let cap = if sizes.upper_inclusive { upper } else { upper - 1 };
        if cap >= 0 && (cap as usize) < leading.len() {
            leading.truncate(cap as usize);
        }
    }
    // Trim trailing entries that repeat the default.
    while let Some(last) = leading.last() {
        if last.equals(&default) {
            leading.pop();
        } else {
            break;
        }
    }
    // Beyond the leading prefix an unreachable default is irrelevant; keep
    // it bottom-free for hashing consistency when sizes cap at the prefix.
    if let ExtInt::Fin(upper) = sizes.upper {
        let cap = if sizes.upper_inclusive { upper } else { upper - 1 };
        if cap >= 0 && cap as usize <= leading.len() {
            default = bottom_type();
        }
    }
    type_value(TypeData::Tuple {
        sizes,
        leading,
        default,
    })
}

/// Fixed-arity tuple type.
pub fn tuple_type_fixed(element_types: Vec<Value>) -> Value {
    let n = element_types.len() as i64;
    tuple_type(RangeData::degenerate(n), element_types, bottom_type())
}

/// Any-length tuple of a uniform element type.
pub fn tuple_type_uniform(element: Value) -> Value {
    tuple_type(
        RangeData {
            lower: ExtInt::Fin(0),
            lower_inclusive: true,
            upper: ExtInt::PosInf,
            upper_inclusive: false,
        },
        Vec::new(),
        element,
    )
}

pub fn any_tuple_type() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| tuple_type_uniform(any_type()).make_shared())
        .clone()
}

/// Strings are tuples of characters.
pub fn string_type() -> Value {
    static T: OnceLock<Value> = OnceLock::new();
    T.get_or_init(|| tuple_type_uniform(character_type()).make_shared())
        .clone()
}

pub fn map_type(sizes: RangeData, key: Value, value: Value) -> Value {
    let Some(sizes) = sizes.intersect(&RangeData {
        lower: ExtInt::Fin(0),
        lower_inclusive: true,
        upper: ExtInt::PosInf,
        upper_inclusive: false,
    }) else {
        return bottom_type();
    };
    if (lattice::is_bottom_type(&key) || lattice::is_bottom_type(&value))
        && !sizes.contains(ExtInt::Fin(0))
    {
        return bottom_type();
    }
    type_value(TypeData::Map { sizes, key, value })
}

pub fn set_type(sizes: RangeData, element: Value) -> Value {
    let Some(sizes) = sizes.intersect(&RangeData {
        lower: ExtInt::Fin(0),
        lower_inclusive: true,
        upper: ExtInt::PosInf,
        upper_inclusive: false,
    }) else {
        return bottom_type();
    };
    if lattice::is_bottom_type(&element) && !sizes.contains(ExtInt::Fin(0)) {
        return bottom_type();
    }
    type_value(TypeData::Set { sizes, element })
}

/// `args` is the tuple type of the argument list.
pub fn function_type(args: Value, returns: Value) -> Value {
    type_value(TypeData::Function { args, returns })
}

pub fn function_type_from(arg_types: Vec<Value>, returns: Value) -> Value {
    function_type(tuple_type_fixed(arg_types), returns)
}

pub fn variable_type(read: Value, write: Value) -> Value {
    type_value(TypeData::Variable { read, write })
}

/// Fields sorted by atom name (then hash) for a canonical order.
pub fn object_type(mut fields: Vec<(Value, Value)>) -> Value {
    fields.sort_by(|(a, _), (b, _)| {
        let name_a = crate::atom::name_of(a).unwrap_or_default();
        let name_b = crate::atom::name_of(b).unwrap_or_default();
        name_a
            .cmp(&name_b)
            .then_with(|| a.hash_value().cmp(&b.hash_value()))
    });
    type_value(TypeData::Object { fields })
}

pub fn continuation_type(function_type: Value) -> Value {
    type_value(TypeData::Continuation { function_type })
}

pub fn phrase_type(kind: PhraseTypeKind, yields: Value) -> Value {
    type_value(TypeData::Phrase { kind, yields })
}

/// Normalizing enumeration constructor.
pub fn enumeration_of(instances: Vec<Value>) -> Value {
    // Dedupe by equality.
    let mut distinct: Vec<Value> = Vec::with_capacity(instances.len());
    for instance in instances {
        let instance = instance.make_immutable();
        if !distinct.iter().any(|seen| seen.equals(&instance)) {
            distinct.push(instance);
        }
    }
    if distinct.is_empty() {
        return bottom_type();
    }
    let type_count = distinct.iter().filter(|i| i.is_type()).count();
    if type_count == distinct.len() {
        // An enumeration of types is a metatype on their union.
        let union = distinct
            .iter()
            .skip(1)
            .fold(distinct[0].clone(), |acc, next| acc.type_union(next));
        return meta(union);
    }
    if type_count > 0 {
        // Mixed sets collapse to the top.
        return any_type();
    }
    type_value(TypeData::Enumeration {
        instances: distinct,
    })
}

/// The singleton enumeration over one (non-type) value.
pub fn instance_type(value: Value) -> Value {
    enumeration_of(vec![value])
}

pub fn meta(instance: Value) -> Value {
    type_value(TypeData::Meta { instance })
}

// -------------------------------------------------------------------------
// Extraction accessors
// -------------------------------------------------------------------------

pub fn type_data_of(ty: &Value) -> Result<Arc<TypeData>, KindError> {
    ty.descriptor().type_data().ok_or_else(|| wrong("a type"))
}

pub fn range_of(ty: &Value) -> Result<RangeData, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::IntegerRange(range) => Ok(*range),
        _ => Err(wrong("an integer range type")),
    }
}

pub fn lower_bound(ty: &Value) -> Result<ExtInt, KindError> {
    Ok(range_of(ty)?.lower)
}

pub fn upper_bound(ty: &Value) -> Result<ExtInt, KindError> {
    Ok(range_of(ty)?.upper)
}

/// The sole instance of a singleton enumeration or metatype.
pub fn instance(ty: &Value) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Enumeration { instances } if instances.len() == 1 => {
            Ok(instances[0].clone())
        }
        TypeData::Meta { instance } => Ok(instance.clone()),
        _ => Err(wrong("a singleton enumeration")),
    }
}

pub fn instances(ty: &Value) -> Result<Vec<Value>, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Enumeration { instances } => Ok(instances.clone()),
        _ => Err(wrong("an enumeration")),
    }
}

pub fn function_args_type(ty: &Value) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Function { args, .. } => Ok(args.clone()),
        _ => Err(wrong("a function type")),
    }
}

pub fn function_return_type(ty: &Value) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Function { returns, .. } => Ok(returns.clone()),
        _ => Err(wrong("a function type")),
    }
}

pub fn tuple_sizes(ty: &Value) -> Result<RangeData, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Tuple { sizes, .. } => Ok(*sizes),
        _ => Err(wrong("a tuple type")),
    }
}

/// The element type at a one-based index of a tuple type.
pub fn tuple_type_at(ty: &Value, index: usize) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
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
                return Ok(bottom_type());
            }
            Ok(leading
                .get(index - 1)
                .cloned()
                .unwrap_or_else(|| default.clone()))
        }
        _ => Err(wrong("a tuple type")),
    }
}

pub fn variable_read_type(ty: &Value) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Variable { read, .. } => Ok(read.clone()),
        _ => Err(wrong("a variable type")),
    }
}

pub fn variable_write_type(ty: &Value) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Variable { write, .. } => Ok(write.clone()),
        _ => Err(wrong("a variable type")),
    }
}

pub fn continuation_function_type(ty: &Value) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Continuation { function_type } => Ok(function_type.clone()),
        _ => Err(wrong("a continuation type")),
    }
}

pub fn phrase_kind_of(ty: &Value) -> Result<PhraseTypeKind, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Phrase { kind, .. } => Ok(*kind),
        _ => Err(wrong("a phrase type")),
    }
}

pub fn phrase_yield_of(ty: &Value) -> Result<Value, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Phrase { yields, .. } => Ok(yields.clone()),
        _ => Err(wrong("a phrase type")),
    }
}

pub fn object_fields_of(ty: &Value) -> Result<Vec<(Value, Value)>, KindError> {
    match type_data_of(ty)?.as_ref() {
        TypeData::Object { fields } => Ok(fields.clone()),
        _ => Err(wrong("an object type")),
    }
}
