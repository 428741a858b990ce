//! Tuple descriptors: one logical shape, several coexisting
//! representations.
//!
//! A tuple may live as a general object tuple, a byte tuple, a byte string
//! (Latin-1 characters), a two-byte string (BMP characters), a nybble tuple,
//! a subrange view, or a concatenation node (a two-arm rope). All of them
//! answer the same shape views (`tuple_len` / `tuple_at`), so every
//! consumer, equality included, is representation-blind.
//!
//! On a successful equality comparison across representations the
//! worse-represented side collapses into an indirection to the better one
//! (`is_better_representation_than` ranks leaf encodings above the general
//! object form, and both above the lazy views).

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed, new_immutable, new_value};
use crate::scalar;
use crate::types;
use crate::Value;

/// Representation quality: higher collapses lower on equality.
fn rank(descriptor: &dyn Descriptor) -> u8 {
    descriptor
        .as_any()
        .downcast_ref::<ObjectTupleDescriptor>()
        .map(|_| 2)
        .or_else(|| {
            descriptor
                .as_any()
                .downcast_ref::<SubrangeTupleDescriptor>()
                .map(|_| 1)
        })
        .or_else(|| {
            descriptor
                .as_any()
                .downcast_ref::<ConcatTupleDescriptor>()
                .map(|_| 1)
        })
        .unwrap_or(3)
}

fn tuple_equals(this: &Value, other: &Value) -> bool {
    let a = this.descriptor();
    let b = other.descriptor();
    let (Some(len_a), Some(len_b)) = (a.tuple_len(), b.tuple_len()) else {
        return false;
    };
    if len_a != len_b {
        return false;
    }
    for index in 1..=len_a {
        let ea = a.tuple_at(index).expect("tuple subscript");
        let eb = b.tuple_at(index).expect("tuple subscript");
        if !ea.equals(&eb) {
            return false;
        }
    }
    // Same content: keep the better representation, forward the other.
    let rank_a = rank(a.as_ref());
    let rank_b = rank(b.as_ref());
    if rank_a < rank_b {
        this.become_indirection_to(other);
    } else if rank_b < rank_a {
        other.become_indirection_to(this);
    }
    true
}

fn tuple_hash(descriptor: &dyn Descriptor) -> u32 {
    let len = descriptor.tuple_len().expect("tuple hash on non-tuple");
    let mut h = hash_seed(Tag::Tuple);
    for index in 1..=len {
        let element = descriptor.tuple_at(index).expect("tuple subscript");
        h = hash_combine(h, element.hash_value());
    }
    h
}

fn tuple_kind(descriptor: &dyn Descriptor) -> Value {
    let len = descriptor.tuple_len().expect("tuple kind on non-tuple");
    let mut leading = Vec::new();
    let mut default = types::bottom_type();
    for index in 1..=len {
        let element_kind = descriptor.tuple_at(index).expect("tuple subscript").kind();
        if index <= 8 {
            leading.push(element_kind);
        } else {
            default = default.type_union(&element_kind);
        }
    }
    types::tuple_type(
        types::RangeData::degenerate(len as i64),
        leading,
        default,
    )
}

fn describe_tuple(descriptor: &dyn Descriptor, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(text) = string_content(descriptor) {
        return write!(f, "{:?}", text);
    }
    let len = descriptor.tuple_len().unwrap_or(0);
    write!(f, "<")?;
    for index in 1..=len {
        if index > 1 {
            write!(f, ", ")?;
        }
        write!(f, "{:?}", descriptor.tuple_at(index).expect("subscript"))?;
    }
    write!(f, ">")
}

fn string_content(descriptor: &dyn Descriptor) -> Option<String> {
    let len = descriptor.tuple_len()?;
    let mut out = String::with_capacity(len);
    for index in 1..=len {
        out.push(scalar::char_of(&descriptor.tuple_at(index)?)?);
    }
    Some(out)
}

// -------------------------------------------------------------------------
// Object tuples: the general form
// -------------------------------------------------------------------------

struct ObjectTupleDescriptor {
    items: Vec<Value>,
}

impl Descriptor for ObjectTupleDescriptor {
    fn tag(&self) -> Tag {
        Tag::Tuple
    }

    fn kind(&self, this: &Value) -> Value {
        let _ = this;
        tuple_kind(self)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        tuple_hash(self)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        tuple_equals(this, other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        for item in &self.items {
            visit(item);
        }
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        new_value(ObjectTupleDescriptor {
            items: self.items.clone(),
        })
    }

    fn tuple_len(&self) -> Option<usize> {
        Some(self.items.len())
    }

    fn tuple_at(&self, index: usize) -> Option<Value> {
        Some(self.items[index - 1].clone())
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe_tuple(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// -------------------------------------------------------------------------
// Compact leaf representations
// -------------------------------------------------------------------------

struct ByteTupleDescriptor {
    bytes: Vec<u8>,
}

impl Descriptor for ByteTupleDescriptor {
    fn tag(&self) -> Tag {
        Tag::Tuple
    }

    fn kind(&self, _this: &Value) -> Value {
        tuple_kind(self)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        tuple_hash(self)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        tuple_equals(this, other)
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        new_value(ByteTupleDescriptor {
            bytes: self.bytes.clone(),
        })
    }

    fn tuple_len(&self) -> Option<usize> {
        Some(self.bytes.len())
    }

    fn tuple_at(&self, index: usize) -> Option<Value> {
        Some(scalar::integer(self.bytes[index - 1] as i64))
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe_tuple(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct NybbleTupleDescriptor {
    /// One nybble per entry; values 0..=15.
    nybbles: Vec<u8>,
}

impl Descriptor for NybbleTupleDescriptor {
    fn tag(&self) -> Tag {
        Tag::Tuple
    }

    fn kind(&self, _this: &Value) -> Value {
        tuple_kind(self)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        tuple_hash(self)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        tuple_equals(this, other)
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        new_value(NybbleTupleDescriptor {
            nybbles: self.nybbles.clone(),
        })
    }

    fn tuple_len(&self) -> Option<usize> {
        Some(self.nybbles.len())
    }

    fn tuple_at(&self, index: usize) -> Option<Value> {
        Some(scalar::integer(self.nybbles[index - 1] as i64))
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe_tuple(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ByteStringDescriptor {
    /// Latin-1 code points.
    bytes: Vec<u8>,
}

impl Descriptor for ByteStringDescriptor {
    fn tag(&self) -> Tag {
        Tag::Tuple
    }

    fn kind(&self, _this: &Value) -> Value {
        tuple_kind(self)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        tuple_hash(self)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        tuple_equals(this, other)
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        new_value(ByteStringDescriptor {
            bytes: self.bytes.clone(),
        })
    }

    fn tuple_len(&self) -> Option<usize> {
        Some(self.bytes.len())
    }

    fn tuple_at(&self, index: usize) -> Option<Value> {
        Some(scalar::character(self.bytes[index - 1] as char))
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe_tuple(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TwoByteStringDescriptor {
    /// BMP code points.
    units: Vec<u16>,
}

impl Descriptor for TwoByteStringDescriptor {
    fn tag(&self) -> Tag {
        Tag::Tuple
    }

    fn kind(&self, _this: &Value) -> Value {
        tuple_kind(self)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        tuple_hash(self)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        tuple_equals(this, other)
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        new_value(TwoByteStringDescriptor {
            units: self.units.clone(),
        })
    }

    fn tuple_len(&self) -> Option<usize> {
        Some(self.units.len())
    }

    fn tuple_at(&self, index: usize) -> Option<Value> {
        let unit = self.units[index - 1];
        Some(scalar::character(
            char::from_u32(unit as u32).expect("BMP unit"),
        ))
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe_tuple(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// -------------------------------------------------------------------------
// Lazy views: subrange and concatenation (rope)
// -------------------------------------------------------------------------

struct SubrangeTupleDescriptor {
    base: Value,
    offset: usize,
    len: usize,
}

impl Descriptor for SubrangeTupleDescriptor {
    fn tag(&self) -> Tag {
        Tag::Tuple
    }

    fn kind(&self, _this: &Value) -> Value {
        tuple_kind(self)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        tuple_hash(self)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        tuple_equals(this, other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        visit(&self.base);
    }

    fn copy_mutable(&self, this: &Value) -> Value {
        new_value(ObjectTupleDescriptor {
            items: elements(this),
        })
    }

    fn tuple_len(&self) -> Option<usize> {
        Some(self.len)
    }

    fn tuple_at(&self, index: usize) -> Option<Value> {
        self.base.descriptor().tuple_at(self.offset + index)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe_tuple(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ConcatTupleDescriptor {
    left: Value,
    right: Value,
    left_len: usize,
    len: usize,
}

impl Descriptor for ConcatTupleDescriptor {
    fn tag(&self) -> Tag {
        Tag::Tuple
    }

    fn kind(&self, _this: &Value) -> Value {
        tuple_kind(self)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        tuple_hash(self)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        tuple_equals(this, other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        visit(&self.left);
        visit(&self.right);
    }

    fn copy_mutable(&self, this: &Value) -> Value {
        new_value(ObjectTupleDescriptor {
            items: elements(this),
        })
    }

    fn tuple_len(&self) -> Option<usize> {
        Some(self.len)
    }

    fn tuple_at(&self, index: usize) -> Option<Value> {
        if index <= self.left_len {
            self.left.descriptor().tuple_at(index)
        } else {
            self.right.descriptor().tuple_at(index - self.left_len)
        }
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe_tuple(self, f)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// -------------------------------------------------------------------------
// Constructors and tuple operations
// -------------------------------------------------------------------------

/// Build a mutable object tuple.
pub fn tuple_from_values(items: Vec<Value>) -> Value {
    new_value(ObjectTupleDescriptor { items })
}

pub fn empty_tuple() -> Value {
    static EMPTY: OnceLock<Value> = OnceLock::new();
    EMPTY
        .get_or_init(|| tuple_from_values(Vec::new()).make_shared())
        .clone()
}

/// Build the most compact string representation holding `text`.
pub fn string_value(text: &str) -> Value {
    if text.chars().all(|c| (c as u32) < 0x100) {
        new_immutable(ByteStringDescriptor {
            bytes: text.chars().map(|c| c as u8).collect(),
        })
    } else if text.chars().all(|c| (c as u32) < 0x1_0000) {
        new_immutable(TwoByteStringDescriptor {
            units: text.chars().map(|c| c as u16).collect(),
        })
    } else {
        tuple_from_values(text.chars().map(scalar::character).collect()).make_immutable()
    }
}

/// Latin-1 string constructor; callers guarantee the range.
pub fn byte_string(text: &str) -> Value {
    debug_assert!(text.chars().all(|c| (c as u32) < 0x100));
    new_immutable(ByteStringDescriptor {
        bytes: text.chars().map(|c| c as u8).collect(),
    })
}

pub fn byte_tuple(bytes: Vec<u8>) -> Value {
    new_immutable(ByteTupleDescriptor { bytes })
}

/// One nybble (0..=15) per element.
pub fn nybble_tuple(nybbles: Vec<u8>) -> Value {
    debug_assert!(nybbles.iter().all(|n| *n < 16));
    new_immutable(NybbleTupleDescriptor { nybbles })
}

/// A view of `base[start..start + len]` (one-based `start`). The base is
/// frozen: a view into a tuple still being mutated would alias updates.
pub fn subrange(base: &Value, start: usize, len: usize) -> Value {
    let base = base.traversed().make_immutable();
    let base_len = base.descriptor().tuple_len().expect("subrange of tuple");
    assert!(len == 0 || (start >= 1 && start + len - 1 <= base_len));
    new_immutable(SubrangeTupleDescriptor {
        base,
        offset: start - 1,
        len,
    })
}

/// Rope concatenation; O(1), reads delegate to the arms.
pub fn concatenate(left: &Value, right: &Value) -> Value {
    let left = left.traversed().make_immutable();
    let right = right.traversed().make_immutable();
    let left_len = left.descriptor().tuple_len().expect("concatenate tuples");
    let right_len = right.descriptor().tuple_len().expect("concatenate tuples");
    new_immutable(ConcatTupleDescriptor {
        left,
        right,
        left_len,
        len: left_len + right_len,
    })
}

/// All elements, eagerly.
pub fn elements(tuple: &Value) -> Vec<Value> {
    let canonical = tuple.traversed();
    let descriptor = canonical.descriptor();
    let len = descriptor.tuple_len().expect("elements of tuple");
    (1..=len)
        .map(|i| descriptor.tuple_at(i).expect("subscript"))
        .collect()
}

pub fn tuple_len(tuple: &Value) -> usize {
    tuple
        .traversed()
        .descriptor()
        .tuple_len()
        .expect("length of tuple")
}

/// One-based subscript.
pub fn tuple_at(tuple: &Value, index: usize) -> Value {
    tuple
        .traversed()
        .descriptor()
        .tuple_at(index)
        .expect("subscript of tuple")
}

/// Copy-on-write update; answers the tuple holding the replacement (the
/// receiver itself when it was mutable).
pub fn tuple_at_put(tuple: &Value, index: usize, replacement: Value) -> Value {
    let target = tuple.ensure_mutable();
    let mut items = elements(&target);
    items[index - 1] = replacement;
    target.change_descriptor(std::sync::Arc::new(ObjectTupleDescriptor { items }));
    target
}

/// Collect a tuple of characters back into a Rust string.
pub fn string_of(tuple: &Value) -> Option<String> {
    string_content(tuple.traversed().descriptor().as_ref())
}
