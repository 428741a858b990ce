//! Registers and type restrictions.
//!
//! The register machine is typed: every live register carries a
//! restriction, namely a type, optionally a known constant, and the
//! register kind (boxed value, unboxed int, unboxed float). Restrictions narrow monotonically
//! along control flow and widen at merges.

use core_value::{Value, types};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    /// Holds any boxed value.
    Boxed,
    /// Holds a raw `i64`.
    IntUnboxed,
    /// Holds a raw `f64`.
    FloatUnboxed,
}

/// A virtual register. Indices are dense per kind within one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub kind: RegisterKind,
    pub index: usize,
}

impl Register {
    pub fn boxed(index: usize) -> Register {
        Register {
            kind: RegisterKind::Boxed,
            index,
        }
    }

    pub fn unboxed_int(index: usize) -> Register {
        Register {
            kind: RegisterKind::IntUnboxed,
            index,
        }
    }

    pub fn unboxed_float(index: usize) -> Register {
        Register {
            kind: RegisterKind::FloatUnboxed,
            index,
        }
    }
}

/// What is statically known about a register's content at a program point.
#[derive(Debug, Clone)]
pub struct TypeRestriction {
    pub ty: Value,
    /// Exact content, when the flow proved it.
    pub constant: Option<Value>,
    pub kind: RegisterKind,
}

impl TypeRestriction {
    pub fn of_type(ty: Value) -> TypeRestriction {
        TypeRestriction {
            ty,
            constant: None,
            kind: RegisterKind::Boxed,
        }
    }

    pub fn of_constant(constant: Value) -> TypeRestriction {
        TypeRestriction {
            ty: constant.kind(),
            constant: Some(constant),
            kind: RegisterKind::Boxed,
        }
    }

    pub fn unboxed_int(ty: Value) -> TypeRestriction {
        TypeRestriction {
            ty,
            constant: None,
            kind: RegisterKind::IntUnboxed,
        }
    }

    /// Widen to cover both restrictions; used at control-flow merges.
    pub fn union(&self, other: &TypeRestriction) -> TypeRestriction {
        let constant = match (&self.constant, &other.constant) {
            (Some(a), Some(b)) if a.equals(b) => Some(a.clone()),
            _ => None,
        };
        TypeRestriction {
            ty: self.ty.type_union(&other.ty),
            constant,
            kind: if self.kind == other.kind {
                self.kind
            } else {
                RegisterKind::Boxed
            },
        }
    }

    /// Narrow by an observed type; used along test edges.
    pub fn intersect_type(&self, ty: &Value) -> TypeRestriction {
        TypeRestriction {
            ty: self.ty.type_intersection(ty),
            constant: self.constant.clone(),
            kind: self.kind,
        }
    }

    pub fn any_boxed() -> TypeRestriction {
        TypeRestriction::of_type(types::any_type())
    }
}
