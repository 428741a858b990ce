//! The primitive registry: numbered native operations exposed as method
//! bodies.
//!
//! A function whose code names a primitive attempts it before any frame is
//! built. The primitive answers one of five dispositions: success (the
//! value flows to the caller), failure (the numeric code binds to the
//! failure slot and the body runs as the recovery path), ready-to-invoke
//! (a tail call the engine performs), continuation-changed (the fiber's
//! current frame was replaced; resume and restart live here), or
//! fiber-suspended (an asynchronous operation; the scheduler resumes the
//! fiber later).
//!
//! Flags constrain optimization: `CAN_FOLD` bodies may run at compile time
//! on constants, `CAN_INLINE` bodies may be inlined into Level Two without
//! reification, `CANNOT_FAIL` bodies never take the failure path, and
//! `INVOKES` / `SWITCHES_CONTINUATION` mandate reification before the
//! call.

mod arith;
mod continuations;
mod fibers;
mod values;
mod variables;

use bitflags::bitflags;

use core_value::Value;

use crate::errors::ErrorCode;
use crate::fiber::Fiber;
use crate::Runtime;
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrimitiveFlags: u32 {
        const CAN_FOLD             = 1 << 0;
        const CAN_INLINE           = 1 << 1;
        const CANNOT_FAIL          = 1 << 2;
        const INVOKES              = 1 << 3;
        const SWITCHES_CONTINUATION = 1 << 4;
        const HAS_SIDE_EFFECT      = 1 << 5;
    }
}

pub enum PrimitiveResult {
    Success(Value),
    Failure(ErrorCode),
    /// The primitive wants the engine to perform this call in its place.
    ReadyToInvoke { function: Value, args: Vec<Value> },
    /// The fiber's current continuation was replaced by the primitive.
    ContinuationChanged,
    /// Block until the scheduler resumes the fiber.
    FiberSuspended,
}

/// Execution context handed to a primitive body. The current continuation
/// is the caller's frame, already positioned after the send.
pub struct PrimitiveContext<'a> {
    pub runtime: &'a Runtime,
    pub fiber: &'a Arc<Fiber>,
    pub current: &'a mut Option<Value>,
}

pub type PrimitiveBody = fn(&mut PrimitiveContext<'_>, &[Value]) -> PrimitiveResult;

pub struct Primitive {
    pub number: u16,
    pub name: &'static str,
    pub flags: PrimitiveFlags,
    /// The function type this implementation claims to realize.
    pub function_type: Value,
    /// Present exactly when the primitive can fail.
    pub failure_type: Option<Value>,
    pub body: PrimitiveBody,
}

// Primitive numbers. Stable; serialized code refers to them.
pub const PRIM_ADD: u16 = 1;
pub const PRIM_SUBTRACT: u16 = 2;
pub const PRIM_MULTIPLY: u16 = 3;
pub const PRIM_LESS_THAN: u16 = 4;
pub const PRIM_EQUALS: u16 = 5;
pub const PRIM_TUPLE_SIZE: u16 = 6;
pub const PRIM_TUPLE_AT: u16 = 7;
pub const PRIM_TUPLE_CONCAT: u16 = 8;
pub const PRIM_TYPE_OF: u16 = 9;
pub const PRIM_IS_SUBTYPE: u16 = 10;
pub const PRIM_IS_INSTANCE: u16 = 11;
pub const PRIM_VARIABLE_READ: u16 = 12;
pub const PRIM_VARIABLE_WRITE: u16 = 13;
pub const PRIM_VARIABLE_CLEAR: u16 = 14;
pub const PRIM_NEW_VARIABLE: u16 = 15;
pub const PRIM_MAKE_IMMUTABLE: u16 = 16;
pub const PRIM_MAKE_SHARED: u16 = 17;
pub const PRIM_CALL_WITH_CURRENT_CONTINUATION: u16 = 18;
pub const PRIM_RESUME_CONTINUATION: u16 = 19;
pub const PRIM_RESTART_CONTINUATION: u16 = 20;
pub const PRIM_SPAWN_FIBER: u16 = 21;
pub const PRIM_CURRENT_FIBER: u16 = 22;
pub const PRIM_JOIN_FIBER: u16 = 23;
pub const PRIM_PARK_FIBER: u16 = 24;
pub const PRIM_FIBER_PRIORITY: u16 = 25;
pub const PRIM_SET_FIBER_PRIORITY: u16 = 26;
pub const PRIM_REQUEST_TERMINATION: u16 = 27;
pub const PRIM_WHEN_LEVEL_ONE_SAFE: u16 = 28;
pub const PRIM_INVOKE_FUNCTION: u16 = 29;
/// Reserved: the stub-taking-tuple family is not finished (currying); the
/// number is kept so serialized references stay stable.
pub const PRIM_STUB_WITH_TUPLE: u16 = 30;

pub struct PrimitiveRegistry {
    by_number: Vec<Option<Arc<Primitive>>>,
}

impl PrimitiveRegistry {
    pub fn empty() -> PrimitiveRegistry {
        PrimitiveRegistry {
            by_number: Vec::new(),
        }
    }

    /// The full native catalog.
    pub fn standard() -> PrimitiveRegistry {
        let mut registry = PrimitiveRegistry::empty();
        arith::install(&mut registry);
        values::install(&mut registry);
        variables::install(&mut registry);
        continuations::install(&mut registry);
        fibers::install(&mut registry);
        registry
    }

    pub fn register(&mut self, primitive: Primitive) {
        let slot = primitive.number as usize;
        if self.by_number.len() <= slot {
            self.by_number.resize_with(slot + 1, || None);
        }
        debug_assert!(
            self.by_number[slot].is_none(),
            "primitive {} registered twice",
            slot
        );
        self.by_number[slot] = Some(Arc::new(primitive));
    }

    pub fn get(&self, number: u16) -> Option<Arc<Primitive>> {
        self.by_number.get(number as usize).and_then(Clone::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_is_complete_and_flagged() {
        let registry = PrimitiveRegistry::standard();
        for number in [
            PRIM_ADD,
            PRIM_TUPLE_AT,
            PRIM_CALL_WITH_CURRENT_CONTINUATION,
            PRIM_SPAWN_FIBER,
            PRIM_WHEN_LEVEL_ONE_SAFE,
        ] {
            assert!(registry.get(number).is_some(), "primitive {number} missing");
        }
        let add = registry.get(PRIM_ADD).unwrap();
        assert!(add.flags.contains(PrimitiveFlags::CAN_FOLD));
        assert!(add.flags.contains(PrimitiveFlags::CAN_INLINE));
        assert!(add.failure_type.is_some());
        let equals = registry.get(PRIM_EQUALS).unwrap();
        assert!(equals.flags.contains(PrimitiveFlags::CANNOT_FAIL));
        assert!(equals.failure_type.is_none());
        let resume = registry.get(PRIM_RESUME_CONTINUATION).unwrap();
        assert!(resume.flags.contains(PrimitiveFlags::SWITCHES_CONTINUATION));
        // The deliberately unfinished stub fails with Unsupported.
        assert!(registry.get(PRIM_STUB_WITH_TUPLE).is_some());
    }
}
