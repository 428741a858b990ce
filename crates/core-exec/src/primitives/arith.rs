//! Integer arithmetic and comparison primitives. All foldable; the three
//! ring operations fail out-of-range on 64-bit overflow so the recovery
//! path can rebuild with a wider representation.

use core_value::{atom, scalar, types};

use crate::errors::ErrorCode;
use crate::primitives::{
    PRIM_ADD, PRIM_LESS_THAN, PRIM_MULTIPLY, PRIM_SUBTRACT, Primitive, PrimitiveContext,
    PrimitiveFlags, PrimitiveRegistry, PrimitiveResult,
};

fn binary_int_type() -> core_value::Value {
    types::function_type_from(
        vec![types::integers(), types::integers()],
        types::integers(),
    )
}

fn int_args(args: &[core_value::Value]) -> Result<(i64, i64), ErrorCode> {
    let a = scalar::int_of(&args[0]).ok_or(ErrorCode::IncorrectArgumentType)?;
    let b = scalar::int_of(&args[1]).ok_or(ErrorCode::IncorrectArgumentType)?;
    Ok((a, b))
}

fn add(_context: &mut PrimitiveContext<'_>, args: &[core_value::Value]) -> PrimitiveResult {
    match int_args(args) {
        Ok((a, b)) => match a.checked_add(b) {
            Some(sum) => PrimitiveResult::Success(scalar::integer(sum)),
            None => PrimitiveResult::Failure(ErrorCode::OutOfRange),
        },
        Err(code) => PrimitiveResult::Failure(code),
    }
}

fn subtract(_context: &mut PrimitiveContext<'_>, args: &[core_value::Value]) -> PrimitiveResult {
    match int_args(args) {
        Ok((a, b)) => match a.checked_sub(b) {
            Some(difference) => PrimitiveResult::Success(scalar::integer(difference)),
            None => PrimitiveResult::Failure(ErrorCode::OutOfRange),
        },
        Err(code) => PrimitiveResult::Failure(code),
    }
}

fn multiply(_context: &mut PrimitiveContext<'_>, args: &[core_value::Value]) -> PrimitiveResult {
    match int_args(args) {
        Ok((a, b)) => match a.checked_mul(b) {
            Some(product) => PrimitiveResult::Success(scalar::integer(product)),
            None => PrimitiveResult::Failure(ErrorCode::OutOfRange),
        },
        Err(code) => PrimitiveResult::Failure(code),
    }
}

fn less_than(_context: &mut PrimitiveContext<'_>, args: &[core_value::Value]) -> PrimitiveResult {
    match int_args(args) {
        Ok((a, b)) => PrimitiveResult::Success(atom::boolean(a < b)),
        Err(code) => PrimitiveResult::Failure(code),
    }
}

pub fn install(registry: &mut PrimitiveRegistry) {
    let fallible = PrimitiveFlags::CAN_FOLD | PrimitiveFlags::CAN_INLINE;
    registry.register(Primitive {
        number: PRIM_ADD,
        name: "integer add",
        flags: fallible,
        function_type: binary_int_type(),
        failure_type: Some(types::integers()),
        body: add,
    });
    registry.register(Primitive {
        number: PRIM_SUBTRACT,
        name: "integer subtract",
        flags: fallible,
        function_type: binary_int_type(),
        failure_type: Some(types::integers()),
        body: subtract,
    });
    registry.register(Primitive {
        number: PRIM_MULTIPLY,
        name: "integer multiply",
        flags: fallible,
        function_type: binary_int_type(),
        failure_type: Some(types::integers()),
        body: multiply,
    });
    registry.register(Primitive {
        number: PRIM_LESS_THAN,
        name: "integer less than",
        flags: fallible,
        function_type: types::function_type_from(
            vec![types::integers(), types::integers()],
            types::boolean_type(),
        ),
        failure_type: Some(types::integers()),
        body: less_than,
    });
}
