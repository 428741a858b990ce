//! Variable primitives: read, write, clear, and construction.

use core_value::{scalar, types, variable, Value};

use crate::errors::ErrorCode;
use crate::primitives::{
    PRIM_NEW_VARIABLE, PRIM_VARIABLE_CLEAR, PRIM_VARIABLE_READ, PRIM_VARIABLE_WRITE, Primitive,
    PrimitiveContext, PrimitiveFlags, PrimitiveRegistry, PrimitiveResult,
};

fn is_variable(value: &Value) -> bool {
    value.descriptor().variable_payload().is_some()
}

fn variable_read(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if !is_variable(&args[0]) {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    match variable::variable_read(&args[0]) {
        Ok(value) => PrimitiveResult::Success(value),
        Err(error) => PrimitiveResult::Failure(ErrorCode::from(&error)),
    }
}

fn variable_write(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if !is_variable(&args[0]) {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    match variable::variable_write(&args[0], args[1].clone()) {
        Ok(()) => PrimitiveResult::Success(scalar::nil()),
        Err(error) => PrimitiveResult::Failure(ErrorCode::from(&error)),
    }
}

fn variable_clear(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if !is_variable(&args[0]) {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    variable::variable_clear(&args[0]);
    PrimitiveResult::Success(scalar::nil())
}

fn new_variable(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if !args[0].is_type() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    PrimitiveResult::Success(variable::simple_variable(args[0].clone()))
}

pub fn install(registry: &mut PrimitiveRegistry) {
    let any_variable = types::variable_type(types::any_type(), types::bottom_type());
    registry.register(Primitive {
        number: PRIM_VARIABLE_READ,
        name: "variable read",
        flags: PrimitiveFlags::CAN_INLINE,
        function_type: types::function_type_from(
            vec![any_variable.clone()],
            types::any_type(),
        ),
        failure_type: Some(types::integers()),
        body: variable_read,
    });
    registry.register(Primitive {
        number: PRIM_VARIABLE_WRITE,
        name: "variable write",
        flags: PrimitiveFlags::CAN_INLINE | PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(
            vec![any_variable.clone(), types::any_type()],
            types::instance_type(scalar::nil()),
        ),
        failure_type: Some(types::integers()),
        body: variable_write,
    });
    registry.register(Primitive {
        number: PRIM_VARIABLE_CLEAR,
        name: "variable clear",
        flags: PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(
            vec![any_variable],
            types::instance_type(scalar::nil()),
        ),
        failure_type: Some(types::integers()),
        body: variable_clear,
    });
    registry.register(Primitive {
        number: PRIM_NEW_VARIABLE,
        name: "new variable",
        flags: PrimitiveFlags::empty(),
        function_type: types::function_type_from(
            vec![types::meta(types::any_type())],
            types::variable_type(types::any_type(), types::bottom_type()),
        ),
        failure_type: Some(types::integers()),
        body: new_variable,
    });
}
