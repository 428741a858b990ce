//! Value-shape primitives: equality, type queries, tuples, mutability
//! promotion, and the reserved unfinished stubs.

use core_value::{atom, scalar, tuple, types, Value};

use crate::errors::ErrorCode;
use crate::primitives::{
    PRIM_EQUALS, PRIM_INVOKE_FUNCTION, PRIM_IS_INSTANCE, PRIM_IS_SUBTYPE, PRIM_MAKE_IMMUTABLE,
    PRIM_MAKE_SHARED, PRIM_STUB_WITH_TUPLE, PRIM_TUPLE_AT, PRIM_TUPLE_CONCAT, PRIM_TUPLE_SIZE,
    PRIM_TYPE_OF, Primitive, PrimitiveContext, PrimitiveFlags, PrimitiveRegistry,
    PrimitiveResult,
};

fn equals(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    PrimitiveResult::Success(atom::boolean(args[0].equals(&args[1])))
}

fn type_of(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    PrimitiveResult::Success(args[0].kind())
}

fn is_subtype(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if !args[0].is_type() || !args[1].is_type() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    PrimitiveResult::Success(atom::boolean(args[0].is_subtype_of(&args[1])))
}

fn is_instance(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if !args[1].is_type() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    PrimitiveResult::Success(atom::boolean(args[0].is_instance_of(&args[1])))
}

fn tuple_size(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    match args[0].descriptor().tuple_len() {
        Some(len) => PrimitiveResult::Success(scalar::integer(len as i64)),
        None => PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType),
    }
}

fn tuple_at(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    let Some(len) = args[0].descriptor().tuple_len() else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    let Some(index) = scalar::int_of(&args[1]) else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    if index < 1 || index as usize > len {
        return PrimitiveResult::Failure(ErrorCode::SubscriptOutOfBounds);
    }
    PrimitiveResult::Success(tuple::tuple_at(&args[0], index as usize))
}

fn tuple_concat(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if args[0].descriptor().tuple_len().is_none() || args[1].descriptor().tuple_len().is_none() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    PrimitiveResult::Success(tuple::concatenate(&args[0], &args[1]))
}

fn make_immutable(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    PrimitiveResult::Success(args[0].make_immutable())
}

fn make_shared(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    PrimitiveResult::Success(args[0].make_shared())
}

fn invoke_function(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if core_code::function_data(&args[0]).is_none() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    let Some(len) = args[1].descriptor().tuple_len() else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    let call_args = (1..=len).map(|i| tuple::tuple_at(&args[1], i)).collect();
    PrimitiveResult::ReadyToInvoke {
        function: args[0].clone(),
        args: call_args,
    }
}

// TODO: finish for currying; the stub-taking-tuple family is reserved but
// deliberately unimplemented; callers receive the unsupported code rather
// than guessed semantics.
fn stub_with_tuple(_context: &mut PrimitiveContext<'_>, _args: &[Value]) -> PrimitiveResult {
    PrimitiveResult::Failure(ErrorCode::Unsupported)
}

pub fn install(registry: &mut PrimitiveRegistry) {
    let pure = PrimitiveFlags::CAN_FOLD | PrimitiveFlags::CANNOT_FAIL;
    registry.register(Primitive {
        number: PRIM_EQUALS,
        name: "value equality",
        flags: pure,
        function_type: types::function_type_from(
            vec![types::any_type(), types::any_type()],
            types::boolean_type(),
        ),
        failure_type: None,
        body: equals,
    });
    registry.register(Primitive {
        number: PRIM_TYPE_OF,
        name: "type of",
        flags: pure,
        function_type: types::function_type_from(
            vec![types::any_type()],
            types::meta(types::any_type()),
        ),
        failure_type: None,
        body: type_of,
    });
    registry.register(Primitive {
        number: PRIM_IS_SUBTYPE,
        name: "subtype test",
        flags: PrimitiveFlags::CAN_FOLD,
        function_type: types::function_type_from(
            vec![types::meta(types::any_type()), types::meta(types::any_type())],
            types::boolean_type(),
        ),
        failure_type: Some(types::integers()),
        body: is_subtype,
    });
    registry.register(Primitive {
        number: PRIM_IS_INSTANCE,
        name: "instance test",
        flags: PrimitiveFlags::CAN_FOLD,
        function_type: types::function_type_from(
            vec![types::any_type(), types::meta(types::any_type())],
            types::boolean_type(),
        ),
        failure_type: Some(types::integers()),
        body: is_instance,
    });
    registry.register(Primitive {
        number: PRIM_TUPLE_SIZE,
        name: "tuple size",
        flags: PrimitiveFlags::CAN_FOLD | PrimitiveFlags::CAN_INLINE,
        function_type: types::function_type_from(
            vec![types::any_tuple_type()],
            types::whole_numbers(),
        ),
        failure_type: Some(types::integers()),
        body: tuple_size,
    });
    registry.register(Primitive {
        number: PRIM_TUPLE_AT,
        name: "tuple subscript",
        flags: PrimitiveFlags::CAN_FOLD | PrimitiveFlags::CAN_INLINE,
        function_type: types::function_type_from(
            vec![types::any_tuple_type(), types::natural_numbers()],
            types::any_type(),
        ),
        failure_type: Some(types::integers()),
        body: tuple_at,
    });
    registry.register(Primitive {
        number: PRIM_TUPLE_CONCAT,
        name: "tuple concatenation",
        flags: PrimitiveFlags::CAN_FOLD,
        function_type: types::function_type_from(
            vec![types::any_tuple_type(), types::any_tuple_type()],
            types::any_tuple_type(),
        ),
        failure_type: Some(types::integers()),
        body: tuple_concat,
    });
    registry.register(Primitive {
        number: PRIM_MAKE_IMMUTABLE,
        name: "make immutable",
        flags: PrimitiveFlags::CANNOT_FAIL | PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(vec![types::any_type()], types::any_type()),
        failure_type: None,
        body: make_immutable,
    });
    registry.register(Primitive {
        number: PRIM_MAKE_SHARED,
        name: "make shared",
        flags: PrimitiveFlags::CANNOT_FAIL | PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(vec![types::any_type()], types::any_type()),
        failure_type: None,
        body: make_shared,
    });
    registry.register(Primitive {
        number: PRIM_INVOKE_FUNCTION,
        name: "invoke function with tuple",
        flags: PrimitiveFlags::INVOKES,
        function_type: types::function_type_from(
            vec![
                types::function_type(types::any_tuple_type(), types::any_type()),
                types::any_tuple_type(),
            ],
            types::any_type(),
        ),
        failure_type: Some(types::integers()),
        body: invoke_function,
    });
    registry.register(Primitive {
        number: PRIM_STUB_WITH_TUPLE,
        name: "function stub from tuple",
        flags: PrimitiveFlags::empty(),
        function_type: types::function_type_from(
            vec![
                types::function_type(types::any_tuple_type(), types::any_type()),
                types::any_tuple_type(),
            ],
            types::any_type(),
        ),
        failure_type: Some(types::integers()),
        body: stub_with_tuple,
    });
}
