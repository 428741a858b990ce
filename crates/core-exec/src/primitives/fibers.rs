//! Fiber primitives: spawn, join, park, priorities, cooperative
//! termination, and the level-one-safe hook.

use core_value::{scalar, tuple, types, Value};

use crate::errors::ErrorCode;
use crate::fiber::{self, ExecutionState};
use crate::primitives::{
    PRIM_CURRENT_FIBER, PRIM_FIBER_PRIORITY, PRIM_JOIN_FIBER, PRIM_PARK_FIBER,
    PRIM_REQUEST_TERMINATION, PRIM_SET_FIBER_PRIORITY, PRIM_SPAWN_FIBER,
    PRIM_WHEN_LEVEL_ONE_SAFE, Primitive, PrimitiveContext, PrimitiveFlags, PrimitiveRegistry,
    PrimitiveResult,
};

fn spawn_fiber(context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if core_code::function_data(&args[0]).is_none() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    let Some(len) = args[1].descriptor().tuple_len() else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    let Some(priority) = scalar::int_of(&args[2]) else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    if !(0..=255).contains(&priority) {
        return PrimitiveResult::Failure(ErrorCode::OutOfRange);
    }
    let call_args: Vec<Value> = (1..=len)
        .map(|index| tuple::tuple_at(&args[1], index).make_shared())
        .collect();
    let function = args[0].make_shared();
    let spawned = context.runtime.spawn(
        function,
        call_args,
        priority as u8,
        format!("spawned by {}", context.fiber.name),
    );
    PrimitiveResult::Success(fiber::fiber_value(spawned))
}

fn current_fiber(context: &mut PrimitiveContext<'_>, _args: &[Value]) -> PrimitiveResult {
    PrimitiveResult::Success(fiber::fiber_value(context.fiber.clone()))
}

fn join_fiber(context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    let Some(target) = fiber::fiber_of(&args[0]) else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    match target.add_joiner(context.fiber.clone()) {
        Some(outcome) => PrimitiveResult::Success(crate::join_result_value(&outcome)),
        None => PrimitiveResult::FiberSuspended,
    }
}

fn park_fiber(_context: &mut PrimitiveContext<'_>, _args: &[Value]) -> PrimitiveResult {
    PrimitiveResult::FiberSuspended
}

fn fiber_priority(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    let Some(target) = fiber::fiber_of(&args[0]) else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    PrimitiveResult::Success(scalar::integer(target.priority() as i64))
}

fn set_fiber_priority(_context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    let Some(target) = fiber::fiber_of(&args[0]) else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    let Some(priority) = scalar::int_of(&args[1]) else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    if !(0..=255).contains(&priority) {
        return PrimitiveResult::Failure(ErrorCode::OutOfRange);
    }
    target.set_priority(priority as u8);
    PrimitiveResult::Success(scalar::nil())
}

fn request_termination(context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    let Some(target) = fiber::fiber_of(&args[0]) else {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    };
    if target.execution_state() == ExecutionState::Terminated {
        return PrimitiveResult::Failure(ErrorCode::FiberIsTerminated);
    }
    context.runtime.request_termination(&target);
    PrimitiveResult::Success(scalar::nil())
}

fn when_level_one_safe(context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if core_code::function_data(&args[0]).is_none() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    let action = args[0].make_shared();
    let requester = context.fiber.clone();
    context.runtime.when_level_one_safe(Box::new(move |runtime| {
        let fiber = runtime.spawn(action, Vec::new(), requester.priority(), "L1-safe action".into());
        let _ = fiber;
        runtime.resume_from_successful_primitive(&requester, scalar::nil());
    }));
    PrimitiveResult::FiberSuspended
}

pub fn install(registry: &mut PrimitiveRegistry) {
    let fiber_type = types::any_type();
    registry.register(Primitive {
        number: PRIM_SPAWN_FIBER,
        name: "spawn fiber",
        flags: PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(
            vec![
                types::function_type(types::any_tuple_type(), types::any_type()),
                types::any_tuple_type(),
                types::integer_range(
                    types::ExtInt::Fin(0),
                    true,
                    types::ExtInt::Fin(255),
                    true,
                ),
            ],
            fiber_type.clone(),
        ),
        failure_type: Some(types::integers()),
        body: spawn_fiber,
    });
    registry.register(Primitive {
        number: PRIM_CURRENT_FIBER,
        name: "current fiber",
        flags: PrimitiveFlags::CANNOT_FAIL,
        function_type: types::function_type_from(vec![], fiber_type.clone()),
        failure_type: None,
        body: current_fiber,
    });
    registry.register(Primitive {
        number: PRIM_JOIN_FIBER,
        name: "join fiber",
        flags: PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(
            vec![fiber_type.clone()],
            types::any_type(),
        ),
        failure_type: Some(types::integers()),
        body: join_fiber,
    });
    registry.register(Primitive {
        number: PRIM_PARK_FIBER,
        name: "park fiber",
        flags: PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(vec![], types::instance_type(scalar::nil())),
        failure_type: Some(types::integers()),
        body: park_fiber,
    });
    registry.register(Primitive {
        number: PRIM_FIBER_PRIORITY,
        name: "fiber priority",
        flags: PrimitiveFlags::CANNOT_FAIL,
        function_type: types::function_type_from(
            vec![fiber_type.clone()],
            types::integer_range(types::ExtInt::Fin(0), true, types::ExtInt::Fin(255), true),
        ),
        failure_type: None,
        body: fiber_priority,
    });
    registry.register(Primitive {
        number: PRIM_SET_FIBER_PRIORITY,
        name: "set fiber priority",
        flags: PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(
            vec![fiber_type.clone(), types::integers()],
            types::instance_type(scalar::nil()),
        ),
        failure_type: Some(types::integers()),
        body: set_fiber_priority,
    });
    registry.register(Primitive {
        number: PRIM_REQUEST_TERMINATION,
        name: "request termination",
        flags: PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(
            vec![fiber_type],
            types::instance_type(scalar::nil()),
        ),
        failure_type: Some(types::integers()),
        body: request_termination,
    });
    registry.register(Primitive {
        number: PRIM_WHEN_LEVEL_ONE_SAFE,
        name: "when level one safe",
        flags: PrimitiveFlags::HAS_SIDE_EFFECT,
        function_type: types::function_type_from(
            vec![types::function_type_from(vec![], types::any_type())],
            types::instance_type(scalar::nil()),
        ),
        failure_type: Some(types::integers()),
        body: when_level_one_safe,
    });
}
