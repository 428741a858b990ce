//! Continuation primitives: capture, resume, restart.
//!
//! Capture hands the caller's own frame, already positioned after the
//! send and awaiting a result, to the argument function as a first-class
//! value. Resume installs a captured continuation as the fiber's current
//! frame with the supplied value pushed as the awaited result. Restart
//! rewinds a continuation to re-execute with its original arguments.

use core_value::{types, Value};

use crate::continuation;
use crate::errors::ErrorCode;
use crate::primitives::{
    PRIM_CALL_WITH_CURRENT_CONTINUATION, PRIM_RESTART_CONTINUATION, PRIM_RESUME_CONTINUATION,
    Primitive, PrimitiveContext, PrimitiveFlags, PrimitiveRegistry, PrimitiveResult,
};

fn call_with_current_continuation(
    context: &mut PrimitiveContext<'_>,
    args: &[Value],
) -> PrimitiveResult {
    if core_code::function_data(&args[0]).is_none() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    let Some(current) = context.current.clone() else {
        return PrimitiveResult::Failure(ErrorCode::InvalidHandle);
    };
    // Freeze the captured frame; the engine copies before any later write.
    let captured = current.make_immutable();
    PrimitiveResult::ReadyToInvoke {
        function: args[0].clone(),
        args: vec![captured],
    }
}

fn resume_continuation(context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if continuation::continuation_data(&args[0]).is_none() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    let target = args[0].ensure_mutable();
    continuation::continuation_data(&target)
        .expect("copy preserves shape")
        .with_state(|state| state.push(args[1].clone()));
    *context.current = Some(target);
    PrimitiveResult::ContinuationChanged
}

fn restart_continuation(context: &mut PrimitiveContext<'_>, args: &[Value]) -> PrimitiveResult {
    if continuation::continuation_data(&args[0]).is_none() {
        return PrimitiveResult::Failure(ErrorCode::IncorrectArgumentType);
    }
    let rewound = continuation::restart(&args[0]);
    *context.current = Some(rewound);
    PrimitiveResult::ContinuationChanged
}

pub fn install(registry: &mut PrimitiveRegistry) {
    let any_continuation = types::continuation_type(types::function_type(
        types::any_tuple_type(),
        types::any_type(),
    ));
    registry.register(Primitive {
        number: PRIM_CALL_WITH_CURRENT_CONTINUATION,
        name: "call with current continuation",
        flags: PrimitiveFlags::INVOKES,
        function_type: types::function_type_from(
            vec![types::function_type(
                types::any_tuple_type(),
                types::any_type(),
            )],
            types::any_type(),
        ),
        failure_type: Some(types::integers()),
        body: call_with_current_continuation,
    });
    registry.register(Primitive {
        number: PRIM_RESUME_CONTINUATION,
        name: "resume continuation",
        flags: PrimitiveFlags::SWITCHES_CONTINUATION,
        function_type: types::function_type_from(
            vec![any_continuation.clone(), types::any_type()],
            types::bottom_type(),
        ),
        failure_type: Some(types::integers()),
        body: resume_continuation,
    });
    registry.register(Primitive {
        number: PRIM_RESTART_CONTINUATION,
        name: "restart continuation",
        flags: PrimitiveFlags::SWITCHES_CONTINUATION,
        function_type: types::function_type_from(
            vec![any_continuation],
            types::bottom_type(),
        ),
        failure_type: Some(types::integers()),
        body: restart_continuation,
    });
}
