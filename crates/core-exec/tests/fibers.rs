//! Fibers end to end: spawn/join, shared-variable happens-before, and
//! cooperative termination.

mod common;

use std::time::{Duration, Instant};

use common::*;
use core_code::{CodeBuilder, L1Operation};
use core_exec::{ErrorCode, FiberOutcome};
use core_value::{scalar, types, variable};

#[test]
fn spawn_and_join_deliver_the_result() {
    let runtime = runtime();
    let worker = constant_handler("worker", types::any_type(), int(21));
    let fiber = runtime.spawn(worker, vec![scalar::nil()], 100, "worker".into());
    match fiber.join_blocking() {
        FiberOutcome::Completed(value) => assert!(value.equals(&int(21))),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn shared_variable_writes_are_observed_in_order() {
    // Fiber A writes x := 1 then y := 1; any observer that reads y = 1
    // afterwards must also read x = 1.
    let runtime = runtime();
    let x = variable::simple_variable(types::integers()).make_shared();
    let y = variable::simple_variable(types::integers()).make_shared();
    variable::variable_write(&x, int(0)).unwrap();
    variable::variable_write(&y, int(0)).unwrap();

    // writer: x := 1; y := 1.
    let writer = {
        let mut builder = CodeBuilder::new("writer");
        builder.returns(types::any_type());
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.push_literal(int(1));
        builder.emit(L1Operation::SetVariable);
        builder.emit(L1Operation::PushOuter { index: 2 });
        builder.push_literal(int(1));
        builder.emit(L1Operation::SetVariable);
        builder.push_literal(scalar::nil());
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![x.clone(), y.clone()])
    };
    // observer: ⟨y, x⟩ with y read strictly before x.
    let observer = {
        let mut builder = CodeBuilder::new("observer");
        builder.returns(types::any_type());
        builder.emit(L1Operation::PushOuter { index: 2 });
        builder.emit(L1Operation::GetVariable);
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.emit(L1Operation::GetVariable);
        builder.emit(L1Operation::MakeTuple { count: 2 });
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![x.clone(), y.clone()])
    };

    runtime.spawn(writer, Vec::new(), 150, "writer".into());
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let pair = runtime.run_function_now(observer.clone(), Vec::new()).unwrap();
        let y_seen = core_value::tuple::tuple_at(&pair, 1);
        let x_seen = core_value::tuple::tuple_at(&pair, 2);
        if y_seen.equals(&int(1)) {
            assert!(
                x_seen.equals(&int(1)),
                "read y = 1 but then x = {x_seen:?}"
            );
            break;
        }
        assert!(Instant::now() < deadline, "writer never became visible");
    }
}

#[test]
fn termination_is_observed_at_a_safepoint() {
    let runtime = runtime();
    // A parked fiber can only leave through termination.
    let parked = primitive_function(
        "park fiber",
        core_exec::primitives::PRIM_PARK_FIBER,
        vec![],
        types::any_type(),
    );
    let fiber = runtime.spawn(parked, Vec::new(), 100, "parked".into());
    // Give it a moment to reach the suspension.
    std::thread::sleep(Duration::from_millis(50));
    runtime.request_termination(&fiber);
    match fiber.join_blocking() {
        FiberOutcome::Failed(code, _) => assert_eq!(code, ErrorCode::FiberIsTerminated),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn every_runnable_fiber_is_eventually_scheduled() {
    let runtime = runtime();
    let mut fibers = Vec::new();
    for index in 0..32 {
        let priority = (index % 7) as u8 * 30;
        let worker = constant_handler("flood", types::any_type(), int(index));
        fibers.push(runtime.spawn(
            worker,
            vec![scalar::nil()],
            priority,
            format!("flood {index}"),
        ));
    }
    for (index, fiber) in fibers.into_iter().enumerate() {
        match fiber.join_blocking() {
            FiberOutcome::Completed(value) => assert!(value.equals(&int(index as i64))),
            other => panic!("fiber {index} ended {other:?}"),
        }
    }
}

#[test]
fn fiber_panics_are_confined() {
    let runtime = runtime();
    // A frame-slot read out of bounds is an internal invariant breach: it
    // terminates the one fiber with a recorded diagnostic, nothing else.
    let broken = {
        let mut builder = CodeBuilder::new("broken");
        builder.returns(types::any_type());
        builder.emit(L1Operation::PushLocal { slot: 99 });
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    let fiber = runtime.spawn(broken, Vec::new(), 90, "doomed".into());
    assert!(matches!(fiber.join_blocking(), FiberOutcome::Panicked(_)));
    // The runtime is intact: another fiber runs normally afterwards.
    let after = runtime
        .run_function_now(
            constant_handler("after", types::any_type(), int(4)),
            vec![scalar::nil()],
        )
        .unwrap();
    assert!(after.equals(&int(4)));
}

#[test]
fn level_one_safe_actions_run_behind_the_barrier() {
    let runtime = runtime();
    let witness = variable::simple_variable(types::any_type()).make_shared();
    // The deferred action writes the witness when the runtime lets it run.
    let action = {
        let mut builder = CodeBuilder::new("safe action");
        builder.returns(types::any_type());
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.push_literal(int(1));
        builder.emit(L1Operation::SetVariable);
        builder.push_literal(scalar::nil());
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![witness.clone()])
    };
    let hook = primitive_function(
        "when level one safe",
        core_exec::primitives::PRIM_WHEN_LEVEL_ONE_SAFE,
        vec![types::function_type_from(vec![], types::any_type())],
        types::any_type(),
    );
    let outcome = runtime.run_function_now(hook, vec![action]).unwrap();
    assert!(outcome.equals(&scalar::nil()));
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(seen) = variable::variable_read(&witness)
            && seen.equals(&int(1))
        {
            break;
        }
        assert!(Instant::now() < deadline, "safe action never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
}
