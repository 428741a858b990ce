//! First-class continuations end to end: capture at a send, resume with a
//! substituted result, restart with original arguments.

mod common;

use common::*;
use core_code::{CodeBuilder, L1Operation};
use core_exec::primitives::{
    PRIM_CALL_WITH_CURRENT_CONTINUATION, PRIM_RESUME_CONTINUATION,
};
use core_value::{scalar, types, variable};

#[test]
fn captured_continuation_resumes_with_a_substituted_result() {
    let runtime = runtime();

    // Method `cc_` is call-with-current-continuation.
    let cc = runtime.atom_named("cc_");
    define(
        &runtime,
        &cc,
        primitive_function(
            "call with current continuation",
            PRIM_CALL_WITH_CURRENT_CONTINUATION,
            vec![types::function_type(
                types::any_tuple_type(),
                types::any_type(),
            )],
            types::any_type(),
        ),
    );

    // `f` stows the captured continuation in a shared cell and answers 0.
    let stash = variable::simple_variable(types::any_type()).make_shared();
    let f = {
        let mut builder = CodeBuilder::new("stash continuation");
        builder.args(vec![types::any_type()]);
        builder.returns(types::integers());
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::SetVariable);
        builder.push_literal(int(0));
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![stash.clone()])
    };

    // `main` sends cc(f) and returns whatever the send produced.
    let main = {
        let mut builder = CodeBuilder::new("originating call site");
        builder.returns(types::integers());
        builder.push_literal(f);
        builder.call(cc.clone(), 1, types::integers());
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };

    // First pass: f declined to use the continuation, so the site sees 0.
    let first = runtime.run_function_now(main, Vec::new()).unwrap();
    assert!(first.equals(&int(0)));

    // Later, resuming the captured frame delivers 99 to the same call
    // site, and the computation finishes with 99 instead.
    let captured = variable::variable_read(&stash).expect("continuation was stashed");
    let resume = primitive_function(
        "resume continuation",
        PRIM_RESUME_CONTINUATION,
        vec![
            types::continuation_type(types::function_type(
                types::any_tuple_type(),
                types::any_type(),
            )),
            types::any_type(),
        ],
        types::bottom_type(),
    );
    let second = runtime
        .run_function_now(resume, vec![captured, int(99)])
        .unwrap();
    assert!(second.equals(&int(99)));
}

#[test]
fn resuming_a_reified_frame_matches_direct_execution() {
    let runtime = runtime();
    let cc = runtime.atom_named("cc_");
    define(
        &runtime,
        &cc,
        primitive_function(
            "call with current continuation",
            PRIM_CALL_WITH_CURRENT_CONTINUATION,
            vec![types::function_type(
                types::any_tuple_type(),
                types::any_type(),
            )],
            types::any_type(),
        ),
    );
    let plus = runtime.atom_named("_+_");
    define(
        &runtime,
        &plus,
        primitive_function(
            "integer add",
            core_exec::primitives::PRIM_ADD,
            vec![types::integers(), types::integers()],
            types::integers(),
        ),
    );

    let stash = variable::simple_variable(types::any_type()).make_shared();
    let f = {
        let mut builder = CodeBuilder::new("stash");
        builder.args(vec![types::any_type()]);
        builder.returns(types::integers());
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::SetVariable);
        builder.push_literal(int(7));
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![stash.clone()])
    };
    // main answers cc(f) + 100.
    let main = {
        let mut builder = CodeBuilder::new("adds after capture");
        builder.returns(types::integers());
        builder.push_literal(f);
        builder.call(cc.clone(), 1, types::integers());
        builder.push_literal(int(100));
        builder.call(plus.clone(), 2, types::integers());
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };

    // Direct execution: 7 + 100.
    let direct = runtime.run_function_now(main, Vec::new()).unwrap();
    assert!(direct.equals(&int(107)));

    // Resume the captured frame with the same value the primitive call
    // produced; the rest of the computation must agree with the direct
    // run.
    let captured = variable::variable_read(&stash).unwrap();
    let resume = primitive_function(
        "resume continuation",
        PRIM_RESUME_CONTINUATION,
        vec![
            types::continuation_type(types::function_type(
                types::any_tuple_type(),
                types::any_type(),
            )),
            types::any_type(),
        ],
        types::bottom_type(),
    );
    let replay = runtime
        .run_function_now(resume, vec![captured, int(7)])
        .unwrap();
    assert!(replay.equals(&int(107)));
}

#[test]
fn restart_reruns_with_original_arguments() {
    let runtime = runtime();
    // A counter visible across runs distinguishes re-execution from
    // memoization.
    let counter = variable::simple_variable(types::any_type()).make_shared();
    variable::variable_write(&counter, int(0)).unwrap();

    let plus = runtime.atom_named("_+_");
    define(
        &runtime,
        &plus,
        primitive_function(
            "integer add",
            core_exec::primitives::PRIM_ADD,
            vec![types::integers(), types::integers()],
            types::integers(),
        ),
    );

    // g(n): counter := counter + 1; return n.
    let g = {
        let mut builder = CodeBuilder::new("bump and echo");
        builder.args(vec![types::integers()]);
        builder.returns(types::integers());
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.emit(L1Operation::GetVariable);
        builder.push_literal(int(1));
        builder.call(plus.clone(), 2, types::integers());
        builder.emit(L1Operation::SetVariable);
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![counter.clone()])
    };

    let result = runtime.run_function_now(g.clone(), vec![int(5)]).unwrap();
    assert!(result.equals(&int(5)));
    assert!(variable::variable_read(&counter).unwrap().equals(&int(1)));

    // Build a frame for g(5), freeze it, and restart it twice: each run
    // re-executes the body with the original argument.
    let code = core_code::function_data(&g).unwrap().code_data();
    let frame = core_exec::new_continuation(
        scalar::nil(),
        g,
        &code,
        vec![int(5)],
        None,
        true,
    )
    .make_immutable();
    for expected_count in 2..=3 {
        let restarted = core_exec::continuation::restart(&frame);
        let restart_prim = primitive_function(
            "restart continuation",
            core_exec::primitives::PRIM_RESTART_CONTINUATION,
            vec![types::continuation_type(types::function_type(
                types::any_tuple_type(),
                types::any_type(),
            ))],
            types::bottom_type(),
        );
        let outcome = runtime
            .run_function_now(restart_prim, vec![restarted])
            .unwrap();
        assert!(outcome.equals(&int(5)));
        assert!(
            variable::variable_read(&counter)
                .unwrap()
                .equals(&int(expected_count))
        );
    }
}
