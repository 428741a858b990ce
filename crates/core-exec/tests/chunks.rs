//! Level Two end to end: monomorphic specialization, unboxed arithmetic,
//! and invalidation back to the nominal interpreter.

mod common;

use common::*;
use core_code::InstalledChunk;
use core_value::{tuple, types};

fn add_method(runtime: &core_exec::Runtime) -> core_value::Value {
    let plus = runtime.atom_named("_+_");
    define(
        runtime,
        &plus,
        primitive_function(
            "integer add",
            core_exec::primitives::PRIM_ADD,
            vec![types::integers(), types::integers()],
            types::integers(),
        ),
    );
    plus
}

#[test]
fn monomorphic_send_specializes_until_the_method_grows() {
    let runtime = runtime();
    let poke = runtime.atom_named("poke_");
    define(
        &runtime,
        &poke,
        identity_handler("sole definition", types::integers()),
    );

    // c(n) = poke(n), with the send specialized to the sole definition.
    let c = {
        let mut builder = core_code::CodeBuilder::new("c");
        builder.args(vec![types::integers()]);
        builder.returns(types::integers());
        builder.emit(core_code::L1Operation::PushLocal { slot: 1 });
        builder.call(poke.clone(), 1, types::integers());
        builder.emit(core_code::L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    assert!(runtime.optimize_function(&c));
    let code = core_code::function_data(&c).unwrap().code_data();
    assert!(code.installed_chunk().is_some(), "chunk installed");

    // Runs under the chunk.
    let under_chunk = runtime.run_function_now(c.clone(), vec![int(5)]).unwrap();
    assert!(under_chunk.equals(&int(5)));

    // A second, disjoint definition invalidates the specialization.
    define(
        &runtime,
        &poke,
        identity_handler("string case", types::string_type()),
    );
    assert!(
        code.installed_chunk().is_none(),
        "invalidation cleared the chunk pointer"
    );

    // The next entry runs under the default chunk and dispatches
    // polymorphically; both the old and the new behavior hold.
    assert!(runtime.run_function_now(c.clone(), vec![int(5)]).unwrap().equals(&int(5)));
    let poke_string = {
        let mut builder = core_code::CodeBuilder::new("c2");
        builder.returns(types::string_type());
        builder.push_literal(tuple::string_value("s"));
        builder.call(poke.clone(), 1, types::string_type());
        builder.emit(core_code::L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    assert!(
        runtime
            .run_function_now(poke_string, Vec::new())
            .unwrap()
            .equals(&tuple::string_value("s"))
    );
}

#[test]
fn inlined_arithmetic_agrees_with_the_nominal_path() {
    let runtime = runtime();
    let plus = add_method(&runtime);

    let sum = {
        let mut builder = core_code::CodeBuilder::new("sum");
        builder.args(vec![types::integers(), types::integers()]);
        builder.returns(types::integers());
        builder.emit(core_code::L1Operation::PushLocal { slot: 1 });
        builder.emit(core_code::L1Operation::PushLocal { slot: 2 });
        builder.call(plus.clone(), 2, types::integers());
        builder.emit(core_code::L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    let nominal = runtime
        .run_function_now(sum.clone(), vec![int(40), int(2)])
        .unwrap();
    assert!(nominal.equals(&int(42)));

    assert!(runtime.optimize_function(&sum));
    let optimized = runtime
        .run_function_now(sum.clone(), vec![int(40), int(2)])
        .unwrap();
    assert!(optimized.equals(&int(42)));

    // The overflow off-ramp re-executes the send nominally, reaching the
    // primitive's failure path.
    let overflowed = runtime
        .run_function_now(sum.clone(), vec![int(i64::MAX), int(1)])
        .unwrap();
    assert!(overflowed.equals(&core_exec::ErrorCode::OutOfRange.as_value()));
}

#[test]
fn invalidated_chunks_are_never_reentered() {
    let runtime = runtime();
    let poke = runtime.atom_named("poke_");
    define(
        &runtime,
        &poke,
        identity_handler("sole definition", types::integers()),
    );
    let c = {
        let mut builder = core_code::CodeBuilder::new("c");
        builder.args(vec![types::integers()]);
        builder.returns(types::integers());
        builder.emit(core_code::L1Operation::PushLocal { slot: 1 });
        builder.call(poke.clone(), 1, types::integers());
        builder.emit(core_code::L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    assert!(runtime.optimize_function(&c));
    let code = core_code::function_data(&c).unwrap().code_data();
    let installed = code.installed_chunk().unwrap();
    assert!(installed.is_valid());

    define(
        &runtime,
        &poke,
        identity_handler("unrelated", types::string_type()),
    );
    assert!(!installed.is_valid(), "validity bit observed false");
    assert!(code.installed_chunk().is_none());

    // Re-optimizing after the change builds a fresh, polymorphic chunk.
    assert!(runtime.optimize_function(&c));
    assert!(runtime.run_function_now(c, vec![int(9)]).unwrap().equals(&int(9)));
}
