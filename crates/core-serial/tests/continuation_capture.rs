//! Inter-fiber capture: a continuation reified mid-computation survives a
//! serialization round trip and resumes to the same final value as the
//! original.

use core_code::{CodeBuilder, L1Operation};
use core_exec::primitives::{
    PRIM_ADD, PRIM_CALL_WITH_CURRENT_CONTINUATION, PRIM_RESUME_CONTINUATION,
};
use core_exec::Runtime;
use core_value::{scalar, types, variable, Value};

fn primitive_function(name: &str, primitive: u16, arg_types: Vec<Value>, returns: Value) -> Value {
    let mut builder = CodeBuilder::new(name);
    let failure_slot = arg_types.len() as u32 + 1;
    builder.args(arg_types);
    builder.returns(returns);
    builder.primitive(primitive, Some(types::integers()));
    builder.emit(L1Operation::PushLocal { slot: failure_slot });
    builder.emit(L1Operation::Return);
    core_code::function_value(builder.finish(), Vec::new())
}

fn define(runtime: &Runtime, message: &Value, function: Value) {
    let method = runtime.method_or_create(message).unwrap();
    let kind = core_code::function_kind(&function).unwrap();
    let signature = types::function_args_type(&kind).unwrap();
    runtime
        .level_one_safe(|| {
            method.add_definition(core_dispatch::Definition::concrete(signature, function))
        })
        .unwrap();
}

#[test]
fn serialized_continuation_resumes_to_the_same_value() {
    let runtime = Runtime::with_threads(2);
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
            PRIM_ADD,
            vec![types::integers(), types::integers()],
            types::integers(),
        ),
    );

    let stash = variable::simple_variable(types::any_type()).make_shared();
    let capture = {
        let mut builder = CodeBuilder::new("capture");
        builder.args(vec![types::any_type()]);
        builder.returns(types::integers());
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::SetVariable);
        builder.push_literal(scalar::integer(5));
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![stash.clone()])
    };
    let main = {
        let mut builder = CodeBuilder::new("main");
        builder.returns(types::integers());
        builder.push_literal(capture);
        builder.call(cc.clone(), 1, types::integers());
        builder.push_literal(scalar::integer(1000));
        builder.call(plus.clone(), 2, types::integers());
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    let direct = runtime.run_function_now(main, Vec::new()).unwrap();
    assert!(direct.equals(&scalar::integer(1005)));

    // Round-trip the captured frame through bytes, then resume the copy.
    // The stash itself is reachable from the frame (through the capture
    // function's outers); empty it first so the capture is acyclic.
    let captured = variable::variable_read(&stash).unwrap();
    variable::variable_clear(&stash);
    let bytes = core_serial::serialize_value(&runtime, &captured).unwrap();
    let revived = core_serial::deserialize_value(&runtime, &bytes).unwrap();
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
    let replayed = runtime
        .run_function_now(resume, vec![revived, scalar::integer(5)])
        .unwrap();
    assert!(replayed.equals(&scalar::integer(1005)));
}
