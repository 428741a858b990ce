#![allow(dead_code)] // Shared across several integration tests; each test binary uses a subset of helpers.

use std::sync::Arc;

use core_code::{CodeBuilder, L1Operation};
use core_exec::Runtime;
use core_value::{scalar, types, Value};

pub fn runtime() -> Arc<Runtime> {
    Runtime::with_threads(2)
}

/// A unary handler ignoring its argument and answering a constant.
pub fn constant_handler(name: &str, arg_type: Value, result: Value) -> Value {
    let mut builder = CodeBuilder::new(name);
    builder.args(vec![arg_type]);
    builder.returns(result.kind());
    builder.push_literal(result);
    builder.emit(L1Operation::Return);
    core_code::function_value(builder.finish(), Vec::new())
}

/// A unary handler answering its argument.
pub fn identity_handler(name: &str, arg_type: Value) -> Value {
    let mut builder = CodeBuilder::new(name);
    builder.args(vec![arg_type.clone()]);
    builder.returns(arg_type);
    builder.emit(L1Operation::PushLocal { slot: 1 });
    builder.emit(L1Operation::Return);
    core_code::function_value(builder.finish(), Vec::new())
}

/// Bind `function` as a definition of the method named by `message`.
pub fn define(runtime: &Runtime, message: &Value, function: Value) {
    let method = runtime.method_or_create(message).expect("well-formed message");
    let kind = core_code::function_kind(&function).expect("function");
    let signature = types::function_args_type(&kind).expect("function type");
    runtime
        .level_one_safe(|| {
            method.add_definition(core_dispatch::Definition::concrete(signature, function))
        })
        .expect("definition added");
}

/// A function backed by a numbered primitive: the recovery body answers
/// the failure code bound to the failure slot.
pub fn primitive_function(
    name: &str,
    primitive: u16,
    arg_types: Vec<Value>,
    return_type: Value,
) -> Value {
    let mut builder = CodeBuilder::new(name);
    let failure_slot = arg_types.len() as u32 + 1;
    builder.args(arg_types);
    builder.returns(return_type);
    builder.primitive(primitive, Some(types::integers()));
    builder.emit(L1Operation::PushLocal { slot: failure_slot });
    builder.emit(L1Operation::Return);
    core_code::function_value(builder.finish(), Vec::new())
}

/// A zero-argument function sending `message` with the given (literal)
/// arguments.
pub fn caller(message: &Value, args: Vec<Value>, return_type: Value) -> Value {
    let mut builder = CodeBuilder::new("test caller");
    builder.returns(types::any_type());
    let count = args.len() as u32;
    for arg in args {
        builder.push_literal(arg);
    }
    builder.call(message.clone(), count, return_type);
    builder.emit(L1Operation::Return);
    core_code::function_value(builder.finish(), Vec::new())
}

/// Run a zero-argument call of `message` and answer the result.
pub fn send(runtime: &Runtime, message: &Value, args: Vec<Value>) -> Result<Value, (core_exec::ErrorCode, String)> {
    let function = caller(message, args, types::any_type());
    runtime.run_function_now(function, Vec::new())
}

pub fn int(value: i64) -> Value {
    scalar::integer(value)
}
