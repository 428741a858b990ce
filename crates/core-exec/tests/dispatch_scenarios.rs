//! Dispatch end to end: disjoint signatures pick distinct handlers,
//! adding unrelated definitions never disturbs existing answers, and
//! incomparable overlap surfaces as the ambiguity error code.

mod common;

use common::*;
use core_exec::ErrorCode;
use core_value::types::ExtInt;
use core_value::{tuple, types};

#[test]
fn disjoint_signatures_dispatch_by_argument_value() {
    let runtime = runtime();
    let message = runtime.atom_named("m_");
    define(
        &runtime,
        &message,
        constant_handler("integer case", types::integers(), int(1)),
    );
    define(
        &runtime,
        &message,
        constant_handler("string case", types::string_type(), int(2)),
    );

    let by_int = send(&runtime, &message, vec![int(42)]).unwrap();
    assert!(by_int.equals(&int(1)));
    let by_string = send(&runtime, &message, vec![tuple::string_value("hi")]).unwrap();
    assert!(by_string.equals(&int(2)));

    // A third definition over characters leaves both answers alone.
    define(
        &runtime,
        &message,
        constant_handler("character case", types::character_type(), int(3)),
    );
    assert!(send(&runtime, &message, vec![int(42)]).unwrap().equals(&int(1)));
    assert!(
        send(&runtime, &message, vec![tuple::string_value("hi")])
            .unwrap()
            .equals(&int(2))
    );
    assert!(
        send(&runtime, &message, vec![core_value::scalar::character('q')])
            .unwrap()
            .equals(&int(3))
    );
}

#[test]
fn incomparable_overlap_is_ambiguous_at_the_call() {
    let runtime = runtime();
    let message = runtime.atom_named("m_");
    let low = types::integer_range(ExtInt::NegInf, false, ExtInt::Fin(100), true);
    let high = types::integer_range(ExtInt::Fin(0), true, ExtInt::PosInf, false);
    define(&runtime, &message, constant_handler("low", low, int(1)));
    define(&runtime, &message, constant_handler("high", high, int(2)));

    let (code, _) = send(&runtime, &message, vec![int(42)]).unwrap_err();
    assert_eq!(code, ErrorCode::AmbiguousMethodDefinition);

    // Outside the overlap each handler is unambiguous.
    assert!(send(&runtime, &message, vec![int(-500)]).unwrap().equals(&int(1)));
    assert!(send(&runtime, &message, vec![int(500)]).unwrap().equals(&int(2)));
}

#[test]
fn missing_method_and_missing_definition_have_distinct_codes() {
    let runtime = runtime();
    let absent = runtime.atom_named("nothing_");
    let (code, _) = send(&runtime, &absent, vec![int(1)]).unwrap_err();
    assert_eq!(code, ErrorCode::NoMethod);

    let message = runtime.atom_named("m_");
    define(
        &runtime,
        &message,
        constant_handler("strings only", types::string_type(), int(1)),
    );
    let (code, _) = send(&runtime, &message, vec![int(9)]).unwrap_err();
    assert_eq!(code, ErrorCode::NoMethodDefinition);
}

#[test]
fn return_type_checks_guard_the_call_site() {
    let runtime = runtime();
    let message = runtime.atom_named("m_");
    define(
        &runtime,
        &message,
        constant_handler("liar", types::integers(), tuple::string_value("surprise")),
    );
    // The handler claims a string result; the call site expects integers.
    let function = caller(&message, vec![int(1)], types::integers());
    let (code, _) = runtime.run_function_now(function, Vec::new()).unwrap_err();
    assert_eq!(code, ErrorCode::ResultDisagreedWithExpectedType);
}

#[test]
fn arithmetic_primitives_fold_into_sends() {
    let runtime = runtime();
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
    assert!(send(&runtime, &plus, vec![int(40), int(2)]).unwrap().equals(&int(42)));
    // Overflow takes the failure path: the recovery body answers the code
    // bound to the failure variable.
    let overflowed = send(&runtime, &plus, vec![int(i64::MAX), int(1)]).unwrap();
    assert!(overflowed.equals(&ErrorCode::OutOfRange.as_value()));
}
