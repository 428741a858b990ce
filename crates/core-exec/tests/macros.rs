//! The macro protocol end to end: prefix functions fire at section
//! markers with the partial argument list, their lexical effects are
//! visible to later arguments and gone after the site, and macro bodies
//! must answer phrases.

mod common;

use common::*;
use core_code::{CodeBuilder, L1Operation};
use core_exec::loader::{Loader, expand_macro, run_prefix_function};
use core_exec::ErrorCode;
use core_value::phrase::{self, DeclarationKind};
use core_value::types::ExtInt;
use core_value::{types, variable, PhraseTypeKind};

fn phrase_arg_type() -> core_value::Value {
    types::phrase_type(PhraseTypeKind::ParsePhrase, types::any_type())
}

#[test]
fn prefix_function_declarations_scope_to_the_macro_site() {
    let runtime = runtime();
    let loader = Loader::new(&runtime, "Test");
    let let_atom = runtime.atom_named("let _ := _ § in _");

    // The prefix function receives ⟨name, value⟩ phrases at the marker; it
    // stows the name phrase so the parser can declare it.
    let stash = variable::simple_variable(types::any_type()).make_shared();
    let prefix = {
        let mut builder = CodeBuilder::new("declare at marker");
        builder.args(vec![phrase_arg_type(), phrase_arg_type()]);
        builder.returns(types::any_type());
        builder.emit(L1Operation::PushOuter { index: 1 });
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::SetVariable);
        builder.push_literal(core_value::scalar::nil());
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), vec![stash.clone()])
    };
    loader
        .add_prefix_function(&let_atom, 1, prefix)
        .expect("prefix registered");

    // The macro body replaces the site with its third argument.
    let body = {
        let mut builder = CodeBuilder::new("let body");
        builder.args(vec![phrase_arg_type(), phrase_arg_type(), phrase_arg_type()]);
        builder.returns(types::any_type());
        builder.emit(L1Operation::PushLocal { slot: 3 });
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    loader.add_macro_body(&let_atom, body).expect("macro added");

    let method = runtime.method_for(&let_atom).unwrap();
    let name_phrase = phrase::literal_phrase(core_value::tuple::string_value("x"));
    let value_phrase = phrase::literal_phrase(int(1));

    // Parsing reaches the section marker: the prefix function fires with
    // the two arguments so far, and its effect is declared at the correct
    // lexical point.
    let definition = method
        .lookup_macro_by_phrases(&[
            name_phrase.clone(),
            value_phrase.clone(),
            phrase::literal_phrase(int(0)),
        ])
        .expect("macro applies");
    loader.scope().push();
    run_prefix_function(
        &runtime,
        &definition,
        1,
        &[name_phrase.clone(), value_phrase.clone()],
    )
    .expect("prefix ran");
    let stowed = variable::variable_read(&stash).expect("prefix stowed the name phrase");
    assert!(stowed.equals(&name_phrase));
    let declaration = phrase::declaration_phrase(
        DeclarationKind::LocalConstant,
        core_value::tuple::string_value("x"),
        types::integers(),
        Some(value_phrase.clone()),
    );
    loader.scope().declare("x", declaration.clone());

    // Inside the third blank's parse the declaration resolves…
    let resolved = loader.scope().lookup("x").expect("x resolves inside the site");
    assert!(resolved.equals(&declaration));
    let use_phrase = phrase::variable_use_phrase(resolved);

    // …and the whole site expands to the body's answer.
    let replacement = expand_macro(
        &runtime,
        &method,
        &[name_phrase, value_phrase, use_phrase.clone()],
    )
    .expect("expansion succeeds");
    assert!(replacement.equals(&use_phrase));

    // Outside the macro site the declaration is gone.
    loader.scope().pop();
    assert!(loader.scope().lookup("x").is_none());
}

#[test]
fn macro_arguments_and_results_must_be_phrases() {
    let runtime = runtime();
    let loader = Loader::new(&runtime, "Test");
    let m = runtime.atom_named("shout _");

    // A macro that answers a non-phrase.
    let bad_body = {
        let mut builder = CodeBuilder::new("bad body");
        builder.args(vec![phrase_arg_type()]);
        builder.returns(types::any_type());
        builder.push_literal(int(3));
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    loader.add_macro_body(&m, bad_body).unwrap();
    let method = runtime.method_for(&m).unwrap();

    let (code, _) = expand_macro(&runtime, &method, &[int(1)]).unwrap_err();
    assert_eq!(code, ErrorCode::MacroArgumentMustBeAParseNode);

    let (code, _) = expand_macro(
        &runtime,
        &method,
        &[phrase::literal_phrase(int(1))],
    )
    .unwrap_err();
    assert_eq!(code, ErrorCode::MacroMustReturnAParseNode);
}

#[test]
fn prefix_functions_must_declare_top_returns() {
    let runtime = runtime();
    let loader = Loader::new(&runtime, "Test");
    let m = runtime.atom_named("with _ § do _");
    let narrow = {
        let mut builder = CodeBuilder::new("narrow prefix");
        builder.args(vec![phrase_arg_type()]);
        builder.returns(types::integers());
        builder.push_literal(int(1));
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    let error = loader.add_prefix_function(&m, 1, narrow).unwrap_err();
    assert_eq!(
        error.error_code(),
        ErrorCode::MacroPrefixFunctionsMustReturnTop
    );
}

#[test]
fn special_atoms_refuse_definitions() {
    let runtime = runtime();
    let loader = Loader::new(&runtime, "Test");
    let error = loader
        .add_method_body(
            &core_value::atom::true_value(),
            identity_handler("nope", types::any_type()),
        )
        .unwrap_err();
    assert_eq!(error.error_code(), ErrorCode::SpecialAtom);
}

#[test]
fn semantic_restrictions_apply_over_argument_metatypes() {
    let runtime = runtime();
    let loader = Loader::new(&runtime, "Test");
    let m = runtime.atom_named("narrow _");
    define(
        &runtime,
        &m,
        identity_handler("wide", types::integers()),
    );

    // The restriction accepts integer metatypes and answers a refined
    // return type.
    let refined = types::integer_range(ExtInt::Fin(0), true, ExtInt::Fin(10), true);
    let restriction = {
        let mut builder = CodeBuilder::new("refine to 0..10");
        builder.args(vec![types::meta(types::integers())]);
        builder.returns(types::any_type());
        builder.push_literal(refined.clone());
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    };
    loader.add_semantic_restriction(&m, restriction).unwrap();

    let method = runtime.method_for(&m).unwrap();
    // Applicable at an integer call site…
    let applicable = method.applicable_restrictions(&[types::single_int(4)]);
    assert_eq!(applicable.len(), 1);
    let answer = runtime
        .run_function_now(
            applicable[0].function().clone(),
            vec![types::single_int(4)],
        )
        .unwrap();
    assert!(answer.equals(&refined));
    // …and silent at a string call site.
    assert!(method.applicable_restrictions(&[types::string_type()]).is_empty());
}

#[test]
fn grammatical_restrictions_ban_argument_messages() {
    let runtime = runtime();
    let loader = Loader::new(&runtime, "Test");
    let multiply = runtime.atom_named("_×_");
    let plus = runtime.atom_named("_+_");
    define(
        &runtime,
        &multiply,
        constant_handler("product", types::any_type(), int(0)),
    );
    loader
        .add_grammatical_restriction(&multiply, vec![vec![plus.clone()], vec![]])
        .unwrap();
    let method = runtime.method_for(&multiply).unwrap();
    // `_+_` may not be the outermost send of the first argument, so
    // `a + b × c` can only parse as `a + (b × c)`.
    assert!(!method.grammatical_allows(0, &plus));
    assert!(method.grammatical_allows(1, &plus));
    assert!(method.grammatical_allows(0, &multiply));
}
