//! The loader: the safepoint-requiring mutations a module load performs,
//! plus the macro-expansion driver the parser calls into.
//!
//! Every mutation here changes process-wide state (method definition
//! sets, restrictions), so each runs inside a level-one-safe window and
//! relies on the method to invalidate dependent chunks.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use core_dispatch::{Definition, DefinitionError, LookupError, Method, MessageError,
    SemanticRestriction};
use core_value::{atom, phrase, types, Value};
use thiserror::Error;

use crate::errors::ErrorCode;
use crate::Runtime;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("cannot define on a special atom")]
    SpecialAtom,
    #[error("body is not a function")]
    NotAFunction,
    #[error("macro prefix functions must return top")]
    PrefixFunctionsMustReturnTop,
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl LoaderError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            LoaderError::SpecialAtom => ErrorCode::SpecialAtom,
            LoaderError::NotAFunction => ErrorCode::IncorrectArgumentType,
            LoaderError::PrefixFunctionsMustReturnTop => {
                ErrorCode::MacroPrefixFunctionsMustReturnTop
            }
            LoaderError::Message(_) => ErrorCode::InvalidStatements,
            LoaderError::Definition(DefinitionError::RedefinedWithSameArgumentTypes) => {
                ErrorCode::RedefinedWithSameArgumentTypes
            }
            LoaderError::Definition(_) => ErrorCode::IncorrectNumberOfArguments,
        }
    }
}

/// Token kinds the front-end parser feeds the macro driver. The lexer
/// itself lives with the parser; the runtime only needs the vocabulary to
/// classify literal phrases and report rejection positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword,
    Literal,
    Operator,
    EndOfStatement,
    EndOfFile,
    Whitespace,
    Comment,
}

/// One lexed token, as the parser hands it across the seam.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    /// One-based source line, for diagnostics.
    pub line: usize,
}

/// Lexical declarations visible while parsing a module; prefix functions
/// make their effects felt here at the correct lexical point.
#[derive(Default)]
pub struct ParseScope {
    frames: Mutex<Vec<AHashMap<String, Value>>>,
}

impl ParseScope {
    pub fn push(&self) {
        self.frames.lock().expect("scope lock").push(AHashMap::new());
    }

    pub fn pop(&self) {
        self.frames.lock().expect("scope lock").pop();
    }

    /// Bind a declaration phrase to its name in the innermost frame.
    pub fn declare(&self, name: &str, declaration: Value) {
        let mut frames = self.frames.lock().expect("scope lock");
        let frame = frames.last_mut().expect("declaring outside any scope");
        frame.insert(name.to_owned(), declaration);
    }

    /// Innermost binding for `name`, if any frame declares it.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let frames = self.frames.lock().expect("scope lock");
        frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).cloned())
    }
}

pub struct Loader<'rt> {
    runtime: &'rt Runtime,
    module: String,
    /// Prefix functions registered ahead of their macro body, indexed by
    /// atom name then by section-marker counter (one-based).
    pending_prefixes: Mutex<AHashMap<String, Vec<Option<Value>>>>,
    scope: ParseScope,
}

impl<'rt> Loader<'rt> {
    pub fn new(runtime: &'rt Runtime, module: impl Into<String>) -> Loader<'rt> {
        Loader {
            runtime,
            module: module.into(),
            pending_prefixes: Mutex::new(AHashMap::new()),
            scope: ParseScope::default(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn scope(&self) -> &ParseScope {
        &self.scope
    }

    fn method_for(&self, name: &Value) -> Result<Arc<Method>, LoaderError> {
        if atom::is_special(name) {
            return Err(LoaderError::SpecialAtom);
        }
        Ok(self.runtime.method_or_create(name)?)
    }

    fn signature_of(function: &Value) -> Result<Value, LoaderError> {
        let kind = core_code::function_kind(function).ok_or(LoaderError::NotAFunction)?;
        Ok(types::function_args_type(&kind).expect("function types carry argument tuples"))
    }

    /// Add a concrete method definition.
    pub fn add_method_body(&self, name: &Value, function: Value) -> Result<(), LoaderError> {
        let method = self.method_for(name)?;
        let signature = Self::signature_of(&function)?;
        let definition = Definition::concrete(signature, function.make_shared());
        self.runtime
            .level_one_safe(|| method.add_definition(definition))?;
        tracing::debug!(target: "runtime", module = %self.module, name = ?name, "method body added");
        Ok(())
    }

    /// Register one prefix function ahead of `add_macro_body`. `counter`
    /// is the one-based section-marker ordinal it attaches to.
    pub fn add_prefix_function(
        &self,
        name: &Value,
        counter: usize,
        function: Value,
    ) -> Result<(), LoaderError> {
        let kind = core_code::function_kind(&function).ok_or(LoaderError::NotAFunction)?;
        let returns = types::function_return_type(&kind).expect("function type");
        if !returns.equals(&types::any_type()) {
            return Err(LoaderError::PrefixFunctionsMustReturnTop);
        }
        let key = atom::name_of(name).unwrap_or_default();
        let mut pending = self.pending_prefixes.lock().expect("prefix lock");
        let slots = pending.entry(key).or_default();
        if slots.len() < counter {
            slots.resize(counter, None);
        }
        slots[counter - 1] = Some(function.make_shared());
        Ok(())
    }

    /// Add a macro definition, consuming the prefix functions registered
    /// for this name.
    pub fn add_macro_body(&self, name: &Value, body: Value) -> Result<(), LoaderError> {
        let method = self.method_for(name)?;
        let signature = Self::signature_of(&body)?;
        let prefixes: Vec<Value> = {
            let mut pending = self.pending_prefixes.lock().expect("prefix lock");
            pending
                .remove(&atom::name_of(name).unwrap_or_default())
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .collect()
        };
        let definition = Definition::macro_definition(signature, body.make_shared(), prefixes);
        self.runtime
            .level_one_safe(|| method.add_definition(definition))?;
        tracing::debug!(target: "runtime", module = %self.module, name = ?name, "macro body added");
        Ok(())
    }

    pub fn add_semantic_restriction(
        &self,
        name: &Value,
        function: Value,
    ) -> Result<(), LoaderError> {
        let method = self.method_for(name)?;
        let restriction = Arc::new(SemanticRestriction::new(function.make_shared()));
        self.runtime
            .level_one_safe(|| method.add_semantic_restriction(restriction));
        Ok(())
    }

    /// `per_argument[i]` is the set of message atoms banned as the
    /// outermost send of argument `i`.
    pub fn add_grammatical_restriction(
        &self,
        name: &Value,
        per_argument: Vec<Vec<Value>>,
    ) -> Result<(), LoaderError> {
        let method = self.method_for(name)?;
        self.runtime
            .level_one_safe(|| method.add_grammatical_restriction(per_argument));
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Macro expansion driver
// -------------------------------------------------------------------------

/// Expand a macro send: select the applicable macro for these phrase
/// arguments, run its body at compile time, and demand a phrase back.
pub fn expand_macro(
    runtime: &Runtime,
    method: &Method,
    phrase_args: &[Value],
) -> Result<Value, (ErrorCode, String)> {
    for argument in phrase_args {
        if !phrase::is_phrase(argument) {
            return Err((
                ErrorCode::MacroArgumentMustBeAParseNode,
                format!("macro argument {:?} is not a phrase", argument),
            ));
        }
    }
    let definition = method.lookup_macro_by_phrases(phrase_args).map_err(|error| {
        (
            ErrorCode::from(&error),
            format!("macro lookup failed: {error}"),
        )
    })?;
    let body = definition
        .function()
        .expect("macro definitions carry bodies")
        .clone();
    let replacement = runtime.run_function_now(body, phrase_args.to_vec())?;
    if !phrase::is_phrase(&replacement) {
        return Err((
            ErrorCode::MacroMustReturnAParseNode,
            format!("macro produced {:?}", replacement),
        ));
    }
    Ok(replacement)
}

/// Run the prefix function attached to section marker `counter` with the
/// arguments parsed so far. Parser-visible side effects (declarations)
/// take effect through the function's own captures.
pub fn run_prefix_function(
    runtime: &Runtime,
    definition: &Definition,
    counter: usize,
    partial_args: &[Value],
) -> Result<(), (ErrorCode, String)> {
    for argument in partial_args {
        if !phrase::is_phrase(argument) {
            return Err((
                ErrorCode::MacroPrefixFunctionArgumentMustBeAParseNode,
                format!("prefix argument {:?} is not a phrase", argument),
            ));
        }
    }
    let core_dispatch::DefinitionBody::Macro {
        prefix_functions, ..
    } = definition.body()
    else {
        return Err((
            ErrorCode::NoMethodDefinition,
            "prefix functions belong to macros".to_owned(),
        ));
    };
    let Some(prefix) = prefix_functions.get(counter - 1) else {
        return Err((
            ErrorCode::NoMethodDefinition,
            format!("no prefix function at marker {counter}"),
        ));
    };
    runtime.run_function_now(prefix.clone(), partial_args.to_vec())?;
    Ok(())
}

/// A send that failed its macro check may still be a method send; the
/// parser uses this to distinguish the two (macros win when both exist).
pub fn has_macro(method: &Method, phrase_args: &[Value]) -> bool {
    !matches!(
        method.lookup_macro_by_phrases(phrase_args),
        Err(LookupError::NoMethod)
    )
}
