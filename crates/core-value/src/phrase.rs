//! Phrase descriptors: AST nodes as first-class values.
//!
//! The macro protocol runs on these (a macro body consumes phrase
//! arguments and must answer a phrase), and the loader's compile surface
//! speaks them as well. The phrase-kind hierarchy lives with the other type
//! machinery in [`crate::types`]; this module carries the instances.

use std::any::Any;
use std::fmt;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed, new_immutable};
use crate::types::{self, PhraseTypeKind};
use crate::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Argument,
    Label,
    LocalConstant,
    LocalVariable,
    ModuleConstant,
    ModuleVariable,
    PrimitiveFailureReason,
}

#[derive(Clone)]
pub enum PhraseData {
    Literal {
        value: Value,
    },
    VariableUse {
        /// The declaration phrase this use resolves to.
        declaration: Value,
    },
    List {
        items: Vec<Value>,
    },
    Sequence {
        statements: Vec<Value>,
    },
    /// A sequence whose value is its first statement's value.
    FirstOfSequence {
        statements: Vec<Value>,
    },
    Assignment {
        target: Value,
        expression: Value,
    },
    Reference {
        target: Value,
    },
    Block {
        arguments: Vec<Value>,
        statements: Vec<Value>,
        return_type: Value,
    },
    SuperCast {
        expression: Value,
        lookup_type: Value,
    },
    Send {
        message: Value,
        arguments: Value,
        return_type: Value,
    },
    MacroSubstitution {
        original: Value,
        replacement: Value,
    },
    Declaration {
        kind: DeclarationKind,
        name: Value,
        declared_type: Value,
        initializer: Option<Value>,
    },
}

impl PhraseData {
    pub fn phrase_kind(&self) -> PhraseTypeKind {
        match self {
            PhraseData::Literal { .. } => PhraseTypeKind::Literal,
            PhraseData::VariableUse { .. } => PhraseTypeKind::VariableUse,
            PhraseData::List { .. } => PhraseTypeKind::List,
            PhraseData::Sequence { .. } => PhraseTypeKind::Sequence,
            PhraseData::FirstOfSequence { .. } => PhraseTypeKind::FirstOfSequence,
            PhraseData::Assignment { .. } => PhraseTypeKind::Assignment,
            PhraseData::Reference { .. } => PhraseTypeKind::Reference,
            PhraseData::Block { .. } => PhraseTypeKind::Block,
            PhraseData::SuperCast { .. } => PhraseTypeKind::SuperCast,
            PhraseData::Send { .. } => PhraseTypeKind::Send,
            PhraseData::MacroSubstitution { .. } => PhraseTypeKind::MacroSubstitution,
            PhraseData::Declaration { kind, .. } => PhraseTypeKind::Declaration(*kind),
        }
    }

    /// The static type of the value this phrase produces when evaluated.
    pub fn yield_type(&self) -> Value {
        match self {
            PhraseData::Literal { value } => value.kind(),
            PhraseData::VariableUse { declaration } => declaration
                .descriptor()
                .phrase_data()
                .map(|d| match d {
                    PhraseData::Declaration { declared_type, .. } => declared_type.clone(),
                    _ => types::any_type(),
                })
                .unwrap_or_else(types::any_type),
            PhraseData::List { items } => types::tuple_type(
                types::RangeData::degenerate(items.len() as i64),
                items.iter().map(phrase_yield_type).collect(),
                types::bottom_type(),
            ),
            PhraseData::Sequence { statements } => statements
                .last()
                .map(phrase_yield_type)
                .unwrap_or_else(types::any_type),
            PhraseData::FirstOfSequence { statements } => statements
                .first()
                .map(phrase_yield_type)
                .unwrap_or_else(types::any_type),
            PhraseData::Assignment { expression, .. } => phrase_yield_type(expression),
            PhraseData::Reference { target } => {
                let inner = phrase_yield_type(target);
                types::variable_type(inner.clone(), inner)
            }
            PhraseData::Block {
                arguments,
                return_type,
                ..
            } => {
                let arg_types: Vec<Value> = arguments
                    .iter()
                    .map(|decl| match decl.descriptor().phrase_data() {
                        Some(PhraseData::Declaration { declared_type, .. }) => {
                            declared_type.clone()
                        }
                        _ => types::any_type(),
                    })
                    .collect();
                types::function_type_from(arg_types, return_type.clone())
            }
            PhraseData::SuperCast { lookup_type, .. } => lookup_type.clone(),
            PhraseData::Send { return_type, .. } => return_type.clone(),
            PhraseData::MacroSubstitution { replacement, .. } => phrase_yield_type(replacement),
            PhraseData::Declaration { .. } => types::any_type(),
        }
    }

    fn components(&self) -> Vec<Value> {
        match self {
            PhraseData::Literal { value } => vec![value.clone()],
            PhraseData::VariableUse { declaration } => vec![declaration.clone()],
            PhraseData::List { items }
            | PhraseData::Sequence { statements: items }
            | PhraseData::FirstOfSequence { statements: items } => items.clone(),
            PhraseData::Assignment { target, expression } => {
                vec![target.clone(), expression.clone()]
            }
            PhraseData::Reference { target } => vec![target.clone()],
            PhraseData::Block {
                arguments,
                statements,
                return_type,
            } => {
                let mut all = arguments.clone();
                all.extend(statements.iter().cloned());
                all.push(return_type.clone());
                all
            }
            PhraseData::SuperCast {
                expression,
                lookup_type,
            } => vec![expression.clone(), lookup_type.clone()],
            PhraseData::Send {
                message,
                arguments,
                return_type,
            } => vec![message.clone(), arguments.clone(), return_type.clone()],
            PhraseData::MacroSubstitution {
                original,
                replacement,
            } => vec![original.clone(), replacement.clone()],
            PhraseData::Declaration {
                name,
                declared_type,
                initializer,
                ..
            } => {
                let mut all = vec![name.clone(), declared_type.clone()];
                all.extend(initializer.iter().cloned());
                all
            }
        }
    }
}

fn phrase_yield_type(phrase: &Value) -> Value {
    phrase
        .descriptor()
        .phrase_data()
        .map(|d| d.yield_type())
        .unwrap_or_else(types::any_type)
}

struct PhraseDescriptor {
    data: PhraseData,
}

impl Descriptor for PhraseDescriptor {
    fn tag(&self) -> Tag {
        Tag::Phrase
    }

    fn kind(&self, _this: &Value) -> Value {
        types::phrase_type(self.data.phrase_kind(), self.data.yield_type())
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        let mut h = hash_seed(Tag::Phrase);
        h = hash_combine(h, self.data.phrase_kind().ordinal());
        for component in self.data.components() {
            h = hash_combine(h, component.hash_value());
        }
        h
    }

    fn equals(&self, _this: &Value, other: &Value) -> bool {
        let other_descriptor = other.descriptor();
        let Some(peer) = other_descriptor.phrase_data() else {
            return false;
        };
        if peer.phrase_kind() != self.data.phrase_kind() {
            return false;
        }
        let mine = self.data.components();
        let theirs = peer.components();
        mine.len() == theirs.len()
            && mine.iter().zip(theirs.iter()).all(|(a, b)| a.equals(b))
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        for component in self.data.components() {
            visit(&component);
        }
    }

    fn phrase_data(&self) -> Option<&PhraseData> {
        Some(&self.data)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "‹{:?}›", self.data.phrase_kind())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wrap phrase data as a value. Phrases are born immutable: the parser and
/// macro engine always build fresh nodes rather than editing old ones.
pub fn phrase(data: PhraseData) -> Value {
    new_immutable(PhraseDescriptor { data })
}

pub fn literal_phrase(value: Value) -> Value {
    phrase(PhraseData::Literal { value })
}

pub fn list_phrase(items: Vec<Value>) -> Value {
    phrase(PhraseData::List { items })
}

pub fn send_phrase(message: Value, arguments: Value, return_type: Value) -> Value {
    phrase(PhraseData::Send {
        message,
        arguments,
        return_type,
    })
}

pub fn declaration_phrase(
    kind: DeclarationKind,
    name: Value,
    declared_type: Value,
    initializer: Option<Value>,
) -> Value {
    phrase(PhraseData::Declaration {
        kind,
        name,
        declared_type,
        initializer,
    })
}

pub fn variable_use_phrase(declaration: Value) -> Value {
    phrase(PhraseData::VariableUse { declaration })
}

pub fn is_phrase(value: &Value) -> bool {
    value.descriptor().phrase_data().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar;

    #[test]
    fn literal_phrase_yields_its_value_kind() {
        let p = literal_phrase(scalar::integer(3));
        let k = p.kind();
        let data = types::phrase_kind_of(&k).unwrap();
        assert_eq!(data, PhraseTypeKind::Literal);
    }

    #[test]
    fn phrase_equality_is_structural() {
        let a = list_phrase(vec![literal_phrase(scalar::integer(1))]);
        let b = list_phrase(vec![literal_phrase(scalar::integer(1))]);
        let c = list_phrase(vec![literal_phrase(scalar::integer(2))]);
        assert!(a.equals(&b));
        assert!(!a.equals(&c));
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn declaration_feeds_variable_use_yield() {
        let decl = declaration_phrase(
            DeclarationKind::LocalVariable,
            crate::tuple::string_value("x"),
            types::integers(),
            None,
        );
        let use_site = variable_use_phrase(decl);
        let yielded = use_site.descriptor().phrase_data().unwrap().yield_type();
        assert!(yielded.equals(&types::integers()));
    }

    #[test]
    fn literal_is_a_subkind_of_expression() {
        let p = literal_phrase(scalar::integer(3));
        let expression = types::phrase_type(PhraseTypeKind::Expression, types::any_type());
        assert!(p.kind().is_subtype_of(&expression));
    }
}
