//! Dispatch failure modes. Each maps onto a stable numeric error code at
//! the primitive boundary.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No method is bound to the message atom at all.
    #[error("no such method")]
    NoMethod,
    /// The method exists but no definition accepts the arguments.
    #[error("no applicable method definition")]
    NoMethodDefinition,
    /// Multiple incomparable definitions accept the arguments.
    #[error("ambiguous method definition")]
    AmbiguousMethodDefinition,
    /// The most specific applicable definition is abstract.
    #[error("applicable method definition is abstract")]
    AbstractMethodDefinition,
    /// The most specific applicable definition is a forward declaration.
    #[error("applicable method definition is a forward declaration")]
    ForwardMethodDefinition,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// A definition with an equal argument-tuple type is already present.
    #[error("redefined with same argument types")]
    RedefinedWithSameArgumentTypes,
    /// The signature's arity disagrees with the message name's blanks.
    #[error("signature has {got} argument(s); message expects {expected}")]
    ArityMismatch { expected: usize, got: usize },
    /// A macro supplied a prefix-function count that disagrees with the
    /// message name's section markers.
    #[error("macro supplies {got} prefix function(s); message has {expected} section marker(s)")]
    PrefixFunctionCountMismatch { expected: usize, got: usize },
}
