//! Compile-time refinement surfaces: semantic restrictions and grammatical
//! restrictions.
//!
//! A semantic restriction is a function invoked at a call site being
//! compiled, with the *types* of the arguments; it answers a refined return
//! type, or rejects the parse. Applicability is resolved over the argument
//! metatypes with the same lookup tree the method uses for values.
//!
//! A grammatical restriction bans specific message atoms from appearing as
//! the outermost send of a given argument; the parser consults it while
//! assembling candidate parses.

use core_value::{Value, types};

use crate::tree::Signatured;

pub struct SemanticRestriction {
    /// The restriction body; applied to argument types, answers a type.
    function: Value,
    /// Argument-tuple type over metatypes, extracted from the body's type.
    signature: Value,
}

impl SemanticRestriction {
    pub fn new(function: Value) -> SemanticRestriction {
        let signature = core_code::function_kind(&function)
            .and_then(|kind| types::function_args_type(&kind).ok())
            .unwrap_or_else(types::any_tuple_type);
        SemanticRestriction {
            function,
            signature,
        }
    }

    pub fn function(&self) -> &Value {
        &self.function
    }
}

impl Signatured for SemanticRestriction {
    fn signature(&self) -> &Value {
        &self.signature
    }
}

/// Per-argument sets of message atoms banned as that argument's outermost
/// send.
#[derive(Default)]
pub struct GrammaticalRestrictions {
    banned: Vec<Vec<Value>>,
}

impl GrammaticalRestrictions {
    pub fn new(arity: usize) -> GrammaticalRestrictions {
        GrammaticalRestrictions {
            banned: vec![Vec::new(); arity],
        }
    }

    /// Merge one more restriction tuple: `per_argument[i]` is the set of
    /// atoms newly banned at argument `i`.
    pub fn merge(&mut self, per_argument: Vec<Vec<Value>>) {
        for (slot, additions) in per_argument.into_iter().enumerate() {
            if slot >= self.banned.len() {
                break;
            }
            for atom in additions {
                if !self.banned[slot].iter().any(|seen| seen.equals(&atom)) {
                    self.banned[slot].push(atom);
                }
            }
        }
    }

    /// May `message` appear as the outermost send of argument `arg_index`?
    pub fn allows(&self, arg_index: usize, message: &Value) -> bool {
        self.banned
            .get(arg_index)
            .map(|set| !set.iter().any(|banned| banned.equals(message)))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_value::atom;

    #[test]
    fn grammatical_bans_are_per_argument() {
        let plus = atom::fresh_atom("_+_");
        let times = atom::fresh_atom("_×_");
        let mut restrictions = GrammaticalRestrictions::new(2);
        restrictions.merge(vec![vec![plus.clone()], vec![]]);
        assert!(!restrictions.allows(0, &plus));
        assert!(restrictions.allows(0, &times));
        assert!(restrictions.allows(1, &plus));
    }
}
