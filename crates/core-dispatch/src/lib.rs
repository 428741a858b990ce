//! core-dispatch: methods, definitions, and multimethod lookup.
//!
//! A method is named by an atom and owns an ordered set of definitions
//! (concrete with a body function, abstract, forward, or macro), no two of
//! which may share an argument-tuple type. Lookup selects the most
//! specific definition applicable to the actual argument values (or, for
//! static resolution, the argument types), pruning candidates through a
//! lazily grown decision tree.
//!
//! Methods are process-wide. Mutations (adding or removing definitions and
//! restrictions) happen inside the runtime's level-one-safe windows; every
//! mutation drops the lookup caches and invalidates the Level Two chunks
//! that registered a dependency on this method.

pub mod compare;
pub mod error;
pub mod message;
pub mod restrictions;
pub mod tree;

use std::sync::{Arc, Mutex, RwLock, Weak};

use core_value::{Value, atom, types};

pub use compare::{TypeComparison, compare_types};
pub use error::{DefinitionError, LookupError};
pub use message::{MessageError, MessagePart, MessageSplitter};
pub use restrictions::{GrammaticalRestrictions, SemanticRestriction};
pub use tree::{LookupTree, Signatured};

/// A Level Two chunk registers itself here to be told when this method's
/// definition set changes. Defined as a seam so the chunk type stays
/// downstream.
pub trait DependentChunk: Send + Sync {
    fn invalidate(&self);
}

// -------------------------------------------------------------------------
// Definitions
// -------------------------------------------------------------------------

pub enum DefinitionBody {
    /// A callable body.
    Concrete { function: Value },
    /// Declared but deliberately bodiless; a subtype must override.
    Abstract,
    /// Declared ahead of its body for mutual recursion.
    Forward,
    /// A parse-time body plus one prefix function per section marker.
    Macro {
        body: Value,
        prefix_functions: Vec<Value>,
    },
}

pub struct Definition {
    /// Argument-tuple type.
    signature: Value,
    body: DefinitionBody,
}

impl Definition {
    pub fn concrete(signature: Value, function: Value) -> Arc<Definition> {
        Arc::new(Definition {
            signature,
            body: DefinitionBody::Concrete { function },
        })
    }

    pub fn abstract_definition(signature: Value) -> Arc<Definition> {
        Arc::new(Definition {
            signature,
            body: DefinitionBody::Abstract,
        })
    }

    pub fn forward(signature: Value) -> Arc<Definition> {
        Arc::new(Definition {
            signature,
            body: DefinitionBody::Forward,
        })
    }

    pub fn macro_definition(
        signature: Value,
        body: Value,
        prefix_functions: Vec<Value>,
    ) -> Arc<Definition> {
        Arc::new(Definition {
            signature,
            body: DefinitionBody::Macro {
                body,
                prefix_functions,
            },
        })
    }

    pub fn signature(&self) -> &Value {
        &self.signature
    }

    pub fn body(&self) -> &DefinitionBody {
        &self.body
    }

    pub fn is_macro(&self) -> bool {
        matches!(self.body, DefinitionBody::Macro { .. })
    }

    /// The callable body, when this definition has one.
    pub fn function(&self) -> Option<&Value> {
        match &self.body {
            DefinitionBody::Concrete { function } => Some(function),
            DefinitionBody::Macro { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl Signatured for Definition {
    fn signature(&self) -> &Value {
        &self.signature
    }
}

// -------------------------------------------------------------------------
// Methods
// -------------------------------------------------------------------------

pub struct Method {
    /// The naming atom.
    name: Value,
    splitter: MessageSplitter,
    definitions: RwLock<Vec<Arc<Definition>>>,
    /// Decision tree over the non-macro definitions; dropped on mutation.
    runtime_tree: RwLock<Option<Arc<LookupTree<Definition>>>>,
    semantic_restrictions: RwLock<Vec<Arc<SemanticRestriction>>>,
    restriction_tree: RwLock<Option<Arc<LookupTree<SemanticRestriction>>>>,
    grammatical: RwLock<GrammaticalRestrictions>,
    dependents: Mutex<Vec<Weak<dyn DependentChunk>>>,
}

impl Method {
    pub fn new(name: Value) -> Result<Arc<Method>, MessageError> {
        let message = atom::name_of(&name).unwrap_or_default();
        let splitter = MessageSplitter::split(&message)?;
        let arity = splitter.arity();
        Ok(Arc::new(Method {
            name,
            splitter,
            definitions: RwLock::new(Vec::new()),
            runtime_tree: RwLock::new(None),
            semantic_restrictions: RwLock::new(Vec::new()),
            restriction_tree: RwLock::new(None),
            grammatical: RwLock::new(GrammaticalRestrictions::new(arity)),
            dependents: Mutex::new(Vec::new()),
        }))
    }

    pub fn name(&self) -> &Value {
        &self.name
    }

    pub fn splitter(&self) -> &MessageSplitter {
        &self.splitter
    }

    pub fn arity(&self) -> usize {
        self.splitter.arity()
    }

    pub fn definitions(&self) -> Vec<Arc<Definition>> {
        self.definitions.read().expect("definition lock").clone()
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    fn signature_arity(signature: &Value) -> Option<usize> {
        let sizes = types::tuple_sizes(signature).ok()?;
        match (sizes.lower, sizes.upper) {
            (types::ExtInt::Fin(lo), types::ExtInt::Fin(hi)) if lo == hi => Some(lo as usize),
            _ => None,
        }
    }

    pub fn add_definition(&self, definition: Arc<Definition>) -> Result<(), DefinitionError> {
        let expected = self.arity();
        let got = Self::signature_arity(definition.signature());
        if got != Some(expected) {
            return Err(DefinitionError::ArityMismatch {
                expected,
                got: got.unwrap_or(usize::MAX),
            });
        }
        if let DefinitionBody::Macro {
            prefix_functions, ..
        } = definition.body()
        {
            let markers = self.splitter.section_markers();
            if prefix_functions.len() != markers {
                return Err(DefinitionError::PrefixFunctionCountMismatch {
                    expected: markers,
                    got: prefix_functions.len(),
                });
            }
        }
        {
            let mut definitions = self.definitions.write().expect("definition lock");
            if definitions.iter().any(|existing| {
                existing.is_macro() == definition.is_macro()
                    && existing.signature().equals(definition.signature())
            }) {
                return Err(DefinitionError::RedefinedWithSameArgumentTypes);
            }
            definitions.push(definition);
        }
        self.note_membership_change();
        Ok(())
    }

    /// Remove the definition with an equal signature; answers whether one
    /// was removed.
    pub fn remove_definition(&self, signature: &Value) -> bool {
        let removed = {
            let mut definitions = self.definitions.write().expect("definition lock");
            let before = definitions.len();
            definitions.retain(|existing| !existing.signature().equals(signature));
            definitions.len() != before
        };
        if removed {
            self.note_membership_change();
        }
        removed
    }

    pub fn add_semantic_restriction(&self, restriction: Arc<SemanticRestriction>) {
        self.semantic_restrictions
            .write()
            .expect("restriction lock")
            .push(restriction);
        *self.restriction_tree.write().expect("restriction tree lock") = None;
    }

    pub fn add_grammatical_restriction(&self, per_argument: Vec<Vec<Value>>) {
        self.grammatical
            .write()
            .expect("grammatical lock")
            .merge(per_argument);
    }

    pub fn grammatical_allows(&self, arg_index: usize, message: &Value) -> bool {
        self.grammatical
            .read()
            .expect("grammatical lock")
            .allows(arg_index, message)
    }

    /// Definition-set change: drop the lookup cache and invalidate every
    /// dependent chunk. Callers hold the level-one safepoint.
    fn note_membership_change(&self) {
        *self.runtime_tree.write().expect("tree lock") = None;
        let dependents: Vec<Weak<dyn DependentChunk>> = {
            let mut dependents = self.dependents.lock().expect("dependents lock");
            dependents.retain(|weak| weak.strong_count() > 0);
            dependents.clone()
        };
        let mut invalidated = 0usize;
        for weak in dependents {
            if let Some(chunk) = weak.upgrade() {
                chunk.invalidate();
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            tracing::debug!(
                target: "dispatch.tree",
                method = ?self.name,
                invalidated,
                "definition change invalidated dependent chunks"
            );
        }
    }

    pub fn add_dependent(&self, chunk: Weak<dyn DependentChunk>) {
        self.dependents.lock().expect("dependents lock").push(chunk);
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    fn runtime_tree(&self) -> Arc<LookupTree<Definition>> {
        if let Some(tree) = self.runtime_tree.read().expect("tree lock").as_ref() {
            return tree.clone();
        }
        let mut slot = self.runtime_tree.write().expect("tree lock");
        if let Some(tree) = slot.as_ref() {
            return tree.clone();
        }
        let elements = self
            .definitions
            .read()
            .expect("definition lock")
            .iter()
            .filter(|definition| !definition.is_macro())
            .cloned()
            .collect();
        let tree = Arc::new(LookupTree::new(self.arity(), elements));
        *slot = Some(tree.clone());
        tree
    }

    /// Most-specific selection over precisely applicable candidates.
    fn resolve(
        &self,
        survivors: Vec<Arc<Definition>>,
        applies: &dyn Fn(&Definition) -> bool,
    ) -> Result<Arc<Definition>, LookupError> {
        let applicable: Vec<Arc<Definition>> = survivors
            .into_iter()
            .filter(|definition| applies(definition))
            .collect();
        if applicable.is_empty() {
            return Err(LookupError::NoMethodDefinition);
        }
        let best = applicable.iter().find(|candidate| {
            applicable
                .iter()
                .all(|other| candidate.signature().is_subtype_of(other.signature()))
        });
        match best {
            None => Err(LookupError::AmbiguousMethodDefinition),
            Some(definition) => match definition.body() {
                DefinitionBody::Concrete { .. } => Ok(definition.clone()),
                DefinitionBody::Abstract => Err(LookupError::AbstractMethodDefinition),
                DefinitionBody::Forward => Err(LookupError::ForwardMethodDefinition),
                DefinitionBody::Macro { .. } => Ok(definition.clone()),
            },
        }
    }

    /// The most-specific definition applicable to these argument values.
    pub fn lookup_by_values(&self, args: &[Value]) -> Result<Arc<Definition>, LookupError> {
        let tree = self.runtime_tree();
        let survivors =
            tree.lookup(&|arg_index, test_type| args[arg_index].is_instance_of(test_type));
        self.resolve(survivors, &|definition| {
            args.iter().enumerate().all(|(slot, arg)| {
                types::tuple_type_at(definition.signature(), slot + 1)
                    .map(|expected| arg.is_instance_of(&expected))
                    .unwrap_or(false)
            })
        })
    }

    /// The most-specific definition applicable to these argument types
    /// (static resolution at compile sites).
    pub fn lookup_by_types(&self, arg_types: &[Value]) -> Result<Arc<Definition>, LookupError> {
        let tree = self.runtime_tree();
        let survivors =
            tree.lookup(&|arg_index, test_type| arg_types[arg_index].is_subtype_of(test_type));
        self.resolve(survivors, &|definition| {
            arg_types.iter().enumerate().all(|(slot, arg_type)| {
                types::tuple_type_at(definition.signature(), slot + 1)
                    .map(|expected| arg_type.is_subtype_of(&expected))
                    .unwrap_or(false)
            })
        })
    }

    /// The most-specific macro applicable to these phrase arguments.
    pub fn lookup_macro_by_phrases(
        &self,
        phrase_args: &[Value],
    ) -> Result<Arc<Definition>, LookupError> {
        let macros: Vec<Arc<Definition>> = self
            .definitions
            .read()
            .expect("definition lock")
            .iter()
            .filter(|definition| definition.is_macro())
            .cloned()
            .collect();
        if macros.is_empty() {
            return Err(LookupError::NoMethod);
        }
        self.resolve(macros, &|definition| {
            phrase_args.iter().enumerate().all(|(slot, phrase)| {
                types::tuple_type_at(definition.signature(), slot + 1)
                    .map(|expected| phrase.is_instance_of(&expected))
                    .unwrap_or(false)
            })
        })
    }

    /// Every semantic restriction applicable to these argument types, in
    /// registration order.
    pub fn applicable_restrictions(&self, arg_types: &[Value]) -> Vec<Arc<SemanticRestriction>> {
        let tree = {
            if let Some(tree) = self.restriction_tree.read().expect("restriction tree lock").as_ref()
            {
                tree.clone()
            } else {
                let mut slot = self.restriction_tree.write().expect("restriction tree lock");
                match slot.as_ref() {
                    Some(tree) => tree.clone(),
                    None => {
                        let elements = self
                            .semantic_restrictions
                            .read()
                            .expect("restriction lock")
                            .clone();
                        let tree = Arc::new(LookupTree::new(self.arity(), elements));
                        *slot = Some(tree.clone());
                        tree
                    }
                }
            }
        };
        tree.lookup(&|arg_index, test_type| arg_types[arg_index].is_instance_of(test_type))
            .into_iter()
            .filter(|restriction| {
                arg_types.iter().enumerate().all(|(slot, arg_type)| {
                    types::tuple_type_at(restriction.signature(), slot + 1)
                        .map(|expected| arg_type.is_instance_of(&expected))
                        .unwrap_or(false)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_code::{CodeBuilder, L1Operation};
    use core_value::scalar;
    use core_value::tuple;
    use core_value::types::ExtInt;

    fn handler(name: &str, arg_type: Value, result: i64) -> Value {
        let mut builder = CodeBuilder::new(name);
        builder.args(vec![arg_type]);
        builder.returns(types::integers());
        builder.push_literal(scalar::integer(result));
        builder.emit(L1Operation::Return);
        core_code::function_value(builder.finish(), Vec::new())
    }

    fn method(name: &str) -> Arc<Method> {
        Method::new(atom::fresh_atom(name)).unwrap()
    }

    fn signature(arg: Value) -> Value {
        types::tuple_type_fixed(vec![arg])
    }

    #[test]
    fn disjoint_definitions_dispatch_by_value() {
        let m = method("m_");
        m.add_definition(Definition::concrete(
            signature(types::integers()),
            handler("int case", types::integers(), 1),
        ))
        .unwrap();
        m.add_definition(Definition::concrete(
            signature(types::string_type()),
            handler("string case", types::string_type(), 2),
        ))
        .unwrap();
        let by_int = m.lookup_by_values(&[scalar::integer(42)]).unwrap();
        assert!(by_int.signature().equals(&signature(types::integers())));
        let by_string = m
            .lookup_by_values(&[tuple::string_value("hi")])
            .unwrap();
        assert!(by_string.signature().equals(&signature(types::string_type())));
        // A third, disjoint definition changes neither earlier answer.
        m.add_definition(Definition::concrete(
            signature(types::character_type()),
            handler("char case", types::character_type(), 3),
        ))
        .unwrap();
        assert!(
            m.lookup_by_values(&[scalar::integer(42)])
                .unwrap()
                .signature()
                .equals(&signature(types::integers()))
        );
        assert!(
            m.lookup_by_values(&[tuple::string_value("hi")])
                .unwrap()
                .signature()
                .equals(&signature(types::string_type()))
        );
    }

    #[test]
    fn narrower_definition_wins() {
        let m = method("m_");
        let narrow = types::integer_range(ExtInt::Fin(0), true, ExtInt::Fin(9), true);
        m.add_definition(Definition::concrete(
            signature(types::integers()),
            handler("wide", types::integers(), 1),
        ))
        .unwrap();
        m.add_definition(Definition::concrete(
            signature(narrow.clone()),
            handler("narrow", narrow.clone(), 2),
        ))
        .unwrap();
        let chosen = m.lookup_by_values(&[scalar::integer(5)]).unwrap();
        assert!(chosen.signature().equals(&signature(narrow)));
        let fallback = m.lookup_by_values(&[scalar::integer(50)]).unwrap();
        assert!(fallback.signature().equals(&signature(types::integers())));
    }

    #[test]
    fn incomparable_overlap_is_ambiguous() {
        let m = method("m_");
        let low = types::integer_range(ExtInt::NegInf, false, ExtInt::Fin(100), true);
        let high = types::integer_range(ExtInt::Fin(0), true, ExtInt::PosInf, false);
        m.add_definition(Definition::concrete(
            signature(low.clone()),
            handler("low", low, 1),
        ))
        .unwrap();
        m.add_definition(Definition::concrete(
            signature(high.clone()),
            handler("high", high, 2),
        ))
        .unwrap();
        assert_eq!(
            m.lookup_by_values(&[scalar::integer(42)]).err(),
            Some(LookupError::AmbiguousMethodDefinition)
        );
        // Outside the overlap each side is unambiguous.
        assert!(m.lookup_by_values(&[scalar::integer(-500)]).is_ok());
        assert!(m.lookup_by_values(&[scalar::integer(500)]).is_ok());
    }

    #[test]
    fn duplicate_signatures_are_rejected() {
        let m = method("m_");
        m.add_definition(Definition::concrete(
            signature(types::integers()),
            handler("first", types::integers(), 1),
        ))
        .unwrap();
        assert_eq!(
            m.add_definition(Definition::concrete(
                signature(types::integers()),
                handler("second", types::integers(), 2),
            )),
            Err(DefinitionError::RedefinedWithSameArgumentTypes)
        );
    }

    #[test]
    fn abstract_and_forward_fail_at_lookup() {
        let m = method("m_");
        m.add_definition(Definition::abstract_definition(signature(types::integers())))
            .unwrap();
        assert_eq!(
            m.lookup_by_values(&[scalar::integer(1)]).err(),
            Some(LookupError::AbstractMethodDefinition)
        );
        let m2 = method("n_");
        m2.add_definition(Definition::forward(signature(types::integers())))
            .unwrap();
        assert_eq!(
            m2.lookup_by_values(&[scalar::integer(1)]).err(),
            Some(LookupError::ForwardMethodDefinition)
        );
    }

    #[test]
    fn lookup_by_types_matches_lookup_by_values() {
        let m = method("m_");
        m.add_definition(Definition::concrete(
            signature(types::integers()),
            handler("int", types::integers(), 1),
        ))
        .unwrap();
        m.add_definition(Definition::concrete(
            signature(types::string_type()),
            handler("string", types::string_type(), 2),
        ))
        .unwrap();
        let by_type = m.lookup_by_types(&[types::single_int(42)]).unwrap();
        let by_value = m.lookup_by_values(&[scalar::integer(42)]).unwrap();
        assert!(by_type.signature().equals(by_value.signature()));
    }

    #[test]
    fn lookup_is_deterministic_across_construction_orders() {
        let narrow = types::integer_range(ExtInt::Fin(0), true, ExtInt::Fin(9), true);
        let build = |reversed: bool| {
            let m = method("m_");
            let mut definitions = vec![
                Definition::concrete(
                    signature(types::integers()),
                    handler("wide", types::integers(), 1),
                ),
                Definition::concrete(
                    signature(narrow.clone()),
                    handler("narrow", narrow.clone(), 2),
                ),
            ];
            if reversed {
                definitions.reverse();
            }
            for definition in definitions {
                m.add_definition(definition).unwrap();
            }
            m
        };
        let forward_order = build(false);
        let reverse_order = build(true);
        for probe in [-3i64, 0, 5, 9, 10, 999] {
            let a = forward_order.lookup_by_values(&[scalar::integer(probe)]);
            let b = reverse_order.lookup_by_values(&[scalar::integer(probe)]);
            match (a, b) {
                (Ok(x), Ok(y)) => assert!(x.signature().equals(y.signature())),
                (x, y) => assert_eq!(x.err(), y.err()),
            }
        }
    }

    #[test]
    fn dependents_are_invalidated_on_change() {
        use std::sync::atomic::{AtomicBool, Ordering};
        struct Flag(AtomicBool);
        impl DependentChunk for Flag {
            fn invalidate(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }
        let m = method("m_");
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        m.add_dependent(Arc::downgrade(&flag) as Weak<dyn DependentChunk>);
        m.add_definition(Definition::concrete(
            signature(types::integers()),
            handler("int", types::integers(), 1),
        ))
        .unwrap();
        assert!(flag.0.load(Ordering::SeqCst));
    }
}
