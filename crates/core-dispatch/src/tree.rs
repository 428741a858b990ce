//! The lazy lookup tree.
//!
//! Interior nodes test one argument position against one type; leaves hold
//! the candidate set that survived the path's tests. The tree is grown on
//! demand (a lookup that reaches an unexpanded node expands exactly that
//! node) and is additive: readers walk concurrently, expansion takes the
//! coarse write lock, and an expansion races at worst into finding the node
//! already expanded.
//!
//! The tree only prunes. A leaf's candidates are a superset of the truly
//! applicable elements, and the caller applies the precise applicability
//! and specificity rules; lookup answers therefore never depend on the
//! order in which the tree happened to grow.

use std::sync::{Arc, RwLock};

use core_value::Value;
use core_value::types;

use crate::compare::{TypeComparison, compare_types};

/// Anything keyed by an argument-tuple type.
pub trait Signatured: Send + Sync {
    fn signature(&self) -> &Value;
}

enum Node<T> {
    /// Not yet expanded.
    Lazy { candidates: Vec<Arc<T>> },
    Test {
        arg_index: usize,
        test_type: Value,
        pass: usize,
        fail: usize,
    },
    Leaf { candidates: Vec<Arc<T>> },
}

pub struct LookupTree<T> {
    arity: usize,
    nodes: RwLock<Vec<Node<T>>>,
}

impl<T: Signatured> LookupTree<T> {
    pub fn new(arity: usize, elements: Vec<Arc<T>>) -> LookupTree<T> {
        LookupTree {
            arity,
            nodes: RwLock::new(vec![Node::Lazy {
                candidates: elements,
            }]),
        }
    }

    /// Walk the tree with a probe answering "does argument `i` satisfy this
    /// type?", expanding nodes as needed. Answers the surviving candidates.
    pub fn lookup(&self, probe: &dyn Fn(usize, &Value) -> bool) -> Vec<Arc<T>> {
        loop {
            // Fast path: read-only walk.
            let unexpanded = {
                let nodes = self.nodes.read().expect("tree lock");
                let mut current = 0usize;
                loop {
                    match &nodes[current] {
                        Node::Leaf { candidates } => return candidates.clone(),
                        Node::Lazy { .. } => break current,
                        Node::Test {
                            arg_index,
                            test_type,
                            pass,
                            fail,
                        } => {
                            current = if probe(*arg_index, test_type) {
                                *pass
                            } else {
                                *fail
                            };
                        }
                    }
                }
            };
            // Slow path: expand the node we stopped at, then re-walk.
            self.expand(unexpanded);
        }
    }

    fn expand(&self, node_id: usize) {
        let mut nodes = self.nodes.write().expect("tree lock");
        let candidates = match &nodes[node_id] {
            // A racing expansion got here first.
            Node::Lazy { candidates } => candidates.clone(),
            _ => return,
        };
        if candidates.len() <= 1 {
            nodes[node_id] = Node::Leaf { candidates };
            return;
        }
        // A useful test strictly shrinks the pass side; failing that, one
        // that shrinks only the fail side still helps values outside it,
        // and the pass side, which no test can shrink, becomes a leaf.
        let mut fail_only: Option<(usize, Value, Vec<Arc<T>>)> = None;
        for candidate in &candidates {
            for arg_index in 0..self.arity {
                let test_type = types::tuple_type_at(candidate.signature(), arg_index + 1)
                    .expect("signatures are tuple types");
                let mut pass = Vec::new();
                let mut fail = Vec::new();
                for other in &candidates {
                    let other_type = types::tuple_type_at(other.signature(), arg_index + 1)
                        .expect("signatures are tuple types");
                    match compare_types(&other_type, &test_type) {
                        TypeComparison::Disjoint => fail.push(other.clone()),
                        TypeComparison::SameType | TypeComparison::ProperDescendantType => {
                            pass.push(other.clone())
                        }
                        TypeComparison::ProperAncestorType
                        | TypeComparison::UnrelatedType => {
                            pass.push(other.clone());
                            fail.push(other.clone());
                        }
                    }
                }
                if pass.len() < candidates.len() {
                    tracing::trace!(
                        target: "dispatch.tree",
                        arg = arg_index,
                        pass = pass.len(),
                        fail = fail.len(),
                        total = candidates.len(),
                        "expanding lookup tree node"
                    );
                    let pass_id = nodes.len();
                    nodes.push(Node::Lazy { candidates: pass });
                    let fail_id = nodes.len();
                    nodes.push(Node::Lazy { candidates: fail });
                    nodes[node_id] = Node::Test {
                        arg_index,
                        test_type,
                        pass: pass_id,
                        fail: fail_id,
                    };
                    return;
                }
                if fail.len() < candidates.len() && fail_only.is_none() {
                    fail_only = Some((arg_index, test_type, fail));
                }
            }
        }
        match fail_only {
            Some((arg_index, test_type, fail)) => {
                let pass_id = nodes.len();
                nodes.push(Node::Leaf {
                    candidates: candidates.clone(),
                });
                let fail_id = nodes.len();
                nodes.push(Node::Lazy { candidates: fail });
                nodes[node_id] = Node::Test {
                    arg_index,
                    test_type,
                    pass: pass_id,
                    fail: fail_id,
                };
            }
            None => {
                nodes[node_id] = Node::Leaf { candidates };
            }
        }
    }

    /// Number of materialized nodes; diagnostic only.
    pub fn node_count(&self) -> usize {
        self.nodes.read().expect("tree lock").len()
    }
}
