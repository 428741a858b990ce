//! core-l2: the optimizing Level Two representation.
//!
//! A chunk is a graph of basic blocks over a typed register machine,
//! translated from one code object's Level One stream plus whatever the
//! translator could prove (monomorphic sends, unboxable arithmetic). A
//! function whose code carries a valid chunk executes the chunk instead of
//! the nybble stream; every exit from optimized execution crosses an
//! off-ramp edge that rebuilds the Level One frame exactly, so the nominal
//! semantics are always recoverable.
//!
//! Invalidation is non-destructive: the validity bit flips, the code
//! object's chunk pointer is cleared (the universal default is "interpret
//! Level One"), and running activations discover the bit at their next
//! `EnterChunk` check.

pub mod instr;
pub mod manifest;
pub mod operand;
pub mod translate;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use core_code::{CodeData, InstalledChunk};
use core_dispatch::{DependentChunk, Method};

pub use instr::{BasicBlock, BlockId, Edge, EdgeId, EdgePurpose, L2Instruction, Phi, ReifySpec};
pub use manifest::{Manifest, PhiRequirement, SemanticValue};
pub use operand::{Register, RegisterKind, TypeRestriction};
pub use translate::{TranslationSupport, translate};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SoundnessError {
    #[error("block {block} reads {register:?} which is not always-live on incoming edge {edge}")]
    RegisterNotLive {
        block: BlockId,
        edge: EdgeId,
        register: String,
    },
    #[error("phi in block {block} has {sources} sources for {incoming} incoming edges")]
    PhiArityMismatch {
        block: BlockId,
        sources: usize,
        incoming: usize,
    },
}

pub struct Chunk {
    pub name: String,
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<Edge>,
    pub entry: BlockId,
    /// Manifest in force at entry: how frame slots map to seeded registers.
    pub entry_manifest: Manifest,
    /// Blocks that resume a reified frame at a given Level One pc.
    pub reentry_points: Vec<(usize, BlockId)>,
    /// Count of boxed / unboxed-int / unboxed-float registers.
    pub register_counts: [usize; 3],
    valid: AtomicBool,
    /// The code this chunk specializes; weak to avoid a retain cycle
    /// through the installed-chunk slot.
    code: Weak<CodeData>,
    /// Methods whose definition sets this chunk's specializations assume.
    dependencies: Mutex<Vec<Arc<Method>>>,
}

impl Chunk {
    pub fn new(
        name: String,
        blocks: Vec<BasicBlock>,
        edges: Vec<Edge>,
        entry: BlockId,
        entry_manifest: Manifest,
        register_counts: [usize; 3],
        code: &Arc<CodeData>,
        dependencies: Vec<Arc<Method>>,
    ) -> Arc<Chunk> {
        Arc::new(Chunk {
            name,
            blocks,
            edges,
            entry,
            entry_manifest,
            reentry_points: Vec::new(),
            register_counts,
            valid: AtomicBool::new(true),
            code: Arc::downgrade(code),
            dependencies: Mutex::new(dependencies),
        })
    }

    pub fn dependencies(&self) -> Vec<Arc<Method>> {
        self.dependencies.lock().expect("dependency lock").clone()
    }

    /// Wire the chunk into its code object and register its method
    /// dependencies. Callers hold the level-one safepoint.
    pub fn install(self: &Arc<Chunk>) {
        if let Some(code) = self.code.upgrade() {
            code.install_chunk(self.clone() as Arc<dyn InstalledChunk>);
        }
        for method in self.dependencies() {
            method.add_dependent(
                Arc::downgrade(self) as Weak<dyn DependentChunk>
            );
        }
        tracing::debug!(target: "exec.l2", chunk = %self.name, "chunk installed");
    }

    /// Check invariant: every register an instruction reads is always-live
    /// on every incoming edge of its block (or written earlier in the
    /// block), and phi arities match the incoming-edge lists.
    pub fn validate_liveness(&self) -> Result<(), SoundnessError> {
        for (block_id, block) in self.blocks.iter().enumerate() {
            for phi in &block.phis {
                if !block.incoming.is_empty() && phi.sources.len() != block.incoming.len() {
                    return Err(SoundnessError::PhiArityMismatch {
                        block: block_id,
                        sources: phi.sources.len(),
                        incoming: block.incoming.len(),
                    });
                }
            }
            let mut defined: Vec<Register> =
                block.phis.iter().map(|phi| phi.output).collect();
            for instruction in &block.instructions {
                for read in instruction.reads() {
                    if defined.contains(&read) {
                        continue;
                    }
                    for edge_id in &block.incoming {
                        let edge = &self.edges[*edge_id];
                        if !edge.always_live.contains(&read) {
                            return Err(SoundnessError::RegisterNotLive {
                                block: block_id,
                                edge: *edge_id,
                                register: format!("{read:?}"),
                            });
                        }
                    }
                }
                defined.extend(instruction.writes());
            }
        }
        Ok(())
    }
}

impl InstalledChunk for Chunk {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DependentChunk for Chunk {
    fn invalidate(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            tracing::debug!(target: "exec.l2", chunk = %self.name, "chunk invalidated");
            if let Some(code) = self.code.upgrade() {
                code.clear_chunk();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_code::{CodeBuilder, L1Operation};
    use core_value::{scalar, types};

    fn sample_code() -> std::sync::Arc<CodeData> {
        let mut builder = CodeBuilder::new("sample");
        builder.returns(types::integers());
        builder.push_literal(scalar::integer(1));
        builder.emit(L1Operation::Return);
        core_code::code_data(&builder.finish()).unwrap()
    }

    #[test]
    fn invalidation_flips_validity_and_clears_the_code_pointer() {
        let code = sample_code();
        let block = BasicBlock {
            name: "entry".into(),
            incoming: Vec::new(),
            phis: Vec::new(),
            instructions: vec![L2Instruction::EnterChunk],
        };
        let chunk = Chunk::new(
            "sample#1".into(),
            vec![block],
            Vec::new(),
            0,
            Manifest::new(),
            [0, 0, 0],
            &code,
            Vec::new(),
        );
        chunk.install();
        assert!(chunk.is_valid());
        assert!(code.installed_chunk().is_some());
        chunk.invalidate();
        assert!(!chunk.is_valid());
        assert!(code.installed_chunk().is_none());
    }

    #[test]
    fn liveness_validation_catches_unlive_reads() {
        let code = sample_code();
        let edge = Edge {
            purpose: EdgePurpose::Success,
            target: 1,
            always_live: vec![],
            sometimes_live: vec![Register::boxed(0)],
            manifest: Manifest::new(),
            reify: None,
        };
        let entry = BasicBlock {
            name: "entry".into(),
            incoming: Vec::new(),
            phis: Vec::new(),
            instructions: vec![L2Instruction::Jump { edge: 0 }],
        };
        let body = BasicBlock {
            name: "body".into(),
            incoming: vec![0],
            phis: Vec::new(),
            instructions: vec![L2Instruction::Return {
                value: Register::boxed(0),
            }],
        };
        let chunk = Chunk::new(
            "bad".into(),
            vec![entry, body],
            vec![edge],
            0,
            Manifest::new(),
            [1, 0, 0],
            &code,
            Vec::new(),
        );
        assert!(matches!(
            chunk.validate_liveness(),
            Err(SoundnessError::RegisterNotLive { block: 1, .. })
        ));
    }
}
