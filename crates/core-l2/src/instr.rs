//! The Level Two instruction set, basic blocks, and control edges.
//!
//! Every control transfer rides an [`Edge`] carrying its purpose, the
//! registers that are always (and sometimes) live across it, and the
//! manifest after the transfer. Off-ramp edges additionally carry a
//! [`ReifySpec`]: the recipe for writing the register state back into the
//! Level One frame so interpretation can continue nominally.

use core_value::Value;

use crate::manifest::{Manifest, SemanticValue};
use crate::operand::Register;

pub type EdgeId = usize;
pub type BlockId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePurpose {
    Success,
    Failure,
    /// Leaves optimized execution: rebuild the Level One frame.
    OffRamp,
    /// Re-enters optimized execution from a reified frame.
    OnRamp,
}

/// How to rebuild the Level One view when crossing an off-ramp: the pc the
/// frame resumes at, and the operand stack bottom-to-top as semantic
/// values (resolved through the edge's manifest).
#[derive(Debug, Clone)]
pub struct ReifySpec {
    pub resume_pc: usize,
    pub stack: Vec<SemanticValue>,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub purpose: EdgePurpose,
    pub target: BlockId,
    /// Readable along this edge no matter the path taken to it.
    pub always_live: Vec<Register>,
    /// Readable on some but not all paths; diagnostic.
    pub sometimes_live: Vec<Register>,
    pub manifest: Manifest,
    pub reify: Option<ReifySpec>,
}

/// A phi pseudo-operation at a block head: when control arrives via the
/// block's `n`-th incoming edge, `output` receives `sources[n]`.
#[derive(Debug, Clone)]
pub struct Phi {
    pub sources: Vec<Register>,
    pub output: Register,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub name: String,
    /// Incoming edges, in the order phi sources are aligned to.
    pub incoming: Vec<EdgeId>,
    pub phis: Vec<Phi>,
    pub instructions: Vec<L2Instruction>,
}

#[derive(Debug, Clone)]
pub enum L2Instruction {
    Move {
        src: Register,
        dst: Register,
    },
    MoveConstant {
        value: Value,
        dst: Register,
    },
    MoveIntConstant {
        value: i64,
        dst: Register,
    },
    /// Load a captured outer of the running function.
    MoveOuter {
        index: u32,
        dst: Register,
    },
    CreateFunction {
        code: Value,
        outers: Vec<Register>,
        dst: Register,
    },
    CreateTuple {
        elements: Vec<Register>,
        dst: Register,
    },
    CreateMap {
        pairs: Vec<(Register, Register)>,
        dst: Register,
    },
    CreateObject {
        fields: Vec<(Value, Register)>,
        dst: Register,
    },
    GetVariable {
        variable: Register,
        dst: Register,
        on_failure: EdgeId,
    },
    SetVariable {
        variable: Register,
        value: Register,
        on_failure: EdgeId,
    },
    /// Polymorphic dispatch. On success `dst` holds the body function and
    /// control follows `on_success`; a lookup failure abandons optimized
    /// execution so Level One can raise it nominally.
    LookupByValues {
        message: Value,
        args: Vec<Register>,
        dst: Register,
        on_success: EdgeId,
        on_failure: EdgeId,
    },
    /// Call through a register. The off-ramp reifies the frame positioned
    /// after the call; the callee's return value arrives through the
    /// nominal return path, checked against `expected_type` unless the call
    /// site elides the check.
    Invoke {
        function: Register,
        args: Vec<Register>,
        expected_type: Option<Value>,
        off_ramp: EdgeId,
    },
    /// Monomorphic specialization of a send; valid only while the chunk's
    /// method dependencies hold.
    InvokeConstantFunction {
        function: Value,
        args: Vec<Register>,
        expected_type: Option<Value>,
        off_ramp: EdgeId,
    },
    Jump {
        edge: EdgeId,
    },
    /// Backward jump; the executor takes a safepoint check here.
    JumpBack {
        edge: EdgeId,
    },
    JumpIfKindOfObject {
        value: Register,
        kind: Value,
        if_kind: EdgeId,
        if_not: EdgeId,
    },
    JumpIfLessThanObject {
        value: Register,
        bound: Value,
        if_less: EdgeId,
        if_not: EdgeId,
    },
    IntAdd {
        augend: Register,
        addend: Register,
        sum: Register,
        on_overflow: EdgeId,
    },
    IntSubtract {
        minuend: Register,
        subtrahend: Register,
        difference: Register,
        on_overflow: EdgeId,
    },
    IntMultiply {
        multiplicand: Register,
        multiplier: Register,
        product: Register,
        on_overflow: EdgeId,
    },
    UnboxInt {
        src: Register,
        dst: Register,
        on_failure: EdgeId,
    },
    BoxInt {
        src: Register,
        dst: Register,
    },
    UnboxFloat {
        src: Register,
        dst: Register,
        on_failure: EdgeId,
    },
    BoxFloat {
        src: Register,
        dst: Register,
    },
    /// Entry-point validity check: an invalidated chunk bounces the caller
    /// back to nominal interpretation.
    EnterChunk,
    Return {
        value: Register,
    },
    UnreachableCode,
}

impl L2Instruction {
    /// Registers this instruction reads.
    pub fn reads(&self) -> Vec<Register> {
        match self {
            L2Instruction::Move { src, .. } => vec![*src],
            L2Instruction::MoveConstant { .. }
            | L2Instruction::MoveIntConstant { .. }
            | L2Instruction::MoveOuter { .. }
            | L2Instruction::EnterChunk
            | L2Instruction::Jump { .. }
            | L2Instruction::JumpBack { .. }
            | L2Instruction::UnreachableCode => Vec::new(),
            L2Instruction::CreateFunction { outers, .. } => outers.clone(),
            L2Instruction::CreateTuple { elements, .. } => elements.clone(),
            L2Instruction::CreateMap { pairs, .. } => pairs
                .iter()
                .flat_map(|(key, value)| [*key, *value])
                .collect(),
            L2Instruction::CreateObject { fields, .. } => {
                fields.iter().map(|(_, register)| *register).collect()
            }
            L2Instruction::GetVariable { variable, .. } => vec![*variable],
            L2Instruction::SetVariable { variable, value, .. } => vec![*variable, *value],
            L2Instruction::LookupByValues { args, .. } => args.clone(),
            L2Instruction::Invoke { function, args, .. } => {
                let mut all = vec![*function];
                all.extend(args.iter().copied());
                all
            }
            L2Instruction::InvokeConstantFunction { args, .. } => args.clone(),
            L2Instruction::JumpIfKindOfObject { value, .. } => vec![*value],
            L2Instruction::JumpIfLessThanObject { value, .. } => vec![*value],
            L2Instruction::IntAdd { augend, addend, .. } => vec![*augend, *addend],
            L2Instruction::IntSubtract {
                minuend,
                subtrahend,
                ..
            } => vec![*minuend, *subtrahend],
            L2Instruction::IntMultiply {
                multiplicand,
                multiplier,
                ..
            } => vec![*multiplicand, *multiplier],
            L2Instruction::UnboxInt { src, .. }
            | L2Instruction::BoxInt { src, .. }
            | L2Instruction::UnboxFloat { src, .. }
            | L2Instruction::BoxFloat { src, .. } => vec![*src],
            L2Instruction::Return { value } => vec![*value],
        }
    }

    /// Registers this instruction writes.
    pub fn writes(&self) -> Vec<Register> {
        match self {
            L2Instruction::Move { dst, .. }
            | L2Instruction::MoveConstant { dst, .. }
            | L2Instruction::MoveIntConstant { dst, .. }
            | L2Instruction::MoveOuter { dst, .. }
            | L2Instruction::CreateFunction { dst, .. }
            | L2Instruction::CreateTuple { dst, .. }
            | L2Instruction::CreateMap { dst, .. }
            | L2Instruction::CreateObject { dst, .. }
            | L2Instruction::GetVariable { dst, .. }
            | L2Instruction::LookupByValues { dst, .. }
            | L2Instruction::UnboxInt { dst, .. }
            | L2Instruction::BoxInt { dst, .. }
            | L2Instruction::UnboxFloat { dst, .. }
            | L2Instruction::BoxFloat { dst, .. } => vec![*dst],
            L2Instruction::IntAdd { sum, .. } => vec![*sum],
            L2Instruction::IntSubtract { difference, .. } => vec![*difference],
            L2Instruction::IntMultiply { product, .. } => vec![*product],
            _ => Vec::new(),
        }
    }

    /// Outgoing edges, in evaluation order.
    pub fn edges(&self) -> Vec<EdgeId> {
        match self {
            L2Instruction::GetVariable { on_failure, .. }
            | L2Instruction::SetVariable { on_failure, .. } => vec![*on_failure],
            L2Instruction::LookupByValues {
                on_success,
                on_failure,
                ..
            } => vec![*on_success, *on_failure],
            L2Instruction::Invoke { off_ramp, .. }
            | L2Instruction::InvokeConstantFunction { off_ramp, .. } => vec![*off_ramp],
            L2Instruction::Jump { edge } | L2Instruction::JumpBack { edge } => vec![*edge],
            L2Instruction::JumpIfKindOfObject {
                if_kind, if_not, ..
            } => vec![*if_kind, *if_not],
            L2Instruction::JumpIfLessThanObject {
                if_less, if_not, ..
            } => vec![*if_less, *if_not],
            L2Instruction::IntAdd { on_overflow, .. }
            | L2Instruction::IntSubtract { on_overflow, .. }
            | L2Instruction::IntMultiply { on_overflow, .. } => vec![*on_overflow],
            L2Instruction::UnboxInt { on_failure, .. }
            | L2Instruction::UnboxFloat { on_failure, .. } => vec![*on_failure],
            _ => Vec::new(),
        }
    }
}
