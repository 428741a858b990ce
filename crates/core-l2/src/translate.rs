//! The Level One → Level Two translator.
//!
//! Translation walks the nybble stream once, simulating the operand stack
//! symbolically: every stack entry and frame slot is a semantic value bound
//! to a register in the running manifest. Straight-line work (pushes,
//! moves, tuple construction, variable access, inlinable integer
//! arithmetic) stays in the chunk; the first send ends optimized execution
//! through an off-ramp that reifies the frame positioned after the call,
//! so the nominal return path delivers the result. Sends to methods with a
//! single concrete definition whose signature the static restrictions
//! already satisfy become `InvokeConstantFunction`, guarded by a
//! dependency registration on the method.
//!
//! Codes that attempt a primitive are not translated: the primitive path
//! (including its failure rebinding) stays with the nominal interpreter.

use std::sync::Arc;

use core_code::{CodeData, L1Operation, NybbleReader};
use core_dispatch::{DefinitionBody, Method};
use core_value::{Value, scalar, types};

use crate::instr::{BasicBlock, Edge, EdgeId, EdgePurpose, L2Instruction, ReifySpec};
use crate::manifest::{Manifest, SemanticValue};
use crate::operand::{Register, TypeRestriction};
use crate::Chunk;

/// Integer arithmetic the translator may inline with unboxed registers and
/// an overflow off-ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntArithOp {
    Add,
    Subtract,
    Multiply,
}

/// What the translator may ask of the wider runtime.
pub trait TranslationSupport {
    /// The method currently bound to a message atom, if any.
    fn method_for(&self, message: &Value) -> Option<Arc<Method>>;

    /// Recognize a message as inlineable unboxed integer arithmetic.
    fn arithmetic_for(&self, _message: &Value) -> Option<IntArithOp> {
        None
    }
}

struct Translator<'a> {
    code: &'a Arc<CodeData>,
    support: &'a dyn TranslationSupport,
    blocks: Vec<BasicBlock>,
    edges: Vec<Edge>,
    current: usize,
    off_ramp_block: Option<usize>,
    entry_manifest: Manifest,
    manifest: Manifest,
    versions: Vec<u32>,
    stack: Vec<SemanticValue>,
    next_boxed: usize,
    next_int: usize,
    next_temp: u32,
    dependencies: Vec<Arc<Method>>,
}

impl<'a> Translator<'a> {
    fn fresh_boxed(&mut self) -> Register {
        let register = Register::boxed(self.next_boxed);
        self.next_boxed += 1;
        register
    }

    fn fresh_int(&mut self) -> Register {
        let register = Register::unboxed_int(self.next_int);
        self.next_int += 1;
        register
    }

    fn fresh_temp(&mut self) -> SemanticValue {
        let temp = SemanticValue::Temp { id: self.next_temp };
        self.next_temp += 1;
        temp
    }

    fn emit(&mut self, instruction: L2Instruction) {
        self.blocks[self.current].instructions.push(instruction);
    }

    fn push_temp(&mut self, register: Register, restriction: TypeRestriction) -> SemanticValue {
        let temp = self.fresh_temp();
        self.manifest.bind(temp, register, restriction);
        self.stack.push(temp);
        temp
    }

    fn register_of(&self, semantic_value: SemanticValue) -> Register {
        self.manifest
            .register_for(semantic_value)
            .expect("semantic value has a register")
    }

    fn restriction_of(&self, semantic_value: SemanticValue) -> TypeRestriction {
        self.manifest
            .restriction_for(semantic_value)
            .cloned()
            .unwrap_or_else(TypeRestriction::any_boxed)
    }

    fn off_ramp_target(&mut self) -> usize {
        if let Some(block) = self.off_ramp_block {
            return block;
        }
        let block = self.blocks.len();
        self.blocks.push(BasicBlock {
            name: "off-ramp".into(),
            incoming: Vec::new(),
            phis: Vec::new(),
            instructions: vec![L2Instruction::UnreachableCode],
        });
        self.off_ramp_block = Some(block);
        block
    }

    /// An off-ramp edge reifying the frame at `resume_pc` with the given
    /// operand stack (bottom to top).
    fn off_ramp(&mut self, resume_pc: usize, stack: Vec<SemanticValue>) -> EdgeId {
        let target = self.off_ramp_target();
        self.edge(
            EdgePurpose::OffRamp,
            target,
            Some(ReifySpec { resume_pc, stack }),
        )
    }

    fn edge(&mut self, purpose: EdgePurpose, target: usize, reify: Option<ReifySpec>) -> EdgeId {
        let edge_id = self.edges.len();
        self.edges.push(Edge {
            purpose,
            target,
            always_live: self.manifest.live_registers(),
            sometimes_live: Vec::new(),
            manifest: self.manifest.clone(),
            reify,
        });
        self.blocks[target].incoming.push(edge_id);
        edge_id
    }

    fn new_block(&mut self, name: &str) -> usize {
        self.blocks.push(BasicBlock {
            name: name.to_owned(),
            incoming: Vec::new(),
            phis: Vec::new(),
            instructions: Vec::new(),
        });
        self.blocks.len() - 1
    }

    fn slot_value(&self, slot: usize) -> SemanticValue {
        SemanticValue::FrameSlot {
            slot,
            version: self.versions[slot - 1],
        }
    }

    /// Can a send of `method` be specialized to its sole definition, given
    /// the static restrictions of the arguments?
    fn monomorphic_target(&self, method: &Method, args: &[SemanticValue]) -> Option<Value> {
        let definitions: Vec<_> = method
            .definitions()
            .into_iter()
            .filter(|definition| !definition.is_macro())
            .collect();
        let [definition] = definitions.as_slice() else {
            return None;
        };
        let DefinitionBody::Concrete { function } = definition.body() else {
            return None;
        };
        for (slot, arg) in args.iter().enumerate() {
            let expected = types::tuple_type_at(definition.signature(), slot + 1).ok()?;
            if !self.restriction_of(*arg).ty.is_subtype_of(&expected) {
                return None;
            }
        }
        Some(function.clone())
    }

    fn translate(mut self) -> Option<Arc<Chunk>> {
        let data = self.code;
        let mut reader = NybbleReader::new(&data.nybbles, 0);
        let mut finished = false;
        while !reader.at_end() && !finished {
            let instruction_pc = reader.position() + 1;
            let operation = L1Operation::decode(&mut reader).ok()?;
            let after_pc = reader.position() + 1;
            match operation {
                L1Operation::PushLiteral { index } => {
                    let literal = data.literal_at(index);
                    let register = self.fresh_boxed();
                    self.emit(L2Instruction::MoveConstant {
                        value: literal.clone(),
                        dst: register,
                    });
                    self.push_temp(register, TypeRestriction::of_constant(literal));
                }
                L1Operation::PushLocal { slot } => {
                    let semantic_value = self.slot_value(slot as usize);
                    self.stack.push(semantic_value);
                }
                L1Operation::PushLastLocal { slot } => {
                    let semantic_value = self.slot_value(slot as usize);
                    self.stack.push(semantic_value);
                    // The slot is nilled behind the push.
                    let nil_register = self.fresh_boxed();
                    self.emit(L2Instruction::MoveConstant {
                        value: scalar::nil(),
                        dst: nil_register,
                    });
                    self.versions[slot as usize - 1] += 1;
                    let replacement = self.slot_value(slot as usize);
                    self.manifest.bind(
                        replacement,
                        nil_register,
                        TypeRestriction::of_constant(scalar::nil()),
                    );
                }
                L1Operation::PushOuter { index } => {
                    let register = self.fresh_boxed();
                    self.emit(L2Instruction::MoveOuter {
                        index,
                        dst: register,
                    });
                    self.push_temp(register, TypeRestriction::any_boxed());
                }
                L1Operation::GetLocal { slot } => {
                    let variable = self.register_of(self.slot_value(slot as usize));
                    let failure = self.off_ramp(instruction_pc, self.stack.clone());
                    let register = self.fresh_boxed();
                    let content_type = types::variable_read_type(
                        &self.restriction_of(self.slot_value(slot as usize)).ty,
                    )
                    .unwrap_or_else(|_| types::any_type());
                    self.emit(L2Instruction::GetVariable {
                        variable,
                        dst: register,
                        on_failure: failure,
                    });
                    self.push_temp(register, TypeRestriction::of_type(content_type));
                }
                L1Operation::SetLocal { slot } => {
                    let stack_before = self.stack.clone();
                    let value = self.stack.pop().expect("operand for SetLocal");
                    let variable = self.register_of(self.slot_value(slot as usize));
                    let failure = self.off_ramp(instruction_pc, stack_before);
                    let value_register = self.register_of(value);
                    self.emit(L2Instruction::SetVariable {
                        variable,
                        value: value_register,
                        on_failure: failure,
                    });
                }
                L1Operation::GetOuter { index } => {
                    let variable = self.fresh_boxed();
                    self.emit(L2Instruction::MoveOuter {
                        index,
                        dst: variable,
                    });
                    let failure = self.off_ramp(instruction_pc, self.stack.clone());
                    let register = self.fresh_boxed();
                    self.emit(L2Instruction::GetVariable {
                        variable,
                        dst: register,
                        on_failure: failure,
                    });
                    self.push_temp(register, TypeRestriction::any_boxed());
                }
                L1Operation::SetOuter { index } => {
                    let stack_before = self.stack.clone();
                    let value = self.stack.pop().expect("operand for SetOuter");
                    let variable = self.fresh_boxed();
                    self.emit(L2Instruction::MoveOuter {
                        index,
                        dst: variable,
                    });
                    let failure = self.off_ramp(instruction_pc, stack_before);
                    let value_register = self.register_of(value);
                    self.emit(L2Instruction::SetVariable {
                        variable,
                        value: value_register,
                        on_failure: failure,
                    });
                }
                L1Operation::GetVariable => {
                    let stack_before = self.stack.clone();
                    let variable = self.stack.pop().expect("operand for GetVariable");
                    let failure = self.off_ramp(instruction_pc, stack_before);
                    let register = self.fresh_boxed();
                    let variable_register = self.register_of(variable);
                    self.emit(L2Instruction::GetVariable {
                        variable: variable_register,
                        dst: register,
                        on_failure: failure,
                    });
                    self.push_temp(register, TypeRestriction::any_boxed());
                }
                L1Operation::SetVariable => {
                    let stack_before = self.stack.clone();
                    let value = self.stack.pop().expect("operand for SetVariable");
                    let variable = self.stack.pop().expect("variable for SetVariable");
                    let failure = self.off_ramp(instruction_pc, stack_before);
                    let value_register = self.register_of(value);
                    let variable_register = self.register_of(variable);
                    self.emit(L2Instruction::SetVariable {
                        variable: variable_register,
                        value: value_register,
                        on_failure: failure,
                    });
                }
                L1Operation::MakeTuple { count } => {
                    let split = self.stack.len() - count as usize;
                    let elements: Vec<SemanticValue> = self.stack.split_off(split);
                    let registers: Vec<Register> =
                        elements.iter().map(|sv| self.register_of(*sv)).collect();
                    let element_types: Vec<Value> = elements
                        .iter()
                        .map(|sv| self.restriction_of(*sv).ty)
                        .collect();
                    let register = self.fresh_boxed();
                    self.emit(L2Instruction::CreateTuple {
                        elements: registers,
                        dst: register,
                    });
                    self.push_temp(
                        register,
                        TypeRestriction::of_type(types::tuple_type_fixed(element_types)),
                    );
                }
                L1Operation::MakeFunction { code, num_outers } => {
                    let code_literal = data.literal_at(code);
                    let split = self.stack.len() - num_outers as usize;
                    let outers: Vec<SemanticValue> = self.stack.split_off(split);
                    let registers: Vec<Register> =
                        outers.iter().map(|sv| self.register_of(*sv)).collect();
                    let register = self.fresh_boxed();
                    let function_type = core_code::code_data(&code_literal)
                        .map(|inner| inner.function_type.clone())
                        .unwrap_or_else(types::any_type);
                    self.emit(L2Instruction::CreateFunction {
                        code: code_literal,
                        outers: registers,
                        dst: register,
                    });
                    self.push_temp(register, TypeRestriction::of_type(function_type));
                }
                L1Operation::Duplicate => {
                    let top = *self.stack.last().expect("operand for Duplicate");
                    self.stack.push(top);
                }
                L1Operation::Pop => {
                    self.stack.pop().expect("operand for Pop");
                }
                L1Operation::Return => {
                    let value = self.stack.pop().expect("operand for Return");
                    let register = self.register_of(value);
                    self.emit(L2Instruction::Return { value: register });
                    finished = true;
                }
                L1Operation::Call {
                    message,
                    num_args,
                    check_return,
                    return_type,
                } => {
                    let message_atom = data.literal_at(message);
                    let expected = check_return.then(|| data.literal_at(return_type));
                    let stack_before = self.stack.clone();
                    let split = self.stack.len() - num_args as usize;
                    let args: Vec<SemanticValue> = self.stack.split_off(split);
                    let arg_registers: Vec<Register> =
                        args.iter().map(|sv| self.register_of(*sv)).collect();
                    let stack_after_args = self.stack.clone();

                    // Unboxed integer fast path.
                    if num_args == 2
                        && let Some(op) = self.support.arithmetic_for(&message_atom)
                    {
                        let fallback = self.off_ramp(instruction_pc, stack_before.clone());
                        let a = self.fresh_int();
                        let b = self.fresh_int();
                        self.emit(L2Instruction::UnboxInt {
                            src: arg_registers[0],
                            dst: a,
                            on_failure: fallback,
                        });
                        self.emit(L2Instruction::UnboxInt {
                            src: arg_registers[1],
                            dst: b,
                            on_failure: fallback,
                        });
                        let out = self.fresh_int();
                        self.emit(match op {
                            IntArithOp::Add => L2Instruction::IntAdd {
                                augend: a,
                                addend: b,
                                sum: out,
                                on_overflow: fallback,
                            },
                            IntArithOp::Subtract => L2Instruction::IntSubtract {
                                minuend: a,
                                subtrahend: b,
                                difference: out,
                                on_overflow: fallback,
                            },
                            IntArithOp::Multiply => L2Instruction::IntMultiply {
                                multiplicand: a,
                                multiplier: b,
                                product: out,
                                on_overflow: fallback,
                            },
                        });
                        let boxed = self.fresh_boxed();
                        self.emit(L2Instruction::BoxInt {
                            src: out,
                            dst: boxed,
                        });
                        self.push_temp(boxed, TypeRestriction::of_type(types::integers()));
                        continue;
                    }

                    // The call leaves optimized execution; the frame reifies
                    // positioned after the call, minus the consumed args.
                    let monomorphic = self
                        .support
                        .method_for(&message_atom)
                        .and_then(|method| {
                            self.monomorphic_target(&method, &args)
                                .map(|function| (method, function))
                        });
                    match monomorphic {
                        Some((method, function)) => {
                            if !self
                                .dependencies
                                .iter()
                                .any(|seen| Arc::ptr_eq(seen, &method))
                            {
                                self.dependencies.push(method);
                            }
                            let off_ramp = self.off_ramp(after_pc, stack_after_args);
                            self.emit(L2Instruction::InvokeConstantFunction {
                                function,
                                args: arg_registers,
                                expected_type: expected.clone(),
                                off_ramp,
                            });
                        }
                        None => {
                            let lookup_failure =
                                self.off_ramp(instruction_pc, stack_before.clone());
                            let function_register = self.fresh_boxed();
                            let invoke_block = self.new_block("invoke");
                            let function_temp = self.fresh_temp();
                            self.manifest.bind(
                                function_temp,
                                function_register,
                                TypeRestriction::any_boxed(),
                            );
                            let success =
                                self.edge(EdgePurpose::Success, invoke_block, None);
                            self.emit(L2Instruction::LookupByValues {
                                message: message_atom,
                                args: arg_registers.clone(),
                                dst: function_register,
                                on_success: success,
                                on_failure: lookup_failure,
                            });
                            self.current = invoke_block;
                            let off_ramp = self.off_ramp(after_pc, stack_after_args);
                            self.emit(L2Instruction::Invoke {
                                function: function_register,
                                args: arg_registers,
                                expected_type: expected.clone(),
                                off_ramp,
                            });
                        }
                    }
                    finished = true;
                }
            }
        }
        if !finished {
            // A code object that falls off its stream is malformed; leave
            // it to the nominal interpreter.
            return None;
        }
        let entry_manifest = self.entry_manifest.clone();
        let chunk = Chunk::new(
            format!("{}#L2", data.name),
            self.blocks,
            self.edges,
            0,
            entry_manifest,
            [self.next_boxed, self.next_int, 0],
            data,
            self.dependencies,
        );
        Some(chunk)
    }
}

/// Translate one code object, or answer `None` when it must stay with the
/// nominal interpreter (primitive codes, malformed streams).
pub fn translate(
    code: &Arc<CodeData>,
    support: &dyn TranslationSupport,
) -> Option<Arc<Chunk>> {
    if code.primitive != 0 {
        return None;
    }
    let mut manifest = Manifest::new();
    let mut next_boxed = 0usize;
    let args_type = code.args_tuple_type();
    // Translated codes never attempt a primitive, so the seeded slots are
    // exactly the arguments followed by the locals.
    let seeded_slots = code.num_args + code.num_locals();
    let versions = vec![0u32; code.frame_slots()];
    for slot in 1..=seeded_slots {
        let register = Register::boxed(next_boxed);
        next_boxed += 1;
        let restriction = if slot <= code.num_args {
            TypeRestriction::of_type(
                types::tuple_type_at(&args_type, slot).unwrap_or_else(|_| types::any_type()),
            )
        } else {
            let local_type = code.local_types[slot - code.num_args - 1].clone();
            TypeRestriction::of_type(types::variable_type(local_type.clone(), local_type))
        };
        manifest.bind(
            SemanticValue::FrameSlot { slot, version: 0 },
            register,
            restriction,
        );
    }
    let entry_block = BasicBlock {
        name: "entry".into(),
        incoming: Vec::new(),
        phis: Vec::new(),
        instructions: vec![L2Instruction::EnterChunk],
    };
    let translator = Translator {
        code,
        support,
        blocks: vec![entry_block],
        edges: Vec::new(),
        current: 0,
        off_ramp_block: None,
        entry_manifest: manifest.clone(),
        manifest,
        versions,
        stack: Vec::new(),
        next_boxed,
        next_int: 0,
        next_temp: 0,
        dependencies: Vec::new(),
    };
    let chunk = translator.translate()?;
    tracing::debug!(
        target: "exec.l2",
        chunk = %chunk.name,
        blocks = chunk.blocks.len(),
        "translated"
    );
    Some(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::EdgePurpose;
    use core_code::CodeBuilder;
    use core_dispatch::Definition;
    use core_value::atom;

    struct Support {
        methods: Vec<(Value, Arc<Method>)>,
        arithmetic: Vec<(Value, IntArithOp)>,
    }

    impl TranslationSupport for Support {
        fn method_for(&self, message: &Value) -> Option<Arc<Method>> {
            self.methods
                .iter()
                .find(|(atom, _)| atom.equals(message))
                .map(|(_, method)| method.clone())
        }

        fn arithmetic_for(&self, message: &Value) -> Option<IntArithOp> {
            self.arithmetic
                .iter()
                .find(|(atom, _)| atom.equals(message))
                .map(|(_, op)| *op)
        }
    }

    fn has_instruction(chunk: &Chunk, probe: impl Fn(&L2Instruction) -> bool) -> bool {
        chunk
            .blocks
            .iter()
            .any(|block| block.instructions.iter().any(&probe))
    }

    #[test]
    fn addition_inlines_with_overflow_off_ramp() {
        let plus = atom::fresh_atom("_+_");
        let mut builder = CodeBuilder::new("sum");
        builder.args(vec![types::integers(), types::integers()]);
        builder.returns(types::integers());
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::PushLocal { slot: 2 });
        builder.call(plus.clone(), 2, types::integers());
        builder.emit(L1Operation::Return);
        let code = core_code::code_data(&builder.finish()).unwrap();
        let support = Support {
            methods: Vec::new(),
            arithmetic: vec![(plus, IntArithOp::Add)],
        };
        let chunk = translate(&code, &support).unwrap();
        assert!(has_instruction(&chunk, |i| matches!(i, L2Instruction::IntAdd { .. })));
        assert!(has_instruction(&chunk, |i| matches!(i, L2Instruction::BoxInt { .. })));
        assert!(chunk.validate_liveness().is_ok());
        // The overflow/unbox fallback is an off-ramp that re-executes the
        // send nominally.
        assert!(
            chunk
                .edges
                .iter()
                .any(|edge| edge.purpose == EdgePurpose::OffRamp && edge.reify.is_some())
        );
    }

    #[test]
    fn monomorphic_send_specializes_and_registers_a_dependency() {
        let message = atom::fresh_atom("poke_");
        let method = Method::new(message.clone()).unwrap();
        let mut body = CodeBuilder::new("poke");
        body.args(vec![types::integers()]);
        body.returns(types::integers());
        body.emit(L1Operation::PushLocal { slot: 1 });
        body.emit(L1Operation::Return);
        let target = core_code::function_value(body.finish(), Vec::new());
        method
            .add_definition(Definition::concrete(
                types::tuple_type_fixed(vec![types::integers()]),
                target,
            ))
            .unwrap();

        let mut caller = CodeBuilder::new("caller");
        caller.args(vec![types::integers()]);
        caller.returns(types::integers());
        caller.emit(L1Operation::PushLocal { slot: 1 });
        caller.call(message.clone(), 1, types::integers());
        caller.emit(L1Operation::Return);
        let code = core_code::code_data(&caller.finish()).unwrap();
        let support = Support {
            methods: vec![(message, method.clone())],
            arithmetic: Vec::new(),
        };
        let chunk = translate(&code, &support).unwrap();
        assert!(has_instruction(&chunk, |i| {
            matches!(i, L2Instruction::InvokeConstantFunction { .. })
        }));
        assert_eq!(chunk.dependencies().len(), 1);
        assert!(chunk.validate_liveness().is_ok());
    }

    #[test]
    fn polymorphic_send_emits_lookup_then_invoke() {
        let message = atom::fresh_atom("m_");
        let method = Method::new(message.clone()).unwrap();
        for ty in [types::integers(), types::string_type()] {
            let mut body = CodeBuilder::new("case");
            body.args(vec![ty.clone()]);
            body.returns(types::any_type());
            body.emit(L1Operation::PushLocal { slot: 1 });
            body.emit(L1Operation::Return);
            method
                .add_definition(Definition::concrete(
                    types::tuple_type_fixed(vec![ty]),
                    core_code::function_value(body.finish(), Vec::new()),
                ))
                .unwrap();
        }
        let mut caller = CodeBuilder::new("caller");
        caller.args(vec![types::any_type()]);
        caller.returns(types::any_type());
        caller.emit(L1Operation::PushLocal { slot: 1 });
        caller.call(message.clone(), 1, types::any_type());
        caller.emit(L1Operation::Return);
        let code = core_code::code_data(&caller.finish()).unwrap();
        let support = Support {
            methods: vec![(message, method)],
            arithmetic: Vec::new(),
        };
        let chunk = translate(&code, &support).unwrap();
        assert!(has_instruction(&chunk, |i| {
            matches!(i, L2Instruction::LookupByValues { .. })
        }));
        assert!(has_instruction(&chunk, |i| matches!(i, L2Instruction::Invoke { .. })));
        assert!(chunk.dependencies().is_empty());
        assert!(chunk.validate_liveness().is_ok());
    }

    #[test]
    fn primitive_codes_stay_nominal() {
        let mut builder = CodeBuilder::new("prim");
        builder.returns(types::any_type());
        builder.primitive(7, Some(types::any_type()));
        builder.push_literal(scalar::integer(0));
        builder.emit(L1Operation::Return);
        let code = core_code::code_data(&builder.finish()).unwrap();
        let support = Support {
            methods: Vec::new(),
            arithmetic: Vec::new(),
        };
        assert!(translate(&code, &support).is_none());
    }
}
