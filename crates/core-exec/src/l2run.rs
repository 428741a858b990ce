//! The Level Two executor: drives a chunk's register machine on behalf of
//! a continuation.
//!
//! Register state lives in three dense files (boxed, unboxed int, unboxed
//! float). Entering a chunk seeds the boxed file from the frame slots per
//! the entry manifest; leaving it through any off-ramp writes the
//! register state back into the frame using the edge's manifest and reify
//! spec, so the Level One view is exact at every exit.

use ahash::AHashMap;

use core_l2::{Chunk, EdgeId, EdgePurpose, L2Instruction, Register, RegisterKind, SemanticValue};
use core_value::{map, object, scalar, tuple, Value};

use crate::continuation;
use crate::errors::ErrorCode;
use crate::Runtime;

pub enum L2Outcome {
    /// The chunk returned from the function with this value.
    Return(Value),
    /// The chunk performed a call; the frame is already reified positioned
    /// after it. `expected_type` of `None` means the check is elided.
    Call {
        function: Value,
        args: Vec<Value>,
        expected_type: Option<Value>,
    },
    /// An off-ramp fired; the frame resumes nominally.
    Reified,
    /// The validity check at entry failed; nothing was touched.
    InvalidEntry,
}

struct Machine<'a> {
    chunk: &'a Chunk,
    boxed: Vec<Value>,
    ints: Vec<i64>,
    floats: Vec<f64>,
}

impl<'a> Machine<'a> {
    fn read_boxed(&self, register: Register) -> Value {
        debug_assert_eq!(register.kind, RegisterKind::Boxed);
        self.boxed[register.index].clone()
    }

    fn write_boxed(&mut self, register: Register, value: Value) {
        debug_assert_eq!(register.kind, RegisterKind::Boxed);
        self.boxed[register.index] = value;
    }

    fn read_int(&self, register: Register) -> i64 {
        debug_assert_eq!(register.kind, RegisterKind::IntUnboxed);
        self.ints[register.index]
    }

    fn write_int(&mut self, register: Register, value: i64) {
        debug_assert_eq!(register.kind, RegisterKind::IntUnboxed);
        self.ints[register.index] = value;
    }

    fn copy(&mut self, src: Register, dst: Register) {
        match (src.kind, dst.kind) {
            (RegisterKind::Boxed, RegisterKind::Boxed) => {
                self.boxed[dst.index] = self.boxed[src.index].clone();
            }
            (RegisterKind::IntUnboxed, RegisterKind::IntUnboxed) => {
                self.ints[dst.index] = self.ints[src.index];
            }
            (RegisterKind::FloatUnboxed, RegisterKind::FloatUnboxed) => {
                self.floats[dst.index] = self.floats[src.index];
            }
            _ => panic!("move between register files"),
        }
    }

    /// Write the register state back into the Level One frame through an
    /// off-ramp edge.
    fn reify(&self, edge_id: EdgeId, frame: &Value) {
        let edge = &self.chunk.edges[edge_id];
        debug_assert_eq!(edge.purpose, EdgePurpose::OffRamp);
        let spec = edge
            .reify
            .as_ref()
            .expect("off-ramp edges carry a reify spec");
        let data = continuation::continuation_data(frame).expect("reifying a continuation");
        // Most recent write per frame slot wins.
        let mut newest: AHashMap<usize, (u32, Register)> = AHashMap::new();
        for (semantic_value, (register, _)) in edge.manifest.bindings() {
            if let SemanticValue::FrameSlot { slot, version } = semantic_value {
                match newest.get(slot) {
                    Some((seen, _)) if *seen >= *version => {}
                    _ => {
                        newest.insert(*slot, (*version, *register));
                    }
                }
            }
        }
        data.with_state(|state| {
            for (slot, (_, register)) in &newest {
                state.set_slot(*slot, self.read_boxed(*register));
            }
            state.reset_stack();
            for semantic_value in &spec.stack {
                let register = edge
                    .manifest
                    .register_for(*semantic_value)
                    .expect("reified stack entry has a register");
                state.push(self.read_boxed(register));
            }
            state.pc = spec.resume_pc;
        });
        tracing::trace!(
            target: "exec.l2",
            chunk = %self.chunk.name,
            resume_pc = spec.resume_pc,
            "off-ramp reified frame"
        );
    }
}

enum Transfer {
    /// Control moved to a block (phis already owed to the edge).
    Goto { block: usize, via: EdgeId },
    /// Control left the chunk through an off-ramp.
    Left,
}

pub fn run_chunk(
    runtime: &Runtime,
    chunk: &Chunk,
    frame: &Value,
) -> Result<L2Outcome, (ErrorCode, String)> {
    let data = continuation::continuation_data(frame).expect("running a continuation");
    let function =
        core_code::function_data(&data.function).expect("continuation runs a function");
    let mut machine = Machine {
        chunk,
        boxed: vec![scalar::nil(); chunk.register_counts[0]],
        ints: vec![0; chunk.register_counts[1]],
        floats: vec![0.0; chunk.register_counts[2]],
    };
    // Seed from the frame per the entry manifest.
    data.with_state(|state| {
        for (semantic_value, (register, _)) in chunk.entry_manifest.bindings() {
            if let SemanticValue::FrameSlot { slot, version: 0 } = semantic_value {
                machine.boxed[register.index] = state.slot(*slot);
            }
        }
    });

    let mut block = chunk.entry;
    let mut arrived_via: Option<EdgeId> = None;
    loop {
        let current = &chunk.blocks[block];
        if let Some(edge) = arrived_via.take() {
            let position = current
                .incoming
                .iter()
                .position(|incoming| *incoming == edge)
                .unwrap_or(0);
            for phi in &current.phis {
                machine.copy(phi.sources[position], phi.output);
            }
        }
        let mut transferred: Option<Transfer> = None;
        let mut outcome: Option<L2Outcome> = None;
        for instruction in &current.instructions {
            match instruction {
                L2Instruction::Move { src, dst } => machine.copy(*src, *dst),
                L2Instruction::MoveConstant { value, dst } => {
                    machine.write_boxed(*dst, value.clone());
                }
                L2Instruction::MoveIntConstant { value, dst } => {
                    machine.write_int(*dst, *value);
                }
                L2Instruction::MoveOuter { index, dst } => {
                    machine.write_boxed(*dst, function.outer_at(*index));
                }
                L2Instruction::CreateFunction { code, outers, dst } => {
                    let captured = outers
                        .iter()
                        .map(|register| machine.read_boxed(*register))
                        .collect();
                    machine.write_boxed(*dst, core_code::function_value(code.clone(), captured));
                }
                L2Instruction::CreateTuple { elements, dst } => {
                    let items = elements
                        .iter()
                        .map(|register| machine.read_boxed(*register))
                        .collect();
                    machine.write_boxed(*dst, tuple::tuple_from_values(items));
                }
                L2Instruction::CreateMap { pairs, dst } => {
                    let entries = pairs
                        .iter()
                        .map(|(key, value)| {
                            (machine.read_boxed(*key), machine.read_boxed(*value))
                        })
                        .collect();
                    machine.write_boxed(*dst, map::map_from_entries(entries));
                }
                L2Instruction::CreateObject { fields, dst } => {
                    let bound = fields
                        .iter()
                        .map(|(atom, register)| (atom.clone(), machine.read_boxed(*register)))
                        .collect();
                    machine.write_boxed(*dst, object::object_from_fields(bound));
                }
                L2Instruction::GetVariable {
                    variable,
                    dst,
                    on_failure,
                } => {
                    match core_value::variable::variable_read(&machine.read_boxed(*variable)) {
                        Ok(value) => machine.write_boxed(*dst, value),
                        Err(_) => {
                            machine.reify(*on_failure, frame);
                            transferred = Some(Transfer::Left);
                            break;
                        }
                    }
                }
                L2Instruction::SetVariable {
                    variable,
                    value,
                    on_failure,
                } => {
                    let stored = machine.read_boxed(*value);
                    match core_value::variable::variable_write(
                        &machine.read_boxed(*variable),
                        stored,
                    ) {
                        Ok(()) => {}
                        Err(_) => {
                            machine.reify(*on_failure, frame);
                            transferred = Some(Transfer::Left);
                            break;
                        }
                    }
                }
                L2Instruction::LookupByValues {
                    message,
                    args,
                    dst,
                    on_success,
                    on_failure,
                } => {
                    let arg_values: Vec<Value> = args
                        .iter()
                        .map(|register| machine.read_boxed(*register))
                        .collect();
                    let resolved = runtime
                        .method_for(message)
                        .ok_or(())
                        .and_then(|method| method.lookup_by_values(&arg_values).map_err(|_| ()));
                    match resolved {
                        Ok(definition) => {
                            let body = definition
                                .function()
                                .expect("runtime lookup answers concrete definitions")
                                .clone();
                            machine.write_boxed(*dst, body);
                            let target = chunk.edges[*on_success].target;
                            transferred = Some(Transfer::Goto {
                                block: target,
                                via: *on_success,
                            });
                            break;
                        }
                        Err(()) => {
                            machine.reify(*on_failure, frame);
                            transferred = Some(Transfer::Left);
                            break;
                        }
                    }
                }
                L2Instruction::Invoke {
                    function: callee,
                    args,
                    expected_type,
                    off_ramp,
                } => {
                    machine.reify(*off_ramp, frame);
                    outcome = Some(L2Outcome::Call {
                        function: machine.read_boxed(*callee),
                        args: args
                            .iter()
                            .map(|register| machine.read_boxed(*register))
                            .collect(),
                        expected_type: expected_type.clone(),
                    });
                    break;
                }
                L2Instruction::InvokeConstantFunction {
                    function: callee,
                    args,
                    expected_type,
                    off_ramp,
                } => {
                    machine.reify(*off_ramp, frame);
                    outcome = Some(L2Outcome::Call {
                        function: callee.clone(),
                        args: args
                            .iter()
                            .map(|register| machine.read_boxed(*register))
                            .collect(),
                        expected_type: expected_type.clone(),
                    });
                    break;
                }
                L2Instruction::Jump { edge } | L2Instruction::JumpBack { edge } => {
                    transferred = Some(follow(&mut machine, chunk, frame, *edge));
                    break;
                }
                L2Instruction::JumpIfKindOfObject {
                    value,
                    kind,
                    if_kind,
                    if_not,
                } => {
                    let chosen = if machine.read_boxed(*value).is_instance_of(kind) {
                        *if_kind
                    } else {
                        *if_not
                    };
                    transferred = Some(follow(&mut machine, chunk, frame, chosen));
                    break;
                }
                L2Instruction::JumpIfLessThanObject {
                    value,
                    bound,
                    if_less,
                    if_not,
                } => {
                    let left = scalar::int_of(&machine.read_boxed(*value))
                        .expect("ordered comparison on an unboxable value");
                    let right =
                        scalar::int_of(bound).expect("ordered comparison bound is an integer");
                    let chosen = if left < right { *if_less } else { *if_not };
                    transferred = Some(follow(&mut machine, chunk, frame, chosen));
                    break;
                }
                L2Instruction::IntAdd {
                    augend,
                    addend,
                    sum,
                    on_overflow,
                } => {
                    match machine.read_int(*augend).checked_add(machine.read_int(*addend)) {
                        Some(result) => machine.write_int(*sum, result),
                        None => {
                            machine.reify(*on_overflow, frame);
                            transferred = Some(Transfer::Left);
                            break;
                        }
                    }
                }
                L2Instruction::IntSubtract {
                    minuend,
                    subtrahend,
                    difference,
                    on_overflow,
                } => {
                    match machine
                        .read_int(*minuend)
                        .checked_sub(machine.read_int(*subtrahend))
                    {
                        Some(result) => machine.write_int(*difference, result),
                        None => {
                            machine.reify(*on_overflow, frame);
                            transferred = Some(Transfer::Left);
                            break;
                        }
                    }
                }
                L2Instruction::IntMultiply {
                    multiplicand,
                    multiplier,
                    product,
                    on_overflow,
                } => {
                    match machine
                        .read_int(*multiplicand)
                        .checked_mul(machine.read_int(*multiplier))
                    {
                        Some(result) => machine.write_int(*product, result),
                        None => {
                            machine.reify(*on_overflow, frame);
                            transferred = Some(Transfer::Left);
                            break;
                        }
                    }
                }
                L2Instruction::UnboxInt {
                    src,
                    dst,
                    on_failure,
                } => match scalar::int_of(&machine.read_boxed(*src)) {
                    Some(value) => machine.write_int(*dst, value),
                    None => {
                        machine.reify(*on_failure, frame);
                        transferred = Some(Transfer::Left);
                        break;
                    }
                },
                L2Instruction::BoxInt { src, dst } => {
                    let value = machine.read_int(*src);
                    machine.write_boxed(*dst, scalar::integer(value));
                }
                L2Instruction::UnboxFloat {
                    src,
                    dst,
                    on_failure,
                } => match scalar::double_of(&machine.read_boxed(*src)) {
                    Some(value) => machine.floats[dst.index] = value,
                    None => {
                        machine.reify(*on_failure, frame);
                        transferred = Some(Transfer::Left);
                        break;
                    }
                },
                L2Instruction::BoxFloat { src, dst } => {
                    let value = machine.floats[src.index];
                    machine.write_boxed(*dst, scalar::double(value));
                }
                L2Instruction::EnterChunk => {
                    if !core_code::InstalledChunk::is_valid(chunk) {
                        return Ok(L2Outcome::InvalidEntry);
                    }
                }
                L2Instruction::Return { value } => {
                    outcome = Some(L2Outcome::Return(machine.read_boxed(*value)));
                    break;
                }
                L2Instruction::UnreachableCode => {
                    panic!("unreachable code executed in chunk {}", chunk.name);
                }
            }
        }
        if let Some(result) = outcome {
            return Ok(result);
        }
        match transferred {
            Some(Transfer::Goto { block: next, via }) => {
                block = next;
                arrived_via = Some(via);
            }
            Some(Transfer::Left) => return Ok(L2Outcome::Reified),
            None => {
                return Err((
                    ErrorCode::InvalidStatements,
                    format!("chunk {} block fell off its end", chunk.name),
                ));
            }
        }
    }
}

fn follow(machine: &mut Machine<'_>, chunk: &Chunk, frame: &Value, edge_id: EdgeId) -> Transfer {
    let edge = &chunk.edges[edge_id];
    if edge.purpose == EdgePurpose::OffRamp {
        machine.reify(edge_id, frame);
        Transfer::Left
    } else {
        Transfer::Goto {
            block: edge.target,
            via: edge_id,
        }
    }
}
