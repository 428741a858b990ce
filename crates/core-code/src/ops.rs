//! The Level One instruction set: sixteen operations, one opcode nybble
//! each, operands nybble-compressed.
//!
//! Level One is the nominal semantics: a stack machine over the current
//! continuation's frame slots. It has no branches (control flow happens
//! through sends, returns, and continuation primitives), which is what
//! keeps the Level Two translation of a code object a mostly straight-line
//! affair.

use thiserror::Error;

use crate::nybbles::{NybbleError, NybbleReader, NybbleWriter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("invalid opcode {opcode} at nybble {at}")]
    InvalidOpcode { opcode: u8, at: usize },
    #[error(transparent)]
    Nybble(#[from] NybbleError),
}

/// One decoded Level One operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L1Operation {
    /// Push `literals[index]`.
    PushLiteral { index: u32 },
    /// Push the content of a frame slot (one-based).
    PushLocal { slot: u32 },
    /// Push the content of a frame slot, nilling the slot: the value is
    /// known dead there (move optimization).
    PushLastLocal { slot: u32 },
    /// Push a captured outer of the running function.
    PushOuter { index: u32 },
    /// The variable in a frame slot: push its current value.
    GetLocal { slot: u32 },
    /// The variable in a frame slot: pop a value and write it.
    SetLocal { slot: u32 },
    /// The variable captured as an outer: push its current value.
    GetOuter { index: u32 },
    /// The variable captured as an outer: pop a value and write it.
    SetOuter { index: u32 },
    /// Send the message named by `literals[message]` with `num_args`
    /// popped operands. `literals[return_type]` is the call site's expected
    /// return type; when `check_return` is false the frame's skip-return
    /// flag is set and the type check on return is elided.
    Call {
        message: u32,
        num_args: u32,
        check_return: bool,
        return_type: u32,
    },
    /// Pop `count` values, push the tuple of them (in push order).
    MakeTuple { count: u32 },
    /// Pop `num_outers` captured values, close over `literals[code]`.
    MakeFunction { code: u32, num_outers: u32 },
    /// Return the top of stack to the caller.
    Return,
    Duplicate,
    Pop,
    /// Pop a variable, push its content (type-checked read).
    GetVariable,
    /// Pop a value, pop a variable, store the value (type-checked write).
    SetVariable,
}

impl L1Operation {
    fn opcode(&self) -> u8 {
        match self {
            L1Operation::PushLiteral { .. } => 0,
            L1Operation::PushLocal { .. } => 1,
            L1Operation::PushLastLocal { .. } => 2,
            L1Operation::PushOuter { .. } => 3,
            L1Operation::GetLocal { .. } => 4,
            L1Operation::SetLocal { .. } => 5,
            L1Operation::GetOuter { .. } => 6,
            L1Operation::SetOuter { .. } => 7,
            L1Operation::Call { .. } => 8,
            L1Operation::MakeTuple { .. } => 9,
            L1Operation::MakeFunction { .. } => 10,
            L1Operation::Return => 11,
            L1Operation::Duplicate => 12,
            L1Operation::Pop => 13,
            L1Operation::GetVariable => 14,
            L1Operation::SetVariable => 15,
        }
    }

    /// Net and transient stack effects: (pops, pushes).
    pub fn stack_effect(&self) -> (u32, u32) {
        match self {
            L1Operation::PushLiteral { .. }
            | L1Operation::PushLocal { .. }
            | L1Operation::PushLastLocal { .. }
            | L1Operation::PushOuter { .. }
            | L1Operation::GetLocal { .. }
            | L1Operation::GetOuter { .. } => (0, 1),
            L1Operation::SetLocal { .. } | L1Operation::SetOuter { .. } => (1, 0),
            L1Operation::Call { num_args, .. } => (*num_args, 1),
            L1Operation::MakeTuple { count } => (*count, 1),
            L1Operation::MakeFunction { num_outers, .. } => (*num_outers, 1),
            L1Operation::Return => (1, 0),
            L1Operation::Duplicate => (1, 2),
            L1Operation::Pop => (1, 0),
            L1Operation::GetVariable => (1, 1),
            L1Operation::SetVariable => (2, 0),
        }
    }

    pub fn encode(&self, writer: &mut NybbleWriter) {
        writer.write_nybble(self.opcode());
        match self {
            L1Operation::PushLiteral { index } => writer.write_operand(*index),
            L1Operation::PushLocal { slot } | L1Operation::PushLastLocal { slot } => {
                writer.write_operand(*slot)
            }
            L1Operation::PushOuter { index } => writer.write_operand(*index),
            L1Operation::GetLocal { slot } | L1Operation::SetLocal { slot } => {
                writer.write_operand(*slot)
            }
            L1Operation::GetOuter { index } | L1Operation::SetOuter { index } => {
                writer.write_operand(*index)
            }
            L1Operation::Call {
                message,
                num_args,
                check_return,
                return_type,
            } => {
                writer.write_operand(*message);
                writer.write_operand(*num_args);
                writer.write_operand(*check_return as u32);
                writer.write_operand(*return_type);
            }
            L1Operation::MakeTuple { count } => writer.write_operand(*count),
            L1Operation::MakeFunction { code, num_outers } => {
                writer.write_operand(*code);
                writer.write_operand(*num_outers);
            }
            L1Operation::Return
            | L1Operation::Duplicate
            | L1Operation::Pop
            | L1Operation::GetVariable
            | L1Operation::SetVariable => {}
        }
    }

    pub fn decode(reader: &mut NybbleReader<'_>) -> Result<L1Operation, CodeError> {
        let at = reader.position();
        let opcode = reader.read_nybble()?;
        Ok(match opcode {
            0 => L1Operation::PushLiteral {
                index: reader.read_operand()?,
            },
            1 => L1Operation::PushLocal {
                slot: reader.read_operand()?,
            },
            2 => L1Operation::PushLastLocal {
                slot: reader.read_operand()?,
            },
            3 => L1Operation::PushOuter {
                index: reader.read_operand()?,
            },
            4 => L1Operation::GetLocal {
                slot: reader.read_operand()?,
            },
            5 => L1Operation::SetLocal {
                slot: reader.read_operand()?,
            },
            6 => L1Operation::GetOuter {
                index: reader.read_operand()?,
            },
            7 => L1Operation::SetOuter {
                index: reader.read_operand()?,
            },
            8 => L1Operation::Call {
                message: reader.read_operand()?,
                num_args: reader.read_operand()?,
                check_return: reader.read_operand()? != 0,
                return_type: reader.read_operand()?,
            },
            9 => L1Operation::MakeTuple {
                count: reader.read_operand()?,
            },
            10 => L1Operation::MakeFunction {
                code: reader.read_operand()?,
                num_outers: reader.read_operand()?,
            },
            11 => L1Operation::Return,
            12 => L1Operation::Duplicate,
            13 => L1Operation::Pop,
            14 => L1Operation::GetVariable,
            15 => L1Operation::SetVariable,
            other => return Err(CodeError::InvalidOpcode { opcode: other, at }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_round_trips() {
        let operations = vec![
            L1Operation::PushLiteral { index: 12 },
            L1Operation::PushLocal { slot: 1 },
            L1Operation::PushLastLocal { slot: 3 },
            L1Operation::PushOuter { index: 2 },
            L1Operation::GetLocal { slot: 4 },
            L1Operation::SetLocal { slot: 4 },
            L1Operation::GetOuter { index: 1 },
            L1Operation::SetOuter { index: 1 },
            L1Operation::Call {
                message: 700,
                num_args: 2,
                check_return: true,
                return_type: 3,
            },
            L1Operation::Call {
                message: 0,
                num_args: 0,
                check_return: false,
                return_type: 1,
            },
            L1Operation::MakeTuple { count: 5 },
            L1Operation::MakeFunction {
                code: 9,
                num_outers: 2,
            },
            L1Operation::Return,
            L1Operation::Duplicate,
            L1Operation::Pop,
            L1Operation::GetVariable,
            L1Operation::SetVariable,
        ];
        let mut writer = NybbleWriter::new();
        for operation in &operations {
            operation.encode(&mut writer);
        }
        let nybbles = writer.finish();
        let mut reader = NybbleReader::new(&nybbles, 0);
        for operation in &operations {
            assert_eq!(&L1Operation::decode(&mut reader).unwrap(), operation);
        }
        assert!(reader.at_end());
    }
}
