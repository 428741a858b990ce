//! Assembly of code objects, for the loader and for tests.
//!
//! The builder tracks the operand-stack depth while operations are
//! emitted, so the finished code object carries an exact `max_stack` and a
//! malformed emission (popping an empty stack) fails fast at assembly time
//! rather than at interpretation time.

use core_value::{Value, types};
use smallvec::SmallVec;

use crate::nybbles::NybbleWriter;
use crate::ops::L1Operation;

pub struct CodeBuilder {
    name: String,
    arg_types: Vec<Value>,
    local_types: Vec<Value>,
    return_type: Value,
    primitive: u16,
    failure_variable_type: Option<Value>,
    literals: Vec<Value>,
    operations: Vec<L1Operation>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> CodeBuilder {
        CodeBuilder {
            name: name.into(),
            arg_types: Vec::new(),
            local_types: Vec::new(),
            return_type: types::any_type(),
            primitive: 0,
            failure_variable_type: None,
            literals: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn args(&mut self, arg_types: Vec<Value>) -> &mut Self {
        self.arg_types = arg_types;
        self
    }

    pub fn locals(&mut self, local_types: Vec<Value>) -> &mut Self {
        self.local_types = local_types;
        self
    }

    pub fn returns(&mut self, return_type: Value) -> &mut Self {
        self.return_type = return_type;
        self
    }

    /// Declare the primitive this code attempts first. A failure type makes
    /// the body the recovery path, with the failure value bound to the slot
    /// after the arguments.
    pub fn primitive(&mut self, number: u16, failure_type: Option<Value>) -> &mut Self {
        self.primitive = number;
        self.failure_variable_type = failure_type;
        self
    }

    /// Intern a literal, answering its index. Literals dedupe by equality.
    pub fn literal(&mut self, value: Value) -> u32 {
        if let Some(index) = self.literals.iter().position(|seen| seen.equals(&value)) {
            return index as u32;
        }
        self.literals.push(value.make_immutable());
        (self.literals.len() - 1) as u32
    }

    pub fn emit(&mut self, operation: L1Operation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    /// One-based frame slot of argument `index` (zero-based).
    pub fn arg_slot(&self, index: usize) -> u32 {
        debug_assert!(index < self.arg_types.len());
        index as u32 + 1
    }

    /// One-based frame slot of local `index` (zero-based).
    pub fn local_slot(&self, index: usize) -> u32 {
        debug_assert!(index < self.local_types.len());
        (self.arg_types.len() + self.failure_variable_type.is_some() as usize + index) as u32 + 1
    }

    /// Convenience: intern the literal and push it.
    pub fn push_literal(&mut self, value: Value) -> &mut Self {
        let index = self.literal(value);
        self.emit(L1Operation::PushLiteral { index })
    }

    /// Convenience: emit a checked send of `message` (an atom).
    pub fn call(&mut self, message: Value, num_args: u32, return_type: Value) -> &mut Self {
        let message = self.literal(message);
        let return_type = self.literal(return_type);
        self.emit(L1Operation::Call {
            message,
            num_args,
            check_return: true,
            return_type,
        })
    }

    /// Convenience: a send whose return-type check the caller elides (the
    /// inline-assignment form).
    pub fn call_unchecked(&mut self, message: Value, num_args: u32, return_type: Value) -> &mut Self {
        let message = self.literal(message);
        let return_type = self.literal(return_type);
        self.emit(L1Operation::Call {
            message,
            num_args,
            check_return: false,
            return_type,
        })
    }

    fn max_stack(&self) -> usize {
        let mut depth: i64 = 0;
        let mut max: i64 = 0;
        for operation in &self.operations {
            let (pops, pushes) = operation.stack_effect();
            depth -= pops as i64;
            assert!(
                depth >= 0,
                "operation {:?} underflows the operand stack in {}",
                operation,
                self.name
            );
            depth += pushes as i64;
            max = max.max(depth);
        }
        max as usize
    }

    pub fn finish(&mut self) -> Value {
        let max_stack = self.max_stack();
        let mut writer = NybbleWriter::new();
        for operation in &self.operations {
            operation.encode(&mut writer);
        }
        let function_type =
            types::function_type_from(self.arg_types.clone(), self.return_type.clone());
        let literals: SmallVec<[Value; 8]> = SmallVec::from_vec(self.literals.clone());
        crate::code_value(
            self.name.clone(),
            self.arg_types.len(),
            self.local_types.clone(),
            max_stack,
            self.primitive,
            self.failure_variable_type.clone(),
            literals.into_vec(),
            writer.finish(),
            function_type,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_value::atom;
    use core_value::scalar;
    use pretty_assertions::assert_eq;

    #[test]
    fn literals_dedupe_by_equality() {
        let mut builder = CodeBuilder::new("t");
        let a = builder.literal(scalar::integer(1));
        let b = builder.literal(scalar::integer(1));
        let c = builder.literal(scalar::integer(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn stack_depth_tracks_sends() {
        let mut builder = CodeBuilder::new("t");
        builder.args(vec![types::integers(), types::integers()]);
        builder.returns(types::integers());
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::PushLocal { slot: 2 });
        builder.call(atom::fresh_atom("_+_"), 2, types::integers());
        builder.emit(L1Operation::Return);
        let code = builder.finish();
        let data = crate::code_data(&code).unwrap();
        assert_eq!(data.max_stack, 2);
        assert_eq!(data.frame_slots(), 2 + 2);
    }

    #[test]
    #[should_panic(expected = "underflows")]
    fn underflow_is_an_assembly_error() {
        let mut builder = CodeBuilder::new("t");
        builder.emit(L1Operation::Pop);
        builder.finish();
    }
}
