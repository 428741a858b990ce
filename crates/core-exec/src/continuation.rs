//! Continuations: call frames as first-class values.
//!
//! A continuation records its calling continuation (nil at the fiber's
//! root), the running function, a one-based program counter into the
//! Level One stream, and a frame-slot array holding, in order, the
//! arguments, the primitive-failure value when the function attempts a
//! fallible primitive, the local variable cells, and the operand stack.
//! The stack pointer starts one past the last slot and grows downward.
//!
//! Ownership follows the copy-on-write discipline: the running fiber
//! mutates its current continuation in place only while the continuation
//! is mutable; a continuation observed from the language (captured,
//! resumed, serialized) is first frozen, and `ensure_mutable` copies it
//! back into a private frame before the engine writes again.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use core_code::CodeData;
use core_value::descriptor::{Descriptor, Tag, hash_combine, hash_seed};
use core_value::{Mutability, Value, scalar, types, variable};

pub struct FrameState {
    /// One-based nybble position in the Level One stream.
    pub pc: usize,
    /// One-based; one past the shallowest occupied stack slot. Equal to
    /// `slots.len() + 1` when the stack is empty.
    pub stackp: usize,
    /// One-based externally; `slots[0]` is frame slot 1.
    pub slots: Vec<Value>,
    /// Elide the return-type check when this frame returns.
    pub skip_return: bool,
    /// The call site's declared return type, checked on return unless
    /// skipped.
    pub expected_return_type: Option<Value>,
}

impl FrameState {
    pub fn slot(&self, index: usize) -> Value {
        self.slots[index - 1].clone()
    }

    pub fn set_slot(&mut self, index: usize, value: Value) {
        self.slots[index - 1] = value;
    }

    pub fn push(&mut self, value: Value) {
        debug_assert!(self.stackp > 1, "operand stack overflow");
        self.stackp -= 1;
        self.slots[self.stackp - 1] = value;
    }

    pub fn pop(&mut self) -> Value {
        debug_assert!(self.stackp <= self.slots.len(), "operand stack underflow");
        let value = std::mem::replace(&mut self.slots[self.stackp - 1], scalar::nil());
        self.stackp += 1;
        value
    }

    pub fn stack_is_empty(&self) -> bool {
        self.stackp == self.slots.len() + 1
    }

    /// Clear the stack and restore "empty".
    pub fn reset_stack(&mut self) {
        for index in (self.stackp - 1)..self.slots.len() {
            self.slots[index] = scalar::nil();
        }
        self.stackp = self.slots.len() + 1;
    }
}

pub struct ContinuationData {
    pub caller: Value,
    pub function: Value,
    state: Mutex<FrameState>,
    hash_nonce: u32,
}

impl ContinuationData {
    pub fn with_state<R>(&self, body: impl FnOnce(&mut FrameState) -> R) -> R {
        let mut state = self.state.lock().expect("frame lock");
        body(&mut state)
    }
}

pub struct ContinuationDescriptor {
    data: Arc<ContinuationData>,
}

impl Descriptor for ContinuationDescriptor {
    fn tag(&self) -> Tag {
        Tag::Continuation
    }

    fn kind(&self, _this: &Value) -> Value {
        let function_type = core_code::function_kind(&self.data.function)
            .unwrap_or_else(types::any_type);
        types::continuation_type(function_type)
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        hash_combine(hash_seed(Tag::Continuation), self.data.hash_nonce)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        other.tag() == Tag::Continuation && this.same_identity_as(other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        visit(&self.data.caller);
        visit(&self.data.function);
        let state = self.data.state.lock().expect("frame lock");
        for slot in &state.slots {
            visit(slot);
        }
        if let Some(expected) = &state.expected_return_type {
            visit(expected);
        }
    }

    fn copy_mutable(&self, _this: &Value) -> Value {
        let state = self.data.state.lock().expect("frame lock");
        wrap(ContinuationData {
            caller: self.data.caller.clone(),
            function: self.data.function.clone(),
            state: Mutex::new(FrameState {
                pc: state.pc,
                stackp: state.stackp,
                slots: state.slots.clone(),
                skip_return: state.skip_return,
                expected_return_type: state.expected_return_type.clone(),
            }),
            hash_nonce: next_nonce(),
        })
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pc = self.data.with_state(|state| state.pc);
        write!(f, "cont⟦{:?}@{}⟧", self.data.function, pc)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn next_nonce() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn wrap(data: ContinuationData) -> Value {
    Value::with_descriptor(
        Mutability::Mutable,
        Arc::new(ContinuationDescriptor {
            data: Arc::new(data),
        }),
    )
}

/// Construct the frame for invoking `function` with `args` from `caller`
/// (nil for a fiber root). Local variable cells are created here; the
/// operand stack starts empty.
pub fn new_continuation(
    caller: Value,
    function: Value,
    code: &Arc<CodeData>,
    args: Vec<Value>,
    expected_return_type: Option<Value>,
    skip_return: bool,
) -> Value {
    let total = code.frame_slots();
    let mut slots = vec![scalar::nil(); total];
    for (index, arg) in args.into_iter().enumerate() {
        slots[index] = arg;
    }
    for (index, local_type) in code.local_types.iter().enumerate() {
        slots[code.local_slot(index) - 1] = variable::simple_variable(local_type.clone());
    }
    wrap(ContinuationData {
        caller,
        function,
        state: Mutex::new(FrameState {
            pc: 1,
            stackp: total + 1,
            slots,
            skip_return,
            expected_return_type,
        }),
        hash_nonce: next_nonce(),
    })
}

/// Rebuild a continuation from its serialized parts. The deserializer is
/// the only caller; invariants (slot count, stack pointer range) are the
/// writer's responsibility.
pub fn reconstruct(
    caller: Value,
    function: Value,
    pc: usize,
    stackp: usize,
    slots: Vec<Value>,
    skip_return: bool,
    expected_return_type: Option<Value>,
) -> Value {
    wrap(ContinuationData {
        caller,
        function,
        state: Mutex::new(FrameState {
            pc,
            stackp,
            slots,
            skip_return,
            expected_return_type,
        }),
        hash_nonce: next_nonce(),
    })
}

pub fn continuation_data(value: &Value) -> Option<Arc<ContinuationData>> {
    let descriptor = value.traversed().descriptor();
    descriptor
        .as_any()
        .downcast_ref::<ContinuationDescriptor>()
        .map(|continuation| continuation.data.clone())
}

/// Reset a continuation to re-execute from the start with its original
/// arguments: pc back to 1, stack cleared, fresh local cells.
pub fn restart(continuation: &Value) -> Value {
    let target = continuation.ensure_mutable();
    let data = continuation_data(&target).expect("restart of a continuation");
    let code = core_code::function_data(&data.function)
        .expect("continuation runs a function")
        .code_data();
    data.with_state(|state| {
        for (index, local_type) in code.local_types.iter().enumerate() {
            state.slots[code.local_slot(index) - 1] =
                variable::simple_variable(local_type.clone());
        }
        if let Some(failure_slot) = code.failure_slot() {
            state.slots[failure_slot - 1] = scalar::nil();
        }
        state.pc = 1;
        state.reset_stack();
    });
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_code::CodeBuilder;
    use core_code::L1Operation;
    use pretty_assertions::assert_eq;

    fn sample() -> (Value, Arc<CodeData>) {
        let mut builder = CodeBuilder::new("frame sample");
        builder.args(vec![types::integers()]);
        builder.locals(vec![types::integers()]);
        builder.returns(types::integers());
        builder.emit(L1Operation::PushLocal { slot: 1 });
        builder.emit(L1Operation::Duplicate);
        builder.emit(L1Operation::Pop);
        builder.emit(L1Operation::Return);
        let code = builder.finish();
        let function = core_code::function_value(code.clone(), Vec::new());
        (function, core_code::code_data(&code).unwrap())
    }

    #[test]
    fn frame_layout_and_stack_direction() {
        let (function, code) = sample();
        let continuation = new_continuation(
            scalar::nil(),
            function,
            &code,
            vec![scalar::integer(9)],
            None,
            false,
        );
        let data = continuation_data(&continuation).unwrap();
        data.with_state(|state| {
            assert!(state.stack_is_empty());
            assert!(state.slot(1).equals(&scalar::integer(9)));
            // Local cell sits after the argument.
            assert!(state.slot(2).descriptor().variable_payload().is_some());
            state.push(scalar::integer(1));
            state.push(scalar::integer(2));
            // Downward growth: the second push landed in a shallower slot.
            assert_eq!(state.stackp, state.slots.len() - 1);
            assert!(state.pop().equals(&scalar::integer(2)));
            assert!(state.pop().equals(&scalar::integer(1)));
            assert!(state.stack_is_empty());
        });
    }

    #[test]
    fn frozen_continuations_copy_on_write() {
        let (function, code) = sample();
        let continuation = new_continuation(
            scalar::nil(),
            function,
            &code,
            vec![scalar::integer(1)],
            None,
            false,
        );
        continuation.make_immutable();
        let writable = continuation.ensure_mutable();
        assert!(!writable.same_identity_as(&continuation));
        continuation_data(&writable)
            .unwrap()
            .with_state(|state| state.set_slot(1, scalar::integer(5)));
        // The frozen original is unchanged.
        continuation_data(&continuation)
            .unwrap()
            .with_state(|state| assert!(state.slot(1).equals(&scalar::integer(1))));
    }

    #[test]
    fn restart_rewinds_but_keeps_arguments() {
        let (function, code) = sample();
        let continuation = new_continuation(
            scalar::nil(),
            function,
            &code,
            vec![scalar::integer(7)],
            None,
            false,
        );
        let data = continuation_data(&continuation).unwrap();
        data.with_state(|state| {
            state.pc = 4;
            state.push(scalar::integer(99));
        });
        let rewound = restart(&continuation);
        let data = continuation_data(&rewound).unwrap();
        data.with_state(|state| {
            assert_eq!(state.pc, 1);
            assert!(state.stack_is_empty());
            assert!(state.slot(1).equals(&scalar::integer(7)));
        });
    }
}
