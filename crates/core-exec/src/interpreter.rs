//! The Level One interpreter and the send/return engine.
//!
//! One instance drives one fiber while it runs. The loop owns the fiber's
//! current continuation; each iteration takes a safepoint (a shared
//! acquisition of the level-one coordinator, plus a termination check),
//! then either runs the frame's installed Level Two chunk or interprets
//! one Level One instruction in place.
//!
//! Primitives run before any frame is built; their five dispositions are
//! resolved here. Lookup failures, variable access failures, and
//! return-type disagreements all terminate the fiber with the
//! corresponding numeric code; the fiber's failure outcome is the
//! user-visible surface.

use std::sync::Arc;

use core_code::{CodeData, L1Operation, NybbleReader};
use core_value::{scalar, variable, Value};

use crate::continuation::{self, new_continuation};
use crate::errors::ErrorCode;
use crate::fiber::{ExecutionState, Fiber, FiberOutcome, PendingWake};
use crate::l2run::{self, L2Outcome};
use crate::primitives::{PrimitiveContext, PrimitiveFlags, PrimitiveResult};
use crate::Runtime;

/// Why the interpreter handed the fiber back to the scheduler.
pub enum RunDisposition {
    /// The fiber blocked (suspended primitive, park, join).
    Suspended,
    /// The fiber reached an outcome (already recorded on it).
    Finished,
}

enum Step {
    Continue,
    Suspend,
    Finished,
}

pub struct Interpreter<'rt> {
    runtime: &'rt Runtime,
    fiber: Arc<Fiber>,
    current: Option<Value>,
}

impl<'rt> Interpreter<'rt> {
    /// Drive `fiber` until it suspends or terminates. The caller (a
    /// scheduler worker) has already moved it to the running state.
    pub fn run(runtime: &'rt Runtime, fiber: Arc<Fiber>) -> RunDisposition {
        let current = fiber.current_continuation();
        let mut interpreter = Interpreter {
            runtime,
            fiber,
            current,
        };
        let span = tracing::trace_span!(target: "runtime.fiber", "fiber_run", name = %interpreter.fiber.name);
        let _entered = span.enter();
        match interpreter.deliver_pending() {
            Step::Continue => {}
            Step::Suspend => return RunDisposition::Suspended,
            Step::Finished => return RunDisposition::Finished,
        }
        loop {
            if interpreter.fiber.termination_requested() {
                interpreter.complete(FiberOutcome::Failed(
                    ErrorCode::FiberIsTerminated,
                    "termination requested".to_owned(),
                ));
                return RunDisposition::Finished;
            }
            let step = {
                let _safepoint = interpreter.runtime.safepoint_guard();
                interpreter.step()
            };
            match step {
                Step::Continue => {}
                Step::Suspend => return RunDisposition::Suspended,
                Step::Finished => return RunDisposition::Finished,
            }
        }
    }

    /// Hand a resumed primitive its disposition, or start the fiber.
    fn deliver_pending(&mut self) -> Step {
        if let Some(pending) = self.fiber.take_pending() {
            return match pending {
                PendingWake::Result(value) => match &self.current {
                    Some(frame) => {
                        continuation::continuation_data(frame)
                            .expect("current is a continuation")
                            .with_state(|state| state.push(value));
                        Step::Continue
                    }
                    None => {
                        self.complete(FiberOutcome::Completed(value));
                        Step::Finished
                    }
                },
                PendingWake::Invoke { function, args } => {
                    self.invoke_function(function, args, None, true)
                }
            };
        }
        if self.current.is_none()
            && let Some((function, args)) = self.fiber.take_start()
        {
            return self.invoke_function(function, args, None, true);
        }
        Step::Continue
    }

    fn step(&mut self) -> Step {
        let Some(frame) = self.current.clone() else {
            // Nothing to run: either the outcome was already recorded, or
            // the fiber started with nothing to do.
            if self.fiber.outcome().is_none() {
                self.complete(FiberOutcome::Completed(scalar::nil()));
            }
            return Step::Finished;
        };
        let frame = frame.ensure_mutable();
        self.current = Some(frame.clone());
        let data = match continuation::continuation_data(&frame) {
            Some(data) => data,
            None => {
                return self.fail(ErrorCode::InvalidHandle, "current frame is not a continuation")
            }
        };
        let function = core_code::function_data(&data.function)
            .expect("continuation runs a function");
        let code = function.code_data();

        // A valid installed chunk executes on the frame's behalf, but only
        // from the top of a fresh activation; reified frames mid-flight
        // stay with the nominal interpreter.
        let (pc, fresh) = data.with_state(|state| (state.pc, state.stack_is_empty()));
        if pc == 1
            && fresh
            && let Some(installed) = code.installed_chunk()
            && installed.is_valid()
            && let Some(chunk) = installed.as_any().downcast_ref::<core_l2::Chunk>()
        {
            return self.run_chunk(chunk, &frame);
        }

        self.step_l1(&frame, &code)
    }

    fn run_chunk(&mut self, chunk: &core_l2::Chunk, frame: &Value) -> Step {
        match l2run::run_chunk(self.runtime, chunk, frame) {
            Ok(L2Outcome::Return(value)) => self.do_return(frame, value),
            Ok(L2Outcome::Call {
                function,
                args,
                expected_type,
            }) => {
                let skip = expected_type.is_none();
                self.invoke_function(function, args, expected_type, skip)
            }
            Ok(L2Outcome::Reified) => Step::Continue,
            Ok(L2Outcome::InvalidEntry) => {
                // The validity bit went false between installation and
                // entry; the frame is untouched and interprets nominally.
                Step::Continue
            }
            Err((code, detail)) => self.fail(code, &detail),
        }
    }

    // ---------------------------------------------------------------------
    // Sends, returns, primitives
    // ---------------------------------------------------------------------

    fn do_send(
        &mut self,
        message: Value,
        args: Vec<Value>,
        expected_type: Option<Value>,
        check_return: bool,
    ) -> Step {
        let Some(method) = self.runtime.method_for(&message) else {
            return self.fail(
                ErrorCode::NoMethod,
                &format!("no method bound to {:?}", message),
            );
        };
        match method.lookup_by_values(&args) {
            Ok(definition) => {
                let function = definition
                    .function()
                    .expect("runtime lookup answers concrete definitions")
                    .clone();
                tracing::trace!(target: "exec.send", message = ?message, "send resolved");
                self.invoke_function(function, args, expected_type, !check_return)
            }
            Err(error) => self.fail(
                ErrorCode::from(&error),
                &format!("lookup of {:?} failed: {}", message, error),
            ),
        }
    }

    /// Invoke `function`: attempt its primitive, or push a fresh frame.
    fn invoke_function(
        &mut self,
        function: Value,
        args: Vec<Value>,
        expected_type: Option<Value>,
        skip_return: bool,
    ) -> Step {
        let Some(function_data) = core_code::function_data(&function) else {
            return self.fail(ErrorCode::IncorrectArgumentType, "invoking a non-function");
        };
        let code = function_data.code_data();
        if args.len() != code.num_args {
            return self.fail(
                ErrorCode::IncorrectNumberOfArguments,
                &format!(
                    "{} expects {} argument(s), got {}",
                    code.name,
                    code.num_args,
                    args.len()
                ),
            );
        }
        if code.primitive != 0 {
            return self.attempt_primitive(function, code, args, expected_type, skip_return);
        }
        let caller = self.current.clone().unwrap_or_else(scalar::nil);
        let frame = new_continuation(caller, function, &code, args, expected_type, skip_return);
        self.current = Some(frame);
        Step::Continue
    }

    fn attempt_primitive(
        &mut self,
        function: Value,
        code: Arc<CodeData>,
        args: Vec<Value>,
        expected_type: Option<Value>,
        skip_return: bool,
    ) -> Step {
        let Some(primitive) = self.runtime.primitives.get(code.primitive) else {
            return self.fail(
                ErrorCode::Unsupported,
                &format!("unknown primitive {}", code.primitive),
            );
        };
        let fiber = self.fiber.clone();
        let result = {
            let mut context = PrimitiveContext {
                runtime: self.runtime,
                fiber: &fiber,
                current: &mut self.current,
            };
            (primitive.body)(&mut context, &args)
        };
        match result {
            PrimitiveResult::Success(value) => {
                self.deliver_result(value, expected_type, skip_return)
            }
            PrimitiveResult::Failure(error_code) => {
                assert!(
                    !primitive.flags.contains(PrimitiveFlags::CANNOT_FAIL),
                    "infallible primitive {} failed",
                    primitive.name
                );
                match code.failure_slot() {
                    Some(failure_slot) => {
                        // Bind the code to the failure slot; the body is
                        // the recovery path.
                        let caller = self.current.clone().unwrap_or_else(scalar::nil);
                        let frame = new_continuation(
                            caller,
                            function,
                            &code,
                            args,
                            expected_type,
                            skip_return,
                        );
                        continuation::continuation_data(&frame)
                            .expect("fresh continuation")
                            .with_state(|state| {
                                state.set_slot(failure_slot, error_code.as_value());
                            });
                        self.current = Some(frame);
                        Step::Continue
                    }
                    None => self.fail(
                        error_code,
                        &format!("primitive {} failed without recovery", primitive.name),
                    ),
                }
            }
            PrimitiveResult::ReadyToInvoke {
                function: target,
                args: target_args,
            } => self.invoke_function(target, target_args, expected_type, skip_return),
            PrimitiveResult::ContinuationChanged => Step::Continue,
            PrimitiveResult::FiberSuspended => {
                self.fiber.set_continuation(self.current.clone());
                self.fiber.set_execution_state(ExecutionState::Suspended);
                tracing::trace!(
                    target: "runtime.fiber",
                    fiber = %self.fiber.name,
                    primitive = primitive.name,
                    "fiber suspended"
                );
                Step::Suspend
            }
        }
    }

    /// A value produced without a frame (primitive success): check it and
    /// push it to the current frame, or finish the fiber.
    fn deliver_result(
        &mut self,
        value: Value,
        expected_type: Option<Value>,
        skip_return: bool,
    ) -> Step {
        if !skip_return
            && let Some(expected) = &expected_type
            && !value.is_instance_of(expected)
        {
            return self.fail(
                ErrorCode::ResultDisagreedWithExpectedType,
                &format!("{:?} is not an instance of {:?}", value, expected),
            );
        }
        match &self.current {
            Some(frame) => {
                continuation::continuation_data(frame)
                    .expect("current is a continuation")
                    .with_state(|state| state.push(value));
                Step::Continue
            }
            None => {
                self.complete(FiberOutcome::Completed(value));
                Step::Finished
            }
        }
    }

    /// Return `value` from `frame` to its caller.
    fn do_return(&mut self, frame: &Value, value: Value) -> Step {
        let data = continuation::continuation_data(frame).expect("returning frame");
        let (expected_type, skip_return) = data.with_state(|state| {
            (state.expected_return_type.clone(), state.skip_return)
        });
        if !skip_return
            && let Some(expected) = &expected_type
            && !value.is_instance_of(expected)
        {
            return self.fail(
                ErrorCode::ResultDisagreedWithExpectedType,
                &format!("returned {:?}, expected {:?}", value, expected),
            );
        }
        let caller = data.caller.clone();
        if caller.is_nil() {
            self.complete(FiberOutcome::Completed(value));
            return Step::Finished;
        }
        let caller = caller.ensure_mutable();
        continuation::continuation_data(&caller)
            .expect("caller is a continuation")
            .with_state(|state| state.push(value));
        self.current = Some(caller);
        Step::Continue
    }

    // ---------------------------------------------------------------------
    // One Level One instruction
    // ---------------------------------------------------------------------

    fn step_l1(&mut self, frame: &Value, code: &Arc<CodeData>) -> Step {
        let data = continuation::continuation_data(frame).expect("stepping a continuation");
        let function = core_code::function_data(&data.function).expect("frame function");

        // Decode under the frame lock, collect everything the operation
        // needs, then release before any engine re-entry.
        enum Decoded {
            Done(Result<(), (ErrorCode, String)>),
            Send {
                message: Value,
                args: Vec<Value>,
                expected_type: Value,
                check_return: bool,
            },
            Return(Value),
        }
        let decoded = data.with_state(|state| {
            let mut reader = NybbleReader::new(&code.nybbles, state.pc - 1);
            let operation = match L1Operation::decode(&mut reader) {
                Ok(operation) => operation,
                Err(error) => {
                    return Decoded::Done(Err((
                        ErrorCode::InvalidStatements,
                        format!("undecodable instruction in {}: {}", code.name, error),
                    )));
                }
            };
            state.pc = reader.position() + 1;
            tracing::trace!(target: "exec.l1", code = %code.name, op = ?operation, "step");
            match operation {
                L1Operation::PushLiteral { index } => {
                    state.push(code.literal_at(index));
                    Decoded::Done(Ok(()))
                }
                L1Operation::PushLocal { slot } => {
                    let value = state.slot(slot as usize);
                    state.push(value);
                    Decoded::Done(Ok(()))
                }
                L1Operation::PushLastLocal { slot } => {
                    let value = state.slot(slot as usize);
                    state.set_slot(slot as usize, scalar::nil());
                    state.push(value);
                    Decoded::Done(Ok(()))
                }
                L1Operation::PushOuter { index } => {
                    state.push(function.outer_at(index));
                    Decoded::Done(Ok(()))
                }
                L1Operation::GetLocal { slot } => {
                    match variable::variable_read(&state.slot(slot as usize)) {
                        Ok(value) => {
                            state.push(value);
                            Decoded::Done(Ok(()))
                        }
                        Err(error) => Decoded::Done(Err((
                            ErrorCode::from(&error),
                            format!("local {} in {}: {}", slot, code.name, error),
                        ))),
                    }
                }
                L1Operation::SetLocal { slot } => {
                    let value = state.pop();
                    match variable::variable_write(&state.slot(slot as usize), value) {
                        Ok(()) => Decoded::Done(Ok(())),
                        Err(error) => Decoded::Done(Err((
                            ErrorCode::from(&error),
                            format!("local {} in {}: {}", slot, code.name, error),
                        ))),
                    }
                }
                L1Operation::GetOuter { index } => {
                    match variable::variable_read(&function.outer_at(index)) {
                        Ok(value) => {
                            state.push(value);
                            Decoded::Done(Ok(()))
                        }
                        Err(error) => Decoded::Done(Err((
                            ErrorCode::from(&error),
                            format!("outer {} in {}: {}", index, code.name, error),
                        ))),
                    }
                }
                L1Operation::SetOuter { index } => {
                    let value = state.pop();
                    match variable::variable_write(&function.outer_at(index), value) {
                        Ok(()) => Decoded::Done(Ok(())),
                        Err(error) => Decoded::Done(Err((
                            ErrorCode::from(&error),
                            format!("outer {} in {}: {}", index, code.name, error),
                        ))),
                    }
                }
                L1Operation::GetVariable => {
                    let target = state.pop();
                    if target.descriptor().variable_payload().is_none() {
                        return Decoded::Done(Err((
                            ErrorCode::IncorrectArgumentType,
                            format!("GetVariable on a non-variable in {}", code.name),
                        )));
                    }
                    match variable::variable_read(&target) {
                        Ok(value) => {
                            state.push(value);
                            Decoded::Done(Ok(()))
                        }
                        Err(error) => Decoded::Done(Err((
                            ErrorCode::from(&error),
                            format!("variable read in {}: {}", code.name, error),
                        ))),
                    }
                }
                L1Operation::SetVariable => {
                    let value = state.pop();
                    let target = state.pop();
                    if target.descriptor().variable_payload().is_none() {
                        return Decoded::Done(Err((
                            ErrorCode::IncorrectArgumentType,
                            format!("SetVariable on a non-variable in {}", code.name),
                        )));
                    }
                    match variable::variable_write(&target, value) {
                        Ok(()) => Decoded::Done(Ok(())),
                        Err(error) => Decoded::Done(Err((
                            ErrorCode::from(&error),
                            format!("variable write in {}: {}", code.name, error),
                        ))),
                    }
                }
                L1Operation::MakeTuple { count } => {
                    let mut elements = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        elements.push(state.pop());
                    }
                    elements.reverse();
                    state.push(core_value::tuple::tuple_from_values(elements));
                    Decoded::Done(Ok(()))
                }
                L1Operation::MakeFunction { code: code_index, num_outers } => {
                    let mut outers = Vec::with_capacity(num_outers as usize);
                    for _ in 0..num_outers {
                        outers.push(state.pop());
                    }
                    outers.reverse();
                    let inner_code = code.literal_at(code_index);
                    state.push(core_code::function_value(inner_code, outers));
                    Decoded::Done(Ok(()))
                }
                L1Operation::Duplicate => {
                    let top = state.pop();
                    state.push(top.clone());
                    state.push(top);
                    Decoded::Done(Ok(()))
                }
                L1Operation::Pop => {
                    state.pop();
                    Decoded::Done(Ok(()))
                }
                L1Operation::Call {
                    message,
                    num_args,
                    check_return,
                    return_type,
                } => {
                    let mut args = Vec::with_capacity(num_args as usize);
                    for _ in 0..num_args {
                        args.push(state.pop());
                    }
                    args.reverse();
                    Decoded::Send {
                        message: code.literal_at(message),
                        args,
                        expected_type: code.literal_at(return_type),
                        check_return,
                    }
                }
                L1Operation::Return => Decoded::Return(state.pop()),
            }
        });

        match decoded {
            Decoded::Done(Ok(())) => Step::Continue,
            Decoded::Done(Err((error_code, detail))) => self.fail(error_code, &detail),
            Decoded::Send {
                message,
                args,
                expected_type,
                check_return,
            } => self.do_send(message, args, Some(expected_type), check_return),
            Decoded::Return(value) => self.do_return(frame, value),
        }
    }

    // ---------------------------------------------------------------------
    // Outcomes
    // ---------------------------------------------------------------------

    fn fail(&mut self, error_code: ErrorCode, detail: &str) -> Step {
        tracing::debug!(
            target: "runtime.fiber",
            fiber = %self.fiber.name,
            code = error_code.number(),
            detail,
            "fiber failed"
        );
        self.complete(FiberOutcome::Failed(error_code, detail.to_owned()));
        Step::Finished
    }

    fn complete(&mut self, outcome: FiberOutcome) {
        self.current = None;
        let joiners = self.fiber.complete(outcome.clone());
        for joiner in joiners {
            joiner.set_pending(PendingWake::Result(crate::join_result_value(&outcome)));
            self.runtime.schedule(joiner);
        }
    }
}
