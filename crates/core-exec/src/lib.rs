//! core-exec: the execution engine.
//!
//! The [`Runtime`] is the explicit context every engine entry point
//! receives: the atom-by-name index, the method index, the primitive
//! registry, the fiber scheduler, and the level-one safepoint coordinator.
//! There is no process-global state; two runtimes coexist without
//! touching.
//!
//! Execution is two-level. The nominal Level One interpreter
//! ([`interpreter`]) drives continuations one instruction at a time; when
//! a function's code carries a valid Level Two chunk, the chunk's register
//! machine ([`l2run`]) executes on the frame's behalf and falls back
//! through reifying off-ramps. Translation and installation of chunks go
//! through [`Runtime::optimize_function`], inside a level-one-safe window.

pub mod continuation;
pub mod errors;
pub mod fiber;
pub mod interpreter;
pub mod l2run;
pub mod loader;
pub mod primitives;
pub mod scheduler;

use std::sync::{Arc, Mutex, RwLock};

use ahash::AHashMap;

use core_dispatch::{MessageError, Method};
use core_l2::translate::{IntArithOp, TranslationSupport};
use core_value::{atom, scalar, Value};

pub use continuation::{ContinuationData, FrameState, new_continuation};
pub use errors::ErrorCode;
pub use fiber::{ExecutionState, Fiber, FiberFlags, FiberOutcome};
pub use loader::{Loader, ParseScope, Token, TokenKind};
pub use primitives::{PrimitiveFlags, PrimitiveRegistry, PrimitiveResult};
pub use scheduler::{SafeAction, SafepointCoordinator, Scheduler};

pub struct Runtime {
    methods: RwLock<AHashMap<Value, Arc<Method>>>,
    atoms_by_name: Mutex<AHashMap<String, Value>>,
    pub primitives: PrimitiveRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) safepoint: SafepointCoordinator,
}

impl Runtime {
    /// A runtime with one scheduler thread per available core.
    pub fn new() -> Arc<Runtime> {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(2);
        Runtime::with_threads(threads)
    }

    pub fn with_threads(threads: usize) -> Arc<Runtime> {
        let runtime = Arc::new(Runtime {
            methods: RwLock::new(AHashMap::new()),
            atoms_by_name: Mutex::new(AHashMap::new()),
            primitives: PrimitiveRegistry::standard(),
            scheduler: Scheduler::new(threads),
            safepoint: SafepointCoordinator::new(),
        });
        Scheduler::start(&runtime);
        tracing::info!(target: "runtime", threads, "runtime started");
        runtime
    }

    // ---------------------------------------------------------------------
    // Atoms and methods: the process-wide indices
    // ---------------------------------------------------------------------

    /// Intern: one atom per distinct name within this runtime. The
    /// serializer leans on this identity.
    pub fn atom_named(&self, name: &str) -> Value {
        let mut atoms = self.atoms_by_name.lock().expect("atom index");
        if let Some(existing) = atoms.get(name) {
            return existing.clone();
        }
        let fresh = atom::fresh_atom(name).make_shared();
        atoms.insert(name.to_owned(), fresh.clone());
        fresh
    }

    pub fn method_for(&self, message: &Value) -> Option<Arc<Method>> {
        self.methods
            .read()
            .expect("method index")
            .get(message)
            .cloned()
    }

    /// The method bound to `message`, created on first use.
    pub fn method_or_create(&self, message: &Value) -> Result<Arc<Method>, MessageError> {
        if let Some(existing) = self.method_for(message) {
            return Ok(existing);
        }
        let mut methods = self.methods.write().expect("method index");
        if let Some(existing) = methods.get(message) {
            return Ok(existing.clone());
        }
        let method = Method::new(message.clone())?;
        methods.insert(message.make_shared(), method.clone());
        Ok(method)
    }

    // ---------------------------------------------------------------------
    // Fibers
    // ---------------------------------------------------------------------

    pub fn spawn(
        &self,
        function: Value,
        args: Vec<Value>,
        priority: u8,
        name: String,
    ) -> Arc<Fiber> {
        scheduler::FIBERS_SPAWNED.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let fiber = Fiber::new(name, function, args, priority);
        self.schedule(fiber.clone());
        fiber
    }

    pub fn schedule(&self, fiber: Arc<Fiber>) {
        self.scheduler.enqueue(fiber);
    }

    /// Complete a previously suspended primitive with its value.
    pub fn resume_from_successful_primitive(&self, fiber: &Arc<Fiber>, result: Value) {
        fiber.set_pending(fiber::PendingWake::Result(result));
        self.schedule(fiber.clone());
    }

    /// Complete a previously suspended primitive by running its failure
    /// function (the error code travels in `args`).
    pub fn resume_from_failed_primitive(
        &self,
        fiber: &Arc<Fiber>,
        error_code: ErrorCode,
        failure_function: Value,
        mut args: Vec<Value>,
    ) {
        args.push(error_code.as_value());
        fiber.set_pending(fiber::PendingWake::Invoke {
            function: failure_function,
            args,
        });
        self.schedule(fiber.clone());
    }

    /// Cooperative cancellation: the fiber observes the flag at its next
    /// safepoint. A suspended or parked fiber is rescheduled so it can.
    pub fn request_termination(&self, fiber: &Arc<Fiber>) {
        fiber.set_flag(FiberFlags::TERMINATION_REQUESTED);
        match fiber.execution_state() {
            ExecutionState::Suspended | ExecutionState::Parked | ExecutionState::Unstarted => {
                self.schedule(fiber.clone());
            }
            _ => {}
        }
    }

    /// Host-side convenience: run a function on a fresh fiber and wait.
    pub fn run_function_now(
        &self,
        function: Value,
        args: Vec<Value>,
    ) -> Result<Value, (ErrorCode, String)> {
        let fiber = self.spawn(function, args, 128, "synchronous call".into());
        match fiber.join_blocking() {
            FiberOutcome::Completed(value) => Ok(value),
            FiberOutcome::Failed(code, detail) => Err((code, detail)),
            FiberOutcome::Panicked(detail) => Err((ErrorCode::Unsupported, detail)),
        }
    }

    // ---------------------------------------------------------------------
    // Safepoints
    // ---------------------------------------------------------------------

    pub(crate) fn safepoint_guard(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        self.safepoint.enter_step()
    }

    /// Run a runtime-level mutation while no fiber is mid-instruction.
    pub fn level_one_safe<R>(&self, body: impl FnOnce() -> R) -> R {
        self.safepoint.level_one_safe(body)
    }

    /// Queue an action behind the next level-one-safe barrier.
    pub fn when_level_one_safe(&self, action: SafeAction) {
        self.scheduler.submit_safe_action(action);
    }

    // ---------------------------------------------------------------------
    // Level Two
    // ---------------------------------------------------------------------

    /// Translate and install a Level Two chunk for `function`'s code.
    /// Answers whether a chunk was installed.
    pub fn optimize_function(&self, function: &Value) -> bool {
        let Some(function_data) = core_code::function_data(function) else {
            return false;
        };
        let code = function_data.code_data();
        let support = RuntimeSupport { runtime: self };
        match core_l2::translate(&code, &support) {
            Some(chunk) => {
                self.level_one_safe(|| chunk.install());
                true
            }
            None => false,
        }
    }
}

/// The translator's window into the runtime.
struct RuntimeSupport<'rt> {
    runtime: &'rt Runtime,
}

impl TranslationSupport for RuntimeSupport<'_> {
    fn method_for(&self, message: &Value) -> Option<Arc<Method>> {
        self.runtime.method_for(message)
    }

    fn arithmetic_for(&self, message: &Value) -> Option<IntArithOp> {
        let method = self.runtime.method_for(message)?;
        let definitions: Vec<_> = method
            .definitions()
            .into_iter()
            .filter(|definition| !definition.is_macro())
            .collect();
        let [definition] = definitions.as_slice() else {
            return None;
        };
        let body = definition.function()?;
        let code = core_code::function_data(body)?.code_data();
        let primitive = self.runtime.primitives.get(code.primitive)?;
        if !primitive.flags.contains(PrimitiveFlags::CAN_INLINE) {
            return None;
        }
        match code.primitive {
            primitives::PRIM_ADD => Some(IntArithOp::Add),
            primitives::PRIM_SUBTRACT => Some(IntArithOp::Subtract),
            primitives::PRIM_MULTIPLY => Some(IntArithOp::Multiply),
            _ => None,
        }
    }
}

/// The value a joiner receives for a target's outcome.
pub(crate) fn join_result_value(outcome: &FiberOutcome) -> Value {
    match outcome {
        FiberOutcome::Completed(value) => value.clone(),
        FiberOutcome::Failed(code, _) => code.as_value(),
        FiberOutcome::Panicked(_) => scalar::nil(),
    }
}
