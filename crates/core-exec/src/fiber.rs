//! Fibers: cooperative threads of execution.
//!
//! A fiber's current continuation is its only stack. The scheduler owns
//! the transitions between execution states; within a state the fiber is
//! driven by exactly one OS thread, so its continuation needs no
//! synchronization while it runs.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use bitflags::bitflags;

use core_value::descriptor::{Descriptor, Tag, hash_combine, hash_seed};
use core_value::{Mutability, Value, types};

use crate::errors::ErrorCode;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FiberFlags: u32 {
        /// May reject a parse from a semantic restriction or prefix
        /// function.
        const CAN_REJECT_PARSE    = 1 << 0;
        /// Present in the scheduler's runnable set.
        const SCHEDULED           = 1 << 1;
        /// Cooperative cancellation was requested; honored at the next
        /// safepoint.
        const TERMINATION_REQUESTED = 1 << 2;
        /// Executing on behalf of a module load.
        const BOUND_TO_LOADER     = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Unstarted,
    Running,
    Suspended,
    Parked,
    Terminated,
}

/// How a fiber ended.
#[derive(Debug, Clone)]
pub enum FiberOutcome {
    /// The root frame returned this value.
    Completed(Value),
    /// A runtime failure with its user-visible code.
    Failed(ErrorCode, String),
    /// An internal invariant breach, confined to this fiber.
    Panicked(String),
}

/// Delivery for a fiber resuming from a suspended primitive.
pub enum PendingWake {
    /// The primitive succeeded with this value.
    Result(Value),
    /// The primitive failed; run this function with these arguments
    /// (the failure recovery path).
    Invoke { function: Value, args: Vec<Value> },
}

struct FiberInner {
    execution: ExecutionState,
    continuation: Option<Value>,
    /// The call that starts the fiber, consumed at first run.
    start: Option<(Value, Vec<Value>)>,
    outcome: Option<FiberOutcome>,
    pending: Option<PendingWake>,
    /// Fibers suspended in a join on this one.
    joiners: Vec<Arc<Fiber>>,
}

pub struct Fiber {
    pub name: String,
    priority: AtomicU8,
    flags: AtomicU32,
    inner: Mutex<FiberInner>,
    completion: Condvar,
}

impl Fiber {
    pub fn new(name: String, function: Value, args: Vec<Value>, priority: u8) -> Arc<Fiber> {
        Arc::new(Fiber {
            name,
            priority: AtomicU8::new(priority),
            flags: AtomicU32::new(FiberFlags::empty().bits()),
            inner: Mutex::new(FiberInner {
                execution: ExecutionState::Unstarted,
                continuation: None,
                start: Some((function, args)),
                outcome: None,
                pending: None,
                joiners: Vec::new(),
            }),
            completion: Condvar::new(),
        })
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn flags(&self) -> FiberFlags {
        FiberFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flag(&self, flag: FiberFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub fn clear_flag(&self, flag: FiberFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    pub fn termination_requested(&self) -> bool {
        self.flags().contains(FiberFlags::TERMINATION_REQUESTED)
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.inner.lock().expect("fiber lock").execution
    }

    pub(crate) fn set_execution_state(&self, state: ExecutionState) {
        self.inner.lock().expect("fiber lock").execution = state;
    }

    pub fn current_continuation(&self) -> Option<Value> {
        self.inner.lock().expect("fiber lock").continuation.clone()
    }

    pub(crate) fn set_continuation(&self, continuation: Option<Value>) {
        self.inner.lock().expect("fiber lock").continuation = continuation;
    }

    pub(crate) fn take_start(&self) -> Option<(Value, Vec<Value>)> {
        self.inner.lock().expect("fiber lock").start.take()
    }

    pub(crate) fn take_pending(&self) -> Option<PendingWake> {
        self.inner.lock().expect("fiber lock").pending.take()
    }

    pub(crate) fn set_pending(&self, pending: PendingWake) {
        self.inner.lock().expect("fiber lock").pending = Some(pending);
    }

    /// Record the outcome, transition to terminated, and collect the
    /// joiners to wake. The scheduler reschedules them.
    pub(crate) fn complete(&self, outcome: FiberOutcome) -> Vec<Arc<Fiber>> {
        let mut inner = self.inner.lock().expect("fiber lock");
        inner.execution = ExecutionState::Terminated;
        inner.continuation = None;
        inner.outcome = Some(outcome);
        let joiners = std::mem::take(&mut inner.joiners);
        drop(inner);
        self.completion.notify_all();
        joiners
    }

    pub fn outcome(&self) -> Option<FiberOutcome> {
        self.inner.lock().expect("fiber lock").outcome.clone()
    }

    /// Register `joiner` to be rescheduled at completion. Answers the
    /// outcome instead when this fiber already terminated.
    pub(crate) fn add_joiner(&self, joiner: Arc<Fiber>) -> Option<FiberOutcome> {
        let mut inner = self.inner.lock().expect("fiber lock");
        if inner.execution == ExecutionState::Terminated {
            return inner.outcome.clone();
        }
        inner.joiners.push(joiner);
        None
    }

    /// Block the calling OS thread until the fiber terminates. Host-side
    /// only (the CLI and tests); fibers join through the join primitive.
    pub fn join_blocking(&self) -> FiberOutcome {
        let mut inner = self.inner.lock().expect("fiber lock");
        while inner.execution != ExecutionState::Terminated {
            inner = self.completion.wait(inner).expect("fiber lock");
        }
        inner.outcome.clone().expect("terminated fiber has outcome")
    }
}

// -------------------------------------------------------------------------
// Fibers as values
// -------------------------------------------------------------------------

pub struct FiberDescriptor {
    pub fiber: Arc<Fiber>,
}

impl Descriptor for FiberDescriptor {
    fn tag(&self) -> Tag {
        Tag::Fiber
    }

    fn kind(&self, this: &Value) -> Value {
        types::instance_type(this.clone())
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        hash_combine(
            hash_seed(Tag::Fiber),
            Arc::as_ptr(&self.fiber) as usize as u32,
        )
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        other.tag() == Tag::Fiber && this.same_identity_as(other)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber⟦{}⟧", self.fiber.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn fiber_value(fiber: Arc<Fiber>) -> Value {
    Value::with_descriptor(
        Mutability::Immutable,
        Arc::new(FiberDescriptor { fiber }),
    )
    .make_shared()
}

pub fn fiber_of(value: &Value) -> Option<Arc<Fiber>> {
    let descriptor = value.traversed().descriptor();
    descriptor
        .as_any()
        .downcast_ref::<FiberDescriptor>()
        .map(|wrapper| wrapper.fiber.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_value::scalar;

    #[test]
    fn flags_and_priority() {
        let fiber = Fiber::new("t".into(), scalar::nil(), Vec::new(), 50);
        assert_eq!(fiber.priority(), 50);
        assert!(!fiber.termination_requested());
        fiber.set_flag(FiberFlags::TERMINATION_REQUESTED);
        assert!(fiber.termination_requested());
        fiber.clear_flag(FiberFlags::TERMINATION_REQUESTED);
        assert!(!fiber.termination_requested());
    }

    #[test]
    fn joiners_after_termination_get_the_outcome_directly() {
        let fiber = Fiber::new("t".into(), scalar::nil(), Vec::new(), 50);
        let joiner = Fiber::new("j".into(), scalar::nil(), Vec::new(), 50);
        let woken = fiber.complete(FiberOutcome::Completed(scalar::integer(3)));
        assert!(woken.is_empty());
        assert!(matches!(
            fiber.add_joiner(joiner),
            Some(FiberOutcome::Completed(_))
        ));
    }
}
