//! The fiber scheduler: a pool of OS threads driving cooperative fibers,
//! plus the level-one safepoint coordinator.
//!
//! Ready fibers sit in a priority-bucketed queue (FIFO within a priority,
//! highest priority first; the weak-fairness bound is one pass of the
//! ring). Workers block on a crossbeam channel of tickets; a ticket means
//! "something is ready", and the worker pops the best fiber or the next
//! level-one-safe action.
//!
//! The safepoint coordinator is a reader–writer lock: every interpreter
//! step holds a read acquisition, and a level-one-safe mutation (loader
//! changes to method sets, chunk invalidation sweeps) runs under the write
//! side, so it observes no fiber mid-instruction.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, Weak};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::fiber::{ExecutionState, Fiber, FiberFlags, FiberOutcome, PendingWake};
use crate::interpreter::Interpreter;
use crate::Runtime;

// Scheduler telemetry; inspected by tests and periodically logged.
pub static FIBERS_SPAWNED: AtomicU64 = AtomicU64::new(0);
pub static FIBER_SUSPENSIONS: AtomicU64 = AtomicU64::new(0);
pub static FIBER_PANICS: AtomicU64 = AtomicU64::new(0);
pub static SAFE_ACTIONS_RUN: AtomicU64 = AtomicU64::new(0);

pub struct SafepointCoordinator {
    lock: RwLock<()>,
}

impl SafepointCoordinator {
    pub fn new() -> SafepointCoordinator {
        SafepointCoordinator {
            lock: RwLock::new(()),
        }
    }

    /// Held for the duration of one interpreter step.
    pub fn enter_step(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().expect("safepoint lock")
    }

    /// Run `body` while no fiber is mid-instruction.
    pub fn level_one_safe<R>(&self, body: impl FnOnce() -> R) -> R {
        let _exclusive = self.lock.write().expect("safepoint lock");
        body()
    }
}

impl Default for SafepointCoordinator {
    fn default() -> SafepointCoordinator {
        SafepointCoordinator::new()
    }
}

pub type SafeAction = Box<dyn FnOnce(&Runtime) + Send>;

enum Ticket {
    RunnableFiber,
    SafeAction,
}

#[derive(Default)]
struct ReadyQueue {
    buckets: BTreeMap<u8, VecDeque<Arc<Fiber>>>,
}

impl ReadyQueue {
    fn push(&mut self, fiber: Arc<Fiber>) {
        self.buckets
            .entry(fiber.priority())
            .or_default()
            .push_back(fiber);
    }

    fn pop(&mut self) -> Option<Arc<Fiber>> {
        let (&priority, _) = self.buckets.iter().next_back()?;
        let bucket = self.buckets.get_mut(&priority)?;
        let fiber = bucket.pop_front();
        if bucket.is_empty() {
            self.buckets.remove(&priority);
        }
        fiber
    }
}

pub struct Scheduler {
    ready: Mutex<ReadyQueue>,
    safe_actions: Mutex<VecDeque<SafeAction>>,
    tickets: Sender<Ticket>,
    intake: Receiver<Ticket>,
    worker_count: usize,
}

impl Scheduler {
    pub fn new(worker_count: usize) -> Scheduler {
        let (tickets, intake) = unbounded();
        Scheduler {
            ready: Mutex::new(ReadyQueue::default()),
            safe_actions: Mutex::new(VecDeque::new()),
            tickets,
            intake,
            worker_count: worker_count.max(1),
        }
    }

    /// Spawn the worker threads. Workers hold only a weak runtime
    /// reference: dropping the runtime closes the ticket channel and the
    /// pool winds down.
    pub fn start(runtime: &Arc<Runtime>) {
        let scheduler = &runtime.scheduler;
        for worker in 0..scheduler.worker_count {
            let weak: Weak<Runtime> = Arc::downgrade(runtime);
            let intake = scheduler.intake.clone();
            std::thread::Builder::new()
                .name(format!("fiber-worker-{worker}"))
                .spawn(move || worker_loop(weak, intake))
                .expect("spawn scheduler worker");
        }
    }

    pub fn enqueue(&self, fiber: Arc<Fiber>) {
        fiber.set_flag(FiberFlags::SCHEDULED);
        self.ready.lock().expect("ready queue").push(fiber);
        let _ = self.tickets.send(Ticket::RunnableFiber);
    }

    pub fn submit_safe_action(&self, action: SafeAction) {
        self.safe_actions
            .lock()
            .expect("safe action queue")
            .push_back(action);
        let _ = self.tickets.send(Ticket::SafeAction);
    }

    fn pop_ready(&self) -> Option<Arc<Fiber>> {
        self.ready.lock().expect("ready queue").pop()
    }

    fn pop_safe_action(&self) -> Option<SafeAction> {
        self.safe_actions
            .lock()
            .expect("safe action queue")
            .pop_front()
    }
}

fn worker_loop(weak: Weak<Runtime>, intake: Receiver<Ticket>) {
    while let Ok(ticket) = intake.recv() {
        let Some(runtime) = weak.upgrade() else {
            break;
        };
        match ticket {
            Ticket::RunnableFiber => {
                if let Some(fiber) = runtime.scheduler.pop_ready() {
                    run_one(&runtime, fiber);
                }
            }
            Ticket::SafeAction => {
                if let Some(action) = runtime.scheduler.pop_safe_action() {
                    runtime.safepoint.level_one_safe(|| {
                        SAFE_ACTIONS_RUN.fetch_add(1, Ordering::Relaxed);
                    });
                    // The barrier above drained mid-instruction fibers;
                    // the action itself runs outside the write lock so it
                    // may schedule and resume fibers freely.
                    action(&runtime);
                }
            }
        }
    }
}

fn run_one(runtime: &Arc<Runtime>, fiber: Arc<Fiber>) {
    fiber.clear_flag(FiberFlags::SCHEDULED);
    fiber.set_execution_state(ExecutionState::Running);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        Interpreter::run(runtime, fiber.clone())
    }));
    match outcome {
        Ok(crate::interpreter::RunDisposition::Finished) => {}
        Ok(crate::interpreter::RunDisposition::Suspended) => {
            FIBER_SUSPENSIONS.fetch_add(1, Ordering::Relaxed);
        }
        Err(panic) => {
            FIBER_PANICS.fetch_add(1, Ordering::Relaxed);
            let message = panic
                .downcast_ref::<&str>()
                .map(|text| (*text).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            tracing::error!(
                target: "runtime.fiber",
                fiber = %fiber.name,
                message,
                "fiber panicked; terminating it"
            );
            let joiners = fiber.complete(FiberOutcome::Panicked(message));
            for joiner in joiners {
                joiner.set_pending(PendingWake::Result(core_value::scalar::nil()));
                runtime.schedule(joiner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_value::scalar;

    #[test]
    fn ready_queue_prefers_higher_priority_fifo_within() {
        let mut queue = ReadyQueue::default();
        let low_a = Fiber::new("low-a".into(), scalar::nil(), Vec::new(), 10);
        let low_b = Fiber::new("low-b".into(), scalar::nil(), Vec::new(), 10);
        let high = Fiber::new("high".into(), scalar::nil(), Vec::new(), 200);
        queue.push(low_a.clone());
        queue.push(low_b.clone());
        queue.push(high.clone());
        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &high));
        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &low_a));
        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &low_b));
        assert!(queue.pop().is_none());
    }
}
