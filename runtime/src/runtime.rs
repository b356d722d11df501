//! # Runtime
//!
//! Public front-end: builds the kernel, spawns task threads, and exposes
//! the owner-side operations (`start`, `join`, mutex and mailbox creation,
//! statistics).
//!
//! Spawned tasks are admitted immediately but the dispatch gate stays shut
//! until [`Runtime::start`], so a whole scenario can be assembled and then
//! released onto the virtual timeline at t=0 in one deterministic step.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use strata_core::{
    LockStats, MutexId, Priority, PriorityChangeHook, SchedError, SchedResult, SchedStats, Task,
    TaskId, Timestamp,
};

use crate::context::TaskContext;
use crate::kernel::{Kernel, Outcome};
use crate::mailbox::MailboxId;

/// Kernel state plus the condition variable broadcasting run-token changes.
pub(crate) struct Shared {
    kernel: Mutex<Kernel>,
    pub(crate) cv: Condvar,
}

impl Shared {
    fn new(kernel: Kernel) -> Self {
        Self {
            kernel: Mutex::new(kernel),
            cv: Condvar::new(),
        }
    }

    /// Lock the kernel. A poisoned lock means an invariant violation
    /// already brought a task thread down; escalate rather than limp on.
    pub(crate) fn lock_kernel(&self) -> MutexGuard<'_, Kernel> {
        self.kernel
            .lock()
            .expect("kernel state poisoned by an earlier fault")
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Configures and builds a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    hook: Option<PriorityChangeHook>,
}

impl RuntimeBuilder {
    /// Start with default configuration.
    pub fn new() -> Self {
        Self { hook: None }
    }

    /// Observe every effective-priority change as `(task, old, new)`.
    /// Useful for asserting boost and restore events in tests.
    pub fn on_priority_change<F>(mut self, hook: F) -> Self
    where
        F: FnMut(TaskId, Priority, Priority) + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Build the runtime. No task runs until [`Runtime::start`].
    pub fn build(self) -> Runtime {
        let mut kernel = Kernel::new();
        if let Some(hook) = self.hook {
            kernel.sched.set_priority_hook(hook);
        }
        Runtime {
            shared: Arc::new(Shared::new(kernel)),
            handles: Mutex::new(HashMap::new()),
        }
    }
}

// =============================================================================
// RUNTIME
// =============================================================================

/// The execution engine. Owns the kernel and one OS thread per task.
pub struct Runtime {
    shared: Arc<Shared>,
    handles: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl Runtime {
    /// A runtime with default configuration.
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Create a task with a fixed base priority and spawn its thread. The
    /// task is admitted at once but executes nothing until [`Runtime::start`].
    pub fn spawn<F>(&self, name: &str, priority: Priority, body: F) -> TaskId
    where
        F: FnOnce(&mut TaskContext) + Send + 'static,
    {
        let id = {
            let mut kernel = self.shared.lock_kernel();
            let id = kernel.alloc_task_id();
            kernel.admit(Task::new(id, name, priority));
            id
        };
        self.shared.cv.notify_all();

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut ctx = TaskContext::new(Arc::clone(&shared), id);
                ctx.wait_until_scheduled();
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut ctx))) {
                    Ok(()) => Outcome::Completed,
                    Err(_) => {
                        log::error!(target: "strata", "task {id} panicked");
                        Outcome::Panicked
                    },
                };

                // The body may have returned while preempted; retire the
                // task only once it holds the run token again.
                let mut kernel = shared.lock_kernel();
                while kernel.sched.running() != Some(id) {
                    kernel = shared
                        .cv
                        .wait(kernel)
                        .expect("kernel state poisoned by an earlier fault");
                }
                kernel.finish(id, outcome);
                drop(kernel);
                shared.cv.notify_all();
            })
            .expect("failed to spawn task thread");

        self.handles
            .lock()
            .expect("handle table poisoned")
            .insert(id, handle);
        id
    }

    /// Open the dispatch gate: the highest-priority spawned task starts
    /// running at virtual t=0.
    pub fn start(&self) {
        {
            let mut kernel = self.shared.lock_kernel();
            kernel.start();
        }
        self.shared.cv.notify_all();
    }

    /// Wait for a task to finish, reap it, and report its outcome.
    ///
    /// Returns [`SchedError::Panicked`] if the body panicked and
    /// [`SchedError::UnknownTask`] if the id was never spawned or was
    /// already joined.
    pub fn join(&self, task: TaskId) -> SchedResult<()> {
        let outcome = {
            let mut kernel = self.shared.lock_kernel();
            loop {
                if let Some(outcome) = kernel.take_outcome(task) {
                    break outcome;
                }
                if kernel.sched.task(task).is_none() {
                    return Err(SchedError::UnknownTask(task));
                }
                kernel = self
                    .shared
                    .cv
                    .wait(kernel)
                    .expect("kernel state poisoned by an earlier fault");
            }
        };

        if let Some(handle) = self
            .handles
            .lock()
            .expect("handle table poisoned")
            .remove(&task)
        {
            // The body panic was already caught; the thread itself exits
            // cleanly either way.
            let _ = handle.join();
        }

        match outcome {
            Outcome::Completed => Ok(()),
            Outcome::Panicked => Err(SchedError::Panicked(task)),
        }
    }

    /// Allocate a fresh priority-inheritance mutex.
    pub fn mutex(&self) -> MutexId {
        self.shared.lock_kernel().locks.create()
    }

    /// Allocate a bounded mailbox.
    pub fn mailbox(&self, capacity: usize) -> MailboxId {
        self.shared.lock_kernel().mailbox_create(capacity)
    }

    /// Close a mailbox, waking parked receivers with `Closed`.
    pub fn close_mailbox(&self, mailbox: MailboxId) {
        {
            let mut kernel = self.shared.lock_kernel();
            kernel.mailbox_close(mailbox);
        }
        self.shared.cv.notify_all();
    }

    /// Current virtual time.
    pub fn now(&self) -> Timestamp {
        self.shared.lock_kernel().now()
    }

    /// Dispatch counters.
    pub fn sched_stats(&self) -> SchedStats {
        self.shared.lock_kernel().sched.stats()
    }

    /// Lock-protocol counters.
    pub fn lock_stats(&self) -> LockStats {
        self.shared.lock_kernel().locks.stats()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
