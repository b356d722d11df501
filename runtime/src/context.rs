//! # Task Context
//!
//! The handle a task body uses to talk to the kernel. Every operation is a
//! scheduling checkpoint: it first waits until the kernel has this task in
//! the running slot (the run token), performs its effect under the kernel
//! lock, then notifies the other task threads if the token moved.
//!
//! Between checkpoints a body is free to run arbitrary code; on the virtual
//! timeline that code is instantaneous. Simulated CPU cost is expressed
//! explicitly through [`TaskContext::work`].

use std::sync::{Arc, MutexGuard};

use strata_core::{Acquired, ChannelError, Duration, MutexId, SchedResult, TaskId, Timestamp};

use crate::kernel::{Burn, Kernel};
use crate::mailbox::MailboxId;
use crate::runtime::Shared;

/// Per-task handle passed to the body closure.
pub struct TaskContext {
    shared: Arc<Shared>,
    id: TaskId,
}

impl TaskContext {
    pub(crate) fn new(shared: Arc<Shared>, id: TaskId) -> Self {
        Self { shared, id }
    }

    /// This task's id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current virtual time. Waits for the run token, so the value is the
    /// deterministic instant at which this task observes the clock.
    pub fn now(&self) -> Timestamp {
        let guard = self.wait_running(self.shared.lock_kernel());
        guard.now()
    }

    // -------------------------------------------------------------------------
    // Locks
    // -------------------------------------------------------------------------

    /// Acquire a priority-inheritance mutex, blocking until ownership is
    /// handed over if it is currently held.
    pub fn acquire(&mut self, mutex: MutexId) -> SchedResult<()> {
        let mut guard = self.wait_running(self.shared.lock_kernel());
        match guard.lock_acquire(self.id, mutex)? {
            Acquired::Owned => Ok(()),
            Acquired::Queued => {
                // Blocked: pass the token on and wait for the hand-off.
                drop(guard);
                self.shared.cv.notify_all();
                self.wait_until_scheduled();
                Ok(())
            },
        }
    }

    /// Release a mutex owned by this task. If the hand-off wakes a more
    /// urgent waiter, this task is preempted before the call returns.
    pub fn release(&mut self, mutex: MutexId) -> SchedResult<()> {
        let mut guard = self.wait_running(self.shared.lock_kernel());
        guard.lock_release(self.id, mutex)?;
        drop(guard);
        self.shared.cv.notify_all();
        self.wait_until_scheduled();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Time
    // -------------------------------------------------------------------------

    /// Consume `duration` of simulated CPU. Higher-priority wakeups preempt
    /// mid-burn; the remainder is resumed when this task is rescheduled.
    pub fn work(&mut self, duration: Duration) {
        let mut remaining = duration;
        loop {
            let mut guard = self.wait_running(self.shared.lock_kernel());
            match guard.burn(self.id, remaining) {
                Burn::Complete => return,
                Burn::Preempted(rest) => {
                    remaining = rest;
                    drop(guard);
                    self.shared.cv.notify_all();
                },
            }
        }
    }

    /// Sleep for `duration` of virtual time.
    pub fn sleep(&mut self, duration: Duration) {
        let mut guard = self.wait_running(self.shared.lock_kernel());
        let deadline = guard.now() + duration;
        if guard.sleep_until(self.id, deadline) {
            drop(guard);
            self.shared.cv.notify_all();
            self.wait_until_scheduled();
        }
    }

    /// Sleep until an absolute deadline. Past deadlines return immediately.
    pub fn sleep_until(&mut self, deadline: Timestamp) {
        let mut guard = self.wait_running(self.shared.lock_kernel());
        if guard.sleep_until(self.id, deadline) {
            drop(guard);
            self.shared.cv.notify_all();
            self.wait_until_scheduled();
        }
    }

    /// Surrender the core to equal-priority peers.
    pub fn yield_now(&mut self) {
        let mut guard = self.wait_running(self.shared.lock_kernel());
        guard.yield_now(self.id);
        drop(guard);
        self.shared.cv.notify_all();
        self.wait_until_scheduled();
    }

    // -------------------------------------------------------------------------
    // Mailboxes
    // -------------------------------------------------------------------------

    /// Deposit a message without blocking. A full buffer is an error.
    pub fn send(&mut self, mailbox: MailboxId, msg: Vec<u8>) -> Result<(), ChannelError> {
        let mut guard = self.wait_running(self.shared.lock_kernel());
        guard.mailbox_send(mailbox, msg)?;
        drop(guard);
        // The woken receiver may have preempted us.
        self.shared.cv.notify_all();
        self.wait_until_scheduled();
        Ok(())
    }

    /// Receive a message, blocking until one is deposited or the mailbox is
    /// closed.
    pub fn recv(&mut self, mailbox: MailboxId) -> Result<Vec<u8>, ChannelError> {
        loop {
            let mut guard = self.wait_running(self.shared.lock_kernel());
            match guard.mailbox_try_recv(self.id, mailbox)? {
                Some(msg) => return Ok(msg),
                None => {
                    drop(guard);
                    self.shared.cv.notify_all();
                },
            }
        }
    }

    // -------------------------------------------------------------------------
    // Token plumbing
    // -------------------------------------------------------------------------

    fn wait_running<'a>(&self, mut guard: MutexGuard<'a, Kernel>) -> MutexGuard<'a, Kernel> {
        while guard.sched.running() != Some(self.id) {
            guard = self
                .shared
                .cv
                .wait(guard)
                .expect("kernel state poisoned by an earlier fault");
        }
        guard
    }

    /// Park the calling thread until the kernel schedules this task.
    pub(crate) fn wait_until_scheduled(&self) {
        let guard = self.shared.lock_kernel();
        let _guard = self.wait_running(guard);
    }
}
