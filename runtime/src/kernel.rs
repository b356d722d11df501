//! # Kernel
//!
//! The single scheduler-level synchronization point: the core `Scheduler`
//! and `LockTable`, the virtual clock, the sleep queue and task outcomes,
//! all mutated under one `std::sync::Mutex` owned by the runtime.
//!
//! Every method that can vacate the running slot ends by calling
//! [`Kernel::reschedule`], so the run token is never left dangling: by the
//! time the kernel lock is released, either a task is running or the system
//! is genuinely idle.
//!
//! The clock only moves here. A running task advances it through
//! [`Kernel::burn`] and the sleep queue; when nothing is runnable but
//! sleepers exist, `reschedule` fast-forwards straight to the next
//! deadline. Simulated scenarios therefore complete in microseconds of
//! real time while keeping every ordering decision deterministic.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use strata_core::{
    Acquired, BlockReason, Duration, LockTable, MutexId, SchedResult, Scheduler, Task, TaskId,
    TaskState, Timestamp,
};

use crate::mailbox::MailboxTable;

/// How a task body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The body returned normally.
    Completed,
    /// The body panicked; reported to `join` as an error.
    Panicked,
}

/// Result of one simulated CPU burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Burn {
    /// The full duration was burned; the task is still running.
    Complete,
    /// A wakeup preempted the task mid-burn; this much work is left.
    Preempted(Duration),
}

/// Pending timer wakeup. Ordered by deadline, then by enqueue sequence so
/// that simultaneous deadlines wake in sleep order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SleepEntry {
    deadline: Timestamp,
    seq: u64,
    task: TaskId,
}

pub(crate) struct Kernel {
    pub(crate) sched: Scheduler,
    pub(crate) locks: LockTable,
    pub(crate) mail: MailboxTable,
    now: Timestamp,
    sleepers: BinaryHeap<Reverse<SleepEntry>>,
    sleep_seq: u64,
    next_task: TaskId,
    /// Dispatch is held back until `start`, so tasks spawned up front all
    /// enter the timeline at t=0 regardless of thread startup order.
    started: bool,
    outcomes: HashMap<TaskId, Outcome>,
}

impl Kernel {
    pub(crate) fn new() -> Self {
        Self {
            sched: Scheduler::new(),
            locks: LockTable::new(),
            mail: MailboxTable::new(),
            now: Timestamp::ZERO,
            sleepers: BinaryHeap::new(),
            sleep_seq: 0,
            next_task: 1,
            started: false,
            outcomes: HashMap::new(),
        }
    }

    /// Current virtual time.
    pub(crate) fn now(&self) -> Timestamp {
        self.now
    }

    pub(crate) fn alloc_task_id(&mut self) -> TaskId {
        let id = self.next_task;
        self.next_task += 1;
        id
    }

    /// Admit a task and, once started, give it a chance to run.
    pub(crate) fn admit(&mut self, task: Task) {
        self.sched.admit(task);
        self.reschedule();
    }

    /// Open the dispatch gate and seat the first task.
    pub(crate) fn start(&mut self) {
        if !self.started {
            self.started = true;
            log::debug!(target: "strata", "runtime started with {} task(s)", self.sched.task_count());
            self.reschedule();
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch loop
    // -------------------------------------------------------------------------

    /// Fill the running slot if it is vacant, fast-forwarding the clock over
    /// idle gaps to the next timer deadline.
    pub(crate) fn reschedule(&mut self) {
        if !self.started {
            return;
        }
        loop {
            if self.sched.running().is_some() {
                return;
            }
            if self.sched.dispatch().is_some() {
                return;
            }

            // Nothing runnable. Jump to the next deadline if one exists.
            let next_deadline = self.sleepers.peek().map(|Reverse(e)| e.deadline);
            match next_deadline {
                Some(deadline) => {
                    if deadline > self.now {
                        log::trace!(
                            target: "strata",
                            "idle: fast-forward {} -> {deadline}",
                            self.now
                        );
                        self.now = deadline;
                    }
                    self.wake_due();
                },
                None => {
                    let stuck = self
                        .sched
                        .tasks()
                        .filter(|t| matches!(t.state, TaskState::Blocked(_)))
                        .count();
                    if stuck > 0 {
                        log::warn!(
                            target: "strata",
                            "no runnable task and no pending timer; {stuck} task(s) blocked indefinitely"
                        );
                    }
                    return;
                },
            }
        }
    }

    fn wake_due(&mut self) {
        loop {
            let due = matches!(self.sleepers.peek(), Some(Reverse(e)) if e.deadline <= self.now);
            if !due {
                return;
            }
            if let Some(Reverse(entry)) = self.sleepers.pop() {
                log::trace!(target: "strata", "timer fires for task {} at {}", entry.task, self.now);
                self.sched.unblock(entry.task);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Time
    // -------------------------------------------------------------------------

    /// Put the running task to sleep until `deadline`. Returns `false` (and
    /// does nothing) if the deadline has already passed.
    pub(crate) fn sleep_until(&mut self, task: TaskId, deadline: Timestamp) -> bool {
        if deadline <= self.now {
            return false;
        }
        log::trace!(target: "strata", "task {task} sleeps until {deadline}");
        self.sched.block(task, BlockReason::Timer);
        self.sleep_seq += 1;
        self.sleepers.push(Reverse(SleepEntry {
            deadline,
            seq: self.sleep_seq,
            task,
        }));
        self.reschedule();
        true
    }

    /// Burn simulated CPU on behalf of the running task, advancing the
    /// clock in slices bounded by timer deadlines. Tasks woken mid-burn may
    /// preempt; the caller then resumes the remainder once rescheduled.
    pub(crate) fn burn(&mut self, task: TaskId, duration: Duration) -> Burn {
        let mut remaining = duration;
        loop {
            self.wake_due();
            if self.sched.running() != Some(task) {
                self.reschedule();
                return Burn::Preempted(remaining);
            }
            if remaining.is_zero() {
                return Burn::Complete;
            }
            let slice = match self.sleepers.peek() {
                Some(Reverse(e)) if e.deadline < self.now + remaining => e.deadline - self.now,
                _ => remaining,
            };
            self.now += slice;
            remaining = remaining - slice;
        }
    }

    // -------------------------------------------------------------------------
    // Locks
    // -------------------------------------------------------------------------

    pub(crate) fn lock_acquire(&mut self, task: TaskId, mutex: MutexId) -> SchedResult<Acquired> {
        let outcome = self.locks.acquire(&mut self.sched, task, mutex);
        self.reschedule();
        outcome
    }

    pub(crate) fn lock_release(
        &mut self,
        task: TaskId,
        mutex: MutexId,
    ) -> SchedResult<Option<TaskId>> {
        let woken = self.locks.release(&mut self.sched, task, mutex)?;
        self.reschedule();
        Ok(woken)
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    pub(crate) fn yield_now(&mut self, task: TaskId) {
        self.sched.yield_now(task);
        self.reschedule();
    }

    /// Record the body outcome and retire the running task.
    pub(crate) fn finish(&mut self, task: TaskId, outcome: Outcome) {
        self.sched.finish(task);
        self.outcomes.insert(task, outcome);
        self.reschedule();
    }

    /// Consume a finished task's outcome and reap its record. `None` while
    /// the task is still live.
    pub(crate) fn take_outcome(&mut self, task: TaskId) -> Option<Outcome> {
        let outcome = self.outcomes.remove(&task)?;
        self.sched.reap(task);
        Some(outcome)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_with(tasks: &[(TaskId, u8)]) -> Kernel {
        let mut k = Kernel::new();
        for &(id, prio) in tasks {
            k.admit(Task::new(id, &format!("task{id}"), prio));
        }
        k.start();
        k
    }

    #[test]
    fn test_idle_fast_forwards_to_next_deadline() {
        let mut k = kernel_with(&[(1, 30)]);
        assert_eq!(k.sched.running(), Some(1));

        assert!(k.sleep_until(1, Timestamp::from_millis(100)));
        // Nothing else to run: the clock jumps and the sleeper resumes.
        assert_eq!(k.now(), Timestamp::from_millis(100));
        assert_eq!(k.sched.running(), Some(1));
    }

    #[test]
    fn test_sleep_with_past_deadline_is_noop() {
        let mut k = kernel_with(&[(1, 30)]);
        assert!(!k.sleep_until(1, Timestamp::ZERO));
        assert_eq!(k.sched.running(), Some(1));
        assert_eq!(k.now(), Timestamp::ZERO);
    }

    #[test]
    fn test_burn_uninterrupted() {
        let mut k = kernel_with(&[(1, 30)]);
        assert_eq!(k.burn(1, Duration::from_millis(50)), Burn::Complete);
        assert_eq!(k.now(), Timestamp::from_millis(50));
        assert_eq!(k.sched.running(), Some(1));
    }

    #[test]
    fn test_burn_preempted_by_waking_sleeper() {
        let mut k = kernel_with(&[(1, 50), (2, 10)]);
        assert_eq!(k.sched.running(), Some(1));
        assert!(k.sleep_until(1, Timestamp::from_millis(100)));
        assert_eq!(k.sched.running(), Some(2));

        // The low task burns across the high task's wakeup and loses the
        // core with the remainder intact.
        assert_eq!(
            k.burn(2, Duration::from_millis(150)),
            Burn::Preempted(Duration::from_millis(50))
        );
        assert_eq!(k.now(), Timestamp::from_millis(100));
        assert_eq!(k.sched.running(), Some(1));
    }

    #[test]
    fn test_simultaneous_deadlines_wake_in_sleep_order() {
        let mut k = kernel_with(&[(1, 20), (2, 20)]);
        assert_eq!(k.sched.running(), Some(1));
        assert!(k.sleep_until(1, Timestamp::from_millis(50)));
        assert_eq!(k.sched.running(), Some(2));
        assert!(k.sleep_until(2, Timestamp::from_millis(50)));

        // Both wake at t=50; task 1 slept first and runs first.
        assert_eq!(k.now(), Timestamp::from_millis(50));
        assert_eq!(k.sched.running(), Some(1));
    }

    #[test]
    fn test_finish_records_outcome_and_reaps() {
        let mut k = kernel_with(&[(1, 30)]);
        assert_eq!(k.take_outcome(1), None);

        k.finish(1, Outcome::Completed);
        assert_eq!(k.take_outcome(1), Some(Outcome::Completed));
        assert_eq!(k.sched.task_count(), 0);
        assert_eq!(k.take_outcome(1), None);
    }

    #[test]
    fn test_lock_roundtrip_through_kernel() {
        let mut k = kernel_with(&[(1, 10), (2, 50)]);
        let m = k.locks.create();

        // High runs first and takes the lock, then sleeps holding it.
        assert_eq!(k.sched.running(), Some(2));
        assert_eq!(k.lock_acquire(2, m), Ok(Acquired::Owned));
        assert!(k.sleep_until(2, Timestamp::from_millis(10)));

        // Low contends; the wakeup at t=10 hands the core straight back.
        assert_eq!(k.sched.running(), Some(1));
        assert_eq!(k.lock_acquire(1, m), Ok(Acquired::Queued));
        assert_eq!(k.now(), Timestamp::from_millis(10));
        assert_eq!(k.sched.running(), Some(2));

        assert_eq!(k.lock_release(2, m), Ok(Some(1)));
        assert_eq!(k.locks.mutex(m).and_then(|l| l.owner()), Some(1));
    }
}
