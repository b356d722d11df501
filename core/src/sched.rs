//! # Scheduler
//!
//! Strict-priority preemptive dispatch over a single logical core. The
//! scheduler owns every task record and the ready structure; the lock table
//! drives it through `block`/`unblock`/`set_priority` when contention
//! changes a task's standing.
//!
//! ## Dispatch rules
//!
//! 1. The highest effective priority always wins; ties are FIFO by arrival
//!    within a level. Deterministic - no randomness, no fairness aging.
//!    Starvation of lower levels is an accepted, documented trade-off.
//! 2. A strictly higher-priority admission or unblock preempts immediately:
//!    the running task is re-queued at the *front* of its own level so it
//!    resumes first among equals.
//! 3. A task that was blocked re-enters at the *tail* of its level - it does
//!    not jump ahead of tasks that stayed ready.
//! 4. A priority raise caused by inheritance places the task at the front of
//!    its new level ([`Placement::Inherit`]); every other move appends.
//!
//! Operating on a task in the wrong state is scheduler corruption and trips
//! the fatal invariant machinery rather than returning an error.

use alloc::boxed::Box;
use alloc::format;

use hashbrown::HashMap;
use static_assertions::assert_impl_all;

use crate::error::invariant_violation;
use crate::queue::ReadyQueue;
use crate::task::{BlockReason, Priority, Task, TaskId, TaskState};

/// Observability callback fired on every effective-priority change.
///
/// Arguments are `(task, old, new)`. Used by tests and logging to assert
/// boost/restore events without coupling the kernel to a logging mechanism.
pub type PriorityChangeHook = Box<dyn FnMut(TaskId, Priority, Priority) + Send>;

// =============================================================================
// PLACEMENT
// =============================================================================

/// Where a task lands within its destination level on a priority change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Append at the tail, preserving arrival order (default; always used
    /// for restores).
    Tail,
    /// Inherited boost: treat as a fresh, highest-urgency arrival - place at
    /// the front of the new level and preempt immediately if it now exceeds
    /// the running task.
    Inherit,
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Aggregate dispatch counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedStats {
    /// Tasks dispatched onto the logical core.
    pub context_switches: u64,
    /// Running tasks displaced by a higher-priority arrival or unblock.
    pub preemptions: u64,
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// The central scheduler state: all task records, the ready structure, and
/// the single running slot.
pub struct Scheduler {
    /// All live tasks, keyed by id.
    tasks: HashMap<TaskId, Task>,

    /// Runnable tasks not currently running.
    ready: ReadyQueue,

    /// The task holding the logical core, if any.
    running: Option<TaskId>,

    /// Set whenever the running slot is vacated; cleared by `dispatch`.
    needs_resched: bool,

    /// Monotonic admission stamp source.
    next_arrival: u64,

    /// Optional priority-change observability hook.
    hook: Option<PriorityChangeHook>,

    /// Dispatch counters.
    stats: SchedStats,
}

assert_impl_all!(Scheduler: Send);

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            ready: ReadyQueue::new(),
            running: None,
            needs_resched: false,
            next_arrival: 0,
            hook: None,
            stats: SchedStats::default(),
        }
    }

    /// Install the priority-change observability hook.
    pub fn set_priority_hook(&mut self, hook: PriorityChangeHook) {
        self.hook = Some(hook);
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Look up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// The currently running task, if any.
    pub fn running(&self) -> Option<TaskId> {
        self.running
    }

    /// Whether the running slot was vacated since the last dispatch.
    pub fn needs_resched(&self) -> bool {
        self.needs_resched
    }

    /// Number of live (unreaped) tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of queued ready tasks.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Iterate over all live task records.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Dispatch counters.
    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    /// A task's current effective priority. Fatal if the id is unknown.
    pub fn effective(&self, id: TaskId) -> Priority {
        self.must(id).effective_priority
    }

    fn must(&self, id: TaskId) -> &Task {
        match self.tasks.get(&id) {
            Some(t) => t,
            None => invariant_violation(&format!("operation on unknown task {id}")),
        }
    }

    pub(crate) fn must_mut(&mut self, id: TaskId) -> &mut Task {
        match self.tasks.get_mut(&id) {
            Some(t) => t,
            None => invariant_violation(&format!("operation on unknown task {id}")),
        }
    }

    // -------------------------------------------------------------------------
    // Admission and completion
    // -------------------------------------------------------------------------

    /// Insert a new task into the ready set at its effective priority.
    ///
    /// Preempts the running task if the newcomer's effective priority is
    /// strictly higher.
    pub fn admit(&mut self, mut task: Task) {
        invariant!(
            !self.tasks.contains_key(&task.id),
            "duplicate admission of task {}",
            task.id
        );
        invariant!(
            task.state == TaskState::Ready,
            "admission of task {} in state {:?}",
            task.id,
            task.state
        );

        task.arrival = self.next_arrival;
        self.next_arrival += 1;

        let id = task.id;
        let priority = task.effective_priority;
        log::trace!(target: "strata", "admit task {id} '{}' at level {priority}", task.name);

        self.tasks.insert(id, task);
        self.ready.push_back(priority, id);
        self.maybe_preempt(id);
    }

    /// Mark the running task finished and vacate the core.
    ///
    /// A task must release every lock it owns before finishing: waiters on a
    /// lock owned by a finished task would be stranded forever.
    pub fn finish(&mut self, id: TaskId) {
        invariant!(
            self.running == Some(id),
            "finish from task {id} which is not running"
        );
        let held = self.must(id).held_locks.len();
        invariant!(held == 0, "task {id} finished while holding {held} lock(s)");

        log::trace!(target: "strata", "task {id} finished");
        self.must_mut(id).state = TaskState::Finished;
        self.running = None;
        self.needs_resched = true;
    }

    /// Remove a finished task's record. Only the task's owner reaps it.
    pub fn reap(&mut self, id: TaskId) -> Task {
        invariant!(
            self.must(id).state == TaskState::Finished,
            "reap of unfinished task {id}"
        );
        match self.tasks.remove(&id) {
            Some(t) => t,
            None => invariant_violation(&format!("reap of unknown task {id}")),
        }
    }

    // -------------------------------------------------------------------------
    // Blocking
    // -------------------------------------------------------------------------

    /// Remove a running or ready task from scheduling consideration.
    pub fn block(&mut self, id: TaskId, reason: BlockReason) {
        let (priority, state) = {
            let t = self.must(id);
            (t.effective_priority, t.state)
        };

        match state {
            TaskState::Running => {
                invariant!(
                    self.running == Some(id),
                    "running task {id} not in the running slot"
                );
                self.running = None;
                self.needs_resched = true;
            },
            TaskState::Ready => {
                invariant!(
                    self.ready.remove(priority, id),
                    "ready task {id} missing from level {priority}"
                );
            },
            _ => invariant_violation(&format!("block of task {id} in state {state:?}")),
        }

        log::trace!(target: "strata", "block task {id} ({reason:?})");
        self.must_mut(id).state = TaskState::Blocked(reason);
    }

    /// Reverse a `block`: reinsert at the tail of the task's priority level.
    ///
    /// Preempts the running task if the woken task's effective priority is
    /// strictly higher.
    pub fn unblock(&mut self, id: TaskId) {
        let (priority, state) = {
            let t = self.must(id);
            (t.effective_priority, t.state)
        };
        invariant!(
            matches!(state, TaskState::Blocked(_)),
            "unblock of task {id} in state {state:?}"
        );

        log::trace!(target: "strata", "unblock task {id} at level {priority}");
        self.must_mut(id).state = TaskState::Ready;
        self.ready.push_back(priority, id);
        self.maybe_preempt(id);
    }

    /// Voluntarily surrender the core: the running task moves to the tail of
    /// its own level, letting equal-priority peers run first.
    pub fn yield_now(&mut self, id: TaskId) {
        invariant!(
            self.running == Some(id),
            "yield from task {id} which is not running"
        );
        let priority = self.effective(id);
        self.must_mut(id).state = TaskState::Ready;
        self.ready.push_back(priority, id);
        self.running = None;
        self.needs_resched = true;
        log::trace!(target: "strata", "task {id} yields at level {priority}");
    }

    // -------------------------------------------------------------------------
    // Priority changes
    // -------------------------------------------------------------------------

    /// Move a task to a new effective priority.
    ///
    /// Ready tasks are re-queued per `placement`. A running task that lowers
    /// itself below the best ready task vacates the core. Blocked tasks only
    /// have the field updated - their queue position is decided when they
    /// wake.
    pub fn set_priority(&mut self, id: TaskId, new: Priority, placement: Placement) {
        let (old, state) = {
            let t = self.must(id);
            (t.effective_priority, t.state)
        };
        if old == new {
            return;
        }

        if let Some(hook) = self.hook.as_mut() {
            hook(id, old, new);
        }
        log::debug!(target: "strata", "task {id} priority {old} -> {new} ({placement:?})");
        self.must_mut(id).effective_priority = new;

        match state {
            TaskState::Ready => {
                invariant!(
                    self.ready.remove(old, id),
                    "ready task {id} missing from level {old}"
                );
                match placement {
                    Placement::Inherit => self.ready.push_front(new, id),
                    Placement::Tail => self.ready.push_back(new, id),
                }
                if new > old {
                    self.maybe_preempt(id);
                }
            },
            TaskState::Running => {
                invariant!(
                    self.running == Some(id),
                    "running task {id} not in the running slot"
                );
                if new < old {
                    if let Some(top) = self.ready.highest_level() {
                        if top > new {
                            // No longer the most urgent runnable task.
                            self.running = None;
                            self.must_mut(id).state = TaskState::Ready;
                            self.ready.push_back(new, id);
                            self.needs_resched = true;
                        }
                    }
                }
            },
            TaskState::Blocked(_) => {},
            TaskState::Finished => {
                invariant_violation(&format!("priority change on finished task {id}"))
            },
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Seat the highest-priority ready task on the vacant core.
    ///
    /// Returns the dispatched task, or `None` if nothing is runnable.
    pub fn dispatch(&mut self) -> Option<TaskId> {
        invariant!(
            self.running.is_none(),
            "dispatch while task {:?} still running",
            self.running
        );

        let (id, priority) = match self.ready.pop_highest() {
            Some(next) => next,
            None => {
                self.needs_resched = false;
                return None;
            },
        };

        let t = self.must_mut(id);
        invariant!(
            t.state == TaskState::Ready,
            "dispatch of task {id} in state {:?}",
            t.state
        );
        t.state = TaskState::Running;
        self.running = Some(id);
        self.needs_resched = false;
        self.stats.context_switches += 1;
        log::trace!(target: "strata", "dispatch task {id} at level {priority}");
        Some(id)
    }

    /// Preempt the running task if `candidate` (which must be ready and
    /// queued) strictly exceeds it. The displaced task resumes first among
    /// equals at its own level.
    fn maybe_preempt(&mut self, candidate: TaskId) {
        match self.running {
            None => self.needs_resched = true,
            Some(current) => {
                let challenger = self.effective(candidate);
                let incumbent = self.effective(current);
                if challenger > incumbent {
                    log::trace!(
                        target: "strata",
                        "task {candidate} (level {challenger}) preempts task {current} (level {incumbent})"
                    );
                    self.must_mut(current).state = TaskState::Ready;
                    self.ready.push_front(incumbent, current);
                    self.running = None;
                    self.needs_resched = true;
                    self.stats.preemptions += 1;
                }
            },
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    fn sched_with(tasks: &[(TaskId, Priority)]) -> Scheduler {
        let mut s = Scheduler::new();
        for &(id, prio) in tasks {
            s.admit(Task::new(id, &std::format!("task{id}"), prio));
        }
        s
    }

    #[test]
    fn test_dispatch_highest_priority_first() {
        let mut s = sched_with(&[(1, 10), (2, 50), (3, 30)]);
        assert_eq!(s.dispatch(), Some(2));
        assert_eq!(s.running(), Some(2));
        s.finish(2);
        assert_eq!(s.dispatch(), Some(3));
        s.finish(3);
        assert_eq!(s.dispatch(), Some(1));
    }

    #[test]
    fn test_fifo_within_level() {
        let mut s = sched_with(&[(1, 30), (2, 30), (3, 30)]);
        assert_eq!(s.dispatch(), Some(1));
        s.finish(1);
        assert_eq!(s.dispatch(), Some(2));
        s.finish(2);
        assert_eq!(s.dispatch(), Some(3));
    }

    #[test]
    fn test_admission_preempts_running() {
        let mut s = sched_with(&[(1, 10)]);
        assert_eq!(s.dispatch(), Some(1));

        s.admit(Task::new(2, "high", 50));
        assert_eq!(s.running(), None);
        assert!(s.needs_resched());
        assert_eq!(s.dispatch(), Some(2));
        assert_eq!(s.stats().preemptions, 1);
    }

    #[test]
    fn test_preempted_task_resumes_first_among_equals() {
        let mut s = sched_with(&[(1, 10), (2, 10)]);
        assert_eq!(s.dispatch(), Some(1));

        // Task 1 is displaced mid-run; it must come back before task 2.
        s.admit(Task::new(3, "high", 50));
        assert_eq!(s.dispatch(), Some(3));
        s.finish(3);
        assert_eq!(s.dispatch(), Some(1));
        s.finish(1);
        assert_eq!(s.dispatch(), Some(2));
    }

    #[test]
    fn test_equal_priority_does_not_preempt() {
        let mut s = sched_with(&[(1, 30)]);
        assert_eq!(s.dispatch(), Some(1));
        s.admit(Task::new(2, "peer", 30));
        assert_eq!(s.running(), Some(1));
    }

    #[test]
    fn test_unblock_enters_at_tail() {
        let mut s = sched_with(&[(1, 10), (2, 10)]);
        assert_eq!(s.dispatch(), Some(1));

        s.block(2, BlockReason::Timer);
        s.admit(Task::new(3, "peer", 10));
        s.unblock(2);

        // Task 2 was blocked; it does not jump ahead of task 3 which stayed
        // ready at the same level.
        s.finish(1);
        assert_eq!(s.dispatch(), Some(3));
        s.finish(3);
        assert_eq!(s.dispatch(), Some(2));
    }

    #[test]
    fn test_block_running_vacates_core() {
        let mut s = sched_with(&[(1, 30), (2, 10)]);
        assert_eq!(s.dispatch(), Some(1));
        s.block(1, BlockReason::Lock(7));
        assert_eq!(s.running(), None);
        assert_eq!(s.dispatch(), Some(2));
        assert_eq!(s.task(1).map(|t| t.state), Some(TaskState::Blocked(BlockReason::Lock(7))));
    }

    #[test]
    fn test_inherit_placement_jumps_level_queue() {
        let mut s = sched_with(&[(1, 50), (2, 50), (3, 10)]);
        assert_eq!(s.dispatch(), Some(1));

        // Boost task 3 into level 50: Inherit places it ahead of task 2,
        // which arrived at that level long before.
        s.set_priority(3, 50, Placement::Inherit);
        s.finish(1);
        assert_eq!(s.dispatch(), Some(3));
        s.finish(3);
        assert_eq!(s.dispatch(), Some(2));
    }

    #[test]
    fn test_tail_placement_preserves_arrival_order() {
        let mut s = sched_with(&[(1, 50), (2, 50), (3, 10)]);
        assert_eq!(s.dispatch(), Some(1));

        s.set_priority(3, 50, Placement::Tail);
        s.finish(1);
        assert_eq!(s.dispatch(), Some(2));
        s.finish(2);
        assert_eq!(s.dispatch(), Some(3));
    }

    #[test]
    fn test_boost_preempts_running() {
        let mut s = sched_with(&[(1, 30), (2, 10)]);
        assert_eq!(s.dispatch(), Some(1));

        s.set_priority(2, 50, Placement::Inherit);
        assert_eq!(s.running(), None);
        assert_eq!(s.dispatch(), Some(2));

        // Task 1 resumes at the front of level 30 afterwards.
        s.finish(2);
        assert_eq!(s.dispatch(), Some(1));
    }

    #[test]
    fn test_running_task_lowering_itself_yields() {
        let mut s = sched_with(&[(1, 50), (2, 30)]);
        assert_eq!(s.dispatch(), Some(1));

        s.set_priority(1, 10, Placement::Tail);
        assert_eq!(s.running(), None);
        assert_eq!(s.dispatch(), Some(2));
        s.finish(2);
        assert_eq!(s.dispatch(), Some(1));
    }

    #[test]
    fn test_running_task_lowering_above_ready_keeps_core() {
        let mut s = sched_with(&[(1, 50), (2, 10)]);
        assert_eq!(s.dispatch(), Some(1));
        s.set_priority(1, 30, Placement::Tail);
        assert_eq!(s.running(), Some(1));
    }

    #[test]
    fn test_priority_hook_observes_changes() {
        let events: Arc<Mutex<Vec<(TaskId, Priority, Priority)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let mut s = sched_with(&[(1, 10)]);
        s.set_priority_hook(Box::new(move |id, old, new| {
            sink.lock().expect("events").push((id, old, new));
        }));
        assert_eq!(s.dispatch(), Some(1));

        s.set_priority(1, 50, Placement::Inherit);
        s.set_priority(1, 50, Placement::Inherit); // no-op, no event
        s.set_priority(1, 10, Placement::Tail);

        let seen = events.lock().expect("events").clone();
        assert_eq!(seen, std::vec![(1, 10, 50), (1, 50, 10)]);
    }

    #[test]
    fn test_yield_rotates_within_level() {
        let mut s = sched_with(&[(1, 30), (2, 30)]);
        assert_eq!(s.dispatch(), Some(1));
        s.yield_now(1);
        assert_eq!(s.dispatch(), Some(2));
        s.yield_now(2);
        assert_eq!(s.dispatch(), Some(1));
    }

    #[test]
    fn test_yield_alone_redispatches_self() {
        let mut s = sched_with(&[(1, 30)]);
        assert_eq!(s.dispatch(), Some(1));
        s.yield_now(1);
        assert_eq!(s.dispatch(), Some(1));
    }

    #[test]
    fn test_finish_and_reap() {
        let mut s = sched_with(&[(1, 30)]);
        assert_eq!(s.dispatch(), Some(1));
        s.finish(1);
        assert_eq!(s.task(1).map(|t| t.state), Some(TaskState::Finished));
        let t = s.reap(1);
        assert_eq!(t.id, 1);
        assert_eq!(s.task_count(), 0);
    }

    #[test]
    #[should_panic(expected = "duplicate admission")]
    fn test_duplicate_admission_is_fatal() {
        let mut s = sched_with(&[(1, 30)]);
        s.admit(Task::new(1, "again", 30));
    }

    #[test]
    #[should_panic(expected = "scheduler invariant violated")]
    fn test_block_of_blocked_task_is_fatal() {
        let mut s = sched_with(&[(1, 30)]);
        assert_eq!(s.dispatch(), Some(1));
        s.block(1, BlockReason::Timer);
        s.block(1, BlockReason::Timer);
    }

    #[test]
    #[should_panic(expected = "finished while holding")]
    fn test_finish_while_holding_lock_is_fatal() {
        let mut s = sched_with(&[(1, 30)]);
        assert_eq!(s.dispatch(), Some(1));
        s.must_mut(1).held_locks.push(9);
        s.finish(1);
    }
}
