//! # Task Model
//!
//! The schedulable unit. A task carries a fixed *base* priority assigned at
//! creation and a current *effective* priority that may temporarily exceed it
//! while the task inherits priority from lock waiters. All state transitions
//! are driven by the scheduler and the lock table; a task never mutates its
//! own record.
//!
//! ```text
//!   ┌─────────┐  dispatch   ┌─────────┐   finish    ┌──────────┐
//!   │  Ready  │ ──────────► │ Running │ ──────────► │ Finished │
//!   └─────────┘             └─────────┘             └──────────┘
//!        ▲     preempt/yield     │
//!        ├──────────────────────-┘
//!        │                       │ block(reason)
//!        │     unblock      ┌─────────┐
//!        └───────────────── │ Blocked │
//!                           └─────────┘
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use crate::lock::MutexId;

/// Unique task identifier, stable for the task's lifetime.
pub type TaskId = u64;

/// Scheduling priority. Higher value = more urgent. 0..=255.
pub type Priority = u8;

// =============================================================================
// TASK STATE
// =============================================================================

/// Why a blocked task is not schedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Waiting to acquire a priority-inheritance mutex.
    Lock(MutexId),
    /// Sleeping until a timer deadline.
    Timer,
    /// Waiting on an external channel.
    Channel,
}

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued in the ready structure, waiting for dispatch.
    Ready,
    /// The task currently holding the (single) logical core.
    Running,
    /// Removed from scheduling consideration until unblocked.
    Blocked(BlockReason),
    /// Completed; unobservable to dispatch, awaiting reap by its owner.
    Finished,
}

// =============================================================================
// TASK
// =============================================================================

/// A task record owned by the scheduler.
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,

    /// Label used in logs and traces.
    pub name: String,

    /// Static priority assigned at creation. Immutable.
    pub base_priority: Priority,

    /// Currently active scheduling priority. Equal to `base_priority` except
    /// while boosted by priority inheritance; never below it.
    pub effective_priority: Priority,

    /// Current execution state.
    pub state: TaskState,

    /// Mutexes currently owned by this task, in acquisition order. Supports
    /// nested acquisition and correct un-boosting on partial release.
    pub held_locks: Vec<MutexId>,

    /// Monotonic admission stamp, used for FIFO tie-breaks in diagnostics.
    pub arrival: u64,
}

impl Task {
    /// Create a new task in the `Ready` state.
    pub fn new(id: TaskId, name: &str, base_priority: Priority) -> Self {
        Self {
            id,
            name: String::from(name),
            base_priority,
            effective_priority: base_priority,
            state: TaskState::Ready,
            held_locks: Vec::new(),
            arrival: 0,
        }
    }

    /// Whether the task is currently boosted above its base priority.
    #[inline]
    pub fn is_boosted(&self) -> bool {
        self.effective_priority > self.base_priority
    }

    /// Whether the task owns the given mutex.
    #[inline]
    pub fn holds(&self, mutex: MutexId) -> bool {
        self.held_locks.contains(&mutex)
    }

    /// Whether the task can be dispatched.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// The mutex this task is blocked on, if any.
    pub fn blocked_on(&self) -> Option<MutexId> {
        match self.state {
            TaskState::Blocked(BlockReason::Lock(m)) => Some(m),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let t = Task::new(1, "worker", 30);
        assert_eq!(t.id, 1);
        assert_eq!(t.name, "worker");
        assert_eq!(t.base_priority, 30);
        assert_eq!(t.effective_priority, 30);
        assert_eq!(t.state, TaskState::Ready);
        assert!(t.held_locks.is_empty());
        assert!(!t.is_boosted());
        assert!(t.is_runnable());
    }

    #[test]
    fn test_boost_detection() {
        let mut t = Task::new(2, "low", 10);
        t.effective_priority = 50;
        assert!(t.is_boosted());
        t.effective_priority = 10;
        assert!(!t.is_boosted());
    }

    #[test]
    fn test_blocked_on() {
        let mut t = Task::new(3, "waiter", 50);
        assert_eq!(t.blocked_on(), None);

        t.state = TaskState::Blocked(BlockReason::Lock(4));
        assert_eq!(t.blocked_on(), Some(4));
        assert!(!t.is_runnable());

        t.state = TaskState::Blocked(BlockReason::Timer);
        assert_eq!(t.blocked_on(), None);
    }

    #[test]
    fn test_held_locks() {
        let mut t = Task::new(4, "owner", 20);
        t.held_locks.push(1);
        t.held_locks.push(2);
        assert!(t.holds(1));
        assert!(t.holds(2));
        assert!(!t.holds(3));
    }
}
