//! # Error Handling
//!
//! Two very different failure classes live in this kernel and they must not
//! be confused:
//!
//! | Class | Examples | Handling |
//! |-------|----------|----------|
//! | Caller error | re-entrant acquire, release by non-owner | returned as [`SchedError`], no other task affected |
//! | Invariant violation | duplicate admission, owner-chain cycle | fatal - logged and aborted via [`invariant_violation`] |
//!
//! An invariant violation means the scheduler's ordering argument no longer
//! holds; continuing would silently produce wrong priority ordering, so the
//! kernel stops instead.

use core::fmt;

use crate::lock::MutexId;
use crate::task::TaskId;

// =============================================================================
// SCHEDULING ERRORS
// =============================================================================

/// Errors surfaced to callers of the scheduling and locking API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// A task attempted to acquire a mutex it already owns. The protocol is
    /// non-recursive; succeeding silently would hide a latent self-deadlock.
    DeadlockRisk {
        /// The acquiring task.
        task: TaskId,
        /// The mutex it already owns.
        mutex: MutexId,
    },

    /// A release was attempted by a task that does not own the mutex.
    /// No state is mutated.
    NotOwner {
        /// The releasing task.
        task: TaskId,
        /// The mutex in question.
        mutex: MutexId,
    },

    /// The task id is not known to the scheduler (never spawned, or already
    /// reaped by its owner).
    UnknownTask(TaskId),

    /// The task's body panicked. Reported by `join`.
    Panicked(TaskId),

    /// An external channel operation failed.
    Channel(ChannelError),
}

impl SchedError {
    /// Coarse category, for log filtering.
    pub const fn category(&self) -> &'static str {
        match self {
            SchedError::DeadlockRisk { .. } | SchedError::NotOwner { .. } => "Lock",
            SchedError::UnknownTask(_) | SchedError::Panicked(_) => "Task",
            SchedError::Channel(_) => "Channel",
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::DeadlockRisk { task, mutex } => {
                write!(
                    f,
                    "deadlock risk: task {} re-acquired mutex {} it already owns",
                    task, mutex
                )
            },
            SchedError::NotOwner { task, mutex } => {
                write!(f, "task {} released mutex {} it does not own", task, mutex)
            },
            SchedError::UnknownTask(task) => write!(f, "unknown task {}", task),
            SchedError::Panicked(task) => write!(f, "task {} panicked", task),
            SchedError::Channel(e) => write!(f, "channel error: {}", e),
        }
    }
}

impl From<ChannelError> for SchedError {
    fn from(e: ChannelError) -> Self {
        SchedError::Channel(e)
    }
}

/// Result type for scheduling operations.
pub type SchedResult<T> = Result<T, SchedError>;

// =============================================================================
// CHANNEL ERRORS
// =============================================================================

/// Errors from the external blocking-channel collaborators. The kernel takes
/// no action on these; they propagate to the task body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was closed.
    Closed,
    /// The channel buffer is full.
    Full,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "channel closed"),
            ChannelError::Full => write!(f, "channel full"),
        }
    }
}

// =============================================================================
// INVARIANT MACHINERY
// =============================================================================

/// Report a fatal scheduler invariant violation and abort.
///
/// Never returns: the ready structure or lock bookkeeping is corrupt and any
/// further dispatch decision would be unverifiable.
#[cold]
pub fn invariant_violation(msg: &str) -> ! {
    log::error!(target: "strata", "scheduler invariant violated: {msg}");
    panic!("scheduler invariant violated: {msg}");
}

/// Check a scheduler invariant, aborting with a formatted message on failure.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::error::invariant_violation(&alloc::format!($($arg)*));
        }
    };
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SchedError::DeadlockRisk { task: 3, mutex: 1 };
        assert_eq!(
            e.to_string(),
            "deadlock risk: task 3 re-acquired mutex 1 it already owns"
        );
        assert_eq!(e.category(), "Lock");

        let e = SchedError::NotOwner { task: 2, mutex: 7 };
        assert_eq!(e.to_string(), "task 2 released mutex 7 it does not own");

        assert_eq!(SchedError::UnknownTask(9).category(), "Task");
        assert_eq!(
            SchedError::Channel(ChannelError::Full).to_string(),
            "channel error: channel full"
        );
    }

    #[test]
    fn test_channel_error_conversion() {
        let e: SchedError = ChannelError::Closed.into();
        assert_eq!(e, SchedError::Channel(ChannelError::Closed));
        assert_eq!(e.category(), "Channel");
    }

    #[test]
    #[should_panic(expected = "scheduler invariant violated")]
    fn test_invariant_macro_aborts() {
        invariant!(1 + 1 == 3, "arithmetic broke: {}", 42);
    }
}
