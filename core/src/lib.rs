//! # Strata Scheduling Kernel
//!
//! The logical core of a strict-priority preemptive scheduler paired with a
//! priority-inheritance mutex. This crate contains only bookkeeping: which
//! task runs, who owns which lock, and how priority boosts propagate when
//! contention appears. It never parks a thread and never reads a hardware
//! clock, so the whole protocol is testable on any host.
//!
//! ## Philosophy
//!
//! The kernel is **mechanism, not policy-free magic**: priority always wins,
//! ties are FIFO within a level, and starvation of lower levels is the
//! documented cost of hard real-time semantics. An execution engine (see the
//! `strata-runtime` crate) decides how "the running task" maps onto actual
//! threads or a simulation step loop.
//!
//! ## Components
//!
//! - [`time`]: monotonic timestamp and duration types
//! - [`task`]: the schedulable unit and its state machine
//! - [`queue`]: per-priority-level ready queues with an occupancy bitmap
//! - [`sched`]: the scheduler - admission, blocking, preemption, dispatch
//! - [`lock`]: priority-inheritance mutexes and boost propagation
//! - [`error`]: error taxonomy and the fatal invariant machinery
//!
//! ## Invariant failures
//!
//! Contract violations (admitting a duplicate task, blocking a task that is
//! not runnable, a cycle in the lock-owner chain) indicate the scheduler's
//! correctness argument no longer holds. They are not recoverable errors:
//! the kernel logs them and panics, and release builds abort.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[macro_use]
pub mod error;
pub mod lock;
pub mod queue;
pub mod sched;
pub mod task;
pub mod time;

pub use error::{ChannelError, SchedError, SchedResult};
pub use lock::{Acquired, LockStats, LockTable, MutexId, PiMutex};
pub use queue::ReadyQueue;
pub use sched::{Placement, PriorityChangeHook, SchedStats, Scheduler};
pub use task::{BlockReason, Priority, Task, TaskId, TaskState};
pub use time::{Duration, Timestamp};
