//! # Strata Runtime
//!
//! The execution engine that gives the `strata-core` scheduling kernel real
//! threads to command. Each spawned task runs on its own OS thread, but the
//! threads hand a single *run token* between themselves: at most one task
//! body executes between two scheduling checkpoints, exactly matching the
//! kernel's single logical core.
//!
//! All kernel state lives behind one `std::sync::Mutex`; a `Condvar`
//! broadcasts every run-token change. This global synchronization point is
//! deliberate: the kernel is the one place where priority decisions are
//! made, and serializing them is what makes boosts atomic with respect to
//! the next dispatch.
//!
//! Time is virtual. The clock advances only when the running task calls
//! [`TaskContext::work`] or sleeps, and rescheduling fast-forwards across
//! idle gaps to the next timer deadline. Scenarios that span hundreds of
//! simulated milliseconds complete instantly and deterministically.
//!
//! ```no_run
//! use strata_runtime::{Duration, Runtime};
//!
//! let rt = Runtime::new();
//! let m = rt.mutex();
//! let worker = rt.spawn("worker", 30, move |ctx| {
//!     ctx.acquire(m).expect("acquire");
//!     ctx.work(Duration::from_millis(10));
//!     ctx.release(m).expect("release");
//! });
//! rt.start();
//! rt.join(worker).expect("worker failed");
//! ```

pub mod context;
pub mod mailbox;
pub mod runtime;

mod kernel;

pub use context::TaskContext;
pub use mailbox::MailboxId;
pub use runtime::{Runtime, RuntimeBuilder};

pub use strata_core::{
    ChannelError, Duration, LockStats, MutexId, Priority, SchedError, SchedResult, SchedStats,
    TaskId, Timestamp,
};
