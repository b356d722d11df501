//! # Priority-Inheritance Mutexes
//!
//! Locks that bound priority inversion. When a task blocks on a mutex, the
//! owner's effective priority is recomputed as the maximum over its base
//! priority and every waiter of every mutex it holds, so a high-priority
//! waiter can never sit behind an owner running at a lower level. If the
//! owner is itself blocked on another mutex, the boost propagates along the
//! owner chain.
//!
//! Release always hands the mutex directly to the most urgent waiter
//! (arrival order breaks ties): ownership never returns to the free pool
//! while someone is queued, so a later arrival cannot steal the lock from a
//! task that already paid the blocking cost.
//!
//! The table never busy-waits and never touches a platform primitive; all
//! blocking is expressed through the scheduler.

use alloc::format;
use alloc::vec::Vec;

use hashbrown::HashMap;
use static_assertions::assert_impl_all;

use crate::error::{invariant_violation, SchedError, SchedResult};
use crate::sched::{Placement, Scheduler};
use crate::task::{BlockReason, Priority, TaskId};

/// Unique mutex identifier, allocated by [`LockTable::create`].
pub type MutexId = u64;

// =============================================================================
// MUTEX
// =============================================================================

/// Outcome of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The mutex was free; the caller owns it and keeps running.
    Owned,
    /// The mutex is owned; the caller is blocked and queued. Ownership
    /// arrives by hand-off when a release selects it.
    Queued,
}

/// A single priority-inheritance mutex.
pub struct PiMutex {
    /// Identifier, as handed out by `create`.
    id: MutexId,
    /// Current owner, if locked.
    owner: Option<TaskId>,
    /// Blocked waiters in arrival order. Position is the FIFO tie-break;
    /// urgency is read live from the scheduler at hand-off time.
    waiters: Vec<TaskId>,
}

impl PiMutex {
    /// Identifier of this mutex.
    pub fn id(&self) -> MutexId {
        self.id
    }

    /// Current owner, if locked.
    pub fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    /// Blocked waiters in arrival order.
    pub fn waiters(&self) -> &[TaskId] {
        &self.waiters
    }

    /// Whether the mutex is currently owned.
    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Aggregate lock-protocol counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockStats {
    /// Acquires that found the mutex free.
    pub immediate: u64,
    /// Acquires that had to block.
    pub contended: u64,
    /// Releases that handed ownership directly to a waiter.
    pub handoffs: u64,
    /// Effective-priority raises performed by the protocol.
    pub boosts: u64,
    /// Effective-priority restores performed by the protocol.
    pub restores: u64,
}

// =============================================================================
// LOCK TABLE
// =============================================================================

/// All live mutexes plus the inheritance protocol that ties them to the
/// scheduler.
pub struct LockTable {
    locks: HashMap<MutexId, PiMutex>,
    next_id: MutexId,
    stats: LockStats,
}

assert_impl_all!(LockTable: Send);

impl LockTable {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self {
            locks: HashMap::new(),
            next_id: 1,
            stats: LockStats::default(),
        }
    }

    /// Allocate a new, unowned mutex.
    pub fn create(&mut self) -> MutexId {
        let id = self.next_id;
        self.next_id += 1;
        self.locks.insert(
            id,
            PiMutex {
                id,
                owner: None,
                waiters: Vec::new(),
            },
        );
        log::trace!(target: "strata", "created mutex {id}");
        id
    }

    /// Look up a mutex by id.
    pub fn mutex(&self, id: MutexId) -> Option<&PiMutex> {
        self.locks.get(&id)
    }

    /// Lock-protocol counters.
    pub fn stats(&self) -> LockStats {
        self.stats
    }

    fn must_lock(&self, id: MutexId) -> &PiMutex {
        match self.locks.get(&id) {
            Some(m) => m,
            None => invariant_violation(&format!("operation on unknown mutex {id}")),
        }
    }

    fn must_lock_mut(&mut self, id: MutexId) -> &mut PiMutex {
        match self.locks.get_mut(&id) {
            Some(m) => m,
            None => invariant_violation(&format!("operation on unknown mutex {id}")),
        }
    }

    // -------------------------------------------------------------------------
    // Acquire
    // -------------------------------------------------------------------------

    /// Attempt to take a mutex for `task`.
    ///
    /// Free: ownership transfers immediately and the caller keeps running.
    /// Owned by someone else: the caller is blocked, queued in arrival
    /// order, and the owner (chain) is re-boosted. Owned by the caller:
    /// [`SchedError::DeadlockRisk`] - the protocol is non-recursive.
    pub fn acquire(
        &mut self,
        sched: &mut Scheduler,
        task: TaskId,
        mutex: MutexId,
    ) -> SchedResult<Acquired> {
        match self.must_lock(mutex).owner {
            None => {
                self.must_lock_mut(mutex).owner = Some(task);
                sched.must_mut(task).held_locks.push(mutex);
                self.stats.immediate += 1;
                log::debug!(target: "strata", "task {task} acquired free mutex {mutex}");
                Ok(Acquired::Owned)
            },
            Some(owner) if owner == task => Err(SchedError::DeadlockRisk { task, mutex }),
            Some(owner) => {
                log::debug!(
                    target: "strata",
                    "task {task} blocks on mutex {mutex} owned by task {owner}"
                );
                sched.block(task, BlockReason::Lock(mutex));
                self.must_lock_mut(mutex).waiters.push(task);
                self.stats.contended += 1;
                self.reboost(sched, owner);
                Ok(Acquired::Queued)
            },
        }
    }

    // -------------------------------------------------------------------------
    // Release
    // -------------------------------------------------------------------------

    /// Release a mutex owned by `task`.
    ///
    /// The releaser's effective priority is restored to the maximum demanded
    /// by the locks it still holds (its base priority if none are
    /// contended). If waiters are queued, ownership is handed directly to
    /// the most urgent one and that task is woken; the returned id names it.
    pub fn release(
        &mut self,
        sched: &mut Scheduler,
        task: TaskId,
        mutex: MutexId,
    ) -> SchedResult<Option<TaskId>> {
        if self.must_lock(mutex).owner != Some(task) {
            return Err(SchedError::NotOwner { task, mutex });
        }

        {
            let held = &mut sched.must_mut(task).held_locks;
            match held.iter().position(|&m| m == mutex) {
                Some(pos) => {
                    held.remove(pos);
                },
                None => invariant_violation(&format!(
                    "mutex {mutex} owned by task {task} but missing from its held set"
                )),
            }
        }

        // The released mutex no longer counts toward the releaser's level.
        self.reboost(sched, task);

        let winner_idx = {
            let lock = self.must_lock(mutex);
            let mut best: Option<(usize, Priority)> = None;
            for (i, &w) in lock.waiters.iter().enumerate() {
                let urgency = sched.effective(w);
                // Strict comparison keeps the earliest arrival among equals.
                if best.map_or(true, |(_, b)| urgency > b) {
                    best = Some((i, urgency));
                }
            }
            best.map(|(i, _)| i)
        };

        match winner_idx {
            None => {
                self.must_lock_mut(mutex).owner = None;
                log::debug!(target: "strata", "task {task} released mutex {mutex} (no waiters)");
                Ok(None)
            },
            Some(idx) => {
                let winner = {
                    let lock = self.must_lock_mut(mutex);
                    let winner = lock.waiters.remove(idx);
                    lock.owner = Some(winner);
                    winner
                };
                sched.must_mut(winner).held_locks.push(mutex);
                self.stats.handoffs += 1;
                log::debug!(
                    target: "strata",
                    "mutex {mutex} handed off from task {task} to task {winner}"
                );

                // Wake the new owner, then fold any remaining waiters into
                // its effective priority.
                sched.unblock(winner);
                self.reboost(sched, winner);
                Ok(Some(winner))
            },
        }
    }

    // -------------------------------------------------------------------------
    // Inheritance
    // -------------------------------------------------------------------------

    /// Recompute `start`'s effective priority from first principles and
    /// propagate along the blocked-owner chain.
    ///
    /// The target level is `max(base, effective of every waiter on every
    /// held mutex)`. Raises use [`Placement::Inherit`]; restores use
    /// [`Placement::Tail`]. The walk stops as soon as a task's level is
    /// already correct, since nothing upstream can change then.
    fn reboost(&mut self, sched: &mut Scheduler, start: TaskId) {
        let mut current = start;
        let mut visited: Vec<TaskId> = Vec::new();

        loop {
            invariant!(
                !visited.contains(&current),
                "cycle in mutex owner chain at task {current}"
            );
            visited.push(current);

            let (base, old, held, blocked_on) = match sched.task(current) {
                Some(t) => (
                    t.base_priority,
                    t.effective_priority,
                    t.held_locks.clone(),
                    t.blocked_on(),
                ),
                None => invariant_violation(&format!("mutex owner chain reached unknown task {current}")),
            };

            let mut target = base;
            for m in held {
                for &w in self.must_lock(m).waiters() {
                    let urgency = sched.effective(w);
                    if urgency > target {
                        target = urgency;
                    }
                }
            }

            if target == old {
                break;
            }

            if target > old {
                self.stats.boosts += 1;
                log::debug!(target: "strata", "boost task {current}: {old} -> {target}");
                sched.set_priority(current, target, Placement::Inherit);
            } else {
                self.stats.restores += 1;
                log::debug!(target: "strata", "restore task {current}: {old} -> {target}");
                sched.set_priority(current, target, Placement::Tail);
            }

            match blocked_on {
                Some(m) => {
                    current = match self.must_lock(m).owner {
                        Some(owner) => owner,
                        None => invariant_violation(&format!(
                            "task {current} blocked on mutex {m} which has no owner"
                        )),
                    };
                },
                None => break,
            }
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
