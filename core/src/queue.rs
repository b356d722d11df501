//! # Ready Queue
//!
//! Per-priority-level FIFO queues of runnable tasks with a 256-bit occupancy
//! bitmap for O(1) highest-level lookup. Arrival order is preserved within a
//! level; the scheduler expresses its placement rules through `push_back`
//! (ordinary arrival) and `push_front` (preempted task resumes first among
//! equals, inherited boost treated as highest-urgency arrival).

use alloc::collections::VecDeque;

use crate::task::{Priority, TaskId};

/// Number of priority levels.
pub const LEVELS: usize = 256;

/// Per-priority-level ready queues. Higher level = more urgent.
pub struct ReadyQueue {
    /// One FIFO sequence per priority level.
    queues: [VecDeque<TaskId>; LEVELS],
    /// Bit `i` set means level `i` is non-empty.
    bitmap: [u64; 4],
    /// Total queued tasks.
    len: usize,
}

impl ReadyQueue {
    /// Create an empty ready queue.
    pub fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| VecDeque::new()),
            bitmap: [0; 4],
            len: 0,
        }
    }

    /// Append a task at the tail of its level (ordinary arrival/unblock).
    pub fn push_back(&mut self, priority: Priority, id: TaskId) {
        let idx = priority as usize;
        self.queues[idx].push_back(id);
        self.bitmap[idx / 64] |= 1 << (idx % 64);
        self.len += 1;
    }

    /// Insert a task at the head of its level, so it is dispatched before
    /// everything that was already queued there.
    pub fn push_front(&mut self, priority: Priority, id: TaskId) {
        let idx = priority as usize;
        self.queues[idx].push_front(id);
        self.bitmap[idx / 64] |= 1 << (idx % 64);
        self.len += 1;
    }

    /// Remove and return the head of the highest non-empty level.
    pub fn pop_highest(&mut self) -> Option<(TaskId, Priority)> {
        let priority = self.highest_level()?;
        let idx = priority as usize;
        let id = self.queues[idx].pop_front()?;
        if self.queues[idx].is_empty() {
            self.bitmap[idx / 64] &= !(1 << (idx % 64));
        }
        self.len -= 1;
        Some((id, priority))
    }

    /// The highest non-empty priority level, without dequeuing.
    pub fn highest_level(&self) -> Option<Priority> {
        // Scan from the top word down; highest set bit wins.
        for word_idx in (0..4).rev() {
            let word = self.bitmap[word_idx];
            if word != 0 {
                let bit = 63 - word.leading_zeros() as usize;
                return Some((word_idx * 64 + bit) as Priority);
            }
        }
        None
    }

    /// Remove a specific task from a level. Returns whether it was present.
    pub fn remove(&mut self, priority: Priority, id: TaskId) -> bool {
        let idx = priority as usize;
        if let Some(pos) = self.queues[idx].iter().position(|&t| t == id) {
            self.queues[idx].remove(pos);
            if self.queues[idx].is_empty() {
                self.bitmap[idx / 64] &= !(1 << (idx % 64));
            }
            self.len -= 1;
            true
        } else {
            false
        }
    }

    /// Whether the task is queued at the given level.
    pub fn contains(&self, priority: Priority, id: TaskId) -> bool {
        self.queues[priority as usize].iter().any(|&t| t == id)
    }

    /// Total number of queued tasks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no task is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
