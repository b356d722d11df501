//! # Mailboxes
//!
//! Bounded byte-message channels for task bodies, standing in for whatever
//! external transport the workload really talks to. Send never blocks (a
//! full buffer is an error the sender handles); receive parks the calling
//! task through the kernel's block/unblock machinery, so a sleeping
//! receiver costs nothing and wakes with normal preemption semantics.
//!
//! Mailboxes are identified by handle; closing one wakes every parked
//! receiver with [`ChannelError::Closed`].

use std::collections::{HashMap, VecDeque};

use strata_core::{BlockReason, ChannelError, TaskId};

use crate::kernel::Kernel;

/// Handle to a mailbox created by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(pub(crate) u64);

struct MailboxState {
    buf: VecDeque<Vec<u8>>,
    capacity: usize,
    closed: bool,
    /// Tasks parked in `recv`, woken FIFO.
    waiting: VecDeque<TaskId>,
}

pub(crate) struct MailboxTable {
    boxes: HashMap<u64, MailboxState>,
    next: u64,
}

impl MailboxTable {
    pub(crate) fn new() -> Self {
        Self {
            boxes: HashMap::new(),
            next: 1,
        }
    }
}

impl Kernel {
    pub(crate) fn mailbox_create(&mut self, capacity: usize) -> MailboxId {
        let id = self.mail.next;
        self.mail.next += 1;
        self.mail.boxes.insert(
            id,
            MailboxState {
                buf: VecDeque::new(),
                capacity,
                closed: false,
                waiting: VecDeque::new(),
            },
        );
        log::trace!(target: "strata", "created mailbox {id} (capacity {capacity})");
        MailboxId(id)
    }

    /// Deposit a message. Wakes the longest-parked receiver, if any.
    pub(crate) fn mailbox_send(
        &mut self,
        mailbox: MailboxId,
        msg: Vec<u8>,
    ) -> Result<(), ChannelError> {
        let state = match self.mail.boxes.get_mut(&mailbox.0) {
            Some(s) if !s.closed => s,
            _ => return Err(ChannelError::Closed),
        };
        if state.buf.len() >= state.capacity {
            return Err(ChannelError::Full);
        }
        state.buf.push_back(msg);
        let receiver = state.waiting.pop_front();
        if let Some(rx) = receiver {
            self.sched.unblock(rx);
            self.reschedule();
        }
        Ok(())
    }

    /// Take a message if one is buffered; otherwise park the calling task.
    /// `Ok(None)` means the task was blocked and must retry once woken.
    pub(crate) fn mailbox_try_recv(
        &mut self,
        task: TaskId,
        mailbox: MailboxId,
    ) -> Result<Option<Vec<u8>>, ChannelError> {
        let state = match self.mail.boxes.get_mut(&mailbox.0) {
            Some(s) => s,
            None => return Err(ChannelError::Closed),
        };
        if let Some(msg) = state.buf.pop_front() {
            return Ok(Some(msg));
        }
        if state.closed {
            return Err(ChannelError::Closed);
        }
        state.waiting.push_back(task);

        let held = self.sched.task(task).map_or(0, |t| t.held_locks.len());
        if held > 0 {
            log::warn!(
                target: "strata",
                "task {task} waits on mailbox {} while holding {held} lock(s)",
                mailbox.0
            );
        }
        self.sched.block(task, BlockReason::Channel);
        self.reschedule();
        Ok(None)
    }

    /// Close a mailbox: buffered messages stay readable, parked receivers
    /// wake and observe `Closed`.
    pub(crate) fn mailbox_close(&mut self, mailbox: MailboxId) {
        let waiting = match self.mail.boxes.get_mut(&mailbox.0) {
            Some(state) => {
                state.closed = true;
                state.waiting.drain(..).collect::<Vec<_>>()
            },
            None => return,
        };
        log::debug!(target: "strata", "mailbox {} closed, waking {} receiver(s)", mailbox.0, waiting.len());
        let woken = !waiting.is_empty();
        for task in waiting {
            self.sched.unblock(task);
        }
        if woken {
            self.reschedule();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
