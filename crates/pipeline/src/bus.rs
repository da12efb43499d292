//! In-process communication bus.
//!
//! The bus is an explicitly constructed value, never a global. One instance may
//! be shared by many concurrent runs: queues are keyed by `(RunId, recipient)`,
//! so a run only ever drains its own messages. Workers never touch the bus
//! directly; the engine posts their outbox after merging their output and
//! drains the recipient's queue before each invocation.
//!
//! Delivery is FIFO per recipient. There is no ordering guarantee across
//! recipients.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::message::AgentMessage;
use crate::{RunId, Stage};

type Queues = HashMap<(RunId, Stage), VecDeque<AgentMessage>>;

/// Cheaply cloneable handle to a shared set of per-run message queues.
#[derive(Debug, Clone, Default)]
pub struct CommunicationBus {
    queues: Arc<Mutex<Queues>>,
}

impl CommunicationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the mailbox for one run. Dropping the mailbox discards any
    /// messages still pending for that run.
    pub fn scoped(&self, run_id: RunId) -> RunMailbox {
        RunMailbox {
            run_id,
            queues: Arc::clone(&self.queues),
        }
    }

    /// Total messages pending across all runs.
    pub fn pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}

/// The bus as seen by a single run.
#[derive(Debug)]
pub struct RunMailbox {
    run_id: RunId,
    queues: Arc<Mutex<Queues>>,
}

impl RunMailbox {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Queues `message` for its recipient.
    pub fn send(&self, message: AgentMessage) {
        self.queues
            .lock()
            .entry((self.run_id, message.recipient))
            .or_default()
            .push_back(message);
    }

    /// Removes and returns every pending message for `recipient`, oldest first.
    pub fn drain(&self, recipient: Stage) -> Vec<AgentMessage> {
        self.queues
            .lock()
            .remove(&(self.run_id, recipient))
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn pending_for(&self, recipient: Stage) -> usize {
        self.queues
            .lock()
            .get(&(self.run_id, recipient))
            .map_or(0, VecDeque::len)
    }
}

impl Drop for RunMailbox {
    fn drop(&mut self) {
        let run_id = self.run_id;
        self.queues.lock().retain(|(owner, _), _| *owner != run_id);
    }
}
