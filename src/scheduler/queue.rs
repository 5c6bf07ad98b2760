//! Webhook trigger queue.
//!
//! The listener pushes, the scheduler loop drains. Names are checked against
//! the live agent set on the way in, so the queue only ever holds runnable
//! agents. There is no deduplication and no capacity bound.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct TriggerQueue {
    known: BTreeSet<String>,
    pending: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl TriggerQueue {
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known.into_iter().map(Into::into).collect(),
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    /// Agent names accepted by this queue, sorted.
    pub fn known_agents(&self) -> Vec<String> {
        self.known.iter().cloned().collect()
    }

    /// Queue a run for `name`. Returns `false` (and queues nothing) for an
    /// unknown agent.
    pub fn enqueue(&self, name: &str) -> bool {
        if !self.is_known(name) {
            return false;
        }
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(name.to_string());
        self.notify.notify_one();
        true
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next `enqueue`, or at once if one happened since the
    /// last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
