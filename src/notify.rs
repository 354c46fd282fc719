//! Listener lists for the job queue and the worker pool.
//!
//! Subscribers receive a [`Notification`] over a channel instead of being
//! called back, so a notification only wakes the dispatch loop and can never
//! re-enter dispatch logic while the pool or queue is mid-mutation.

use tokio::sync::mpsc::UnboundedSender;

/// Something changed that may allow a pending job to be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A job was added to the queue.
    JobAvailable,
    /// A worker was registered or freed.
    WorkerAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Default)]
pub struct Subscribers {
    next_id: u64,
    senders: Vec<(SubscriptionId, UnboundedSender<Notification>)>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, tx: UnboundedSender<Notification>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.senders.push((id, tx));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sub, _)| *sub != id);
        before != self.senders.len()
    }

    /// Deliver to every live subscriber. Subscribers whose receiver was
    /// dropped are pruned.
    pub fn notify(&mut self, notification: Notification) {
        self.senders.retain(|(id, tx)| {
            if tx.send(notification).is_err() {
                tracing::debug!(subscription = id.0, "Dropping closed subscriber");
                false
            } else {
                true
            }
        });
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
