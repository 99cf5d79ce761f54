use crate::domain::events::{ChangeFilter, RowChange, Subscription};
use log::trace;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 1024;

/// In-process publish/subscribe of ledger row changes.
///
/// Stores publish after a write is committed, so a subscriber that sees a
/// change can read the row back and observe the same state.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<RowChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, change: RowChange) {
        // No subscribers is not an error.
        if self.sender.send(change).is_err() {
            trace!("Row change published with no subscribers");
        }
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription::new(self.sender.subscribe(), filter)
    }
}
