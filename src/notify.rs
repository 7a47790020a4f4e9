//! Change feed fan-out. Committed events are published per room type to
//! whoever holds a feed open (the SSE `changes` route).

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, RoomTypeId};

/// Events a slow feed may fall behind before it starts skipping.
const FEED_BACKLOG: usize = 256;

#[derive(Default)]
pub struct NotifyHub {
    feeds: DashMap<RoomTypeId, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a feed on one room type, starting with the next commit.
    pub fn subscribe(&self, room_type_id: RoomTypeId) -> broadcast::Receiver<Event> {
        self.feeds
            .entry(room_type_id)
            .or_insert_with(|| broadcast::channel(FEED_BACKLOG).0)
            .subscribe()
    }

    /// Publish a committed event to its room type's feed. A feed whose
    /// subscribers have all gone is dropped here.
    pub fn publish(&self, event: &Event) {
        let room_type_id = event.room_type_id();
        let delivered = self
            .feeds
            .get(&room_type_id)
            .map(|feed| feed.send(event.clone()).is_ok());
        if delivered == Some(false) {
            self.feeds
                .remove_if(&room_type_id, |_, feed| feed.receiver_count() == 0);
        }
    }

    #[cfg(test)]
    fn open_feeds(&self) -> usize {
        self.feeds.len()
    }
}
