use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

/// Events a lagging subscriber may fall behind by before it starts missing
/// them. A listing page only needs to know that something changed.
const BACKLOG: usize = 256;

/// Fan-out of applied events to whoever is watching a resource, typically a
/// page showing that resource's calendar.
///
/// Channels are created on first subscribe and dropped on the first publish
/// that finds every receiver gone.
pub struct NotifyHub {
    watchers: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            watchers: DashMap::new(),
        }
    }

    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Event> {
        match self.watchers.entry(resource_id) {
            Entry::Occupied(e) => e.get().subscribe(),
            Entry::Vacant(e) => {
                let (tx, rx) = broadcast::channel(BACKLOG);
                e.insert(tx);
                rx
            }
        }
    }

    /// Deliver `event` to the watchers of the resource it belongs to.
    pub fn publish(&self, event: &Event) {
        let resource_id = event.resource_id();
        let delivered = match self.watchers.get(&resource_id) {
            Some(tx) => tx.send(event.clone()).is_ok(),
            None => return,
        };
        if !delivered {
            self.watchers
                .remove_if(&resource_id, |_, tx| tx.receiver_count() == 0);
        }
    }

    pub fn watched_resources(&self) -> usize {
        self.watchers.len()
    }
}
