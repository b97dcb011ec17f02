use crate::events::Event;
use tokio::sync::broadcast;

/// Fan-out of dispatch events to persistence and reporting collaborators.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) -> Result<usize, broadcast::error::SendError<Event>> {
        self.tx.send(event)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
