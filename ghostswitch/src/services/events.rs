use crate::models::{ConnectionStatus, StatusEvent};
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Receives every status change the controller publishes for the GUI.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

/// Fan-out to any number of subscribers, plus a slot that always holds the
/// newest event for consumers that attach late.
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusEvent>,
    latest: watch::Sender<StatusEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (latest, _) = watch::channel(StatusEvent::new(ConnectionStatus::Disconnected));
        Self { tx, latest }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<StatusEvent> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> StatusEvent {
        self.latest.borrow().clone()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: StatusEvent) {
        debug!("event: {:?}", event.status);
        self.latest.send_replace(event.clone());
        let _ = self.tx.send(event);
    }
}
