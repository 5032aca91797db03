//! Event bus using tokio broadcast channel
//!
//! Emission never blocks. Slow subscribers miss events instead of
//! holding up the sync engine.

use tokio::sync::broadcast;

use super::SyncEvent;

/// Default channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
///
/// Events emitted while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        tracing::trace!(event = event.event_type(), "Emitting sync event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber to the event bus
pub struct EventSubscriber {
    receiver: broadcast::Receiver<SyncEvent>,
}

impl EventSubscriber {
    /// Receive the next event. `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Sync event subscriber lagged by {} events", n);
                    continue;
                }
            }
        }
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything emitted so far and not yet received.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
