//! In-process topic bus

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::{EventPublisher, IntegrationEvent};
use crate::store::PortError;

const BUS_CAPACITY: usize = 256;

/// Fan-out bus: every subscriber sees every event and filters by topic
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IntegrationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntegrationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), PortError> {
        let topic = event.topic();
        // No subscribers is not an error: nobody is listening for this topic yet.
        if self.tx.send(event).is_err() {
            trace!(topic, "Event published with no subscribers");
        }
        Ok(())
    }
}
