use super::{StoreTransportTopic, Subscription, SUBSCRIPTION_CAPACITY};
use crate::errors::StoreResult;
use crate::record::DAMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared in-process topic
///
/// Several [`MockTransport`]s built from the same hub see each other's
/// messages, which is how multi-engine replication is exercised in tests.
#[derive(Clone)]
pub struct MockHub {
    tx: broadcast::Sender<DAMessage>,
}

impl MockHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process transport over a [`MockHub`]
#[derive(Clone, Default)]
pub struct MockTransport {
    hub: Arc<MockHub>,
}

impl MockTransport {
    pub fn new(hub: Arc<MockHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<MockHub> {
        &self.hub
    }
}

#[async_trait]
impl StoreTransportTopic for MockTransport {
    async fn subscribe(&self) -> StoreResult<Subscription> {
        Ok(Subscription::new(self.hub.tx.subscribe()))
    }

    async fn publish(&self, message: DAMessage) -> StoreResult<()> {
        // Publishing with no subscribers is not an error on a real broker either
        let _ = self.hub.tx.send(message);
        Ok(())
    }
}
