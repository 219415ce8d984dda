/*
    transport - Pub/sub topic carrying replication messages

    Delivery is best-effort and at-most-once: no acknowledgement and no
    retry inside the transport. Every subscriber receives every message
    published after it subscribed.

    Implementations:
    - MockTransport: in-process broadcast hub shared by several engines
    - RedisPubSubTransport: Redis PUBLISH/SUBSCRIBE on `store:upsert`
*/

mod mock;
mod redis_pubsub;

pub use mock::{MockHub, MockTransport};
pub use redis_pubsub::{RedisPubSubTransport, RedisTransportConfig};

use crate::errors::StoreResult;
use crate::record::DAMessage;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

/// Redis channel carrying replication messages
pub const UPSERT_CHANNEL: &str = "store:upsert";

/// Buffered messages per subscriber before it starts lagging
pub const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Publish/subscribe topic for [`DAMessage`]s
#[async_trait]
pub trait StoreTransportTopic: Send + Sync {
    async fn start(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Open an independent subscription. Dropping it cancels it.
    async fn subscribe(&self) -> StoreResult<Subscription>;

    /// Fire a message at the topic. No delivery guarantee.
    async fn publish(&self, message: DAMessage) -> StoreResult<()>;
}

/// One subscriber's view of the topic
pub struct Subscription {
    rx: broadcast::Receiver<DAMessage>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<DAMessage>) -> Self {
        Self { rx }
    }

    /// Next message, or None once the topic is closed
    ///
    /// A subscriber that falls behind skips the overwritten messages.
    pub async fn recv(&mut self) -> Option<DAMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscription lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Detach from the topic
    pub fn cancel(self) {}
}
