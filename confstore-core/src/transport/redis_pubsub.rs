use super::{StoreTransportTopic, Subscription, SUBSCRIPTION_CAPACITY, UPSERT_CHANNEL};
use crate::errors::{StoreError, StoreResult};
use crate::record::DAMessage;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection settings for the Redis pub/sub transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisTransportConfig {
    pub url: String,

    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl Default for RedisTransportConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

struct Running {
    publisher: MultiplexedConnection,
    stop_tx: oneshot::Sender<()>,
    forwarder: JoinHandle<()>,
}

/// Transport over Redis PUBLISH/SUBSCRIBE
///
/// One Redis subscription per transport; its messages are decoded once and
/// fanned out to local subscribers through a broadcast channel.
pub struct RedisPubSubTransport {
    client: Client,
    config: RedisTransportConfig,
    local_tx: broadcast::Sender<DAMessage>,
    running: Mutex<Option<Running>>,
}

impl RedisPubSubTransport {
    pub fn new(config: RedisTransportConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let (local_tx, _rx) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Ok(Self {
            client,
            config,
            local_tx,
            running: Mutex::new(None),
        })
    }

    async fn connect(&self) -> StoreResult<(MultiplexedConnection, redis::aio::PubSub)> {
        let timeout = self.config.connection_timeout;
        let connect = async {
            let publisher = self.client.get_multiplexed_tokio_connection().await?;
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(UPSERT_CHANNEL).await?;
            Ok::<_, redis::RedisError>((publisher, pubsub))
        };

        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result.map_err(|e| StoreError::Transport(e.to_string())),
            Err(_) => Err(StoreError::Transport(format!(
                "redis pub/sub connection timed out after {:?}",
                timeout
            ))),
        }
    }
}

/// Decode one raw payload; malformed payloads are dropped
fn decode_payload(payload: &[u8]) -> Option<DAMessage> {
    match serde_json::from_slice(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "dropping malformed replication payload");
            None
        }
    }
}

#[async_trait]
impl StoreTransportTopic for RedisPubSubTransport {
    async fn start(&self) -> StoreResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(StoreError::Lifecycle("redis transport already started".to_string()));
        }

        let (publisher, pubsub) = self.connect().await?;
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let local_tx = self.local_tx.clone();

        let forwarder = tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    next = messages.next() => {
                        let Some(msg) = next else {
                            warn!("redis subscription closed");
                            break;
                        };
                        let payload: Vec<u8> = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "unreadable pub/sub payload");
                                continue;
                            }
                        };
                        if let Some(message) = decode_payload(&payload) {
                            let _ = local_tx.send(message);
                        }
                    }
                }
            }
            debug!("redis subscription forwarder exited");
        });

        *running = Some(Running {
            publisher,
            stop_tx,
            forwarder,
        });
        info!(url = %self.config.url, channel = UPSERT_CHANNEL, "redis transport started");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let _ = running.stop_tx.send(());
        if let Err(e) = running.forwarder.await {
            warn!(error = %e, "redis forwarder task failed");
        }
        info!("redis transport stopped");
        Ok(())
    }

    async fn subscribe(&self) -> StoreResult<Subscription> {
        Ok(Subscription::new(self.local_tx.subscribe()))
    }

    async fn publish(&self, message: DAMessage) -> StoreResult<()> {
        let mut conn = match self.running.lock().await.as_ref() {
            Some(running) => running.publisher.clone(),
            None => {
                return Err(StoreError::Lifecycle(
                    "redis transport is not started".to_string(),
                ))
            }
        };

        let payload = serde_json::to_vec(&message)?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(UPSERT_CHANNEL)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        debug!(receivers, "replication message published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{signed_tx, TestAccount};
    use alloy_primitives::Bytes;
    use uuid::Uuid;

    #[test]
    fn test_decode_payload_roundtrip_and_garbage() {
        let message = DAMessage {
            source_tx: signed_tx(TestAccount::Alice, 1),
            store_writes: vec![],
            store_uuid: Uuid::new_v4(),
            signature: Bytes::from_static(&[1, 2, 3]),
        };
        let encoded = serde_json::to_vec(&message).unwrap();
        assert_eq!(decode_payload(&encoded), Some(message));
        assert_eq!(decode_payload(b"{not json"), None);
    }

    #[tokio::test]
    async fn test_publish_before_start_fails() {
        let transport = RedisPubSubTransport::new(RedisTransportConfig::default()).unwrap();
        let message = DAMessage {
            source_tx: signed_tx(TestAccount::Alice, 1),
            store_writes: vec![],
            store_uuid: Uuid::new_v4(),
            signature: Bytes::new(),
        };
        let err = transport.publish(message).await.unwrap_err();
        assert!(matches!(err, StoreError::Lifecycle(_)));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let transport = RedisPubSubTransport::new(RedisTransportConfig::default()).unwrap();
        assert!(transport.stop().await.is_ok());
    }

    /// Runs only when CONFSTORE_TEST_REDIS_URL points at a disposable Redis
    #[tokio::test]
    async fn test_redis_round_trip() {
        let Ok(url) = std::env::var("CONFSTORE_TEST_REDIS_URL") else {
            return;
        };
        let transport = RedisPubSubTransport::new(RedisTransportConfig {
            url,
            ..Default::default()
        })
        .unwrap();
        transport.start().await.unwrap();
        let mut sub = transport.subscribe().await.unwrap();

        let message = DAMessage {
            source_tx: signed_tx(TestAccount::Bob, 9),
            store_writes: vec![],
            store_uuid: Uuid::new_v4(),
            signature: Bytes::new(),
        };
        transport.publish(message.clone()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, message);
        transport.stop().await.unwrap();
    }
}
