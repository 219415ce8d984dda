//! Durable outbox for outgoing replication messages
//!
//! A message is written to the backend before it is handed to the
//! transport and cleared once the transport accepts it. Entries left
//! behind by a crash are re-published on the next start.
//!
//! Layout under the reserved outbox record:
//! - `pending`: JSON list of message digests awaiting publication
//! - `msg-<hex digest>`: the JSON-encoded message

use crate::backend::ConfidentialStorageBackend;
use crate::errors::StoreResult;
use crate::record::{message_digest, DAMessage, DataId, DataRecord};
use alloy_primitives::{Address, Bytes, B256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Reserved record id holding the outbox
pub const OUTBOX_RECORD_ID: DataId = DataId::new([
    0x3a, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
]);

const PENDING_KEY: &str = "pending";

fn outbox_record() -> DataRecord {
    DataRecord {
        id: OUTBOX_RECORD_ID,
        salt: Default::default(),
        decryption_condition: 0,
        allowed_peekers: vec![],
        allowed_stores: vec![],
        version: "outbox".to_string(),
        creation_tx: None,
        signature: Bytes::new(),
    }
}

fn message_key(digest: &B256) -> String {
    format!("msg-{}", hex::encode(digest))
}

#[derive(Clone)]
pub struct Outbox {
    backend: Arc<dyn ConfidentialStorageBackend>,
    record: DataRecord,
    lock: Arc<Mutex<()>>,
}

impl Outbox {
    pub fn new(backend: Arc<dyn ConfidentialStorageBackend>) -> Self {
        Self {
            backend,
            record: outbox_record(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn read_pending(&self) -> StoreResult<Vec<B256>> {
        match self
            .backend
            .retrieve(&self.record, Address::ZERO, PENDING_KEY)
            .await
        {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn write_pending(&self, pending: &[B256]) -> StoreResult<()> {
        let raw = serde_json::to_vec(pending)?;
        self.backend
            .store(&self.record, Address::ZERO, PENDING_KEY, &raw)
            .await?;
        Ok(())
    }

    /// Record a message as awaiting publication
    pub async fn push(&self, message: &DAMessage) -> StoreResult<B256> {
        let digest = message_digest(message)?;
        let raw = serde_json::to_vec(message)?;

        let _guard = self.lock.lock().await;
        self.backend
            .store(&self.record, Address::ZERO, &message_key(&digest), &raw)
            .await?;

        let mut pending = self.read_pending().await?;
        if !pending.contains(&digest) {
            pending.push(digest);
            self.write_pending(&pending).await?;
        }
        Ok(digest)
    }

    /// Mark a message as published
    pub async fn acknowledge(&self, digest: B256) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut pending = self.read_pending().await?;
        let before = pending.len();
        pending.retain(|d| d != &digest);
        if pending.len() == before {
            return Ok(());
        }
        self.write_pending(&pending).await?;

        // No delete in the backend contract; drop the payload instead
        self.backend
            .store(&self.record, Address::ZERO, &message_key(&digest), &[])
            .await?;
        Ok(())
    }

    /// Messages still awaiting publication, oldest first
    pub async fn pending(&self) -> StoreResult<Vec<DAMessage>> {
        let _guard = self.lock.lock().await;
        let mut messages = Vec::new();
        for digest in self.read_pending().await? {
            let raw = match self
                .backend
                .retrieve(&self.record, Address::ZERO, &message_key(&digest))
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(%digest, error = %e, "outbox entry unreadable");
                    continue;
                }
            };
            match serde_json::from_slice(&raw) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(%digest, error = %e, "outbox entry undecodable"),
            }
        }
        Ok(messages)
    }
}
