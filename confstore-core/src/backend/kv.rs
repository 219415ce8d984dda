/*
    kv.rs - Record layout over a plain key/value store

    Shared by the Redis and sled backends:
    - record metadata at bid-<hex id>, written only if absent
    - keyed values at bid-data-<hex id>-<key>
    - one index list per (namespace, block), stored as an ordinary keyed
      value under the mempool pseudo-record
*/

use super::{
    index_key, mempool_record, record_key, value_key, ConfidentialStorageBackend, MEMPOOL_ADDRESS,
};
use crate::errors::{StoreError, StoreResult};
use crate::record::{DataId, DataRecord};
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

/// Minimal key/value capability a [`KvBackend`] is built on
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn start(&self) -> StoreResult<()>;

    async fn stop(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Write only if the key is absent. Returns false when it already existed.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool>;
}

/// Confidential storage backend over any [`KvStore`]
pub struct KvBackend<S> {
    kv: S,
    /// Serializes index read-modify-write cycles within this process
    index_lock: Mutex<()>,
}

impl<S: KvStore> KvBackend<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            index_lock: Mutex::new(()),
        }
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    async fn read_index(&self, key: &str) -> StoreResult<Vec<DataId>> {
        let mempool = mempool_record();
        match self.retrieve(&mempool, MEMPOOL_ADDRESS, key).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn append_to_index(&self, record: &DataRecord) -> StoreResult<()> {
        let key = index_key(&record.version, record.decryption_condition);
        let _guard = self.index_lock.lock().await;

        let mut ids = self.read_index(&key).await?;
        if !ids.contains(&record.id) {
            ids.push(record.id);
        }
        let encoded = serde_json::to_vec(&ids)?;
        self.store(&mempool_record(), MEMPOOL_ADDRESS, &key, &encoded)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S: KvStore> ConfidentialStorageBackend for KvBackend<S> {
    async fn start(&self) -> StoreResult<()> {
        self.kv.start().await
    }

    async fn stop(&self) -> StoreResult<()> {
        self.kv.stop().await
    }

    async fn init_record(&self, record: &DataRecord) -> StoreResult<()> {
        let encoded = serde_json::to_vec(record)?;
        if !self.kv.put_if_absent(&record_key(&record.id), &encoded).await? {
            return Err(StoreError::RecordAlreadyPresent(record.id));
        }
        self.append_to_index(record).await
    }

    async fn store(
        &self,
        record: &DataRecord,
        _caller: Address,
        key: &str,
        value: &[u8],
    ) -> StoreResult<DataRecord> {
        self.kv.put(&value_key(&record.id, key), value).await?;
        Ok(record.clone())
    }

    async fn retrieve(&self, record: &DataRecord, _caller: Address, key: &str) -> StoreResult<Bytes> {
        if let Some(value) = self.kv.get(&value_key(&record.id, key)).await? {
            return Ok(value.into());
        }
        if record.id != super::MEMPOOL_RECORD_ID
            && self.kv.get(&record_key(&record.id)).await?.is_none()
        {
            return Err(StoreError::RecordNotFound(record.id));
        }
        Err(StoreError::KeyNotFound {
            id: record.id,
            key: key.to_string(),
        })
    }

    async fn fetch_record_by_id(&self, id: DataId) -> StoreResult<DataRecord> {
        match self.kv.get(&record_key(&id)).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Err(StoreError::RecordNotFound(id)),
        }
    }

    async fn fetch_records_by_protocol_and_block(
        &self,
        block: u64,
        namespace: &str,
    ) -> StoreResult<Vec<DataRecord>> {
        let ids = self.read_index(&index_key(namespace, block)).await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_record_by_id(id).await {
                Ok(record) => records.push(record),
                // Index entries can outlive their record when the record expired first
                Err(StoreError::RecordNotFound(_)) => {
                    warn!(%id, namespace, block, "indexed record is missing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }
}
