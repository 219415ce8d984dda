/*
    backend - Durable storage for confidential records

    Every implementation satisfies the same contract:
    - init_record never overwrites; a duplicate id is RecordAlreadyPresent
    - retrieve distinguishes an unknown record from a missing key
    - records are indexed by (namespace, decryption condition)

    Authorization is not checked here. The engine and the transactional
    store know the calling contract and enforce the allow-lists.

    Implementations:
    - MemoryBackend: mutex-protected maps, single node and tests
    - RedisBackend: values carry a TTL, index lives under the mempool record
    - SledBackend: embedded log-structured store, same layout as Redis,
      survives restarts
*/

mod kv;
mod memory;
mod redis_kv;
mod sled_kv;

#[cfg(test)]
pub(crate) mod contract;

pub use kv::{KvBackend, KvStore};
pub use memory::MemoryBackend;
pub use redis_kv::{RedisBackend, RedisKv, RedisStoreConfig};
pub use sled_kv::{SledBackend, SledKv};

use crate::errors::StoreResult;
use crate::record::{DataId, DataRecord};
use alloy_primitives::{address, Address, Bytes};
use async_trait::async_trait;

/// Pseudo-record that namespaces index entries
pub const MEMPOOL_RECORD_ID: DataId = DataId::new([
    0x39, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
]);

/// Caller used for index writes under the mempool record
pub const MEMPOOL_ADDRESS: Address = address!("0000000000000000000000000000000000004023");

/// Version string of the mempool pseudo-record
pub const MEMPOOL_VERSION: &str = "mempool";

/// Storage capability shared by every backend
#[async_trait]
pub trait ConfidentialStorageBackend: Send + Sync {
    async fn start(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Persist a new record and index it. Fails on duplicate id.
    async fn init_record(&self, record: &DataRecord) -> StoreResult<()>;

    /// Persist a keyed value under an existing record
    async fn store(
        &self,
        record: &DataRecord,
        caller: Address,
        key: &str,
        value: &[u8],
    ) -> StoreResult<DataRecord>;

    /// Read a keyed value
    async fn retrieve(&self, record: &DataRecord, caller: Address, key: &str) -> StoreResult<Bytes>;

    async fn fetch_record_by_id(&self, id: DataId) -> StoreResult<DataRecord>;

    /// All records initialized under `namespace` with decryption condition `block`
    async fn fetch_records_by_protocol_and_block(
        &self,
        block: u64,
        namespace: &str,
    ) -> StoreResult<Vec<DataRecord>>;
}

/// The reserved record under which index lists are stored
pub fn mempool_record() -> DataRecord {
    DataRecord {
        id: MEMPOOL_RECORD_ID,
        salt: Default::default(),
        decryption_condition: 0,
        allowed_peekers: vec![MEMPOOL_ADDRESS],
        allowed_stores: vec![MEMPOOL_ADDRESS],
        version: MEMPOOL_VERSION.to_string(),
        creation_tx: None,
        signature: Bytes::new(),
    }
}

/// `bid-<hex id>`
pub fn record_key(id: &DataId) -> String {
    format!("bid-{}", hex::encode(id))
}

/// `bid-data-<hex id>-<key>`
pub fn value_key(id: &DataId, key: &str) -> String {
    format!("bid-data-{}-{}", hex::encode(id), key)
}

/// Index entry key for one (namespace, block) pair
pub fn index_key(namespace: &str, block: u64) -> String {
    format!("protocol-{}-bn-{}", namespace, block)
}
