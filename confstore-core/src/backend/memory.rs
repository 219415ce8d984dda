use super::ConfidentialStorageBackend;
use crate::errors::{StoreError, StoreResult};
use crate::record::{DataId, DataRecord};
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Helper to convert poison errors into StoreError
fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Backend("Lock poisoned: a thread panicked while holding the lock".to_string())
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<DataId, DataRecord>,
    values: HashMap<(DataId, String), Bytes>,
    index: HashMap<(String, u64), Vec<DataId>>,
}

/// In-process backend. Nothing is persisted across restarts.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfidentialStorageBackend for MemoryBackend {
    async fn init_record(&self, record: &DataRecord) -> StoreResult<()> {
        let mut state = self.state.write().map_err(handle_poison)?;
        if state.records.contains_key(&record.id) {
            return Err(StoreError::RecordAlreadyPresent(record.id));
        }

        state.records.insert(record.id, record.clone());
        state
            .index
            .entry((record.version.clone(), record.decryption_condition))
            .or_default()
            .push(record.id);
        Ok(())
    }

    async fn store(
        &self,
        record: &DataRecord,
        _caller: Address,
        key: &str,
        value: &[u8],
    ) -> StoreResult<DataRecord> {
        let mut state = self.state.write().map_err(handle_poison)?;
        state
            .values
            .insert((record.id, key.to_string()), Bytes::copy_from_slice(value));
        Ok(record.clone())
    }

    async fn retrieve(&self, record: &DataRecord, _caller: Address, key: &str) -> StoreResult<Bytes> {
        let state = self.state.read().map_err(handle_poison)?;
        if let Some(value) = state.values.get(&(record.id, key.to_string())) {
            return Ok(value.clone());
        }
        if !state.records.contains_key(&record.id) {
            return Err(StoreError::RecordNotFound(record.id));
        }
        Err(StoreError::KeyNotFound {
            id: record.id,
            key: key.to_string(),
        })
    }

    async fn fetch_record_by_id(&self, id: DataId) -> StoreResult<DataRecord> {
        let state = self.state.read().map_err(handle_poison)?;
        state
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::RecordNotFound(id))
    }

    async fn fetch_records_by_protocol_and_block(
        &self,
        block: u64,
        namespace: &str,
    ) -> StoreResult<Vec<DataRecord>> {
        let state = self.state.read().map_err(handle_poison)?;
        let ids = match state.index.get(&(namespace.to_string(), block)) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect())
    }
}
