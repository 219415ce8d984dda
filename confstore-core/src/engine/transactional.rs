//! Per-execution overlay over committed engine state
//!
//! Records and writes staged here are invisible to every other
//! transactional store and to remote nodes until [`TransactionalStore::finalize`]
//! hands them to the engine.

use super::ConfidentialStoreEngine;
use crate::errors::{StoreError, StoreResult};
use crate::record::{resolve_record_id, DataId, DataRecord, StoreWrite};
use alloy_consensus::TxEnvelope;
use alloy_primitives::{Address, Bytes};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Lifecycle("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// Staged state; `finalized` flips under the same lock that guards the buffers
#[derive(Default)]
struct Staged {
    records: HashMap<DataId, DataRecord>,
    writes: Vec<StoreWrite>,
    finalized: bool,
}

impl Staged {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.finalized {
            return Err(StoreError::AlreadyFinalized);
        }
        Ok(())
    }
}

pub struct TransactionalStore {
    engine: Arc<ConfidentialStoreEngine>,
    source_tx: TxEnvelope,
    staged: Mutex<Staged>,
}

impl TransactionalStore {
    pub(super) fn new(engine: Arc<ConfidentialStoreEngine>, source_tx: TxEnvelope) -> Self {
        Self {
            engine,
            source_tx,
            staged: Mutex::new(Staged::default()),
        }
    }

    pub fn source_tx(&self) -> &TxEnvelope {
        &self.source_tx
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Staged>> {
        self.staged.lock().map_err(handle_poison)
    }

    /// Staged record first, then committed state
    async fn resolve(&self, id: DataId) -> StoreResult<(DataRecord, bool)> {
        let staged = self.lock()?.records.get(&id).cloned();
        if let Some(record) = staged {
            return Ok((record, true));
        }
        Ok((self.engine.fetch_record_by_id(id).await?, false))
    }

    /// Stage a new record created by this store's transaction
    pub async fn init_record(&self, record: DataRecord) -> StoreResult<DataRecord> {
        self.lock()?.ensure_open()?;
        let id = resolve_record_id(&record)?;
        let initialized = self.engine.initialize_bid(record, &self.source_tx)?;

        let mut staged = self.lock()?;
        staged.ensure_open()?;
        if staged.records.contains_key(&id) {
            return Err(StoreError::RecordAlreadyPresent(id));
        }
        staged.records.insert(id, initialized.clone());
        Ok(initialized)
    }

    /// Stage a keyed value; `caller` must be an allowed peeker of the record
    pub async fn store(
        &self,
        id: DataId,
        caller: Address,
        key: &str,
        value: &[u8],
    ) -> StoreResult<DataRecord> {
        self.lock()?.ensure_open()?;
        let (record, _) = self.resolve(id).await?;
        if !record.is_peeker(&caller) {
            return Err(StoreError::Unauthorized {
                id,
                caller,
                action: "store",
            });
        }

        // finalize may have run while the record was being fetched
        let mut staged = self.lock()?;
        staged.ensure_open()?;
        staged.writes.push(StoreWrite {
            record: record.clone(),
            caller,
            key: key.to_string(),
            value: Bytes::copy_from_slice(value),
        });
        Ok(record)
    }

    /// Read a keyed value, preferring this store's own latest write
    pub async fn retrieve(&self, id: DataId, caller: Address, key: &str) -> StoreResult<Bytes> {
        let (record, staged) = self.resolve(id).await?;
        if !record.is_peeker(&caller) {
            return Err(StoreError::Unauthorized {
                id,
                caller,
                action: "retrieve",
            });
        }

        let own_write = self
            .lock()?
            .writes
            .iter()
            .rev()
            .find(|w| w.record.id == id && w.key == key)
            .map(|w| w.value.clone());
        if let Some(value) = own_write {
            return Ok(value);
        }

        if staged {
            return Err(StoreError::KeyNotFound {
                id,
                key: key.to_string(),
            });
        }
        self.engine.retrieve(id, caller, key).await
    }

    pub async fn fetch_record_by_id(&self, id: DataId) -> StoreResult<DataRecord> {
        Ok(self.resolve(id).await?.0)
    }

    /// Committed records plus those staged in this store
    pub async fn fetch_records_by_protocol_and_block(
        &self,
        block: u64,
        namespace: &str,
    ) -> StoreResult<Vec<DataRecord>> {
        let mut records = self
            .engine
            .fetch_records_by_protocol_and_block(block, namespace)
            .await?;

        let staged = self.lock()?;
        for record in staged.records.values() {
            if record.decryption_condition == block
                && record.version == namespace
                && !records.iter().any(|r| r.id == record.id)
            {
                records.push(record.clone());
            }
        }
        Ok(records)
    }

    /// Commit staged state through the engine. Only the first call proceeds.
    pub async fn finalize(&self) -> StoreResult<()> {
        let (records, writes) = {
            let mut staged = self.lock()?;
            staged.ensure_open()?;
            staged.finalized = true;
            let records: Vec<DataRecord> =
                std::mem::take(&mut staged.records).into_values().collect();
            (records, std::mem::take(&mut staged.writes))
        };
        self.engine.finalize(&self.source_tx, records, writes).await
    }
}
