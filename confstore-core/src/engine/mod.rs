/*
    engine - Confidential Store Engine

    The single authoritative coordinator for record lifecycle and
    replication on one node.

    Flow:
    1. An execution opens a TransactionalStore bound to its transaction
    2. Reads fall through to committed state, writes are buffered
    3. finalize() hands the buffer to the engine, which persists it
    4. The engine signs a DAMessage and publishes it without waiting
    5. Remote engines consume the topic and apply validated writes

    One consumption task per engine drains the transport subscription, so
    inbound messages are applied strictly one at a time.
*/

mod outbox;
mod replication;
mod transactional;

pub use outbox::{Outbox, OUTBOX_RECORD_ID};
pub use transactional::TransactionalStore;

use crate::backend::ConfidentialStorageBackend;
use crate::errors::{StoreError, StoreResult};
use crate::metrics::{record_counter, Timer};
use crate::record::{
    message_digest, resolve_record_id, signable_message_bytes, signable_record_bytes, DAMessage, DataId,
    DataRecord, StoreWrite,
};
use crate::signer::{ChainSigner, DaSigner};
use crate::transport::{StoreTransportTopic, Subscription};
use alloy_consensus::TxEnvelope;
use alloy_primitives::{Address, Bytes};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Construction options for an engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Identifies this engine instance on the topic
    pub store_uuid: Uuid,

    /// Persist outgoing messages until they are published
    pub enable_outbox: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            store_uuid: Uuid::new_v4(),
            enable_outbox: false,
        }
    }
}

struct Worker {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Per-node coordinator over a backend, a transport and two signers
pub struct ConfidentialStoreEngine {
    backend: Arc<dyn ConfidentialStorageBackend>,
    transport: Arc<dyn StoreTransportTopic>,
    da_signer: Arc<dyn DaSigner>,
    chain_signer: Arc<dyn ChainSigner>,
    store_uuid: Uuid,
    local_addresses: HashSet<Address>,
    outbox: Option<Outbox>,
    worker: Mutex<Option<Worker>>,
}

impl ConfidentialStoreEngine {
    pub fn new(
        backend: Arc<dyn ConfidentialStorageBackend>,
        transport: Arc<dyn StoreTransportTopic>,
        da_signer: Arc<dyn DaSigner>,
        chain_signer: Arc<dyn ChainSigner>,
        options: EngineOptions,
    ) -> Arc<Self> {
        let local_addresses = da_signer.local_addresses().into_iter().collect();
        let outbox = options
            .enable_outbox
            .then(|| Outbox::new(Arc::clone(&backend)));

        Arc::new(Self {
            backend,
            transport,
            da_signer,
            chain_signer,
            store_uuid: options.store_uuid,
            local_addresses,
            outbox,
            worker: Mutex::new(None),
        })
    }

    pub fn store_uuid(&self) -> Uuid {
        self.store_uuid
    }

    pub fn local_addresses(&self) -> &HashSet<Address> {
        &self.local_addresses
    }

    /// Start backend and transport, then the consumption task
    ///
    /// Anything started before a failing step is stopped again before the
    /// error is returned.
    pub async fn start(self: &Arc<Self>) -> StoreResult<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(StoreError::Lifecycle("engine already started".to_string()));
        }

        self.backend.start().await?;

        if let Err(e) = self.transport.start().await {
            self.stop_backend().await;
            return Err(e);
        }

        let subscription = match self.transport.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.stop_transport().await;
                self.stop_backend().await;
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(self).consume(subscription, shutdown_rx));
        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });
        drop(worker);

        info!(store_uuid = %self.store_uuid, "confidential store engine started");

        if let Some(outbox) = &self.outbox {
            self.republish_pending(outbox).await;
        }
        Ok(())
    }

    /// Stop the consumption task, the transport and the backend
    ///
    /// Safe to call repeatedly, and after a failed start.
    pub async fn stop(&self) -> StoreResult<()> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };

        let _ = worker.shutdown_tx.send(());
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "consumption task ended abnormally");
        }

        let transport_result = self.transport.stop().await;
        let backend_result = self.backend.stop().await;
        info!(store_uuid = %self.store_uuid, "confidential store engine stopped");
        transport_result.and(backend_result)
    }

    async fn stop_transport(&self) {
        if let Err(e) = self.transport.stop().await {
            warn!(error = %e, "failed to stop transport during start rollback");
        }
    }

    async fn stop_backend(&self) {
        if let Err(e) = self.backend.stop().await {
            warn!(error = %e, "failed to stop backend during start rollback");
        }
    }

    async fn consume(
        self: Arc<Self>,
        mut subscription: Subscription,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                next = subscription.recv() => {
                    let Some(message) = next else {
                        warn!("replication topic closed");
                        break;
                    };
                    if let Err(e) = self.new_message(message).await {
                        record_counter("confstore.messages.rejected", 1);
                        warn!(error = %e, "rejected replication message");
                    }
                }
            }
        }
        debug!(store_uuid = %self.store_uuid, "consumption loop exited");
    }

    /// Open a transactional overlay for one execution of `source_tx`
    pub fn new_transactional_store(self: &Arc<Self>, source_tx: TxEnvelope) -> TransactionalStore {
        TransactionalStore::new(Arc::clone(self), source_tx)
    }

    /// Validate or derive the record id, attach the creation transaction and sign
    ///
    /// Nothing is persisted here.
    pub fn initialize_bid(
        &self,
        record: DataRecord,
        creation_tx: &TxEnvelope,
    ) -> StoreResult<DataRecord> {
        let id = resolve_record_id(&record)?;
        let signer = self.chain_signer.sender(creation_tx)?;

        let mut record = DataRecord {
            id,
            creation_tx: Some(creation_tx.clone()),
            signature: Bytes::new(),
            ..record
        };
        let signable = signable_record_bytes(&record)?;
        record.signature = self.da_signer.sign(signer, &signable)?;
        Ok(record)
    }

    /// Persist a keyed value. Callers are trusted to have checked access.
    pub async fn store(
        &self,
        id: DataId,
        caller: Address,
        key: &str,
        value: &[u8],
    ) -> StoreResult<DataRecord> {
        let record = self.backend.fetch_record_by_id(id).await?;
        self.backend.store(&record, caller, key, value).await
    }

    /// Read a keyed value; `caller` must be an allowed peeker
    pub async fn retrieve(&self, id: DataId, caller: Address, key: &str) -> StoreResult<Bytes> {
        let record = self.backend.fetch_record_by_id(id).await?;
        if !record.is_peeker(&caller) {
            return Err(StoreError::Unauthorized {
                id,
                caller,
                action: "retrieve",
            });
        }
        self.backend.retrieve(&record, caller, key).await
    }

    pub async fn fetch_record_by_id(&self, id: DataId) -> StoreResult<DataRecord> {
        self.backend.fetch_record_by_id(id).await
    }

    pub async fn fetch_records_by_protocol_and_block(
        &self,
        block: u64,
        namespace: &str,
    ) -> StoreResult<Vec<DataRecord>> {
        self.backend
            .fetch_records_by_protocol_and_block(block, namespace)
            .await
    }

    /// Commit new records and writes, then publish them
    ///
    /// A duplicate record aborts the batch and nothing is published.
    /// Records and writes applied before the failure stay applied.
    pub async fn finalize(
        &self,
        tx: &TxEnvelope,
        new_records: Vec<DataRecord>,
        writes: Vec<StoreWrite>,
    ) -> StoreResult<()> {
        let timer = Timer::new("confstore.finalize.duration_ms");
        let signer = self
            .chain_signer
            .sender(tx)
            .map_err(|_| StoreError::UnsignedFinalize)?;

        // Signed before anything is committed
        let message = if writes.is_empty() {
            None
        } else {
            let mut message = DAMessage {
                source_tx: tx.clone(),
                store_writes: writes.clone(),
                store_uuid: self.store_uuid,
                signature: Bytes::new(),
            };
            message.signature = self
                .da_signer
                .sign(signer, &signable_message_bytes(&message)?)?;
            Some(message)
        };

        // Outbox entry precedes the commit
        let outboxed = match (&self.outbox, &message) {
            (Some(outbox), Some(message)) => Some((outbox, outbox.push(message).await?)),
            _ => None,
        };

        if let Err(e) = self.commit(&new_records, &writes).await {
            if let Some((outbox, digest)) = outboxed {
                if let Err(clear) = outbox.acknowledge(digest).await {
                    warn!(%digest, error = %clear, "failed to drop outbox entry of aborted batch");
                }
            }
            return Err(e);
        }
        record_counter("confstore.finalize.total", 1);
        debug!(
            records = new_records.len(),
            writes = writes.len(),
            %signer,
            "finalized confidential batch"
        );

        if let Some(message) = message {
            self.spawn_publish(message);
        }
        timer.stop();
        Ok(())
    }

    async fn commit(&self, new_records: &[DataRecord], writes: &[StoreWrite]) -> StoreResult<()> {
        for record in new_records {
            self.backend.init_record(record).await?;
            record_counter("confstore.records.initialized", 1);
        }
        for write in writes {
            self.backend
                .store(&write.record, write.caller, &write.key, &write.value)
                .await?;
            record_counter("confstore.writes.committed", 1);
        }
        Ok(())
    }

    /// Publish without blocking the caller
    fn spawn_publish(&self, message: DAMessage) {
        let transport = Arc::clone(&self.transport);
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            let digest = message_digest(&message);
            match transport.publish(message).await {
                Ok(()) => {
                    record_counter("confstore.messages.published", 1);
                    if let (Some(outbox), Ok(digest)) = (outbox, digest) {
                        if let Err(e) = outbox.acknowledge(digest).await {
                            warn!(error = %e, "failed to clear outbox entry");
                        }
                    }
                }
                Err(e) => {
                    record_counter("confstore.messages.publish_failed", 1);
                    warn!(error = %e, "failed to publish replication message");
                }
            }
        });
    }

    async fn republish_pending(&self, outbox: &Outbox) {
        match outbox.pending().await {
            Ok(messages) => {
                if !messages.is_empty() {
                    info!(count = messages.len(), "re-publishing outbox entries");
                }
                for message in messages {
                    self.spawn_publish(message);
                }
            }
            Err(e) => warn!(error = %e, "outbox recovery sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::record::{derive_record_id, signable_record_bytes};
    use crate::signer::{EthChainSigner, LocalDaSigner};
    use crate::test_utils::{sample_record, signed_tx, unsigned_tx, TestAccount};
    use crate::transport::MockTransport;
    use async_trait::async_trait;

    fn engine_for(account: TestAccount) -> Arc<ConfidentialStoreEngine> {
        ConfidentialStoreEngine::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MockTransport::default()),
            Arc::new(LocalDaSigner::new([account.signer()])),
            Arc::new(EthChainSigner),
            EngineOptions::default(),
        )
    }

    #[test]
    fn test_initialize_bid_derives_id_and_signs() {
        let engine = engine_for(TestAccount::Alice);
        let tx = signed_tx(TestAccount::Alice, 0);

        let record = sample_record(TestAccount::Alice);
        let initialized = engine.initialize_bid(record.clone(), &tx).unwrap();

        assert_eq!(initialized.id, derive_record_id(&record).unwrap());
        assert_eq!(initialized.creation_tx.as_ref(), Some(&tx));

        let recovered = LocalDaSigner::default()
            .sender(&signable_record_bytes(&initialized).unwrap(), &initialized.signature)
            .unwrap();
        assert_eq!(recovered, TestAccount::Alice.address());
    }

    #[test]
    fn test_initialize_bid_rejects_mismatched_id() {
        let engine = engine_for(TestAccount::Alice);
        let mut record = sample_record(TestAccount::Alice);
        record.id = DataId::repeat_byte(1);

        let err = engine
            .initialize_bid(record, &signed_tx(TestAccount::Alice, 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::IdMismatch { .. }));
    }

    #[test]
    fn test_initialize_bid_requires_local_key_for_creator() {
        let engine = engine_for(TestAccount::Alice);
        let err = engine
            .initialize_bid(sample_record(TestAccount::Bob), &signed_tx(TestAccount::Bob, 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::Signing(_)));
    }

    #[tokio::test]
    async fn test_finalize_with_unsigned_tx_is_rejected() {
        let engine = engine_for(TestAccount::Alice);
        let record = engine
            .initialize_bid(sample_record(TestAccount::Alice), &signed_tx(TestAccount::Alice, 0))
            .unwrap();

        let err = engine
            .finalize(&unsigned_tx(0), vec![record.clone()], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsignedFinalize));

        // Nothing reached the backend
        assert!(engine.fetch_record_by_id(record.id).await.is_err());
    }

    #[tokio::test]
    async fn test_retrieve_enforces_peekers() {
        let engine = engine_for(TestAccount::Alice);
        let tx = signed_tx(TestAccount::Alice, 0);
        let record = engine
            .initialize_bid(sample_record(TestAccount::Alice), &tx)
            .unwrap();
        let peeker = record.allowed_peekers[0];

        engine.finalize(&tx, vec![record.clone()], vec![]).await.unwrap();
        engine.store(record.id, peeker, "k", b"v").await.unwrap();

        assert_eq!(&engine.retrieve(record.id, peeker, "k").await.unwrap()[..], b"v");

        let err = engine
            .retrieve(record.id, TestAccount::Deployer.address(), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_store_unknown_record_is_not_found() {
        let engine = engine_for(TestAccount::Alice);
        let err = engine
            .store(DataId::repeat_byte(9), Address::ZERO, "k", b"v")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_record_aborts_finalize() {
        let engine = engine_for(TestAccount::Alice);
        let tx = signed_tx(TestAccount::Alice, 0);
        let record = engine
            .initialize_bid(sample_record(TestAccount::Alice), &tx)
            .unwrap();

        engine.finalize(&tx, vec![record.clone()], vec![]).await.unwrap();
        let err = engine
            .finalize(&tx, vec![record], vec![])
            .await
            .unwrap_err();
        assert!(err.is_already_present());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent_safe() {
        let engine = engine_for(TestAccount::Alice);
        engine.stop().await.unwrap();

        engine.start().await.unwrap();
        assert!(matches!(
            engine.start().await.unwrap_err(),
            StoreError::Lifecycle(_)
        ));

        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
    }

    struct FailingTransport;

    #[async_trait]
    impl StoreTransportTopic for FailingTransport {
        async fn start(&self) -> StoreResult<()> {
            Err(StoreError::Transport("broker unreachable".to_string()))
        }

        async fn subscribe(&self) -> StoreResult<Subscription> {
            Err(StoreError::Transport("broker unreachable".to_string()))
        }

        async fn publish(&self, _message: DAMessage) -> StoreResult<()> {
            Err(StoreError::Transport("broker unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_partial_start_rolls_back() {
        let engine = ConfidentialStoreEngine::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(FailingTransport),
            Arc::new(LocalDaSigner::new([TestAccount::Alice.signer()])),
            Arc::new(EthChainSigner),
            EngineOptions::default(),
        );

        assert!(matches!(
            engine.start().await.unwrap_err(),
            StoreError::Transport(_)
        ));
        engine.stop().await.unwrap();
    }

    fn outbox_engine(backend: Arc<MemoryBackend>) -> Arc<ConfidentialStoreEngine> {
        ConfidentialStoreEngine::new(
            backend,
            Arc::new(FailingTransport),
            Arc::new(LocalDaSigner::new([TestAccount::Alice.signer()])),
            Arc::new(EthChainSigner),
            EngineOptions {
                enable_outbox: true,
                ..Default::default()
            },
        )
    }

    fn charlie_write(record: &DataRecord) -> StoreWrite {
        StoreWrite {
            record: record.clone(),
            caller: TestAccount::Charlie.address(),
            key: "xx".to_string(),
            value: Bytes::from_static(&[0x44]),
        }
    }

    #[tokio::test]
    async fn test_committed_batch_is_outboxed_until_published() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = outbox_engine(backend.clone());
        let tx = signed_tx(TestAccount::Alice, 0);
        let record = engine
            .initialize_bid(sample_record(TestAccount::Alice), &tx)
            .unwrap();

        engine
            .finalize(&tx, vec![record.clone()], vec![charlie_write(&record)])
            .await
            .unwrap();

        let pending = Outbox::new(backend).pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].store_writes, vec![charlie_write(&record)]);
    }

    #[tokio::test]
    async fn test_aborted_batch_leaves_no_outbox_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = outbox_engine(backend.clone());
        let tx = signed_tx(TestAccount::Alice, 0);
        let record = engine
            .initialize_bid(sample_record(TestAccount::Alice), &tx)
            .unwrap();
        engine.finalize(&tx, vec![record.clone()], vec![]).await.unwrap();

        let err = engine
            .finalize(&tx, vec![record.clone()], vec![charlie_write(&record)])
            .await
            .unwrap_err();
        assert!(err.is_already_present());
        assert!(Outbox::new(backend).pending().await.unwrap().is_empty());
    }
}
