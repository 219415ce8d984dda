//! Intake of replication messages from other engines
//!
//! A message is either applied in full after validation, or rejected as a
//! whole. Individual writes that fail to persist after validation are
//! logged and skipped.

use super::ConfidentialStoreEngine;
use crate::errors::{StoreError, StoreResult};
use crate::metrics::record_counter;
use crate::record::{derive_record_id, signable_message_bytes, signable_record_bytes, DAMessage, StoreWrite};
use alloy_primitives::Address;
use tracing::{debug, error, trace};

impl ConfidentialStoreEngine {
    /// Validate and apply one inbound message
    pub async fn new_message(&self, message: DAMessage) -> StoreResult<()> {
        record_counter("confstore.messages.received", 1);

        let message_signer = self
            .da_signer
            .sender(&signable_message_bytes(&message)?, &message.signature)?;

        // Unsigned source transactions surface here
        let tx_signer = self.chain_signer.sender(&message.source_tx)?;
        if message_signer != tx_signer {
            return Err(StoreError::SignerMismatch {
                expected: tx_signer,
                recovered: message_signer,
            });
        }

        if message.store_uuid == self.store_uuid && self.local_addresses.contains(&message_signer) {
            record_counter("confstore.messages.echo_dropped", 1);
            trace!(store_uuid = %self.store_uuid, "ignoring own replication message");
            return Ok(());
        }

        for write in &message.store_writes {
            self.validate_write(write, message_signer)?;
        }

        debug!(
            writes = message.store_writes.len(),
            signer = %message_signer,
            origin = %message.store_uuid,
            "applying replication message"
        );
        for write in message.store_writes {
            self.apply_write(write).await;
        }
        Ok(())
    }

    fn validate_write(&self, write: &StoreWrite, message_signer: Address) -> StoreResult<()> {
        let record = &write.record;

        let derived = derive_record_id(record)?;
        if derived != record.id {
            return Err(StoreError::IdMismatch {
                supplied: record.id,
                derived,
            });
        }

        let creation_tx = record.creation_tx.as_ref().ok_or_else(|| {
            StoreError::UnsignedTransaction(format!("record {} has no creation transaction", record.id))
        })?;
        let creator = self.chain_signer.sender(creation_tx)?;

        let record_signer = self
            .da_signer
            .sender(&signable_record_bytes(record)?, &record.signature)?;
        if record_signer != creator {
            return Err(StoreError::SignerMismatch {
                expected: creator,
                recovered: record_signer,
            });
        }

        if !record.is_store(&message_signer) {
            return Err(StoreError::Unauthorized {
                id: record.id,
                caller: message_signer,
                action: "replicate",
            });
        }

        if !record.is_peeker(&write.caller) {
            return Err(StoreError::Unauthorized {
                id: record.id,
                caller: write.caller,
                action: "store",
            });
        }
        Ok(())
    }

    async fn apply_write(&self, write: StoreWrite) {
        let id = write.record.id;
        match self.backend.init_record(&write.record).await {
            Ok(()) => record_counter("confstore.records.initialized", 1),
            Err(e) if e.is_already_present() => {}
            Err(e) => {
                record_counter("confstore.writes.replication_failed", 1);
                error!(%id, error = %e, "could not initialize replicated record");
                return;
            }
        }

        match self
            .backend
            .store(&write.record, write.caller, &write.key, &write.value)
            .await
        {
            Ok(_) => record_counter("confstore.writes.replicated", 1),
            Err(e) => {
                record_counter("confstore.writes.replication_failed", 1);
                error!(%id, key = %write.key, error = %e, "could not store replicated value");
            }
        }
    }
}
