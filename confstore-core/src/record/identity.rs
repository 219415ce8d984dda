//! Canonical encodings for record ids and signatures
//!
//! The id is a UUIDv5 over the canonical JSON of the access-control fields
//! with the id zeroed. Signatures cover the same fields plus the creation
//! transaction (records) or the whole batch minus the signature (messages).

use super::{DAMessage, DataId, DataRecord, Salt, StoreWrite};
use crate::errors::{StoreError, StoreResult};
use alloy_consensus::TxEnvelope;
use alloy_primitives::{keccak256, Address, B256};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalRecord<'a> {
    id: DataId,
    salt: &'a Salt,
    decryption_condition: u64,
    allowed_peekers: &'a [Address],
    allowed_stores: &'a [Address],
    version: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignableRecord<'a> {
    id: &'a DataId,
    salt: &'a Salt,
    decryption_condition: u64,
    allowed_peekers: &'a [Address],
    allowed_stores: &'a [Address],
    version: &'a str,
    creation_tx: &'a Option<TxEnvelope>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignableMessage<'a> {
    source_tx: &'a TxEnvelope,
    #[serde(rename = "storeUUID")]
    store_uuid: &'a Uuid,
    store_writes: &'a [StoreWrite],
}

/// Compute the content-derived id of a record, ignoring its current id
pub fn derive_record_id(record: &DataRecord) -> StoreResult<DataId> {
    let canonical = CanonicalRecord {
        id: DataId::ZERO,
        salt: &record.salt,
        decryption_condition: record.decryption_condition,
        allowed_peekers: &record.allowed_peekers,
        allowed_stores: &record.allowed_stores,
        version: &record.version,
    };
    let body = serde_json::to_vec(&canonical)?;
    Ok(DataId::from(Uuid::new_v5(&Uuid::nil(), &body).into_bytes()))
}

/// Derive the id for a zero-id record, or check a supplied one
pub fn resolve_record_id(record: &DataRecord) -> StoreResult<DataId> {
    let derived = derive_record_id(record)?;
    if record.id == DataId::ZERO || record.id == derived {
        Ok(derived)
    } else {
        Err(StoreError::IdMismatch {
            supplied: record.id,
            derived,
        })
    }
}

/// Bytes covered by a record signature: every field except the signature
pub fn signable_record_bytes(record: &DataRecord) -> StoreResult<Vec<u8>> {
    let signable = SignableRecord {
        id: &record.id,
        salt: &record.salt,
        decryption_condition: record.decryption_condition,
        allowed_peekers: &record.allowed_peekers,
        allowed_stores: &record.allowed_stores,
        version: &record.version,
        creation_tx: &record.creation_tx,
    };
    Ok(serde_json::to_vec(&signable)?)
}

/// Bytes covered by a message signature
pub fn signable_message_bytes(message: &DAMessage) -> StoreResult<Vec<u8>> {
    let signable = SignableMessage {
        source_tx: &message.source_tx,
        store_uuid: &message.store_uuid,
        store_writes: &message.store_writes,
    };
    Ok(serde_json::to_vec(&signable)?)
}

/// Stable digest of a signed message, used as its outbox key
pub fn message_digest(message: &DAMessage) -> StoreResult<B256> {
    let mut bytes = signable_message_bytes(message)?;
    bytes.extend_from_slice(&message.signature);
    Ok(keccak256(bytes))
}
