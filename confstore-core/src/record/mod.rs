/*
    record - Confidential data records and replication messages

    A record is the unit of confidential data: an access-control list plus a
    content-derived id. Keyed values are addressed by (record id, key) and
    live in the storage backend, never inside the record itself.

    Records are immutable once initialized. Only new keyed values are added
    afterwards.
*/

mod identity;

pub use identity::{
    derive_record_id, message_digest, resolve_record_id, signable_message_bytes,
    signable_record_bytes,
};

use alloy_consensus::TxEnvelope;
use alloy_primitives::{Address, Bytes, B128};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 16-byte record identifier
pub type DataId = B128;

/// 16-byte salt mixed into id derivation
pub type Salt = B128;

/// A confidential data record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRecord {
    /// Content-derived id, or zero to request derivation
    pub id: DataId,

    pub salt: Salt,

    /// Usually a target block number; only used as an index key here
    pub decryption_condition: u64,

    /// Addresses allowed to read keyed values
    pub allowed_peekers: Vec<Address>,

    /// Addresses allowed to write keyed values and to replicate this record
    pub allowed_stores: Vec<Address>,

    /// Free-form namespace, e.g. "default:v0:ethBundles"
    pub version: String,

    /// Transaction that created the record. Set on initialization.
    #[serde(default)]
    pub creation_tx: Option<TxEnvelope>,

    /// Signature over the signable form of the record
    #[serde(default)]
    pub signature: Bytes,
}

impl DataRecord {
    /// Create an uninitialized record with a fresh random salt and a zero id
    pub fn new(
        decryption_condition: u64,
        allowed_peekers: Vec<Address>,
        allowed_stores: Vec<Address>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: DataId::ZERO,
            salt: Salt::from(Uuid::new_v4().into_bytes()),
            decryption_condition,
            allowed_peekers,
            allowed_stores,
            version: version.into(),
            creation_tx: None,
            signature: Bytes::new(),
        }
    }

    pub fn is_peeker(&self, caller: &Address) -> bool {
        self.allowed_peekers.contains(caller)
    }

    pub fn is_store(&self, caller: &Address) -> bool {
        self.allowed_stores.contains(caller)
    }
}

/// One keyed value written under a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreWrite {
    pub record: DataRecord,
    pub caller: Address,
    pub key: String,
    pub value: Bytes,
}

/// Signed unit of replication between engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DAMessage {
    /// Transaction whose signer authored this batch
    pub source_tx: TxEnvelope,

    pub store_writes: Vec<StoreWrite>,

    /// Instance id of the publishing engine
    #[serde(rename = "storeUUID")]
    pub store_uuid: Uuid,

    #[serde(default)]
    pub signature: Bytes,
}
