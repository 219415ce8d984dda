/*
    errors.rs - Error types for the confidential store

    Defines every error that can surface from:
    - Record lifecycle (init, store, retrieve)
    - Authorization against the record allow-lists
    - Replication integrity checks
    - Storage backends and transports
*/

use crate::record::DataId;
use alloy_primitives::Address;
use thiserror::Error;

/// Errors that can occur in the confidential store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id is known to the backend
    #[error("record not found: {0}")]
    RecordNotFound(DataId),

    /// Record exists but has no value under this key
    #[error("key {key} not found for record {id}")]
    KeyNotFound { id: DataId, key: String },

    /// A record with this id was already initialized
    #[error("record {0} already present")]
    RecordAlreadyPresent(DataId),

    /// Caller is not in the relevant allow-list
    #[error("{caller} is not allowed to {action} record {id}")]
    Unauthorized {
        id: DataId,
        caller: Address,
        action: &'static str,
    },

    /// Supplied id does not match the content-derived id
    #[error("record id mismatch: supplied {supplied}, derived {derived}")]
    IdMismatch { supplied: DataId, derived: DataId },

    /// Two signers that must agree do not
    #[error("signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch { expected: Address, recovered: Address },

    /// Transaction carries no recoverable signature
    #[error("transaction is not signed: {0}")]
    UnsignedTransaction(String),

    /// Finalize was called with a transaction that is not signed
    #[error("cannot finalize with an unsigned transaction")]
    UnsignedFinalize,

    /// Transactional store was already finalized
    #[error("transactional store already finalized")]
    AlreadyFinalized,

    /// Signing or recovery failed
    #[error("signing error: {0}")]
    Signing(String),

    /// Storage I/O error
    #[error("backend error: {0}")]
    Backend(String),

    /// Pub/sub transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Start/stop ordering violation
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// Method dispatch failure (unknown selector, bad payload)
    #[error("dispatch error: {0}")]
    Dispatch(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// True for the duplicate-record sentinel, which ingestion treats as "already applied"
    pub fn is_already_present(&self) -> bool {
        matches!(self, StoreError::RecordAlreadyPresent(_))
    }

    /// True for unknown record or unknown key
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::RecordNotFound(_) | StoreError::KeyNotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<alloy_signer::Error> for StoreError {
    fn from(err: alloy_signer::Error) -> Self {
        StoreError::Signing(err.to_string())
    }
}

impl From<alloy_primitives::SignatureError> for StoreError {
    fn from(err: alloy_primitives::SignatureError) -> Self {
        StoreError::Signing(err.to_string())
    }
}
