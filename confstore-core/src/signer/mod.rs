//! Signing capabilities used by the engine
//!
//! Two independent signers:
//! - [`DaSigner`] signs and recovers over arbitrary record/message bytes and
//!   knows which addresses this node holds keys for.
//! - [`ChainSigner`] recovers the sender of a chain transaction.
//!
//! Both are injected into the engine; there is no process-wide signer.

mod chain;
mod local;

pub use chain::EthChainSigner;
pub use local::LocalDaSigner;

use crate::errors::StoreResult;
use alloy_consensus::TxEnvelope;
use alloy_primitives::{Address, Bytes};

/// Data-authenticity signer
pub trait DaSigner: Send + Sync {
    /// Sign `data` with the key held for `account`
    fn sign(&self, account: Address, data: &[u8]) -> StoreResult<Bytes>;

    /// Recover the address that produced `signature` over `data`
    fn sender(&self, data: &[u8], signature: &[u8]) -> StoreResult<Address>;

    /// Addresses this signer holds keys for
    fn local_addresses(&self) -> Vec<Address>;
}

/// Chain transaction signer
pub trait ChainSigner: Send + Sync {
    /// Recover the sender of `tx`. Fails for unsigned or malformed signatures.
    fn sender(&self, tx: &TxEnvelope) -> StoreResult<Address>;
}
