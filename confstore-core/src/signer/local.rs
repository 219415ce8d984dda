use super::DaSigner;
use crate::errors::{StoreError, StoreResult};
use alloy_primitives::{hex, keccak256, Address, Bytes, Signature};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use std::collections::HashMap;

/// [`DaSigner`] backed by in-process secp256k1 keys
///
/// Signs `keccak256(data)` without an EIP-191 prefix and returns the 65-byte
/// `r || s || v` encoding.
#[derive(Clone, Default)]
pub struct LocalDaSigner {
    keys: HashMap<Address, PrivateKeySigner>,
}

impl LocalDaSigner {
    pub fn new(signers: impl IntoIterator<Item = PrivateKeySigner>) -> Self {
        let keys = signers
            .into_iter()
            .map(|signer| (signer.address(), signer))
            .collect();
        Self { keys }
    }

    /// Build from hex private keys (with or without `0x`)
    pub fn from_hex_keys<S: AsRef<str>>(keys: &[S]) -> StoreResult<Self> {
        let mut signers = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = hex::decode(key.as_ref())
                .map_err(|e| StoreError::Signing(format!("invalid key hex: {}", e)))?;
            let signer = PrivateKeySigner::from_slice(&bytes)
                .map_err(|e| StoreError::Signing(format!("invalid private key: {}", e)))?;
            signers.push(signer);
        }
        Ok(Self::new(signers))
    }
}

impl std::fmt::Debug for LocalDaSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDaSigner")
            .field("addresses", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DaSigner for LocalDaSigner {
    fn sign(&self, account: Address, data: &[u8]) -> StoreResult<Bytes> {
        let signer = self
            .keys
            .get(&account)
            .ok_or_else(|| StoreError::Signing(format!("no local key for {}", account)))?;
        let signature = signer.sign_hash_sync(&keccak256(data))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }

    fn sender(&self, data: &[u8], signature: &[u8]) -> StoreResult<Address> {
        let signature = Signature::from_raw(signature)?;
        Ok(signature.recover_address_from_prehash(&keccak256(data))?)
    }

    fn local_addresses(&self) -> Vec<Address> {
        self.keys.keys().copied().collect()
    }
}
