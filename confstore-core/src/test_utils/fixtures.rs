//! Fixtures for accounts, transactions, records and engines

use crate::backend::{ConfidentialStorageBackend, MemoryBackend};
use crate::engine::{ConfidentialStoreEngine, EngineOptions};
use crate::record::DataRecord;
use crate::signer::{EthChainSigner, LocalDaSigner};
use crate::transport::{MockHub, MockTransport};
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_primitives::{Address, Bytes, Signature, TxKind, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use std::sync::Arc;

/// Namespace used by sample records
pub const SAMPLE_NAMESPACE: &str = "default:v0:ethBundles";

/// Anvil default accounts with well-known keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestAccount {
    Alice,
    Bob,
    Charlie,
    Deployer,
}

impl TestAccount {
    pub fn private_key(self) -> &'static str {
        match self {
            TestAccount::Alice => "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            TestAccount::Bob => "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
            TestAccount::Charlie => "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
            TestAccount::Deployer => "7c852118294e51e653712a81e05800f419141751be58f605c371e15141b007a6",
        }
    }

    pub fn signer(self) -> PrivateKeySigner {
        self.private_key()
            .parse()
            .expect("anvil keys are valid")
    }

    pub fn address(self) -> Address {
        self.signer().address()
    }
}

fn sample_tx(nonce: u64) -> TxEip1559 {
    TxEip1559 {
        chain_id: 33626250,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas: 1_000_000_000,
        max_priority_fee_per_gas: 1_000_000,
        to: TxKind::Call(Address::repeat_byte(0x42)),
        value: U256::ZERO,
        input: Bytes::from_static(b"confidential"),
        ..Default::default()
    }
}

/// An EIP-1559 transaction signed by `account`
pub fn signed_tx(account: TestAccount, nonce: u64) -> TxEnvelope {
    let tx = sample_tx(nonce);
    let signature = account
        .signer()
        .sign_hash_sync(&tx.signature_hash())
        .expect("signing with a local key succeeds");
    TxEnvelope::from(tx.into_signed(signature))
}

/// A transaction carrying a signature no sender can be recovered from
pub fn unsigned_tx(nonce: u64) -> TxEnvelope {
    let signature = Signature::new(U256::ZERO, U256::ZERO, false);
    TxEnvelope::from(sample_tx(nonce).into_signed(signature))
}

/// Uninitialized record stored by `store`, readable by Charlie
pub fn sample_record(store: TestAccount) -> DataRecord {
    DataRecord::new(
        46,
        vec![TestAccount::Charlie.address()],
        vec![store.address()],
        SAMPLE_NAMESPACE,
    )
}

/// Engine whose node key is `account`, over a fresh memory backend
pub fn memory_engine(account: TestAccount, hub: Arc<MockHub>) -> Arc<ConfidentialStoreEngine> {
    engine_with_backend(account, hub, Arc::new(MemoryBackend::new()), EngineOptions::default())
}

pub fn engine_with_backend(
    account: TestAccount,
    hub: Arc<MockHub>,
    backend: Arc<dyn ConfidentialStorageBackend>,
    options: EngineOptions,
) -> Arc<ConfidentialStoreEngine> {
    ConfidentialStoreEngine::new(
        backend,
        Arc::new(MockTransport::new(hub)),
        Arc::new(LocalDaSigner::new([account.signer()])),
        Arc::new(EthChainSigner),
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::ChainSigner;

    #[test]
    fn test_accounts_are_distinct() {
        let addresses = [
            TestAccount::Alice.address(),
            TestAccount::Bob.address(),
            TestAccount::Charlie.address(),
            TestAccount::Deployer.address(),
        ];
        for (i, a) in addresses.iter().enumerate() {
            for b in &addresses[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_signed_tx_recovers_to_account() {
        let tx = signed_tx(TestAccount::Deployer, 7);
        assert_eq!(EthChainSigner.sender(&tx).unwrap(), TestAccount::Deployer.address());
    }

    #[test]
    fn test_sample_record_acl() {
        let record = sample_record(TestAccount::Bob);
        assert!(record.is_store(&TestAccount::Bob.address()));
        assert!(record.is_peeker(&TestAccount::Charlie.address()));
        assert!(!record.is_peeker(&TestAccount::Bob.address()));
    }
}
