use super::ChainSigner;
use crate::errors::{StoreError, StoreResult};
use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::TxEnvelope;
use alloy_primitives::Address;

/// Recovers transaction senders with standard Ethereum signature recovery
#[derive(Debug, Clone, Copy, Default)]
pub struct EthChainSigner;

impl ChainSigner for EthChainSigner {
    fn sender(&self, tx: &TxEnvelope) -> StoreResult<Address> {
        tx.recover_signer()
            .map_err(|e| StoreError::UnsignedTransaction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{signed_tx, unsigned_tx, TestAccount};

    #[test]
    fn test_recovers_sender() {
        let tx = signed_tx(TestAccount::Charlie, 3);
        assert_eq!(EthChainSigner.sender(&tx).unwrap(), TestAccount::Charlie.address());
    }

    #[test]
    fn test_unsigned_transaction_rejected() {
        let err = EthChainSigner.sender(&unsigned_tx(0)).unwrap_err();
        assert!(matches!(err, StoreError::UnsignedTransaction(_)));
    }
}
