/*
    dispatch - Typed entry points over a TransactionalStore

    Calldata is a 4-byte selector followed by a JSON request body. The
    selector is the first four bytes of keccak256 of the method name. Each
    method decodes into its own request type, runs against the store on
    behalf of an explicit caller, and encodes its own response type.
*/

mod methods;

pub use methods::{
    ConfidentialRetrieve, ConfidentialStore, FetchDataRecords, FetchDataRecordsRequest,
    NewDataRecord, NewDataRecordRequest, RetrieveRequest, RetrieveResponse, StoreRequest,
};

use crate::engine::TransactionalStore;
use crate::errors::{StoreError, StoreResult};
use alloy_primitives::{keccak256, Address};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;

pub type Selector = [u8; 4];

/// First four bytes of keccak256(name)
pub fn selector(name: &str) -> Selector {
    let hash = keccak256(name.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Prefix a JSON-encoded request with the method's selector
pub fn encode_call<M: Method>(request: &M::Request) -> StoreResult<Vec<u8>>
where
    M::Request: Serialize,
{
    let mut calldata = selector(M::NAME).to_vec();
    calldata.extend(serde_json::to_vec(request)?);
    Ok(calldata)
}

/// A statically typed confidential method
#[async_trait]
pub trait Method: Send + Sync + 'static {
    const NAME: &'static str;
    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send;

    async fn call(
        store: &TransactionalStore,
        caller: Address,
        request: Self::Request,
    ) -> StoreResult<Self::Response>;
}

#[async_trait]
trait Handler: Send + Sync {
    async fn handle(
        &self,
        store: &TransactionalStore,
        caller: Address,
        body: &[u8],
    ) -> StoreResult<Vec<u8>>;
}

struct Typed<M>(PhantomData<fn() -> M>);

#[async_trait]
impl<M: Method> Handler for Typed<M> {
    async fn handle(
        &self,
        store: &TransactionalStore,
        caller: Address,
        body: &[u8],
    ) -> StoreResult<Vec<u8>> {
        let request: M::Request = serde_json::from_slice(body)
            .map_err(|e| StoreError::Dispatch(format!("{}: malformed request: {e}", M::NAME)))?;
        let response = M::call(store, caller, request).await?;
        Ok(serde_json::to_vec(&response)?)
    }
}

/// Selector-keyed table of methods
pub struct MethodRegistry {
    handlers: HashMap<Selector, (&'static str, Box<dyn Handler>)>,
}

impl MethodRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in method
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register::<NewDataRecord>();
        registry.register::<ConfidentialStore>();
        registry.register::<ConfidentialRetrieve>();
        registry.register::<FetchDataRecords>();
        registry
    }

    pub fn register<M: Method>(&mut self) {
        self.handlers
            .insert(selector(M::NAME), (M::NAME, Box::new(Typed::<M>(PhantomData))));
    }

    pub fn method_name(&self, selector: &Selector) -> Option<&'static str> {
        self.handlers.get(selector).map(|(name, _)| *name)
    }

    /// Route calldata to its method and return the encoded response
    pub async fn dispatch(
        &self,
        store: &TransactionalStore,
        caller: Address,
        calldata: &[u8],
    ) -> StoreResult<Vec<u8>> {
        if calldata.len() < 4 {
            return Err(StoreError::Dispatch("missing selector".to_string()));
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&calldata[..4]);

        let Some((name, handler)) = self.handlers.get(&sel) else {
            return Err(StoreError::Dispatch(format!(
                "unknown selector 0x{}",
                hex::encode(sel)
            )));
        };
        tracing::trace!(method = *name, %caller, "dispatching confidential call");
        handler.handle(store, caller, &calldata[4..]).await
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{memory_engine, signed_tx, TestAccount, SAMPLE_NAMESPACE};
    use crate::transport::MockHub;
    use alloy_primitives::Bytes;
    use std::sync::Arc;

    #[test]
    fn test_selectors_are_distinct() {
        let registry = MethodRegistry::new();
        for name in [
            NewDataRecord::NAME,
            ConfidentialStore::NAME,
            ConfidentialRetrieve::NAME,
            FetchDataRecords::NAME,
        ] {
            assert_eq!(registry.method_name(&selector(name)), Some(name));
        }
    }

    #[tokio::test]
    async fn test_full_call_sequence() {
        let engine = memory_engine(TestAccount::Alice, Arc::new(MockHub::new()));
        let store = engine.new_transactional_store(signed_tx(TestAccount::Alice, 0));
        let registry = MethodRegistry::new();
        let charlie = TestAccount::Charlie.address();

        let call = encode_call::<NewDataRecord>(&NewDataRecordRequest {
            decryption_condition: 46,
            allowed_peekers: vec![charlie],
            allowed_stores: vec![TestAccount::Alice.address()],
            version: SAMPLE_NAMESPACE.to_string(),
        })
        .unwrap();
        let out = registry.dispatch(&store, charlie, &call).await.unwrap();
        let record: crate::record::DataRecord = serde_json::from_slice(&out).unwrap();

        let call = encode_call::<ConfidentialStore>(&StoreRequest {
            id: record.id,
            key: "xx".to_string(),
            value: Bytes::from_static(&[0x44]),
        })
        .unwrap();
        registry.dispatch(&store, charlie, &call).await.unwrap();

        let call = encode_call::<ConfidentialRetrieve>(&RetrieveRequest {
            id: record.id,
            key: "xx".to_string(),
        })
        .unwrap();
        let out = registry.dispatch(&store, charlie, &call).await.unwrap();
        let response: RetrieveResponse = serde_json::from_slice(&out).unwrap();
        assert_eq!(&response.value[..], &[0x44]);

        let call = encode_call::<FetchDataRecords>(&FetchDataRecordsRequest {
            block: 46,
            namespace: SAMPLE_NAMESPACE.to_string(),
        })
        .unwrap();
        let out = registry.dispatch(&store, charlie, &call).await.unwrap();
        let records: Vec<crate::record::DataRecord> = serde_json::from_slice(&out).unwrap();
        assert_eq!(records, vec![record]);
    }

    #[tokio::test]
    async fn test_bad_calldata_is_an_error() {
        let engine = memory_engine(TestAccount::Alice, Arc::new(MockHub::new()));
        let store = engine.new_transactional_store(signed_tx(TestAccount::Alice, 0));
        let registry = MethodRegistry::new();

        for calldata in [
            vec![],
            vec![0xde, 0xad],
            vec![0xde, 0xad, 0xbe, 0xef],
        ] {
            let err = registry
                .dispatch(&store, Address::ZERO, &calldata)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Dispatch(_)));
        }

        let mut malformed = selector(ConfidentialStore::NAME).to_vec();
        malformed.extend_from_slice(b"{\"id\":");
        let err = registry
            .dispatch(&store, Address::ZERO, &malformed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Dispatch(_)));
    }

    #[tokio::test]
    async fn test_access_errors_pass_through() {
        let engine = memory_engine(TestAccount::Alice, Arc::new(MockHub::new()));
        let store = engine.new_transactional_store(signed_tx(TestAccount::Alice, 0));
        let registry = MethodRegistry::new();

        let call = encode_call::<NewDataRecord>(&NewDataRecordRequest {
            decryption_condition: 1,
            allowed_peekers: vec![TestAccount::Charlie.address()],
            allowed_stores: vec![TestAccount::Alice.address()],
            version: SAMPLE_NAMESPACE.to_string(),
        })
        .unwrap();
        let out = registry.dispatch(&store, Address::ZERO, &call).await.unwrap();
        let record: crate::record::DataRecord = serde_json::from_slice(&out).unwrap();

        let call = encode_call::<ConfidentialRetrieve>(&RetrieveRequest {
            id: record.id,
            key: "xx".to_string(),
        })
        .unwrap();
        let err = registry
            .dispatch(&store, TestAccount::Bob.address(), &call)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { .. }));
    }
}
