use super::Method;
use crate::engine::TransactionalStore;
use crate::errors::StoreResult;
use crate::record::{DataId, DataRecord};
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataRecordRequest {
    pub decryption_condition: u64,
    pub allowed_peekers: Vec<Address>,
    pub allowed_stores: Vec<Address>,
    pub version: String,
}

/// Create and stage a record bound to the store's transaction
pub struct NewDataRecord;

#[async_trait]
impl Method for NewDataRecord {
    const NAME: &'static str = "newDataRecord";
    type Request = NewDataRecordRequest;
    type Response = DataRecord;

    async fn call(
        store: &TransactionalStore,
        _caller: Address,
        request: NewDataRecordRequest,
    ) -> StoreResult<DataRecord> {
        let record = DataRecord::new(
            request.decryption_condition,
            request.allowed_peekers,
            request.allowed_stores,
            request.version,
        );
        store.init_record(record).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub id: DataId,
    pub key: String,
    pub value: Bytes,
}

/// Stage a keyed value; responds with nothing
pub struct ConfidentialStore;

#[async_trait]
impl Method for ConfidentialStore {
    const NAME: &'static str = "confidentialStore";
    type Request = StoreRequest;
    type Response = ();

    async fn call(store: &TransactionalStore, caller: Address, request: StoreRequest) -> StoreResult<()> {
        store
            .store(request.id, caller, &request.key, &request.value)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub id: DataId,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub value: Bytes,
}

pub struct ConfidentialRetrieve;

#[async_trait]
impl Method for ConfidentialRetrieve {
    const NAME: &'static str = "confidentialRetrieve";
    type Request = RetrieveRequest;
    type Response = RetrieveResponse;

    async fn call(
        store: &TransactionalStore,
        caller: Address,
        request: RetrieveRequest,
    ) -> StoreResult<RetrieveResponse> {
        let value = store.retrieve(request.id, caller, &request.key).await?;
        Ok(RetrieveResponse { value })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchDataRecordsRequest {
    pub block: u64,
    pub namespace: String,
}

/// Committed and staged records for a namespace at a block
pub struct FetchDataRecords;

#[async_trait]
impl Method for FetchDataRecords {
    const NAME: &'static str = "fetchDataRecords";
    type Request = FetchDataRecordsRequest;
    type Response = Vec<DataRecord>;

    async fn call(
        store: &TransactionalStore,
        _caller: Address,
        request: FetchDataRecordsRequest,
    ) -> StoreResult<Vec<DataRecord>> {
        store
            .fetch_records_by_protocol_and_block(request.block, &request.namespace)
            .await
    }
}
