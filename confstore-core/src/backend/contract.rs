//! Behaviour every storage backend must share
//!
//! Each backend's test module calls [`run_all`] with a factory that yields a
//! fresh, started backend.

use super::ConfidentialStorageBackend;
use crate::errors::StoreError;
use crate::record::{derive_record_id, DataId, DataRecord};
use alloy_primitives::{address, Address, Bytes};
use std::future::Future;
use uuid::Uuid;

const PEEKER: Address = address!("0000000000000000000000000000000000000043");
const STORER: Address = address!("0000000000000000000000000000000000000042");

fn record(namespace: &str, block: u64) -> DataRecord {
    let mut record = DataRecord::new(block, vec![PEEKER], vec![STORER], namespace);
    record.id = derive_record_id(&record).unwrap();
    record
}

fn unique_namespace() -> String {
    format!("contract-{}", Uuid::new_v4())
}

pub async fn run_all<F, Fut, B>(factory: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = B>,
    B: ConfidentialStorageBackend,
{
    init_and_fetch(&factory().await).await;
    duplicate_init_is_rejected(&factory().await).await;
    store_and_retrieve(&factory().await).await;
    missing_key_and_missing_record_are_distinct(&factory().await).await;
    fetch_by_protocol_and_block(&factory().await).await;
    last_write_wins(&factory().await).await;
}

async fn init_and_fetch<B: ConfidentialStorageBackend>(backend: &B) {
    let rec = record(&unique_namespace(), 10);
    backend.init_record(&rec).await.unwrap();

    let fetched = backend.fetch_record_by_id(rec.id).await.unwrap();
    assert_eq!(fetched, rec);

    let err = backend
        .fetch_record_by_id(DataId::repeat_byte(0xee))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RecordNotFound(_)));
}

async fn duplicate_init_is_rejected<B: ConfidentialStorageBackend>(backend: &B) {
    let rec = record(&unique_namespace(), 11);
    backend.init_record(&rec).await.unwrap();

    let mut impostor = rec.clone();
    impostor.signature = Bytes::from_static(b"impostor");
    let err = backend.init_record(&impostor).await.unwrap_err();
    assert!(err.is_already_present(), "unexpected error: {err}");

    let stored = backend.fetch_record_by_id(rec.id).await.unwrap();
    assert_eq!(stored, rec, "duplicate init must not alter the stored record");

    let listed = backend
        .fetch_records_by_protocol_and_block(11, &rec.version)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

async fn store_and_retrieve<B: ConfidentialStorageBackend>(backend: &B) {
    let rec = record(&unique_namespace(), 12);
    backend.init_record(&rec).await.unwrap();

    let returned = backend.store(&rec, STORER, "xx", &[0x44]).await.unwrap();
    assert_eq!(returned.id, rec.id);

    let value = backend.retrieve(&rec, PEEKER, "xx").await.unwrap();
    assert_eq!(&value[..], &[0x44]);
}

async fn missing_key_and_missing_record_are_distinct<B: ConfidentialStorageBackend>(backend: &B) {
    let rec = record(&unique_namespace(), 13);
    backend.init_record(&rec).await.unwrap();

    let err = backend.retrieve(&rec, PEEKER, "absent").await.unwrap_err();
    assert!(matches!(err, StoreError::KeyNotFound { .. }), "got {err}");

    let unknown = record(&unique_namespace(), 13);
    let err = backend.retrieve(&unknown, PEEKER, "absent").await.unwrap_err();
    assert!(matches!(err, StoreError::RecordNotFound(_)), "got {err}");
}

async fn fetch_by_protocol_and_block<B: ConfidentialStorageBackend>(backend: &B) {
    let namespace = unique_namespace();
    let first = record(&namespace, 46);
    let second = record(&namespace, 46);
    let other_block = record(&namespace, 47);

    for rec in [&first, &second, &other_block] {
        backend.init_record(rec).await.unwrap();
    }

    let listed = backend
        .fetch_records_by_protocol_and_block(46, &namespace)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first));
    assert!(listed.contains(&second));

    let empty = backend
        .fetch_records_by_protocol_and_block(46, &unique_namespace())
        .await
        .unwrap();
    assert!(empty.is_empty());
}

async fn last_write_wins<B: ConfidentialStorageBackend>(backend: &B) {
    let rec = record(&unique_namespace(), 14);
    backend.init_record(&rec).await.unwrap();

    backend.store(&rec, STORER, "k", b"one").await.unwrap();
    backend.store(&rec, STORER, "k", b"two").await.unwrap();

    let value = backend.retrieve(&rec, PEEKER, "k").await.unwrap();
    assert_eq!(&value[..], b"two");
}
