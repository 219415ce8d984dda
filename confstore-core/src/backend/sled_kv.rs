use super::kv::{KvBackend, KvStore};
use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use sled::Db;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Embedded, restart-durable confidential storage
pub type SledBackend = KvBackend<SledKv>;

impl SledBackend {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Ok(KvBackend::new(SledKv::open(path)?))
    }

    /// Open a throwaway store that is removed on drop
    pub fn temporary() -> StoreResult<Self> {
        Ok(KvBackend::new(SledKv::temporary()?))
    }
}

/// [`KvStore`] over the default sled tree
pub struct SledKv {
    db: Db,
}

const OPEN_ATTEMPTS: u32 = 20;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Another handle to the same path has not released its file lock yet
fn is_lock_contention(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) => {
            io.kind() == ErrorKind::WouldBlock || io.to_string().contains("could not acquire lock")
        }
        _ => false,
    }
}

impl SledKv {
    /// Open or create the store at `path`, waiting briefly for a previous
    /// handle that is still shutting down
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let mut attempt = 1;
        loop {
            match sled::open(path) {
                Ok(db) => return Ok(Self { db }),
                Err(e) if is_lock_contention(&e) && attempt < OPEN_ATTEMPTS => {
                    debug!(path = %path.display(), attempt, "sled path still locked, retrying");
                    attempt += 1;
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl std::fmt::Debug for SledKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledKv")
            .field("entries", &self.db.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KvStore for SledKv {
    async fn start(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Flush on a blocking thread so sled holds no pending work once this returns
    async fn stop(&self) -> StoreResult<()> {
        let db = self.db.clone();
        let flushed = tokio::task::spawn_blocking(move || db.flush())
            .await
            .map_err(|e| StoreError::Lifecycle(format!("sled flush task failed: {}", e)))??;
        debug!(bytes = flushed, "sled store flushed");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        let swapped = self
            .db
            .compare_and_swap(key, None::<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }
}
