//! Confidential Store Engine
//!
//! Per-node storage for confidential data records: transactional staging
//! during execution, signed replication over a pub/sub topic, and
//! pluggable storage backends.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod record;
pub mod shutdown;
pub mod signer;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use engine::{ConfidentialStoreEngine, EngineOptions, TransactionalStore};
pub use errors::{StoreError, StoreResult};
pub use logging::{init_logging, LogLevel};
pub use record::{DAMessage, DataId, DataRecord, StoreWrite};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = DataId::ZERO;
    }
}
