//! Engine assembly from node configuration

use crate::backend::{ConfidentialStorageBackend, MemoryBackend, RedisBackend, SledBackend};
use crate::config::{BackendKind, Config, TransportKind};
use crate::engine::{ConfidentialStoreEngine, EngineOptions};
use crate::errors::StoreResult;
use crate::signer::{EthChainSigner, LocalDaSigner};
use crate::transport::{MockTransport, RedisPubSubTransport, StoreTransportTopic};
use std::sync::Arc;
use tracing::info;

pub fn build_backend(config: &Config) -> StoreResult<Arc<dyn ConfidentialStorageBackend>> {
    Ok(match config.engine.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Redis => Arc::new(RedisBackend::open(config.redis.store_config())?),
        BackendKind::Sled => Arc::new(SledBackend::open(&config.sled.path)?),
    })
}

pub fn build_transport(config: &Config) -> StoreResult<Arc<dyn StoreTransportTopic>> {
    Ok(match config.engine.transport {
        TransportKind::Mock => Arc::new(MockTransport::default()),
        TransportKind::Redis => Arc::new(RedisPubSubTransport::new(
            config.redis.transport_config(),
        )?),
    })
}

/// Wire an unstarted engine from configuration
pub fn build_engine(config: &Config) -> StoreResult<Arc<ConfidentialStoreEngine>> {
    let da_signer = LocalDaSigner::from_hex_keys(config.engine.signing_keys.as_slice())?;
    let engine = ConfidentialStoreEngine::new(
        build_backend(config)?,
        build_transport(config)?,
        Arc::new(da_signer),
        Arc::new(EthChainSigner),
        EngineOptions {
            enable_outbox: config.engine.enable_outbox,
            ..Default::default()
        },
    );
    info!(
        backend = ?config.engine.backend,
        transport = ?config.engine.transport,
        local_addresses = engine.local_addresses().len(),
        outbox = config.engine.enable_outbox,
        "engine assembled"
    );
    Ok(engine)
}
