//! Graceful shutdown for a running node
//!
//! Signal handlers flip the coordinator into `ShuttingDown`; the node's
//! main task wakes up, stops the engine within the drain timeout, and
//! marks the coordinator `Shutdown`.

use crate::engine::ConfidentialStoreEngine;
use crate::errors::{StoreError, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    shutdown_tx: broadcast::Sender<()>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            state: RwLock::new(ShutdownState::Running),
            shutdown_tx,
            drain_timeout,
        }
    }

    /// Request shutdown. Later calls are ignored.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return;
        }
        *state = ShutdownState::ShuttingDown;
        drop(state);

        info!("Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    /// Resolve once shutdown has been requested, including before this call
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        if self.state().await != ShutdownState::Running {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Stop the engine, giving up after the drain timeout
    pub async fn stop_engine(&self, engine: &ConfidentialStoreEngine) -> StoreResult<()> {
        let result = match tokio::time::timeout(self.drain_timeout, engine.stop()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Lifecycle(format!(
                "engine did not stop within {:?}",
                self.drain_timeout
            ))),
        };
        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
        result
    }
}

/// Request shutdown on SIGINT or SIGTERM
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.shutdown().await;
    });
    Ok(())
}

/// Request shutdown on Ctrl+C
#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                coordinator.shutdown().await;
            }
            Err(e) => warn!("Ctrl+C handler failed: {}", e),
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{memory_engine, TestAccount, DEFAULT_TEST_TIMEOUT};
    use crate::transport::MockHub;

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(1)));
        assert_eq!(coordinator.state().await, ShutdownState::Running);

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.shutdown().await;
        tokio::time::timeout(DEFAULT_TEST_TIMEOUT, waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(coordinator.state().await, ShutdownState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_returns() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.shutdown().await;
        coordinator.shutdown().await;
        tokio::time::timeout(DEFAULT_TEST_TIMEOUT, coordinator.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_engine() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let engine = memory_engine(TestAccount::Alice, Arc::new(MockHub::new()));
        engine.start().await.unwrap();

        coordinator.shutdown().await;
        coordinator.stop_engine(&engine).await.unwrap();
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }
}
