use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

use crate::config::{Settings, StorageProvider};
use crate::store::etcd::EtcdStore;
use crate::store::memory::MemoryStore;
use crate::store::{ResourceStore, StoreError};

/// One-shot handle returned to callers that need to wait for the embedded
/// datastore to be ready before constructing anything that depends on it
/// (teacher's `shutdown_on_signal` graceful-shutdown convention, applied
/// here to startup ordering instead).
pub struct ReadyHandle {
    receiver: oneshot::Receiver<()>,
}

impl ReadyHandle {
    pub async fn wait(self) {
        let _ = self.receiver.await;
    }
}

/// Owns the lifecycle of the embedded datastore: connects (or stands up an
/// in-memory store), signals readiness once, and on `shutdown` stops
/// accepting new writes before the caller tears down the rest of the
/// runtime -- store closes last in the shutdown order described in
/// `SPEC_FULL.md` §4.
pub struct DatastoreService {
    store: Arc<dyn ResourceStore>,
}

impl DatastoreService {
    pub async fn start(settings: &Settings) -> Result<(Self, ReadyHandle), StoreError> {
        let (tx, rx) = oneshot::channel();

        let store: Arc<dyn ResourceStore> = match settings.storage_provider {
            StorageProvider::Memory => {
                info!("starting embedded in-memory datastore");
                Arc::new(MemoryStore::new())
            }
            StorageProvider::Etcd => {
                info!(endpoints = ?settings.etcd_endpoints, "connecting to etcd datastore");
                Arc::new(EtcdStore::connect(&settings.etcd_endpoints).await?)
            }
        };

        // Readiness is signaled once construction above succeeds; a real
        // multi-node etcd deployment would instead wait here for cluster
        // quorum, but a freshly-connected client is enough to call this
        // backend ready for request traffic.
        let _ = tx.send(());

        Ok((DatastoreService { store }, ReadyHandle { receiver: rx }))
    }

    pub fn store(&self) -> Arc<dyn ResourceStore> {
        self.store.clone()
    }

    /// Ordered shutdown hook: no further writes are issued by the runtime
    /// past this call (enforced by the caller dropping all other `Arc`
    /// handles to the store first).
    pub async fn shutdown(self) {
        info!("datastore service shutting down");
        drop(self.store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use std::path::PathBuf;

    #[tokio::test]
    async fn memory_backed_service_signals_ready_immediately() {
        let args = Args {
            config: PathBuf::from("/nonexistent/ucp-config.yaml"),
            port: None,
            log_filter: "info".to_owned(),
            log_format: None,
            tracing_url: None,
            sample_ratio: None,
            storage_provider: Some("memory".to_owned()),
            etcd_endpoints: None,
            worker_concurrency: None,
        };
        let settings = Settings::load(&args).unwrap();
        let (service, ready) = DatastoreService::start(&settings).await.unwrap();
        ready.wait().await;
        service.shutdown().await;
    }
}
