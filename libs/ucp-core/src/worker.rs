use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Duration;
use tracing::{error, field, info, instrument, warn, Span};

use crate::config::Settings;
use crate::id::ResourceID;
use crate::metrics::Metrics;
use crate::queue::Receipt;
use crate::resource::{OutputResource, ProvisioningState};
use crate::status::{AsyncStatus, OperationKind, OperationStatus, StatusManager};
use crate::store::ResourceStore;
use crate::telemetry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for resource type {0}")]
    NoHandler(String),

    #[error("{0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Type-erased per-resource-kind entry point, bridging the strongly-typed
/// `Processor<P>` trait (C7) to the worker loop, which dispatches on a
/// resource-type string read off the operation's target `ResourceID`.
#[async_trait::async_trait]
pub trait ResourceHandler: Send + Sync {
    fn resource_type(&self) -> &'static str;

    async fn handle_put_or_patch(
        &self,
        store: Arc<dyn ResourceStore>,
        resource_id: &ResourceID,
    ) -> Result<Vec<OutputResource>, DispatchError>;

    async fn handle_delete(
        &self,
        store: Arc<dyn ResourceStore>,
        resource_id: &ResourceID,
    ) -> Result<(), DispatchError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(handler.resource_type(), handler);
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(resource_type).cloned()
    }
}

/// C5: dequeue -> dispatch -> timeout -> status update loop.
///
/// One instance drives one worker "slot"; `run_pool` spawns `concurrency`
/// of these as sibling tasks, mirroring the way the teacher's `main`
/// `tokio::join!`s its controller and HTTP server futures.
pub struct WorkerRuntime {
    status: Arc<StatusManager>,
    store: Arc<dyn ResourceStore>,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<Metrics>,
    settings: Settings,
}

impl WorkerRuntime {
    pub fn new(
        status: Arc<StatusManager>,
        store: Arc<dyn ResourceStore>,
        registry: Arc<HandlerRegistry>,
        metrics: Arc<Metrics>,
        settings: Settings,
    ) -> Self {
        WorkerRuntime {
            status,
            store,
            registry,
            metrics,
            settings,
        }
    }

    pub async fn run_pool(self: Arc<Self>) {
        let handles: Vec<_> = (0..self.settings.worker_concurrency)
            .map(|slot| {
                let this = self.clone();
                tokio::spawn(async move { this.run_slot(slot).await })
            })
            .collect();
        futures::future::join_all(handles).await;
    }

    /// Dequeues and processes at most one leased operation, returning
    /// whether there was one to process. `run_slot` is an unbounded loop
    /// meant for a spawned background task; this is the same single step,
    /// exposed so a test (or an embedder driving the runtime manually) can
    /// pump the queue deterministically instead of racing a background task.
    pub async fn drain_one(&self) -> bool {
        let Some(leased) = self.status.dequeue_lease(self.settings.visibility_timeout) else {
            return false;
        };
        self.metrics.worker.job_dequeued();
        self.process_one(leased.receipt, leased.body, leased.dequeue_count)
            .await;
        true
    }

    async fn run_slot(&self, slot: usize) {
        info!(slot, "starting worker slot");
        loop {
            if !self.drain_one().await {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    #[instrument(skip(self, receipt, record), fields(trace_id, resource_id = %record.resource_id))]
    async fn process_one(&self, receipt: Receipt, record: OperationStatus, dequeue_count: u32) {
        let trace_id = telemetry::get_trace_id();
        Span::current().record("trace_id", field::display(&trace_id));

        let _timer = self.metrics.worker.measure();

        let Ok(resource_id) = record.resource_id.parse::<ResourceID>() else {
            error!(resource_id = %record.resource_id, "operation targets an unparsable resource id");
            let _ = self.status.complete(&receipt);
            return;
        };
        let resource_type = resource_id.resource_type().unwrap_or_default();

        // A background heartbeat renews the lease at half the visibility
        // timeout while the handler runs, so a slow-but-alive job is never
        // stolen by another worker; it is aborted the moment the handler
        // returns, win or lose.
        let heartbeat = {
            let status = Arc::clone(&self.status);
            let receipt = receipt.clone();
            let interval = self.settings.visibility_timeout / 2;
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        interval.num_milliseconds().max(1000) as u64,
                    ))
                    .await;
                    if status.extend_lease(&receipt, interval).is_err() {
                        break;
                    }
                    metrics.worker.lease_extended();
                }
            })
        };

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(self.settings.lease_duration.num_seconds().max(1) as u64 * 4),
            self.dispatch(&resource_id, &resource_type, record.operation),
        )
        .await;
        heartbeat.abort();

        let plane = resource_id.plane_id();
        match outcome {
            Ok(Ok(())) => {
                info!(%resource_id, "operation settled successfully");
                let _ = self
                    .status
                    .update(&plane, &record.id, |r| {
                        r.status = AsyncStatus::Succeeded;
                        r.percent_complete = Some(100.0);
                        r.end_time = Some(chrono::Utc::now());
                    })
                    .await;
                self.settle_provisioning_state(&resource_id, ProvisioningState::Succeeded)
                    .await;
                self.metrics.worker.job_completed(&resource_type, "succeeded");
                let _ = self.status.complete(&receipt);
            }
            Ok(Err(e)) => {
                self.handle_failure(&receipt, &record, &resource_id, &resource_type, dequeue_count, e.to_string())
                    .await;
            }
            Err(_) => {
                warn!(%resource_id, "operation timed out");
                self.handle_failure(
                    &receipt,
                    &record,
                    &resource_id,
                    &resource_type,
                    dequeue_count,
                    "operation timed out".to_owned(),
                )
                .await;
            }
        }
    }

    async fn handle_failure(
        &self,
        receipt: &Receipt,
        record: &OperationStatus,
        resource_id: &ResourceID,
        resource_type: &str,
        dequeue_count: u32,
        message: String,
    ) {
        let plane = resource_id.plane_id();
        self.metrics.worker.job_completed(resource_type, "failed");
        if dequeue_count >= self.settings.retry_attempts {
            error!(%resource_id, %message, "operation exhausted retries, marking failed");
            let _ = self
                .status
                .update(&plane, &record.id, |r| {
                    r.status = AsyncStatus::Failed;
                    r.end_time = Some(chrono::Utc::now());
                    r.error = Some(crate::error::ErrorDetails {
                        code: "internal".to_owned(),
                        message: message.clone(),
                    });
                })
                .await;
            self.settle_provisioning_state(resource_id, ProvisioningState::Failed)
                .await;
            let _ = self.status.complete(receipt);
        } else {
            warn!(%resource_id, %message, attempt = dequeue_count, "operation failed, will retry");
            // Releasing (rather than completing) makes the message visible
            // again immediately so the worker pool can retry it -- this is
            // also how a worker panic is recovered from without ever
            // leaving the lease held forever (invariant I-W-1).
            let _ = self.status.release(receipt);
        }
    }

    async fn settle_provisioning_state(&self, resource_id: &ResourceID, state: ProvisioningState) {
        let Ok(Some(stored)) = self.store.get(resource_id).await else {
            return;
        };
        let mut data = stored.data;
        if let Some(status) = data.get_mut("status") {
            status["provisioningState"] = serde_json::to_value(state).unwrap_or_default();
        } else {
            data["status"] = serde_json::json!({ "provisioningState": state });
        }
        let _ = self
            .store
            .save(resource_id, data, Some(&stored.etag))
            .await;
    }

    async fn dispatch(
        &self,
        resource_id: &ResourceID,
        resource_type: &str,
        operation: OperationKind,
    ) -> Result<(), DispatchError> {
        let handler = self
            .registry
            .get(resource_type)
            .ok_or_else(|| DispatchError::NoHandler(resource_type.to_owned()))?;

        // `catch_unwind` around the future's poll recovers from a handler
        // panic (invariant I-W-1): the lease is released above regardless
        // of whether the failure was a returned `Err` or an unwind.
        let result = AssertUnwindSafe(async {
            match operation {
                OperationKind::Put | OperationKind::Patch => handler
                    .handle_put_or_patch(self.store.clone(), resource_id)
                    .await
                    .map(|_outputs| ()),
                OperationKind::Delete => handler.handle_delete(self.store.clone(), resource_id).await,
            }
        })
        .catch_unwind()
        .await;

        match result {
            Ok(inner) => inner,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(DispatchError::Panicked(message))
            }
        }
    }
}

impl From<DispatchError> for crate::error::Error {
    fn from(e: DispatchError) -> Self {
        crate::error::Error::Internal(e.to_string())
    }
}
