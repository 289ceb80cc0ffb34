use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ErrorDetails;
use crate::id::ResourceID;
use crate::queue::{LeasedMessage, QueueError, Receipt, VisibilityQueue};
use crate::store::{ResourceStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AsyncStatus {
    Accepted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl AsyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AsyncStatus::Succeeded | AsyncStatus::Failed | AsyncStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub id: String,
    pub resource_id: String,
    pub operation: OperationKind,
    pub status: AsyncStatus,
    pub percent_complete: Option<f32>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<ErrorDetails>,
}

fn operation_status_id(resource_id: &ResourceID) -> ResourceID {
    resource_id
        .plane_id()
        .append("System.Async/operationstatuses", &Uuid::new_v4().to_string())
}

/// Tracks async operations (C3): records land in the shared `ResourceStore`
/// under a reserved `System.Async/operationstatuses` path so the LRO polling
/// endpoints (C4) can serve them directly, while dispatch uses an in-memory
/// visibility-timeout queue (see `queue.rs`).
pub struct StatusManager {
    store: Arc<dyn ResourceStore>,
    queue: VisibilityQueue<OperationStatus>,
}

impl StatusManager {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        StatusManager {
            store,
            queue: VisibilityQueue::new(),
        }
    }

    pub async fn enqueue(
        &self,
        resource_id: &ResourceID,
        operation: OperationKind,
    ) -> Result<OperationStatus, StoreError> {
        let op_id = operation_status_id(resource_id);
        let record = OperationStatus {
            id: op_id.name().unwrap_or_default().to_owned(),
            resource_id: resource_id.to_string(),
            operation,
            status: AsyncStatus::Accepted,
            percent_complete: Some(0.0),
            start_time: Utc::now(),
            end_time: None,
            error: None,
        };
        let value = serde_json::to_value(&record).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.save(&op_id, value, None).await?;
        self.queue.enqueue(record.clone());
        Ok(record)
    }

    pub fn dequeue_lease(
        &self,
        visibility_timeout: chrono::Duration,
    ) -> Option<LeasedMessage<OperationStatus>> {
        self.queue.dequeue_lease(visibility_timeout)
    }

    pub fn extend_lease(
        &self,
        receipt: &Receipt,
        additional: chrono::Duration,
    ) -> Result<(), QueueError> {
        self.queue.extend_lease(receipt, additional)
    }

    pub fn complete(&self, receipt: &Receipt) -> Result<(), QueueError> {
        self.queue.complete(receipt)
    }

    pub fn release(&self, receipt: &Receipt) -> Result<(), QueueError> {
        self.queue.release(receipt)
    }

    pub async fn get(&self, plane: &ResourceID, operation_id: &str) -> Result<Option<OperationStatus>, StoreError> {
        let op_id = plane.append("System.Async/operationstatuses", operation_id);
        let Some(obj) = self.store.get(&op_id).await? else {
            return Ok(None);
        };
        serde_json::from_value(obj.data)
            .map(Some)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    pub async fn update<F: FnOnce(&mut OperationStatus)>(
        &self,
        plane: &ResourceID,
        operation_id: &str,
        f: F,
    ) -> Result<(), StoreError> {
        let op_id = plane.append("System.Async/operationstatuses", operation_id);
        let Some(mut record) = self.get(plane, operation_id).await? else {
            return Err(StoreError::NotFound(op_id.to_string()));
        };
        f(&mut record);
        let value = serde_json::to_value(&record).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.save(&op_id, value, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn resource_id() -> ResourceID {
        ResourceID::parse(
            "/planes/radius/local/resourceGroups/default/providers/Applications.Core/containers/web",
        )
    }

    #[tokio::test]
    async fn enqueue_is_visible_on_dequeue_and_invisible_afterwards() {
        let manager = StatusManager::new(Arc::new(MemoryStore::new()));
        let record = manager
            .enqueue(&resource_id(), OperationKind::Put)
            .await
            .unwrap();
        assert_eq!(record.status, AsyncStatus::Accepted);

        let leased = manager
            .dequeue_lease(chrono::Duration::seconds(30))
            .expect("message available");
        assert!(manager
            .dequeue_lease(chrono::Duration::seconds(30))
            .is_none());
        manager.complete(&leased.receipt).unwrap();
    }

    #[tokio::test]
    async fn get_reflects_updates() {
        let manager = StatusManager::new(Arc::new(MemoryStore::new()));
        let plane = resource_id().plane_id();
        let record = manager
            .enqueue(&resource_id(), OperationKind::Patch)
            .await
            .unwrap();
        manager
            .update(&plane, &record.id, |r| {
                r.status = AsyncStatus::Succeeded;
                r.end_time = Some(Utc::now());
            })
            .await
            .unwrap();
        let fetched = manager.get(&plane, &record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, AsyncStatus::Succeeded);
        assert!(fetched.end_time.is_some());
    }
}
