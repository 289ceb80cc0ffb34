use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::id::ResourceID;
use crate::processor::{ProcessContext, Processor};
use crate::resource::{OutputResource, Properties};
use crate::store::ResourceStore;
use crate::worker::{DispatchError, ResourceHandler};

/// Bridges a strongly-typed `Processor<P>` into the worker runtime's
/// type-erased `ResourceHandler`, the same way the generic route handlers in
/// `controller.rs` bridge one `ControllerState<P, S>` into many resource
/// kinds. A provider crate writes one `Processor<P>` impl per resource type
/// and registers `Arc::new(ProcessorHandler::new(processor))` with the
/// `HandlerRegistry` -- it never touches dispatch, leasing, or retries
/// itself.
pub struct ProcessorHandler<P: Properties, Proc: Processor<P> + 'static> {
    processor: Arc<Proc>,
    _marker: PhantomData<fn() -> P>,
}

impl<P: Properties, Proc: Processor<P> + 'static> ProcessorHandler<P, Proc> {
    pub fn new(processor: Arc<Proc>) -> Self {
        ProcessorHandler {
            processor,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<P: Properties, Proc: Processor<P> + 'static> ResourceHandler for ProcessorHandler<P, Proc> {
    fn resource_type(&self) -> &'static str {
        P::resource_type()
    }

    async fn handle_put_or_patch(
        &self,
        store: Arc<dyn ResourceStore>,
        resource_id: &ResourceID,
    ) -> Result<Vec<OutputResource>, DispatchError> {
        let stored = store
            .get(resource_id)
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?
            .ok_or_else(|| DispatchError::Handler("resource no longer exists".to_owned()))?;

        let mut properties: P = serde_json::from_value(
            stored.data.get("properties").cloned().unwrap_or_default(),
        )
        .map_err(|e| DispatchError::Handler(e.to_string()))?;

        self.processor
            .validate(&properties)
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?;

        let ctx = ProcessContext {
            resource_id: resource_id.clone(),
            store: store.clone(),
        };
        let result = self
            .processor
            .process(&ctx, &mut properties)
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?;

        let mut data = stored.data;
        data["properties"] =
            serde_json::to_value(&properties).map_err(|e| DispatchError::Handler(e.to_string()))?;
        data["status"]["outputResources"] = serde_json::to_value(&result.output_resources)
            .map_err(|e| DispatchError::Handler(e.to_string()))?;

        store
            .save(resource_id, data, Some(&stored.etag))
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?;

        Ok(result.output_resources)
    }

    async fn handle_delete(
        &self,
        store: Arc<dyn ResourceStore>,
        resource_id: &ResourceID,
    ) -> Result<(), DispatchError> {
        let Some(stored) = store
            .get(resource_id)
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?
        else {
            return Ok(());
        };

        let properties: P = serde_json::from_value(
            stored.data.get("properties").cloned().unwrap_or_default(),
        )
        .map_err(|e| DispatchError::Handler(e.to_string()))?;

        let ctx = ProcessContext {
            resource_id: resource_id.clone(),
            store: store.clone(),
        };
        self.processor
            .delete(&ctx, &properties)
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?;

        store
            .delete(resource_id, Some(&stored.etag))
            .await
            .map_err(|e| DispatchError::Handler(e.to_string()))?;
        Ok(())
    }
}
