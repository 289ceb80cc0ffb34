//! End-to-end scenarios driving the full PUT -> worker -> GET /
//! operationStatuses lifecycle against the real HTTP surface, an in-memory
//! store, and hand-written test resource handlers -- no Kubernetes cluster
//! required, unlike the teacher's own `e2e-tests` feature which needed a
//! live cluster to exercise its `Echo` CRD.

#[cfg(test)]
mod scenarios {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use actix_web::{test, App};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use ucp_core::config::{Settings, StorageProvider};
    use ucp_core::controller::{self, ControllerState};
    use ucp_core::id::ResourceID;
    use ucp_core::metrics::Metrics;
    use ucp_core::resource::{OutputResource, Properties, ProvisioningState, Status};
    use ucp_core::status::{OperationKind, StatusManager};
    use ucp_core::store::memory::MemoryStore;
    use ucp_core::store::ResourceStore;
    use ucp_core::telemetry::LogFormat;
    use ucp_core::worker::{DispatchError, HandlerRegistry, ResourceHandler, WorkerRuntime};

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    struct WidgetProperties {
        #[serde(default)]
        name: String,
    }

    impl Properties for WidgetProperties {
        fn resource_type() -> &'static str {
            "Test.Mock/widgets"
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    struct WidgetStatus {
        #[serde(default)]
        provisioning_state: Option<ProvisioningState>,
        #[serde(default)]
        output_resources: Vec<OutputResource>,
    }

    impl Status for WidgetStatus {
        fn provisioning_state(&self) -> ProvisioningState {
            self.provisioning_state.unwrap_or(ProvisioningState::Accepted)
        }

        fn set_provisioning_state(&mut self, state: ProvisioningState) {
            self.provisioning_state = Some(state);
        }
    }

    fn test_settings() -> Settings {
        Settings {
            port: 0,
            host: "0.0.0.0".into(),
            storage_provider: StorageProvider::Memory,
            etcd_endpoints: vec![],
            worker_concurrency: 1,
            lease_duration: chrono::Duration::seconds(30),
            visibility_timeout: chrono::Duration::seconds(5),
            retry_attempts: 3,
            log_filter: "info".into(),
            log_format: LogFormat::Text,
            tracing_url: None,
            sample_ratio: 0.1,
        }
    }

    fn widget_id(name: &str) -> ResourceID {
        ResourceID::parse(&format!(
            "/planes/radius/local/resourceGroups/default/providers/Test.Mock/widgets/{name}"
        ))
    }

    const BASE_PATH: &str =
        "/planes/{planeType}/{planeName}/resourceGroups/{rg}/providers/Test.Mock/widgets";

    /// Writes two output resources into the stored document on put, and tears
    /// both down (by deleting the record) on delete -- a handler that owns
    /// its own persistence, the same contract `ProcessorHandler` fulfills for
    /// `Processor<P>`-backed resource kinds.
    struct TwoOutputsHandler;

    #[async_trait]
    impl ResourceHandler for TwoOutputsHandler {
        fn resource_type(&self) -> &'static str {
            "Test.Mock/widgets"
        }

        async fn handle_put_or_patch(
            &self,
            store: Arc<dyn ResourceStore>,
            resource_id: &ResourceID,
        ) -> Result<Vec<OutputResource>, DispatchError> {
            let base = resource_id.to_string();
            let outputs = vec![
                OutputResource {
                    local_id: "primary".to_owned(),
                    id: format!("{base}/primary"),
                    radius_managed: true,
                },
                OutputResource {
                    local_id: "secondary".to_owned(),
                    id: format!("{base}/secondary"),
                    radius_managed: true,
                },
            ];

            let stored = store
                .get(resource_id)
                .await
                .map_err(|e| DispatchError::Handler(e.to_string()))?
                .ok_or_else(|| DispatchError::Handler("resource no longer exists".to_owned()))?;
            let mut data = stored.data;
            data["status"]["outputResources"] =
                serde_json::to_value(&outputs).map_err(|e| DispatchError::Handler(e.to_string()))?;
            store
                .save(resource_id, data, Some(&stored.etag))
                .await
                .map_err(|e| DispatchError::Handler(e.to_string()))?;

            Ok(outputs)
        }

        async fn handle_delete(
            &self,
            store: Arc<dyn ResourceStore>,
            resource_id: &ResourceID,
        ) -> Result<(), DispatchError> {
            if let Some(stored) = store
                .get(resource_id)
                .await
                .map_err(|e| DispatchError::Handler(e.to_string()))?
            {
                store
                    .delete(resource_id, Some(&stored.etag))
                    .await
                    .map_err(|e| DispatchError::Handler(e.to_string()))?;
            }
            Ok(())
        }
    }

    /// Panics on its first invocation per resource id, succeeds afterwards --
    /// exercises worker panic recovery (invariant I-W-1, scenario S4).
    struct PanicOnceHandler {
        attempts: std::sync::Mutex<HashMap<String, AtomicUsize>>,
    }

    impl PanicOnceHandler {
        fn new() -> Self {
            PanicOnceHandler {
                attempts: std::sync::Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ResourceHandler for PanicOnceHandler {
        fn resource_type(&self) -> &'static str {
            "Test.Mock/widgets"
        }

        async fn handle_put_or_patch(
            &self,
            _store: Arc<dyn ResourceStore>,
            resource_id: &ResourceID,
        ) -> Result<Vec<OutputResource>, DispatchError> {
            let key = resource_id.to_string();
            let first_attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let counter = attempts.entry(key).or_insert_with(|| AtomicUsize::new(0));
                counter.fetch_add(1, Ordering::SeqCst) == 0
            };
            if first_attempt {
                panic!("simulated processor panic on first attempt");
            }
            Ok(vec![])
        }

        async fn handle_delete(
            &self,
            _store: Arc<dyn ResourceStore>,
            _resource_id: &ResourceID,
        ) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[actix_web::test]
    async fn s1_put_then_poll_to_succeeded_returns_output_resources() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let status = Arc::new(StatusManager::new(store.clone()));
        let metrics = Arc::new(Metrics::default());

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(TwoOutputsHandler));
        let worker = WorkerRuntime::new(
            status.clone(),
            store.clone(),
            Arc::new(handlers),
            metrics.clone(),
            test_settings(),
        );

        let app = test::init_service(App::new().configure(|cfg| {
            controller::configure::<WidgetProperties, WidgetStatus>(
                cfg,
                BASE_PATH,
                ControllerState::new(store.clone(), status.clone(), metrics.clone()),
            )
        }))
        .await;

        let id = widget_id("s1");
        let put_req = test::TestRequest::put()
            .uri(&id.to_string())
            .set_json(serde_json::json!({"properties": {"name": "s1"}}))
            .to_request();
        let put_resp = test::call_service(&app, put_req).await;
        assert_eq!(put_resp.status(), 202);
        assert!(put_resp.headers().contains_key("Azure-AsyncOperation"));

        assert!(worker.drain_one().await, "operation should have been queued");

        let get_req = test::TestRequest::get().uri(&id.to_string()).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, get_req).await;
        assert_eq!(body["status"]["provisioningState"], "succeeded");
        assert_eq!(body["status"]["outputResources"].as_array().unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn s2_patch_with_stale_if_match_is_rejected() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let status = Arc::new(StatusManager::new(store.clone()));
        let metrics = Arc::new(Metrics::default());

        let app = test::init_service(App::new().configure(|cfg| {
            controller::configure::<WidgetProperties, WidgetStatus>(
                cfg,
                BASE_PATH,
                ControllerState::new(store.clone(), status.clone(), metrics.clone()),
            )
        }))
        .await;

        let id = widget_id("s2");
        let put_req = test::TestRequest::put()
            .uri(&id.to_string())
            .set_json(serde_json::json!({"properties": {"name": "s2"}}))
            .to_request();
        test::call_service(&app, put_req).await;

        let patch_req = test::TestRequest::patch()
            .uri(&id.to_string())
            .insert_header(("If-Match", "\"stale-etag\""))
            .set_json(serde_json::json!({"properties": {"name": "s2-renamed"}}))
            .to_request();
        let patch_resp = test::call_service(&app, patch_req).await;
        assert_eq!(patch_resp.status(), 412);
    }

    #[actix_web::test]
    async fn s3_delete_tears_down_output_resources_and_removes_the_record() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let status = Arc::new(StatusManager::new(store.clone()));
        let metrics = Arc::new(Metrics::default());

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(TwoOutputsHandler));
        let worker = WorkerRuntime::new(
            status.clone(),
            store.clone(),
            Arc::new(handlers),
            metrics.clone(),
            test_settings(),
        );

        let app = test::init_service(App::new().configure(|cfg| {
            controller::configure::<WidgetProperties, WidgetStatus>(
                cfg,
                BASE_PATH,
                ControllerState::new(store.clone(), status.clone(), metrics.clone()),
            )
        }))
        .await;

        let id = widget_id("s3");
        let put_req = test::TestRequest::put()
            .uri(&id.to_string())
            .set_json(serde_json::json!({"properties": {"name": "s3"}}))
            .to_request();
        test::call_service(&app, put_req).await;
        assert!(worker.drain_one().await);

        let delete_req = test::TestRequest::delete().uri(&id.to_string()).to_request();
        let delete_resp = test::call_service(&app, delete_req).await;
        assert_eq!(delete_resp.status(), 202);
        assert!(worker.drain_one().await);

        assert!(
            store.get(&id).await.unwrap().is_none(),
            "resource should be gone once the delete operation settles"
        );
    }

    #[tokio::test]
    async fn s4_a_panicking_handler_is_retried_to_success_not_lost() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let status = Arc::new(StatusManager::new(store.clone()));
        let metrics = Arc::new(Metrics::default());

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(PanicOnceHandler::new()));
        let worker = WorkerRuntime::new(status.clone(), store.clone(), Arc::new(handlers), metrics, test_settings());

        let id = widget_id("s4");
        store
            .save(&id, serde_json::json!({"properties": {"name": "s4"}}), None)
            .await
            .unwrap();
        status.enqueue(&id, OperationKind::Put).await.unwrap();

        // First drain: the handler panics, `dispatch`'s catch_unwind recovers
        // it, and the lease is released (not lost) for a retry.
        assert!(worker.drain_one().await);
        // Second drain: the same operation is redelivered and now succeeds.
        assert!(worker.drain_one().await);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.data["status"]["provisioningState"], "succeeded");
    }
}
