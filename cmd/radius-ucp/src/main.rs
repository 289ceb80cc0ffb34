use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use clap::Parser;
use kube::Config;
use prometheus_client::registry::Registry;

use radius_k8s_util::client::new_client_with_metrics;
use radius_providers::core::{ContainerProcessor, ContainerProperties, ContainerStatus};
use radius_providers::dapr::{DaprStateStoreProcessor, DaprStateStoreProperties, DaprStateStoreStatus};
use ucp_core::adapter::ProcessorHandler;
use ucp_core::config::{Args, Settings};
use ucp_core::controller::{self, ControllerState};
use ucp_core::dapr::DaprReconciler;
use ucp_core::datastore::DatastoreService;
use ucp_core::id::ResourceID;
use ucp_core::metrics::Metrics;
use ucp_core::status::StatusManager;
use ucp_core::store::ResourceStore;
use ucp_core::ucp::{PlaneRegistry, ProxyRouter, ResourceGroupRegistry};
use ucp_core::worker::{HandlerRegistry, WorkerRuntime};
use ucp_core::{telemetry, ucp, Error};

/// Every Dapr-backed and Kubernetes-backed manifest this runtime writes is
/// scoped to one namespace; multi-namespace placement is environment-level
/// policy the Applications.Core environment resource owns, not this binary.
const NAMESPACE: &str = "radius-system";

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json("healthy")
}

async fn metrics_endpoint(metrics: web::Data<Arc<Metrics>>, kube_registry: web::Data<Arc<Registry>>) -> HttpResponse {
    let mut buffer = metrics.render();
    let mut kube_buffer = String::new();
    if prometheus_client::encoding::text::encode(&mut kube_buffer, &kube_registry).is_ok() {
        buffer.push_str(&kube_buffer);
    }
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(buffer)
}

/// Anything whose id doesn't match one of the registered tracked-resource
/// routes above falls through here: a non-`radius` plane id is reverse
/// proxied to its downstream control plane (I-RT-1).
async fn proxy_fallback(
    proxy: web::Data<Arc<ProxyRouter>>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, Error> {
    let id: ResourceID = req.path().parse()?;
    proxy.dispatch(&id, req.method().clone(), &req, payload).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args)?;

    telemetry::init(
        &settings.log_filter,
        settings.log_format,
        settings.tracing_url.as_deref(),
        settings.sample_ratio,
    )
    .await?;

    let mut kube_registry = Registry::with_prefix("radius_ucp_kube_client");
    let kube_config = Config::infer().await?;
    let client = new_client_with_metrics(kube_config, &mut kube_registry).await?;
    let kube_registry = Arc::new(kube_registry);

    let metrics = Arc::new(Metrics::default());

    let (datastore, ready) = DatastoreService::start(&settings).await?;
    ready.wait().await;
    let store: Arc<dyn ResourceStore> = datastore.store();
    let status = Arc::new(StatusManager::new(store.clone()));

    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(ProcessorHandler::new(Arc::new(ContainerProcessor::new(
        client.clone(),
        NAMESPACE.to_owned(),
    )))));
    handlers.register(Arc::new(ProcessorHandler::new(Arc::new(DaprStateStoreProcessor::new(
        DaprReconciler::new(client.clone()),
        NAMESPACE.to_owned(),
    )))));

    let worker = Arc::new(WorkerRuntime::new(
        status.clone(),
        store.clone(),
        Arc::new(handlers),
        metrics.clone(),
        settings.clone(),
    ));
    let worker_pool = tokio::spawn(worker.run_pool());

    let planes = Arc::new(PlaneRegistry::new(store.clone()));
    let resource_groups = Arc::new(ResourceGroupRegistry::new(store.clone()));
    let proxy = Arc::new(ProxyRouter::new(planes.clone()));

    const CONTAINERS_BASE: &str =
        "/planes/{planeType}/{planeName}/resourceGroups/{rg}/providers/Applications.Core/containers";
    const STATE_STORES_BASE: &str =
        "/planes/{planeType}/{planeName}/resourceGroups/{rg}/providers/Applications.Dapr/stateStores";

    let store_data = store.clone();
    let status_data = status.clone();
    let metrics_data = metrics.clone();
    let kube_registry_data = kube_registry.clone();
    let planes_data = planes.clone();
    let resource_groups_data = resource_groups.clone();
    let proxy_data = proxy.clone();

    let bind_addr = format!("{}:{}", settings.host, settings.port);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(metrics_data.clone()))
            .app_data(web::Data::new(kube_registry_data.clone()))
            .app_data(web::Data::new(proxy_data.clone()))
            .route("/healthz", web::get().to(healthz))
            .route("/metrics", web::get().to(metrics_endpoint))
            .configure(|cfg| ucp::plane::configure(cfg, planes_data.clone()))
            .configure(|cfg| ucp::resourcegroup::configure(cfg, resource_groups_data.clone()))
            .configure(|cfg| {
                controller::configure::<ContainerProperties, ContainerStatus>(
                    cfg,
                    CONTAINERS_BASE,
                    ControllerState::new(store_data.clone(), status_data.clone(), metrics_data.clone()),
                )
            })
            .configure(|cfg| {
                controller::configure::<DaprStateStoreProperties, DaprStateStoreStatus>(
                    cfg,
                    STATE_STORES_BASE,
                    ControllerState::new(store_data.clone(), status_data.clone(), metrics_data.clone()),
                )
            })
            .default_service(web::route().to(proxy_fallback))
    })
    .bind(bind_addr)?
    .shutdown_timeout(5);

    // Worker pool and HTTP front door are sibling tasks; either one exiting
    // tears down the other, same join idiom as the teacher's controller/
    // server pair.
    let (_worker_result, server_result) = tokio::join!(worker_pool, server.run());
    server_result?;

    datastore.shutdown().await;
    Ok(())
}
