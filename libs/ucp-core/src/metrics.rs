use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{counter::Counter, family::Family, histogram::Histogram};
use prometheus_client::registry::{Registry, Unit};
use std::sync::Arc;
use tokio::time::Instant;

/// Three metric families, one per runtime concern, registered into a single
/// shared `Registry` and exposed at `GET /metrics` -- the same
/// `prometheus-client` idiom the teacher uses for `ReconcileMetrics` and
/// `MetricsLayer`, generalized from "one reconcile loop" to
/// "HTTP front door + worker pool + store".
#[derive(Clone)]
pub struct Metrics {
    pub http: HttpMetrics,
    pub worker: WorkerMetrics,
    pub store: StoreMetrics,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("radius_ucp");
        let http = HttpMetrics::default().register(&mut registry);
        let worker = WorkerMetrics::default().register(&mut registry);
        let store = StoreMetrics::default().register(&mut registry);
        Metrics {
            http,
            worker,
            store,
            registry: Arc::new(registry),
        }
    }
}

impl Metrics {
    pub fn render(&self) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .expect("metrics encode to a string never fails");
        buffer
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct RouteLabels {
    pub route: String,
    pub method: String,
    pub status: String,
}

#[derive(Clone, Default)]
pub struct HttpMetrics {
    requests: Family<RouteLabels, Counter>,
    duration: Family<RouteLabels, Histogram>,
}

impl HttpMetrics {
    fn register(self, r: &mut Registry) -> Self {
        let duration = Family::<RouteLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.01, 0.05, 0.1, 0.5, 1., 5.].into_iter())
        });
        let requests = Family::<RouteLabels, Counter>::default();
        r.register_with_unit(
            "http_request_duration",
            "UCP HTTP request duration",
            Unit::Seconds,
            duration.clone(),
        );
        r.register("http_requests", "UCP HTTP requests", requests.clone());
        HttpMetrics { requests, duration }
    }

    pub fn observe(&self, route: &str, method: &str, status: u16, duration_secs: f64) {
        let labels = RouteLabels {
            route: route.to_owned(),
            method: method.to_owned(),
            status: status.to_string(),
        };
        self.requests.get_or_create(&labels).inc();
        self.duration.get_or_create(&labels).observe(duration_secs);
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct WorkerOutcomeLabels {
    pub resource_type: String,
    pub outcome: String,
}

#[derive(Clone, Default)]
pub struct WorkerMetrics {
    dequeued: Counter,
    completed: Family<WorkerOutcomeLabels, Counter>,
    lease_extensions: Counter,
    duration: Histogram,
}

impl WorkerMetrics {
    fn register(self, r: &mut Registry) -> Self {
        let duration = Histogram::new([0.1, 0.5, 1., 5., 10., 30., 60.].into_iter());
        r.register("worker_jobs_dequeued", "jobs dequeued", self.dequeued.clone());
        r.register(
            "worker_jobs_completed",
            "jobs completed by outcome",
            self.completed.clone(),
        );
        r.register(
            "worker_lease_extensions",
            "lease extensions issued",
            self.lease_extensions.clone(),
        );
        r.register_with_unit(
            "worker_job_duration",
            "job processing duration",
            Unit::Seconds,
            duration.clone(),
        );
        WorkerMetrics { duration, ..self }
    }

    pub fn job_dequeued(&self) {
        self.dequeued.inc();
    }

    pub fn job_completed(&self, resource_type: &str, outcome: &str) {
        self.completed
            .get_or_create(&WorkerOutcomeLabels {
                resource_type: resource_type.to_owned(),
                outcome: outcome.to_owned(),
            })
            .inc();
    }

    pub fn lease_extended(&self) {
        self.lease_extensions.inc();
    }

    pub fn measure(&self) -> JobMeasurer {
        JobMeasurer {
            start: Instant::now(),
            histogram: self.duration.clone(),
        }
    }
}

/// Drop-based timer, same pattern as the teacher's `ReconcileMeasurer`.
pub struct JobMeasurer {
    start: Instant,
    histogram: Histogram,
}

impl Drop for JobMeasurer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct StoreOpLabels {
    pub op: String,
}

#[derive(Clone, Default)]
pub struct StoreMetrics {
    latency: Family<StoreOpLabels, Histogram>,
    conflicts: Counter,
}

impl StoreMetrics {
    fn register(self, r: &mut Registry) -> Self {
        let latency = Family::<StoreOpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5].into_iter())
        });
        r.register_with_unit(
            "store_op_duration",
            "store operation duration",
            Unit::Seconds,
            latency.clone(),
        );
        r.register(
            "store_conflicts",
            "precondition-failed store writes",
            self.conflicts.clone(),
        );
        StoreMetrics { latency, ..self }
    }

    pub fn observe(&self, op: &str, duration_secs: f64) {
        self.latency
            .get_or_create(&StoreOpLabels { op: op.to_owned() })
            .observe(duration_secs);
    }

    pub fn conflict(&self) {
        self.conflicts.inc();
    }
}
