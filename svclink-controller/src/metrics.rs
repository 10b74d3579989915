use std::sync::{LazyLock, PoisonError, RwLock};

use opentelemetry::trace::TraceId;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, exemplar::HistogramWithExemplars, family::Family, gauge::Gauge},
    registry::{Registry, Unit},
};
use tokio::time::Instant;

use crate::Error;

pub static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::with_prefix("svclink")));

/// Renders the registry in the prometheus text format.
pub fn encode() -> String {
    let mut buffer = String::new();
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    match prometheus_client::encoding::text::encode(&mut buffer, &registry) {
        Ok(_) => buffer,
        Err(_) => "".into(),
    }
}

#[derive(Clone)]
pub struct SyncMetrics {
    pub cycles: Counter,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: HistogramWithExemplars<TraceLabel>,
    pub connected_clusters: Gauge,
    pub synced_services: Gauge,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    /// Register sync metrics to start tracking them.
    pub fn new() -> Self {
        let metrics = Self::unregistered();
        let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
        registry.register_with_unit(
            "sync_cycle_duration",
            "sync cycle duration",
            Unit::Seconds,
            metrics.duration.clone(),
        );
        registry.register(
            "sync_failures",
            "Number of sync errors",
            metrics.failures.clone(),
        );
        registry.register("sync_cycles", "Number of sync cycles", metrics.cycles.clone());
        registry.register(
            "connected_clusters",
            "Remote clusters connected in the last cycle",
            metrics.connected_clusters.clone(),
        );
        registry.register(
            "synced_services",
            "Services reconciled in the last cycle",
            metrics.synced_services.clone(),
        );
        metrics
    }

    /// Metrics that are not exported. Used where several instances coexist.
    pub fn unregistered() -> Self {
        Self {
            cycles: Counter::default(),
            failures: Family::default(),
            duration: HistogramWithExemplars::new(
                [0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0].into_iter(),
            ),
            connected_clusters: Gauge::default(),
            synced_services: Gauge::default(),
        }
    }

    pub fn count_failure(&self, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                error: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(&self, trace_id: &TraceId) -> CycleMeasurer {
        self.cycles.inc();
        CycleMeasurer {
            start: Instant::now(),
            labels: trace_id.try_into().ok(),
            metric: self.duration.clone(),
        }
    }

    pub fn record_cycle(&self, connected_clusters: usize, synced_services: usize) {
        self.connected_clusters
            .set(i64::try_from(connected_clusters).unwrap_or(i64::MAX));
        self.synced_services
            .set(i64::try_from(synced_services).unwrap_or(i64::MAX));
    }
}

pub struct CycleMeasurer {
    start: Instant,
    labels: Option<TraceLabel>,
    metric: HistogramWithExemplars<TraceLabel>,
}

impl Drop for CycleMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        let labels = self.labels.take();
        self.metric.observe(duration, labels);
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub error: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TraceLabel {
    pub trace_id: String,
}

impl TryFrom<&TraceId> for TraceLabel {
    type Error = crate::Error;

    fn try_from(id: &TraceId) -> Result<TraceLabel, Self::Error> {
        if std::matches!(id, &TraceId::INVALID) {
            Err(Error::Other("failed to convert trace id to label".into()))
        } else {
            let trace_id = id.to_string();
            Ok(Self { trace_id })
        }
    }
}

pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;
    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}
