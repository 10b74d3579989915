use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use kube::core::{Expression, Selector};
use kube::{Client, ResourceExt};
use opentelemetry::trace::TraceId;
use svclink_crds::{CLUSTER_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_NAME_LABEL, service_key};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, field, info, instrument, warn};

use crate::aggregator::aggregate_endpoints;
use crate::cluster::{KubeConnector, KubeLocalCluster, LocalCluster, RemoteCluster, RemoteConnector};
use crate::config::SyncConfig;
use crate::discoverer::{ServiceDiscoverer, ServiceRecord, ServiceRecords};
use crate::metrics::{SyncMetrics, get_trace_id};
use crate::reconciler::Reconciler;
use crate::registry::{ClusterInfos, ClusterRegistry};
use crate::services::LocalServices;
use crate::{Error, Result};

/// Outcome of one sync cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub connected_clusters: usize,
    pub discovered_services: usize,
    pub reconciled_services: usize,
    pub errors: Vec<Error>,
    /// The cycle stopped early because of shutdown
    pub cancelled: bool,
}

/// Runs registry, discovery, aggregation and reconciliation in that order,
/// once per interval.
pub struct Orchestrator<L, C: RemoteConnector> {
    config: SyncConfig,
    local: Arc<L>,
    registry: ClusterRegistry<L, C>,
    discoverer: ServiceDiscoverer<L>,
    reconciler: Arc<Reconciler<L>>,
    services: LocalServices<L>,
    metrics: SyncMetrics,
    running: Mutex<()>,
}

impl<L, C> Orchestrator<L, C>
where
    L: LocalCluster + 'static,
    C: RemoteConnector,
    C::Remote: 'static,
{
    pub fn new(config: SyncConfig, local: Arc<L>, connector: C, metrics: SyncMetrics) -> Self {
        Self {
            registry: ClusterRegistry::new(local.clone(), connector),
            discoverer: ServiceDiscoverer::new(local.clone()),
            reconciler: Arc::new(Reconciler::new(local.clone())),
            services: LocalServices::new(local.clone()),
            local,
            config,
            metrics,
            running: Mutex::new(()),
        }
    }

    /// Syncs every interval until `cancel` fires. `ready` is cancelled once
    /// the first cycle completed.
    pub async fn run(&self, ready: CancellationToken, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("starting sync loop every {:?}", self.config.sync_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.run_once(&cancel).await {
                Ok(report) if report.cancelled => break,
                Ok(report) => {
                    self.record(&report);
                    ready.cancel();
                }
                Err(e) => {
                    self.metrics.count_failure(&e);
                    error!("sync cycle failed: {}", e);
                }
            }
        }
        info!("sync loop stopped");
    }

    /// One full cycle. Only a failure to list ClusterLinks or an overlapping
    /// cycle is returned as an error; everything else lands in the report.
    #[instrument(skip(self, cancel), fields(trace_id))]
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(Error::CycleInProgress);
        };
        let trace_id = get_trace_id();
        if trace_id != TraceId::INVALID {
            Span::current().record("trace_id", field::display(&trace_id));
        }
        let _measure = self.metrics.count_and_measure(&trace_id);
        let cancelled = CycleReport {
            cancelled: true,
            ..Default::default()
        };
        if cancel.is_cancelled() {
            return Ok(cancelled);
        }
        info!("starting sync cycle");

        let Some(infos) = cancel
            .run_until_cancelled(self.registry.list_cluster_info())
            .await
        else {
            return Ok(cancelled);
        };
        let mut infos = infos?;
        let mut report = CycleReport {
            connected_clusters: infos.len(),
            ..Default::default()
        };

        let included = &self.config.included_namespaces;
        let Some(records) = cancel
            .run_until_cancelled(self.discoverer.discover_services(&mut infos, included))
            .await
        else {
            return Ok(CycleReport { cancelled: true, ..report });
        };
        report.discovered_services = records.len();

        let records = if self.config.sync_services_to_local_cluster {
            let Some(errors) = cancel
                .run_until_cancelled(self.services.sync_services_to_local_cluster(&records))
                .await
            else {
                return Ok(CycleReport { cancelled: true, ..report });
            };
            report.errors.extend(errors);
            records
        } else {
            match cancel
                .run_until_cancelled(self.services.filter_existing(records, included))
                .await
            {
                None => return Ok(CycleReport { cancelled: true, ..report }),
                Some(Ok(records)) => records,
                Some(Err(e)) => {
                    error!("skipping endpoint reconciliation: {}", e);
                    report.errors.push(e);
                    return Ok(report);
                }
            }
        };

        let Some((reconciled, errors)) = cancel
            .run_until_cancelled(self.sync_services(records, Arc::new(infos)))
            .await
        else {
            return Ok(CycleReport { cancelled: true, ..report });
        };
        report.reconciled_services = reconciled.len();
        report.errors.extend(errors);

        let Some(errors) = cancel
            .run_until_cancelled(self.remove_stale_services(&reconciled))
            .await
        else {
            return Ok(CycleReport { cancelled: true, ..report });
        };
        report.errors.extend(errors);
        Ok(report)
    }

    /// Aggregates and reconciles each Service, at most `concurrency` at a time.
    async fn sync_services(
        &self,
        records: ServiceRecords,
        infos: Arc<ClusterInfos<C::Remote>>,
    ) -> (BTreeSet<String>, Vec<Error>) {
        let mut tasks = JoinSet::new();
        let mut reconciled = BTreeSet::new();
        let mut errors = Vec::new();

        for (key, record) in records {
            while tasks.len() >= self.config.concurrency {
                if let Some(joined) = tasks.join_next().await {
                    collect(joined, &mut errors);
                }
            }
            reconciled.insert(key);
            tasks.spawn(
                sync_service(self.reconciler.clone(), infos.clone(), record).in_current_span(),
            );
        }
        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut errors);
        }
        (reconciled, errors)
    }

    /// Removes managed slices of Services no cluster contributes to anymore.
    async fn remove_stale_services(&self, reconciled: &BTreeSet<String>) -> Vec<Error> {
        let selector = Selector::from_iter([
            Expression::Equal(MANAGED_BY_LABEL.into(), MANAGED_BY_VALUE.into()),
            Expression::Exists(CLUSTER_LABEL.into()),
        ]);
        let slices = match self.local.list_all_endpoint_slices(&selector).await {
            Ok(slices) => slices,
            Err(e) => return vec![Error::list("local", "endpointslices", e)],
        };

        let stale: BTreeSet<(String, String)> = slices
            .iter()
            .filter_map(|slice| {
                let namespace = slice.namespace()?;
                let service = slice.labels().get(SERVICE_NAME_LABEL)?.clone();
                (!reconciled.contains(&service_key(&namespace, &service)))
                    .then_some((namespace, service))
            })
            .collect();

        let mut errors = Vec::new();
        for (namespace, service) in stale {
            info!(
                "no cluster contributes to {}/{} anymore, removing its EndpointSlices",
                namespace, service
            );
            errors.extend(self.reconciler.reconcile(&namespace, &service, &[]).await);
        }
        errors
    }

    fn record(&self, report: &CycleReport) {
        self.metrics
            .record_cycle(report.connected_clusters, report.reconciled_services);
        for e in &report.errors {
            self.metrics.count_failure(e);
            warn!("{}", e);
        }
        info!(
            "sync cycle completed: {} clusters connected, {} services discovered, {} reconciled, {} errors",
            report.connected_clusters,
            report.discovered_services,
            report.reconciled_services,
            report.errors.len()
        );
    }
}

#[instrument(skip_all, fields(service = %record.key()))]
async fn sync_service<L, R>(
    reconciler: Arc<Reconciler<L>>,
    infos: Arc<ClusterInfos<R>>,
    record: ServiceRecord,
) -> Vec<Error>
where
    L: LocalCluster,
    R: RemoteCluster,
{
    debug!("syncing from clusters {:?}", record.clusters);
    let groups = aggregate_endpoints(&record.namespace, &record.name, &record.clusters, &infos).await;
    reconciler
        .reconcile(&record.namespace, &record.name, &groups)
        .await
}

fn collect(joined: std::result::Result<Vec<Error>, JoinError>, errors: &mut Vec<Error>) {
    match joined {
        Ok(service_errors) => errors.extend(service_errors),
        Err(e) => errors.push(Error::Other(format!("service sync task failed: {e}"))),
    }
}

/// Runs the sync loop against the cluster `client` points at until `cancel`
/// fires.
pub async fn start_sync_loop(
    client: Client,
    config: SyncConfig,
    remote_timeout: Duration,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    config.validate()?;
    let local = Arc::new(KubeLocalCluster::new(client));
    let orchestrator = Orchestrator::new(
        config,
        local,
        KubeConnector::new(remote_timeout),
        SyncMetrics::new(),
    );
    orchestrator.run(ready, cancel).await;
    Ok(())
}
