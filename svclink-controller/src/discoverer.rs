use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use svclink_crds::service_key;
use tracing::{debug, info, warn};

use crate::cluster::{LocalCluster, RemoteCluster};
use crate::registry::{ClusterInfo, ClusterInfos, write_sync_status};
use crate::{Error, Result};

/// A remote Service selected for synchronization.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub namespace: String,
    pub name: String,
    /// Contributing clusters, sorted by name.
    pub clusters: Vec<String>,
    /// Copy of the Service from the first contributing cluster.
    pub service: Service,
}

impl ServiceRecord {
    pub fn key(&self) -> String {
        service_key(&self.namespace, &self.name)
    }
}

/// Discovered Services keyed by `namespace/name`.
pub type ServiceRecords = BTreeMap<String, ServiceRecord>;

pub struct ServiceDiscoverer<L> {
    local: Arc<L>,
}

impl<L: LocalCluster> ServiceDiscoverer<L> {
    pub fn new(local: Arc<L>) -> Self {
        Self { local }
    }

    /// Unions the Services every connected cluster exposes after filtering.
    /// A non-empty `included_namespaces` is applied before any per-cluster
    /// policy. Each cluster's status records whether its discovery worked.
    pub async fn discover_services<R: RemoteCluster>(
        &self,
        infos: &mut ClusterInfos<R>,
        included_namespaces: &BTreeSet<String>,
    ) -> ServiceRecords {
        let mut records = ServiceRecords::new();
        for info in infos.values_mut() {
            match discover_cluster(info, included_namespaces).await {
                Ok(services) => {
                    info!(
                        "discovered {} services in cluster {}",
                        services.len(),
                        info.name
                    );
                    for (namespace, service) in services {
                        merge(&mut records, &info.name, namespace, service);
                    }
                    write_sync_status(self.local.as_ref(), info, None).await;
                }
                Err(e) => {
                    warn!("service discovery failed for cluster {}: {}", info.name, e);
                    let message = format!("discovery error: {e}");
                    write_sync_status(self.local.as_ref(), info, Some(message)).await;
                }
            }
        }
        records
    }
}

async fn discover_cluster<R: RemoteCluster>(
    info: &ClusterInfo<R>,
    included_namespaces: &BTreeSet<String>,
) -> Result<Vec<(String, Service)>> {
    let policy = info.filter_policy();
    let namespaces = info
        .client
        .list_namespaces()
        .await
        .map_err(|e| Error::list(&info.name, "namespaces", e))?;

    let mut selected = Vec::new();
    for namespace in namespaces {
        let namespace = namespace.name_any();
        if !included_namespaces.is_empty() && !included_namespaces.contains(&namespace) {
            debug!("namespace {} is not globally included", namespace);
            continue;
        }
        if policy.should_exclude_namespace(&namespace) {
            debug!("namespace {} excluded for cluster {}", namespace, info.name);
            continue;
        }

        let services = info
            .client
            .list_services(&namespace)
            .await
            .map_err(|e| Error::list(&info.name, "services", e))?;
        for service in services {
            let name = service.name_any();
            if policy.should_exclude_service(&namespace, &name) {
                debug!("service {}/{} excluded for cluster {}", namespace, name, info.name);
                continue;
            }
            selected.push((namespace.clone(), service));
        }
    }
    Ok(selected)
}

/// Adds `cluster` as a contributor of `service`. The snapshot always comes
/// from the lexicographically smallest contributor so the result does not
/// depend on the order clusters are visited in.
fn merge(records: &mut ServiceRecords, cluster: &str, namespace: String, service: Service) {
    let name = service.name_any();
    match records.entry(service_key(&namespace, &name)) {
        Entry::Vacant(entry) => {
            entry.insert(ServiceRecord {
                namespace,
                name,
                clusters: vec![cluster.to_string()],
                service,
            });
        }
        Entry::Occupied(mut entry) => {
            let record = entry.get_mut();
            let position = record.clusters.partition_point(|c| c.as_str() < cluster);
            if record.clusters.get(position).is_some_and(|c| c == cluster) {
                return;
            }
            record.clusters.insert(position, cluster.to_string());
            if position == 0 {
                record.service = service;
            }
        }
    }
}
