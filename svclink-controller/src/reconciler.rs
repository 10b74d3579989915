use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kube::api::ObjectMeta;
use kube::core::{Expression, Selector};
use svclink_crds::{
    CLUSTER_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_NAME_LABEL, managed_slice_name,
    service_key,
};
use tracing::{debug, info, instrument};

use crate::aggregator::EndpointGroup;
use crate::cluster::LocalCluster;
use crate::{Error, Result};

const KIND: &str = "EndpointSlice";

/// Converges the managed EndpointSlices of one Service towards the groups
/// aggregated from remote clusters.
pub struct Reconciler<L> {
    local: Arc<L>,
}

impl<L: LocalCluster> Reconciler<L> {
    pub fn new(local: Arc<L>) -> Self {
        Self { local }
    }

    /// Writes one managed slice per group and deletes the managed slices of
    /// clusters that are not in `groups`. Failures are returned, never
    /// short-circuited.
    #[instrument(skip(self, groups), fields(clusters = groups.len()))]
    pub async fn reconcile(
        &self,
        namespace: &str,
        service: &str,
        groups: &[EndpointGroup],
    ) -> Vec<Error> {
        let mut errors = Vec::new();

        if !groups.is_empty() {
            let parent = self
                .local
                .get_service(namespace, service)
                .await
                .map_err(|e| e.to_string());
            for group in groups {
                let result = match &parent {
                    Ok(Some(parent)) => self.reconcile_group(parent, namespace, service, group).await,
                    Ok(None) => Err(Error::MissingParent {
                        namespace: namespace.to_string(),
                        name: service.to_string(),
                    }),
                    Err(e) => Err(Error::Other(format!(
                        "failed to get parent Service {}: {}",
                        service_key(namespace, service),
                        e
                    ))),
                };
                if let Err(e) = result {
                    errors.push(e);
                }
            }
        }

        let active: BTreeSet<&str> = groups.iter().map(|g| g.cluster.as_str()).collect();
        errors.extend(self.cleanup_orphans(namespace, service, &active).await);
        errors
    }

    async fn reconcile_group(
        &self,
        parent: &Service,
        namespace: &str,
        service: &str,
        group: &EndpointGroup,
    ) -> Result<()> {
        let name = managed_slice_name(service, &group.cluster);
        let desired = desired_slice(parent, namespace, service, &name, group);
        let existing = self
            .local
            .get_endpoint_slice(namespace, &name)
            .await
            .map_err(|e| write_error("get", namespace, &name, e))?;

        match existing {
            None => {
                self.create(namespace, &desired).await?;
                info!(
                    "created EndpointSlice {}/{} for cluster {} with {} endpoints",
                    namespace,
                    name,
                    group.cluster,
                    group.endpoints.len()
                );
            }
            Some(existing) if existing.address_type != desired.address_type => {
                // addressType is immutable
                self.local
                    .delete_endpoint_slice(namespace, &name)
                    .await
                    .map_err(|e| write_error("delete", namespace, &name, e))?;
                self.create(namespace, &desired).await?;
                info!(
                    "recreated EndpointSlice {}/{} as {}",
                    namespace, name, desired.address_type
                );
            }
            Some(existing) if is_up_to_date(&existing, &desired) => {
                debug!("EndpointSlice {}/{} is up to date", namespace, name);
            }
            Some(mut existing) => {
                existing.endpoints = desired.endpoints;
                existing.ports = desired.ports;
                existing
                    .labels_mut()
                    .extend(managed_labels(service, &group.cluster));
                self.local
                    .replace_endpoint_slice(namespace, &existing)
                    .await
                    .map_err(|e| write_error("update", namespace, &name, e))?;
                info!(
                    "updated EndpointSlice {}/{} for cluster {} with {} endpoints",
                    namespace,
                    name,
                    group.cluster,
                    existing.endpoints.len()
                );
            }
        }
        Ok(())
    }

    async fn create(&self, namespace: &str, slice: &EndpointSlice) -> Result<()> {
        self.local
            .create_endpoint_slice(namespace, slice)
            .await
            .map_err(|e| write_error("create", namespace, &slice.name_any(), e))
    }

    async fn cleanup_orphans(
        &self,
        namespace: &str,
        service: &str,
        active: &BTreeSet<&str>,
    ) -> Vec<Error> {
        let selector = Selector::from_iter([
            Expression::Equal(SERVICE_NAME_LABEL.into(), service.into()),
            Expression::Exists(CLUSTER_LABEL.into()),
        ]);
        let slices = match self.local.list_endpoint_slices(namespace, &selector).await {
            Ok(slices) => slices,
            Err(e) => return vec![Error::list("local", "endpointslices", e)],
        };

        let mut errors = Vec::new();
        for slice in slices {
            let Some(cluster) = slice.labels().get(CLUSTER_LABEL) else {
                continue;
            };
            if active.contains(cluster.as_str()) {
                continue;
            }
            let name = slice.name_any();
            match self.local.delete_endpoint_slice(namespace, &name).await {
                Ok(()) => info!(
                    "deleted orphaned EndpointSlice {}/{} for cluster {}",
                    namespace, name, cluster
                ),
                Err(e) => errors.push(write_error("delete", namespace, &name, e)),
            }
        }
        errors
    }
}

fn write_error(action: &'static str, namespace: &str, name: &str, source: Error) -> Error {
    Error::ReconcileWrite {
        action,
        kind: KIND,
        name: service_key(namespace, name),
        message: source.to_string(),
    }
}

fn managed_labels(service: &str, cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVICE_NAME_LABEL.to_string(), service.to_string()),
        (CLUSTER_LABEL.to_string(), cluster.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

fn owner_references(service: &Service) -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: "v1".into(),
        block_owner_deletion: Some(true),
        controller: Some(true),
        kind: "Service".into(),
        name: service.name_any(),
        uid: <Service as ResourceExt>::uid(service).unwrap_or_default(),
    }]
}

fn desired_slice(
    parent: &Service,
    namespace: &str,
    service: &str,
    name: &str,
    group: &EndpointGroup,
) -> EndpointSlice {
    EndpointSlice {
        address_type: group.address_type.clone(),
        endpoints: group.endpoints.clone(),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(service, &group.cluster)),
            owner_references: Some(owner_references(parent)),
            ..Default::default()
        },
        ports: group.ports.clone(),
    }
}

fn is_up_to_date(existing: &EndpointSlice, desired: &EndpointSlice) -> bool {
    let labels = existing.labels();
    existing.endpoints == desired.endpoints
        && existing.ports == desired.ports
        && desired
            .labels()
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
}
