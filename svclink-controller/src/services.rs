use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use svclink_crds::{SYNC_ANNOTATION, service_key};
use tracing::{debug, info};

use crate::cluster::LocalCluster;
use crate::discoverer::{ServiceRecord, ServiceRecords};
use crate::{Error, Result};

/// Local Services backing the discovered remote Services.
pub struct LocalServices<L> {
    local: Arc<L>,
}

impl<L: LocalCluster> LocalServices<L> {
    pub fn new(local: Arc<L>) -> Self {
        Self { local }
    }

    /// Creates every discovered Service that is missing locally, along with
    /// its namespace. A failure skips only the namespace or Service it
    /// happened in.
    pub async fn sync_services_to_local_cluster(&self, records: &ServiceRecords) -> Vec<Error> {
        let mut by_namespace: BTreeMap<&str, Vec<&ServiceRecord>> = BTreeMap::new();
        for record in records.values() {
            by_namespace
                .entry(record.namespace.as_str())
                .or_default()
                .push(record);
        }

        let mut errors = Vec::new();
        for (namespace, records) in by_namespace {
            if let Err(e) = self.ensure_namespace(namespace).await {
                errors.push(e);
                continue;
            }
            let existing: BTreeSet<String> = match self.local.list_namespaced_services(namespace).await {
                Ok(services) => services.iter().map(|s| s.name_any()).collect(),
                Err(e) => {
                    errors.push(Error::list("local", "services", e));
                    continue;
                }
            };

            for record in records.into_iter().filter(|r| !existing.contains(&r.name)) {
                match self
                    .local
                    .create_service(namespace, &local_service(record))
                    .await
                {
                    Ok(()) => info!("created Service {} from remote clusters", record.key()),
                    Err(e) => errors.push(Error::ReconcileWrite {
                        action: "create",
                        kind: "Service",
                        name: record.key(),
                        message: e.to_string(),
                    }),
                }
            }
        }
        errors
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let write_error = |action, e: Error| Error::ReconcileWrite {
            action,
            kind: "Namespace",
            name: namespace.to_string(),
            message: e.to_string(),
        };
        let found = self
            .local
            .get_namespace(namespace)
            .await
            .map_err(|e| write_error("get", e))?;
        if found.is_none() {
            self.local
                .create_namespace(namespace)
                .await
                .map_err(|e| write_error("create", e))?;
            info!("created Namespace {}", namespace);
        }
        Ok(())
    }

    /// Keeps only the records whose Service already exists locally in an
    /// included namespace.
    pub async fn filter_existing(
        &self,
        mut records: ServiceRecords,
        included_namespaces: &BTreeSet<String>,
    ) -> Result<ServiceRecords> {
        let local: BTreeSet<String> = self
            .local
            .list_services()
            .await
            .map_err(|e| Error::list("local", "services", e))?
            .iter()
            .filter_map(|s| Some(service_key(&s.namespace()?, &s.name_any())))
            .collect();

        records.retain(|key, record| {
            let included = included_namespaces.is_empty()
                || included_namespaces.contains(&record.namespace);
            if !local.contains(key) {
                debug!("Service {} does not exist locally, skipping", key);
            }
            included && local.contains(key)
        });
        Ok(records)
    }
}

/// Local copy of a remote Service. Node ports are cluster specific and
/// dropped.
fn local_service(record: &ServiceRecord) -> Service {
    let remote = &record.service;
    let mut annotations = remote.metadata.annotations.clone().unwrap_or_default();
    annotations.insert(SYNC_ANNOTATION.to_string(), "true".to_string());

    let spec = remote.spec.as_ref().map(|spec| ServiceSpec {
        ports: spec.ports.as_ref().map(|ports| {
            ports
                .iter()
                .cloned()
                .map(|port| ServicePort {
                    node_port: None,
                    ..port
                })
                .collect()
        }),
        selector: spec.selector.clone(),
        ..Default::default()
    });

    Service {
        metadata: ObjectMeta {
            name: Some(record.name.clone()),
            namespace: Some(record.namespace.clone()),
            labels: remote.metadata.labels.clone(),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec,
        ..Default::default()
    }
}
