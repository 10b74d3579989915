use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::ResourceExt;
use svclink_crds::v1alpha1::clusterlink::{ClusterLink, ClusterLinkStatus, FilterPolicy};
use svclink_k8s_utils::decode_credentials;
use tracing::{debug, error, info, warn};

use crate::cluster::{LocalCluster, RemoteCluster, RemoteConnector};
use crate::{Error, Result};

/// A connected remote cluster. Only lives for one sync cycle.
pub struct ClusterInfo<R> {
    pub name: String,
    pub link: ClusterLink,
    pub client: R,
}

impl<R> ClusterInfo<R> {
    pub fn filter_policy(&self) -> FilterPolicy {
        self.link.spec.filter_policy()
    }
}

/// Connected clusters keyed by ClusterLink name.
pub type ClusterInfos<R> = BTreeMap<String, ClusterInfo<R>>;

pub struct ClusterRegistry<L, C> {
    local: Arc<L>,
    connector: C,
}

impl<L, C> ClusterRegistry<L, C>
where
    L: LocalCluster,
    C: RemoteConnector,
{
    pub fn new(local: Arc<L>, connector: C) -> Self {
        Self { local, connector }
    }

    /// Connects to every enabled ClusterLink and records the outcome in its
    /// status. Clusters that fail to connect are left out of the result.
    pub async fn list_cluster_info(&self) -> Result<ClusterInfos<C::Remote>> {
        let links = self
            .local
            .list_cluster_links()
            .await
            .map_err(|e| Error::RegistryList(e.to_string()))?;

        let mut infos = ClusterInfos::new();
        for mut link in links {
            let name = link.name_any();
            if !link.spec.enabled {
                debug!("ClusterLink {} is disabled, skipping", name);
                continue;
            }

            match self.connect(&name, &link).await {
                Ok((client, version)) => {
                    info!("connected to cluster {} ({})", name, version);
                    let status = ClusterLinkStatus::connected(link.status.as_ref(), version, now());
                    write_status(self.local.as_ref(), &name, &status).await;
                    link.status = Some(status);
                    infos.insert(name.clone(), ClusterInfo { name, link, client });
                }
                Err(e) => {
                    warn!("cluster {} is unavailable: {}", name, e);
                    let status =
                        ClusterLinkStatus::disconnected(link.status.as_ref(), e.to_string(), now());
                    write_status(self.local.as_ref(), &name, &status).await;
                }
            }
        }
        Ok(infos)
    }

    async fn connect(&self, name: &str, link: &ClusterLink) -> Result<(C::Remote, String)> {
        let kubeconfig =
            decode_credentials(&link.spec.kubeconfig).map_err(|e| Error::CredentialDecode {
                cluster: name.to_string(),
                message: e.to_string(),
            })?;
        let client_error = |e: Error| Error::ClientBuild {
            cluster: name.to_string(),
            message: e.to_string(),
        };
        let client = self
            .connector
            .connect(&kubeconfig)
            .await
            .map_err(client_error)?;
        let version = client.server_version().await.map_err(client_error)?;
        Ok((client, version))
    }
}

/// Records the outcome of a sync attempt against a connected cluster.
pub(crate) async fn write_sync_status<L, R>(local: &L, info: &mut ClusterInfo<R>, error: Option<String>)
where
    L: LocalCluster,
{
    let status = info
        .link
        .status
        .clone()
        .unwrap_or_default()
        .with_sync_result(error, now());
    write_status(local, &info.name, &status).await;
    info.link.status = Some(status);
}

async fn write_status<L: LocalCluster>(local: &L, name: &str, status: &ClusterLinkStatus) {
    if let Err(e) = local.patch_cluster_link_status(name, status).await {
        error!("failed to update status of ClusterLink {}: {}", name, e);
    }
}

fn now() -> Time {
    Time(Utc::now())
}
