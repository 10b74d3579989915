use k8s_openapi::api::discovery::v1::{Endpoint, EndpointPort, EndpointSlice};
use kube::ResourceExt;
use kube::core::{Expression, Selector};
use svclink_crds::{CLUSTER_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_NAME_LABEL};
use tracing::{debug, warn};

use crate::Error;
use crate::cluster::RemoteCluster;
use crate::registry::ClusterInfos;

/// Ready endpoints one cluster contributes to a Service.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointGroup {
    pub cluster: String,
    pub address_type: String,
    pub endpoints: Vec<Endpoint>,
    pub ports: Option<Vec<EndpointPort>>,
}

/// Collects the ready endpoints of `service` from each contributing cluster.
/// Clusters that are no longer connected, fail to list, or have nothing
/// ready are left out.
pub async fn aggregate_endpoints<R: RemoteCluster>(
    namespace: &str,
    service: &str,
    clusters: &[String],
    infos: &ClusterInfos<R>,
) -> Vec<EndpointGroup> {
    let selector: Selector = Expression::Equal(SERVICE_NAME_LABEL.into(), service.into()).into();
    let mut groups = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        let Some(info) = infos.get(cluster) else {
            debug!("cluster {} is no longer connected", cluster);
            continue;
        };
        let slices = match info.client.list_endpoint_slices(namespace, &selector).await {
            Ok(slices) => slices,
            Err(e) => {
                let e = Error::list(cluster, "endpointslices", e);
                warn!("skipping cluster {} for {}/{}: {}", cluster, namespace, service, e);
                continue;
            }
        };
        match group_from_slices(cluster, slices) {
            Some(group) => groups.push(group),
            None => debug!(
                "cluster {} has no ready endpoints for {}/{}",
                cluster, namespace, service
            ),
        }
    }
    groups
}

/// Slices written by svclink itself. These are never read back as native
/// endpoints.
pub fn is_managed(slice: &EndpointSlice) -> bool {
    let labels = slice.labels();
    labels.contains_key(CLUSTER_LABEL)
        || labels
            .get(MANAGED_BY_LABEL)
            .is_some_and(|v| v == MANAGED_BY_VALUE)
}

fn is_ready(endpoint: &Endpoint) -> bool {
    endpoint.conditions.as_ref().and_then(|c| c.ready) == Some(true)
}

/// Builds the group for one cluster from its slices of a Service. The
/// address type is the one of the first native slice with a ready endpoint;
/// slices of another address type are ignored. Ports come from the first
/// slice of that type that has them.
pub fn group_from_slices(cluster: &str, slices: Vec<EndpointSlice>) -> Option<EndpointGroup> {
    let native: Vec<EndpointSlice> = slices.into_iter().filter(|s| !is_managed(s)).collect();
    let address_type = native
        .iter()
        .find(|s| s.endpoints.iter().any(is_ready))?
        .address_type
        .clone();

    let mut endpoints = Vec::new();
    let mut ports: Option<Vec<EndpointPort>> = None;
    for slice in native {
        if slice.address_type != address_type {
            debug!(
                "ignoring {} slice {} in cluster {}",
                slice.address_type,
                slice.name_any(),
                cluster
            );
            continue;
        }
        let EndpointSlice {
            endpoints: entries,
            ports: slice_ports,
            ..
        } = slice;
        if ports.is_none() && slice_ports.as_ref().is_some_and(|p| !p.is_empty()) {
            ports = slice_ports;
        }
        endpoints.extend(entries.into_iter().filter(is_ready));
    }

    Some(EndpointGroup {
        cluster: cluster.to_string(),
        address_type,
        endpoints,
        ports,
    })
}
