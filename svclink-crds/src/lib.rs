use thiserror::Error;

pub mod v1alpha1;

use kube::CustomResourceExt;
use svclink_k8s_utils::{MAX_NAME_LENGTH, bounded_name};

/// Standard label tying an EndpointSlice to its Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
/// Names the remote cluster a synchronized EndpointSlice was built from.
pub const CLUSTER_LABEL: &str = "svclink.dev/cluster";
pub const MANAGED_BY_LABEL: &str = "endpointslice.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "svclink.dev";
/// Set on Services created locally from a remote snapshot.
pub const SYNC_ANNOTATION: &str = "svclink.dev/synced";

pub const SYSTEM_NAMESPACE: &str = "kube-system";
pub const RESERVED_SERVICE_NAME: &str = "kubernetes";

const MANAGED_NAME_SEPARATOR: &str = "svclink";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Name of the EndpointSlice holding `cluster`'s endpoints for `service`.
pub fn managed_slice_name(service: &str, cluster: &str) -> String {
    bounded_name(
        &format!("{service}-{MANAGED_NAME_SEPARATOR}-{cluster}"),
        MAX_NAME_LENGTH,
    )
}

pub fn service_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

pub fn crd_gen_clusterlink() -> Result<()> {
    print!(
        "---\n{}",
        serde_yaml::to_string(&v1alpha1::clusterlink::ClusterLink::crd())?
    );
    Ok(())
}
