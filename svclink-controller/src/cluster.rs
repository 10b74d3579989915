use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::core::Selector;
use kube::{Api, Client};
use serde_json::json;
use svclink_crds::v1alpha1::clusterlink::{ClusterLink, ClusterLinkStatus};
use svclink_k8s_utils::{client_from_kubeconfig, is_not_found, server_version};
use tracing::debug;

use crate::Result;

/// Access to the cluster svclink runs in. ClusterLink specs are only read;
/// the status subresource and the managed EndpointSlices are the only writes.
pub trait LocalCluster: Send + Sync {
    fn list_cluster_links(&self) -> impl Future<Output = Result<Vec<ClusterLink>>> + Send;

    /// Deleted ClusterLinks are not an error.
    fn patch_cluster_link_status(
        &self,
        name: &str,
        status: &ClusterLinkStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Services in all namespaces.
    fn list_services(&self) -> impl Future<Output = Result<Vec<Service>>> + Send;

    fn list_namespaced_services(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<Service>>> + Send;

    fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Service>>> + Send;

    fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_namespace(&self, name: &str) -> impl Future<Output = Result<Option<Namespace>>> + Send;

    fn create_namespace(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    fn get_endpoint_slice(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<EndpointSlice>>> + Send;

    fn list_endpoint_slices(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<EndpointSlice>>> + Send;

    /// EndpointSlices matching `selector` in all namespaces.
    fn list_all_endpoint_slices(
        &self,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<EndpointSlice>>> + Send;

    fn create_endpoint_slice(
        &self,
        namespace: &str,
        slice: &EndpointSlice,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Full replace; the slice must carry the resourceVersion it was read at.
    fn replace_endpoint_slice(
        &self,
        namespace: &str,
        slice: &EndpointSlice,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Deleting a slice that no longer exists succeeds.
    fn delete_endpoint_slice(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Read-only access to a linked remote cluster.
pub trait RemoteCluster: Send + Sync {
    fn server_version(&self) -> impl Future<Output = Result<String>> + Send;

    fn list_namespaces(&self) -> impl Future<Output = Result<Vec<Namespace>>> + Send;

    fn list_services(&self, namespace: &str) -> impl Future<Output = Result<Vec<Service>>> + Send;

    fn list_endpoint_slices(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<EndpointSlice>>> + Send;
}

/// Builds remote cluster clients from decoded kubeconfig bytes.
pub trait RemoteConnector: Send + Sync {
    type Remote: RemoteCluster;

    fn connect(&self, kubeconfig: &[u8]) -> impl Future<Output = Result<Self::Remote>> + Send;
}

#[derive(Clone)]
pub struct KubeLocalCluster {
    client: Client,
}

impl KubeLocalCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl LocalCluster for KubeLocalCluster {
    async fn list_cluster_links(&self) -> Result<Vec<ClusterLink>> {
        let api: Api<ClusterLink> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_cluster_link_status(&self, name: &str, status: &ClusterLinkStatus) -> Result<()> {
        let api: Api<ClusterLink> = Api::all(self.client.clone());
        let patch = Patch::Merge(json!({ "status": status }));
        match api.patch_status(name, &PatchParams::default(), &patch).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!("ClusterLink {} no longer exists, status not written", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let api: Api<Service> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_namespaced_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service).await?;
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace).await?;
        Ok(())
    }

    async fn get_endpoint_slice(&self, namespace: &str, name: &str) -> Result<Option<EndpointSlice>> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<EndpointSlice>> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels_from(selector);
        Ok(api.list(&params).await?.items)
    }

    async fn list_all_endpoint_slices(&self, selector: &Selector) -> Result<Vec<EndpointSlice>> {
        let api: Api<EndpointSlice> = Api::all(self.client.clone());
        let params = ListParams::default().labels_from(selector);
        Ok(api.list(&params).await?.items)
    }

    async fn create_endpoint_slice(&self, namespace: &str, slice: &EndpointSlice) -> Result<()> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), slice).await?;
        Ok(())
    }

    async fn replace_endpoint_slice(&self, namespace: &str, slice: &EndpointSlice) -> Result<()> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let name = slice.metadata.name.clone().unwrap_or_default();
        api.replace(&name, &PostParams::default(), slice).await?;
        Ok(())
    }

    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct KubeRemoteCluster {
    client: Client,
}

impl KubeRemoteCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl RemoteCluster for KubeRemoteCluster {
    async fn server_version(&self) -> Result<String> {
        Ok(server_version(&self.client).await?)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<EndpointSlice>> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels_from(selector);
        Ok(api.list(&params).await?.items)
    }
}

/// Connects to remote clusters with the given connect and read timeout.
#[derive(Clone, Debug)]
pub struct KubeConnector {
    timeout: Duration,
}

impl KubeConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RemoteConnector for KubeConnector {
    type Remote = KubeRemoteCluster;

    async fn connect(&self, kubeconfig: &[u8]) -> Result<KubeRemoteCluster> {
        let client = client_from_kubeconfig(kubeconfig, self.timeout).await?;
        Ok(KubeRemoteCluster::new(client))
    }
}
