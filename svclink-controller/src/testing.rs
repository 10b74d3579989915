//! In-memory clusters for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::{Engine, engine::general_purpose::STANDARD};
use k8s_openapi::api::core::v1::{Namespace, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice};
use kube::ResourceExt;
use kube::api::ObjectMeta;
use kube::core::{Selector, SelectorExt};
use svclink_crds::SERVICE_NAME_LABEL;
use svclink_crds::v1alpha1::clusterlink::{ClusterLink, ClusterLinkSpec, ClusterLinkStatus};

use crate::cluster::{LocalCluster, RemoteCluster, RemoteConnector};
use crate::registry::ClusterInfo;
use crate::{Error, Result};

type Key = (String, String);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Default)]
struct State {
    version: String,
    cluster_links: BTreeMap<String, ClusterLink>,
    status_writes: Vec<(String, ClusterLinkStatus)>,
    namespaces: BTreeSet<String>,
    services: BTreeMap<Key, Service>,
    slices: BTreeMap<Key, EndpointSlice>,
    failing: BTreeSet<&'static str>,
    calls: Calls,
    resource_version: u64,
}

impl State {
    fn check(&self, op: &'static str) -> Result<()> {
        if self.failing.contains(op) {
            return Err(Error::Other(format!("injected {op} failure")));
        }
        Ok(())
    }

    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// A cluster held in memory. Clones share state.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.lock().version = "v1.33.0".into();
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail(&self, op: &'static str) {
        self.lock().failing.insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.lock().failing.remove(op);
    }

    pub fn add_cluster_link(&self, link: ClusterLink) {
        self.lock().cluster_links.insert(link.name_any(), link);
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(link) = self.lock().cluster_links.get_mut(name) {
            link.spec.enabled = enabled;
        }
    }

    pub fn status_of(&self, name: &str) -> Option<ClusterLinkStatus> {
        self.lock()
            .cluster_links
            .get(name)
            .and_then(|l| l.status.clone())
    }

    pub fn status_writes(&self) -> Vec<(String, ClusterLinkStatus)> {
        self.lock().status_writes.clone()
    }

    pub fn add_namespace(&self, name: &str) {
        self.lock().namespaces.insert(name.into());
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains(name)
    }

    pub fn add_service(&self, service: Service) {
        let namespace = service.namespace().unwrap_or_default();
        let mut state = self.lock();
        state.namespaces.insert(namespace.clone());
        state
            .services
            .insert((namespace, service.name_any()), service);
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock()
            .services
            .get(&(namespace.into(), name.into()))
            .cloned()
    }

    pub fn add_slice(&self, mut slice: EndpointSlice) {
        let mut state = self.lock();
        slice.metadata.resource_version = Some(state.next_resource_version());
        let key = (slice.namespace().unwrap_or_default(), slice.name_any());
        state.slices.insert(key, slice);
    }

    pub fn slice(&self, namespace: &str, name: &str) -> Option<EndpointSlice> {
        self.lock()
            .slices
            .get(&(namespace.into(), name.into()))
            .cloned()
    }

    pub fn slice_names(&self) -> Vec<String> {
        self.lock().slices.values().map(|s| s.name_any()).collect()
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls
    }
}

impl LocalCluster for FakeCluster {
    async fn list_cluster_links(&self) -> Result<Vec<ClusterLink>> {
        let state = self.lock();
        state.check("list_cluster_links")?;
        Ok(state.cluster_links.values().cloned().collect())
    }

    async fn patch_cluster_link_status(&self, name: &str, status: &ClusterLinkStatus) -> Result<()> {
        let mut state = self.lock();
        state.check("patch_cluster_link_status")?;
        state.status_writes.push((name.into(), status.clone()));
        if let Some(link) = state.cluster_links.get_mut(name) {
            link.status = Some(status.clone());
        }
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let state = self.lock();
        state.check("list_local_services")?;
        Ok(state.services.values().cloned().collect())
    }

    async fn list_namespaced_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let state = self.lock();
        state.check("list_local_services")?;
        Ok(state
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let state = self.lock();
        state.check("get_service")?;
        Ok(state
            .services
            .get(&(namespace.into(), name.into()))
            .cloned())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        let mut state = self.lock();
        state.check("create_service")?;
        let key = (namespace.to_string(), service.name_any());
        if state.services.contains_key(&key) {
            return Err(Error::Other("service already exists".into()));
        }
        let mut service = service.clone();
        service.metadata.uid = Some(format!("uid-{}-{}", key.0, key.1));
        state.services.insert(key, service);
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let state = self.lock();
        state.check("get_namespace")?;
        Ok(state.namespaces.get(name).map(|n| make_namespace(n)))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("create_namespace")?;
        state.namespaces.insert(name.into());
        Ok(())
    }

    async fn get_endpoint_slice(&self, namespace: &str, name: &str) -> Result<Option<EndpointSlice>> {
        let state = self.lock();
        state.check("get_endpoint_slice")?;
        Ok(state.slices.get(&(namespace.into(), name.into())).cloned())
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<EndpointSlice>> {
        let state = self.lock();
        state.check("list_local_endpoint_slices")?;
        Ok(select_slices(&state, namespace, selector))
    }

    async fn list_all_endpoint_slices(&self, selector: &Selector) -> Result<Vec<EndpointSlice>> {
        let state = self.lock();
        state.check("list_local_endpoint_slices")?;
        Ok(state
            .slices
            .values()
            .filter(|slice| selector.matches(slice.labels()))
            .cloned()
            .collect())
    }

    async fn create_endpoint_slice(&self, namespace: &str, slice: &EndpointSlice) -> Result<()> {
        let mut state = self.lock();
        state.check("create_endpoint_slice")?;
        let key = (namespace.to_string(), slice.name_any());
        if state.slices.contains_key(&key) {
            return Err(Error::Other("endpoint slice already exists".into()));
        }
        let mut slice = slice.clone();
        slice.metadata.resource_version = Some(state.next_resource_version());
        state.slices.insert(key, slice);
        state.calls.creates += 1;
        Ok(())
    }

    async fn replace_endpoint_slice(&self, namespace: &str, slice: &EndpointSlice) -> Result<()> {
        let mut state = self.lock();
        state.check("replace_endpoint_slice")?;
        let key = (namespace.to_string(), slice.name_any());
        let Some(stored) = state.slices.get(&key) else {
            return Err(Error::Other("endpoint slice not found".into()));
        };
        if stored.metadata.resource_version != slice.metadata.resource_version {
            return Err(Error::Other("conflict".into()));
        }
        let mut slice = slice.clone();
        slice.metadata.resource_version = Some(state.next_resource_version());
        state.slices.insert(key, slice);
        state.calls.updates += 1;
        Ok(())
    }

    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("delete_endpoint_slice")?;
        if state
            .slices
            .remove(&(namespace.into(), name.into()))
            .is_some()
        {
            state.calls.deletes += 1;
        }
        Ok(())
    }
}

impl RemoteCluster for FakeCluster {
    async fn server_version(&self) -> Result<String> {
        let state = self.lock();
        state.check("server_version")?;
        Ok(state.version.clone())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let state = self.lock();
        state.check("list_namespaces")?;
        Ok(state.namespaces.iter().map(|n| make_namespace(n)).collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let state = self.lock();
        state.check("list_services")?;
        Ok(state
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn list_endpoint_slices(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<EndpointSlice>> {
        let state = self.lock();
        state.check("list_endpoint_slices")?;
        Ok(select_slices(&state, namespace, selector))
    }
}

fn select_slices(state: &State, namespace: &str, selector: &Selector) -> Vec<EndpointSlice> {
    state
        .slices
        .iter()
        .filter(|((ns, _), slice)| ns == namespace && selector.matches(slice.labels()))
        .map(|(_, s)| s.clone())
        .collect()
}

/// Resolves decoded kubeconfigs to fake clusters by their content.
#[derive(Clone, Default)]
pub struct FakeConnector {
    clusters: Arc<Mutex<BTreeMap<String, FakeCluster>>>,
}

impl FakeConnector {
    pub fn register(&self, kubeconfig: &str, cluster: FakeCluster) {
        self.clusters
            .lock()
            .unwrap()
            .insert(kubeconfig.into(), cluster);
    }
}

impl RemoteConnector for FakeConnector {
    type Remote = FakeCluster;

    async fn connect(&self, kubeconfig: &[u8]) -> Result<FakeCluster> {
        let key = String::from_utf8_lossy(kubeconfig).to_string();
        self.clusters
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Other(format!("no cluster for kubeconfig {key}")))
    }
}

pub fn encode(kubeconfig: &str) -> String {
    STANDARD.encode(kubeconfig)
}

pub fn make_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn make_link(name: &str, spec: ClusterLinkSpec) -> ClusterLink {
    let mut spec = spec;
    if spec.kubeconfig.is_empty() {
        spec.kubeconfig = encode(name);
    }
    ClusterLink::new(name, spec)
}

/// A cluster that already passed the registry's connection probe.
pub fn make_info(name: &str, spec: ClusterLinkSpec, client: FakeCluster) -> ClusterInfo<FakeCluster> {
    let mut link = make_link(name, spec);
    link.status = Some(ClusterLinkStatus {
        connected: true,
        version: Some("v1.33.0".into()),
        ..Default::default()
    });
    ClusterInfo {
        name: name.into(),
        link,
        client,
    }
}

pub fn make_service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            uid: Some(format!("uid-{namespace}-{name}")),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn make_endpoint(address: &str, ready: Option<bool>) -> Endpoint {
    Endpoint {
        addresses: vec![address.into()],
        conditions: Some(EndpointConditions {
            ready,
            serving: ready,
            terminating: None,
        }),
        ..Default::default()
    }
}

pub fn make_port(port: i32) -> EndpointPort {
    EndpointPort {
        app_protocol: None,
        name: Some("http".into()),
        port: Some(port),
        protocol: Some("TCP".into()),
    }
}

/// A slice as the native EndpointSlice controller would create it.
pub fn make_native_slice(
    namespace: &str,
    name: &str,
    service: &str,
    endpoints: Vec<Endpoint>,
    ports: Vec<EndpointPort>,
) -> EndpointSlice {
    let mut labels = BTreeMap::new();
    labels.insert(SERVICE_NAME_LABEL.to_string(), service.to_string());
    labels.insert(
        "endpointslice.kubernetes.io/managed-by".to_string(),
        "endpointslice-controller.k8s.io".to_string(),
    );
    EndpointSlice {
        address_type: "IPv4".into(),
        endpoints,
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: Some(labels),
            ..Default::default()
        },
        ports: Some(ports),
    }
}
