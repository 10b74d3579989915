use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use svclink_controller::SyncConfig;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Mirror remote EndpointSlices into the local cluster
    Controller(ControllerArgs),

    /// Print the ClusterLink CustomResourceDefinition
    Crdgen,
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Seconds between sync cycles
    #[arg(long, env = "SYNC_INTERVAL", default_value_t = 30)]
    pub sync_interval: u64,

    /// Comma separated namespaces synchronized from every cluster, all when empty
    #[arg(long, env = "INCLUDED_NAMESPACES", value_delimiter = ',')]
    pub included_namespaces: Vec<String>,

    /// Create Services that only exist remotely in the local cluster
    #[arg(long, env = "SYNC_SERVICES_TO_LOCAL_CLUSTER")]
    pub sync_services_to_local_cluster: bool,

    /// Services reconciled in parallel
    #[arg(long, env = "CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Connect and read timeout for remote clusters in seconds
    #[arg(long, env = "REMOTE_TIMEOUT", default_value_t = 10)]
    pub remote_timeout: u64,

    /// Metrics and readiness listener
    #[arg(long, env = "METRICS_ADDRESS", default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// Kubeconfig context of the local cluster, in-cluster config otherwise
    #[arg(long, env = "KUBECONFIG_CONTEXT")]
    pub kubeconfig_context: Option<String>,
}

impl ControllerArgs {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            sync_interval: Duration::from_secs(self.sync_interval),
            included_namespaces: self
                .included_namespaces
                .iter()
                .map(|ns| ns.trim())
                .filter(|ns| !ns.is_empty())
                .map(String::from)
                .collect(),
            sync_services_to_local_cluster: self.sync_services_to_local_cluster,
            concurrency: self.concurrency,
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout)
    }
}
