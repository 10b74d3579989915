use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("failed to decode credentials for cluster {cluster}: {message}")]
    CredentialDecode { cluster: String, message: String },

    #[error("failed to build client for cluster {cluster}: {message}")]
    ClientBuild { cluster: String, message: String },

    #[error("failed to list {kind} in cluster {cluster}: {message}")]
    List {
        cluster: String,
        kind: &'static str,
        message: String,
    },

    #[error("parent Service {namespace}/{name} not found")]
    MissingParent { namespace: String, name: String },

    #[error("failed to {action} {kind} {name}: {message}")]
    ReconcileWrite {
        action: &'static str,
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("failed to list ClusterLinks: {0}")]
    RegistryList(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("a sync cycle is already running")]
    CycleInProgress,

    #[error("utils error: {0}")]
    Utils(#[from] svclink_k8s_utils::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn list(cluster: &str, kind: &'static str, source: Error) -> Self {
        Error::List {
            cluster: cluster.to_string(),
            kind,
            message: source.to_string(),
        }
    }

    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube",
            Error::CredentialDecode { .. } => "credential_decode",
            Error::ClientBuild { .. } => "client_build",
            Error::List { .. } => "list",
            Error::MissingParent { .. } => "missing_parent",
            Error::ReconcileWrite { .. } => "reconcile_write",
            Error::RegistryList(_) => "registry_list",
            Error::Config(_) => "config",
            Error::CycleInProgress => "cycle_in_progress",
            Error::Utils(_) => "utils",
            Error::Other(_) => "other",
        }
        .to_string()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
