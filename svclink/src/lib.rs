pub mod config;
pub mod controller;
pub mod http;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),

    #[error("controller error: {0}")]
    ControllerError(#[from] svclink_controller::Error),

    #[error("crd error: {0}")]
    CrdError(#[from] svclink_crds::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
