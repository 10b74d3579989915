use std::collections::BTreeSet;
use std::time::Duration;

use svclink_crds::SYSTEM_NAMESPACE;

use crate::{Error, Result};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub sync_interval: Duration,
    /// When non-empty, only these namespaces are synchronized from any cluster
    pub included_namespaces: BTreeSet<String>,
    /// Create Services seen remotely but missing locally instead of skipping them
    pub sync_services_to_local_cluster: bool,
    /// Services reconciled at the same time
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            included_namespaces: BTreeSet::new(),
            sync_services_to_local_cluster: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.included_namespaces.contains(SYSTEM_NAMESPACE) {
            return Err(Error::Config(format!(
                "included namespaces must not contain {SYSTEM_NAMESPACE}"
            )));
        }
        if self.sync_interval.is_zero() {
            return Err(Error::Config("sync interval must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        Ok(())
    }
}
