use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use kube::KubeSchema;
use schemars::{JsonSchema, json_schema};
use serde::{Deserialize, Serialize};

use crate::{RESERVED_SERVICE_NAME, SYSTEM_NAMESPACE, service_key};

pub const NAME_GROUP_CLUSTERLINK: &str = "clusterlinks.svclink.dev";

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_ERROR: &str = "Error";
const REASON_SYNC_ERROR: &str = "SyncError";

#[derive(CustomResource, KubeSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[kube(
    group = "svclink.dev",
    version = "v1alpha1",
    kind = "ClusterLink",
    status = "ClusterLinkStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Enabled", "type":"boolean", "jsonPath":".spec.enabled"}"#,
    printcolumn = r#"{"name":"Connected", "type":"boolean", "jsonPath":".status.connected"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Last Connected", "type":"date", "jsonPath":".status.lastConnected"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLinkSpec {
    /// Whether the cluster is synchronized at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Base64 encoded kubeconfig with read access to the remote cluster
    pub kubeconfig: String,
    /// Namespaces never synchronized. kube-system is always excluded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_namespaces: Vec<String>,
    /// When set, only these namespaces are synchronized
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,
    /// Services excluded by `namespace/name`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_services: Vec<String>,
    /// Service names excluded in every namespace. `kubernetes` is always excluded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_service_names: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ClusterLinkSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            kubeconfig: String::new(),
            excluded_namespaces: Vec::new(),
            included_namespaces: Vec::new(),
            excluded_services: Vec::new(),
            excluded_service_names: Vec::new(),
        }
    }
}

impl ClusterLinkSpec {
    pub fn filter_policy(&self) -> FilterPolicy {
        let mut excluded_namespaces: BTreeSet<String> =
            self.excluded_namespaces.iter().cloned().collect();
        excluded_namespaces.insert(SYSTEM_NAMESPACE.to_string());

        let mut excluded_service_names: BTreeSet<String> =
            self.excluded_service_names.iter().cloned().collect();
        excluded_service_names.insert(RESERVED_SERVICE_NAME.to_string());

        FilterPolicy {
            excluded_namespaces,
            included_namespaces: self.included_namespaces.iter().cloned().collect(),
            excluded_services: self.excluded_services.iter().cloned().collect(),
            excluded_service_names,
        }
    }
}

/// Precomputed namespace and service filters of a ClusterLink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    pub excluded_namespaces: BTreeSet<String>,
    pub included_namespaces: BTreeSet<String>,
    pub excluded_services: BTreeSet<String>,
    pub excluded_service_names: BTreeSet<String>,
}

impl FilterPolicy {
    /// Exclusion is checked before inclusion so an excluded namespace stays
    /// excluded even when it is also listed as included.
    pub fn should_exclude_namespace(&self, namespace: &str) -> bool {
        if self.excluded_namespaces.contains(namespace) {
            return true;
        }
        !self.included_namespaces.is_empty() && !self.included_namespaces.contains(namespace)
    }

    pub fn should_exclude_service(&self, namespace: &str, name: &str) -> bool {
        self.excluded_services.contains(&service_key(namespace, name))
            || self.excluded_service_names.contains(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLinkStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "timestamp")]
    pub last_connected: Option<Time>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "conditions")]
    pub conditions: Vec<Condition>,
}

impl ClusterLinkStatus {
    /// Status after a successful connection and version probe. A sync error
    /// recorded while connected is kept until a sync succeeds.
    pub fn connected(previous: Option<&Self>, version: String, now: Time) -> Self {
        let sync_error = previous
            .filter(|p| p.connected)
            .and_then(|p| p.condition(CONDITION_ERROR))
            .filter(|c| c.reason == REASON_SYNC_ERROR)
            .cloned();
        let mut conditions = vec![condition(
            previous,
            CONDITION_READY,
            "True",
            "Connected",
            "Successfully connected to remote cluster",
            &now,
        )];
        let error = sync_error.as_ref().map(|c| c.message.clone());
        conditions.extend(sync_error);
        Self {
            connected: true,
            version: Some(version).filter(|v| !v.is_empty()),
            last_connected: Some(now),
            error,
            conditions,
        }
    }

    /// Status after a failed connection attempt. The last successful
    /// connection time is kept.
    pub fn disconnected(previous: Option<&Self>, message: String, now: Time) -> Self {
        let conditions = vec![
            condition(
                previous,
                CONDITION_READY,
                "False",
                "ConnectionFailed",
                "Failed to connect to remote cluster",
                &now,
            ),
            condition(
                previous,
                CONDITION_ERROR,
                "True",
                "ConnectionError",
                &message,
                &now,
            ),
        ];
        Self {
            connected: false,
            version: None,
            last_connected: previous.and_then(|p| p.last_connected.clone()),
            error: Some(message),
            conditions,
        }
    }

    /// Status of a connected cluster after a sync attempt; `None` clears any
    /// previously recorded sync error.
    pub fn with_sync_result(&self, error: Option<String>, now: Time) -> Self {
        let mut conditions = vec![condition(
            Some(self),
            CONDITION_READY,
            "True",
            "Connected",
            "Successfully connected to remote cluster",
            &now,
        )];
        if let Some(message) = &error {
            conditions.push(condition(
                Some(self),
                CONDITION_ERROR,
                "True",
                REASON_SYNC_ERROR,
                message,
                &now,
            ));
        }
        Self {
            connected: true,
            version: self.version.clone(),
            last_connected: self.last_connected.clone(),
            error,
            conditions,
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

fn condition(
    previous: Option<&ClusterLinkStatus>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    now: &Time,
) -> Condition {
    // keep the transition time while the condition status is unchanged
    let last_transition_time = previous
        .and_then(|p| p.condition(type_))
        .filter(|c| c.status == status)
        .map(|c| c.last_transition_time.clone())
        .unwrap_or_else(|| now.clone());
    Condition {
        last_transition_time,
        message: message.to_string(),
        observed_generation: None,
        reason: reason.to_string(),
        status: status.to_string(),
        type_: type_.to_string(),
    }
}

fn timestamp(_: &mut schemars::generate::SchemaGenerator) -> schemars::Schema {
    json_schema!({
        "type": "string",
        "format": "date-time",
        "nullable": true,
    })
}

fn conditions(_: &mut schemars::generate::SchemaGenerator) -> schemars::Schema {
    json_schema!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    })
}
