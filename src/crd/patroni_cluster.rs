use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PatroniCluster is the Schema for the patroniclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "patroni.example.com",
    version = "v1alpha1",
    kind = "PatroniCluster",
    plural = "patroniclusters",
    shortname = "ptc",
    namespaced,
    status = "PatroniClusterStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PatroniClusterSpec {
    /// Patroni members, one StatefulSet is created per entry
    #[serde(rename = "nodeList")]
    pub node_names: Vec<String>,

    /// Container image running PostgreSQL and Patroni
    pub image: String,

    /// ServiceAccount used by the member pods (defaults to `patroni`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Use a required pod anti-affinity instead of a preferred one
    #[serde(default)]
    pub require_pod_anti_affinity: bool,

    /// Database superuser name (defaults to `postgres`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_user_name: Option<String>,

    /// Secret holding the superuser password under the `password` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_user_secret_name: Option<String>,

    /// Replication user name (defaults to `standby`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_user_name: Option<String>,

    /// Secret holding the replication password under the `password` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_user_secret_name: Option<String>,
}

/// Status of the PatroniCluster
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatroniClusterStatus {
    /// Lifecycle status, written by the controller only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatus>,
}

/// Cluster lifecycle status
///
/// Only moves forward: `Initialized` is written together with the finalizer,
/// nothing in the controller ever writes it back over `Running`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ClusterStatus {
    /// Finalizer registered and member workloads requested
    Initialized,
    /// Cluster members are up
    Running,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterStatus::Initialized => write!(f, "Initialized"),
            ClusterStatus::Running => write!(f, "Running"),
        }
    }
}

impl PatroniCluster {
    /// Current lifecycle status, if the controller has written one
    pub fn cluster_status(&self) -> Option<ClusterStatus> {
        self.status.as_ref().and_then(|s| s.status)
    }
}
