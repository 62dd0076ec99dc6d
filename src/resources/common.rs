//! Common utilities for Kubernetes resource generation
//!
//! Naming rules, labels and owner references shared by the permission
//! bootstrap and the per-node workload generators.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::PatroniCluster;

/// API version for PatroniCluster CRD
pub const API_VERSION: &str = "patroni.example.com/v1alpha1";

/// Kind for PatroniCluster CRD
pub const KIND: &str = "PatroniCluster";

/// Controller name, also used as the managed-by label value
pub const CONTROLLER_NAME: &str = "patroni-cluster-controller";

/// ServiceAccount used by member pods when `.spec.serviceAccount` is unset
pub const DEFAULT_SERVICE_ACCOUNT: &str = "patroni";

/// Suffix of the per-namespace ClusterRoleBinding name
pub const CLUSTER_ROLE_BINDING_SUFFIX: &str = "patroni-binding";

/// Pre-existing ClusterRole granting Patroni access to endpoints
pub const CLUSTER_ROLE_NAME: &str = "patroni-ep-access";

/// Value of the `application` label on every member pod
pub const APPLICATION: &str = "patroni";

pub const LABEL_APPLICATION: &str = "application";
pub const LABEL_CLUSTER_NAME: &str = "cluster-name";
pub const LABEL_STATEFULSET_ID: &str = "statefulset-id";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Name of the StatefulSet backing one cluster member
pub fn member_name(cluster_name: &str, node_name: &str) -> String {
    format!("{}-{}", cluster_name, node_name)
}

/// Name of the headless service the member StatefulSets share
pub fn replication_service_name(cluster_name: &str) -> String {
    format!("{}-repl", cluster_name)
}

/// Name of the ClusterRoleBinding for a namespace
///
/// ClusterRoleBindings are cluster scoped, so the namespace is part of the
/// name to keep one binding per namespace.
pub fn cluster_role_binding_name(namespace: &str) -> String {
    format!("{}:{}", namespace, CLUSTER_ROLE_BINDING_SUFFIX)
}

/// Labels shared by every pod of a cluster; anti-affinity selects on these
pub fn cluster_selector_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APPLICATION.to_string(), APPLICATION.to_string()),
        (LABEL_CLUSTER_NAME.to_string(), cluster_name.to_string()),
    ])
}

/// Labels identifying a single member StatefulSet and its pods
pub fn member_labels(cluster_name: &str, member: &str) -> BTreeMap<String, String> {
    let mut labels = cluster_selector_labels(cluster_name);
    labels.insert(LABEL_STATEFULSET_ID.to_string(), member.to_string());
    labels
}

/// Labels for objects created by the controller outside a cluster
pub fn managed_by_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_MANAGED_BY.to_string(), CONTROLLER_NAME.to_string())])
}

/// Generate an owner reference for a PatroniCluster
pub fn owner_reference(cluster: &PatroniCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
