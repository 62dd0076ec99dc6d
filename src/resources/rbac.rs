//! Permission bootstrap for Patroni members
//!
//! Patroni keeps its leader lock in Endpoints, so every namespace hosting a
//! cluster needs a ServiceAccount bound to the shared `patroni-ep-access`
//! ClusterRole. The role itself is installed with the operator.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use kube::core::ObjectMeta;

use super::common::{
    CLUSTER_ROLE_NAME, DEFAULT_SERVICE_ACCOUNT, cluster_role_binding_name, managed_by_labels,
};

/// Objects granting Patroni its API access in one namespace
#[derive(Clone, Debug)]
pub struct PermissionBootstrap {
    pub service_account: ServiceAccount,
    pub cluster_role_binding: ClusterRoleBinding,
}

/// Derive the ServiceAccount and ClusterRoleBinding for a namespace
///
/// Depends on the namespace only, so every cluster in a namespace shares them.
pub fn synthesize_permissions(namespace: &str) -> PermissionBootstrap {
    let service_account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(DEFAULT_SERVICE_ACCOUNT.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_by_labels()),
            ..Default::default()
        },
        ..Default::default()
    };

    let cluster_role_binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(cluster_role_binding_name(namespace)),
            labels: Some(managed_by_labels()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: CLUSTER_ROLE_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: DEFAULT_SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    };

    PermissionBootstrap {
        service_account,
        cluster_role_binding,
    }
}
