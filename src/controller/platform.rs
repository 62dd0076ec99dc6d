//! Platform API used by the reconciler
//!
//! Reads go to the API server directly rather than the cache, so a pass
//! that just created an object sees it on the next get.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

use super::error::{Error, Result};
use crate::crd::PatroniCluster;

/// Operations the reconciler performs against the cluster
///
/// `get_*` return `Ok(None)` when the object does not exist.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Full-object update of a PatroniCluster, status included
    async fn replace_cluster(&self, cluster: &PatroniCluster) -> Result<PatroniCluster>;

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    async fn create_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<StatefulSet>;

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>>;

    async fn create_service_account(
        &self,
        namespace: &str,
        sa: &ServiceAccount,
    ) -> Result<ServiceAccount>;

    async fn get_cluster_role_binding(&self, name: &str) -> Result<Option<ClusterRoleBinding>>;

    async fn create_cluster_role_binding(
        &self,
        crb: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding>;
}

/// [`Platform`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Platform for KubePlatform {
    /// The CRD serves status as a subresource, so a status change takes a
    /// second write against the object version returned by the first.
    async fn replace_cluster(&self, cluster: &PatroniCluster) -> Result<PatroniCluster> {
        let namespace = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = cluster.name_any();
        let api: Api<PatroniCluster> = Api::namespaced(self.client.clone(), &namespace);

        let updated = api.replace(&name, &PostParams::default(), cluster).await?;
        if updated.status == cluster.status {
            return Ok(updated);
        }

        let mut with_status = updated;
        with_status.status = cluster.status.clone();
        let body = serde_json::to_vec(&with_status)?;
        Ok(api
            .replace_status(&name, &PostParams::default(), body)
            .await?)
    }

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_statefulset(&self, namespace: &str, sts: &StatefulSet) -> Result<StatefulSet> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), sts).await?)
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        sa: &ServiceAccount,
    ) -> Result<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), sa).await?)
    }

    async fn get_cluster_role_binding(&self, name: &str) -> Result<Option<ClusterRoleBinding>> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_cluster_role_binding(
        &self,
        crb: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), crb).await?)
    }
}
