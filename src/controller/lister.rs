//! Read access to the cached PatroniCluster objects

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::reflector::{ObjectRef, Store};

use super::error::{Error, Result};
use crate::crd::PatroniCluster;

/// Cached view of PatroniCluster objects
#[async_trait]
pub trait ClusterLister: Send + Sync {
    /// Look up a cluster; `Error::NotFound` when it is not cached
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<PatroniCluster>>;

    /// Resolve once the initial list has been loaded
    async fn wait_until_synced(&self) -> Result<()>;
}

#[async_trait]
impl ClusterLister for Store<PatroniCluster> {
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<PatroniCluster>> {
        let mut obj_ref = ObjectRef::new(name);
        if let Some(ns) = namespace {
            obj_ref = obj_ref.within(ns);
        }
        Store::get(self, &obj_ref).ok_or_else(|| Error::NotFound(obj_ref.to_string()))
    }

    async fn wait_until_synced(&self) -> Result<()> {
        self.wait_until_ready()
            .await
            .map_err(|e| Error::CacheSyncError(e.to_string()))
    }
}

/// Wait for the lister's initial sync, failing after `timeout`
pub async fn wait_for_cache_sync<L>(lister: &L, timeout: Duration) -> Result<()>
where
    L: ClusterLister + ?Sized,
{
    match tokio::time::timeout(timeout, lister.wait_until_synced()).await {
        Ok(result) => result,
        Err(_) => Err(Error::CacheSyncError(format!(
            "cache did not sync within {}s",
            timeout.as_secs()
        ))),
    }
}
