use std::sync::Arc;

use kube::Client;
use kube::runtime::reflector::Store;

use crate::controller::hooks::{LifecycleHooks, NoopHooks};
use crate::controller::lister::ClusterLister;
use crate::controller::platform::{KubePlatform, Platform};
use crate::crd::PatroniCluster;
use crate::health::HealthState;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// API used to read and write cluster objects
    pub platform: Arc<dyn Platform>,
    /// Cached PatroniCluster objects
    pub lister: Arc<dyn ClusterLister>,
    /// Deletion and steady-state extension points
    pub hooks: Arc<dyn LifecycleHooks>,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        platform: Arc<dyn Platform>,
        lister: Arc<dyn ClusterLister>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            platform,
            lister,
            hooks: Arc::new(NoopHooks),
            health_state,
        }
    }

    /// Context backed by the Kubernetes API and a reflector store
    pub fn from_client(
        client: Client,
        store: Store<PatroniCluster>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self::new(
            Arc::new(KubePlatform::new(client)),
            Arc::new(store),
            health_state,
        )
    }

    /// Replace the lifecycle hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_reconcile(namespace, name, duration_secs);
        }
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_error(namespace, name);
        }
    }
}
