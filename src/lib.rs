pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::OperatorConfig;
pub use controller::{
    ClusterLister, Context, Controller, Error, EventBridge, FINALIZER, LifecycleHooks, NoopHooks,
    Outcome, Platform, Result, WatchEvent, WorkQueue, WorkerConfig, reconcile,
};
pub use crd::{ClusterStatus, PatroniCluster, PatroniClusterSpec, PatroniClusterStatus};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

/// Run the PatroniCluster controller until `cancel` fires
///
/// Wires the watch stream into a reflector store and the event bridge,
/// then hands the store to the worker pool. When `namespace` is `Some(ns)`
/// only that namespace is watched. Returns an error if the cache does not
/// sync in time; the event bridge is stopped in every case.
pub async fn run_controller(
    client: Client,
    namespace: Option<&str>,
    config: WorkerConfig,
    health_state: Option<Arc<HealthState>>,
    cancel: CancellationToken,
) -> Result<()> {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for PatroniCluster resources (scope: {})",
        scope_msg
    );

    let clusters: Api<PatroniCluster> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let (store, writer) = reflector::store();
    let stream = watcher(clusters, watcher::Config::default().any_semantic()).default_backoff();

    let queue = WorkQueue::new();
    let bridge = EventBridge::new(queue.clone(), health_state.clone());
    let bridge_cancel = cancel.child_token();
    let bridge_handle = tokio::spawn(bridge.run(stream, writer, bridge_cancel.clone()));

    let ctx = Arc::new(Context::from_client(client, store, health_state));
    let controller = Controller::new(ctx, queue, config);
    let result = controller.start(cancel).await;

    bridge_cancel.cancel();
    if let Err(e) = bridge_handle.await {
        tracing::warn!("Event bridge task failed: {}", e);
    }

    result
}
