//! Reconciliation logic for PatroniCluster resources
//!
//! Every pass starts from the cached object and re-derives what should
//! exist. Creation is get-then-create for each managed object, so a pass
//! that failed halfway can simply be run again.

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::controller::bridge::split_key;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{
    FINALIZER, LifecycleEvent, LifecycleState, LifecycleStateMachine, TransitionResult,
};
use crate::controller::validation::validate_spec;
use crate::crd::{ClusterStatus, PatroniCluster, PatroniClusterStatus};
use crate::resources::common::member_name;
use crate::resources::{synthesize_permissions, synthesize_workload};

/// What the worker should do with a key after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; forget the key's retry history
    Done,
    /// Run again after the key's backoff delay
    RequeueNow,
    /// Run again after a fixed delay
    RequeueAfter(Duration),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Done => "done",
            Outcome::RequeueNow => "requeue",
            Outcome::RequeueAfter(_) => "requeue_after",
        }
    }
}

/// Main reconciliation function
#[instrument(skip_all, fields(key = %key))]
pub async fn reconcile(key: &str, ctx: &Context) -> Result<Outcome> {
    let (namespace, name) = split_key(key)?;
    let cluster = ctx.lister.get(namespace, name)?;
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    let state = LifecycleState::observe(&cluster);
    debug!(state = %state, "Reconciling PatroniCluster");

    match state {
        LifecycleState::Deleting => {
            handle_deletion(&cluster, ctx).await?;
            Ok(Outcome::Done)
        }
        LifecycleState::NoFinalizer => {
            validate_spec(&cluster)?;
            let updated = add_finalizer(&cluster, ctx).await?;
            ensure_members(&updated, &ns, ctx).await?;
            info!(nodes = updated.spec.node_names.len(), "Cluster initialized");
            Ok(Outcome::Done)
        }
        LifecycleState::FinalizerSet => {
            // The finalizer and the status land in separate writes
            if cluster.cluster_status().is_none() {
                ctx.platform.replace_cluster(&with_finalizer(&cluster)).await?;
                info!("Recorded Initialized status");
            }
            ensure_members(&cluster, &ns, ctx).await?;
            ctx.hooks.converge(&cluster).await
        }
        LifecycleState::Released => {
            debug!("Cluster is being deleted without our finalizer, nothing to do");
            Ok(Outcome::Done)
        }
    }
}

fn log_transition(state: LifecycleState, event: LifecycleEvent) {
    match LifecycleStateMachine::new().transition(state, event) {
        TransitionResult::Success {
            from,
            to,
            description,
            ..
        } => info!(from = %from, to = %to, "{}", description),
        TransitionResult::InvalidTransition { current, event } => {
            warn!(state = %current, event = %event, "Unexpected lifecycle transition")
        }
    }
}

/// Copy of `cluster` with the finalizer appended and status Initialized
///
/// A status already written is kept; status only moves forward.
pub fn with_finalizer(cluster: &PatroniCluster) -> PatroniCluster {
    let mut updated = cluster.clone();
    let finalizers = updated.metadata.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    if updated.cluster_status().is_none() {
        updated.status = Some(PatroniClusterStatus {
            status: Some(ClusterStatus::Initialized),
        });
    }
    updated
}

/// Copy of `cluster` with only the controller's finalizer removed
pub fn without_finalizer(cluster: &PatroniCluster) -> PatroniCluster {
    let mut updated = cluster.clone();
    if let Some(finalizers) = updated.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
    updated
}

/// Register the finalizer and mark the cluster Initialized in one update
async fn add_finalizer(cluster: &PatroniCluster, ctx: &Context) -> Result<PatroniCluster> {
    let updated = ctx.platform.replace_cluster(&with_finalizer(cluster)).await?;
    log_transition(LifecycleState::NoFinalizer, LifecycleEvent::CreationStarted);
    Ok(updated)
}

/// Run the deletion hook, then release the finalizer
async fn handle_deletion(cluster: &PatroniCluster, ctx: &Context) -> Result<()> {
    ctx.hooks.on_delete(cluster).await?;
    ctx.platform
        .replace_cluster(&without_finalizer(cluster))
        .await?;
    log_transition(LifecycleState::Deleting, LifecycleEvent::FinalizerReleased);
    Ok(())
}

/// Converge on the namespace permissions and one StatefulSet per node
///
/// Only missing objects are created; existing ones are left untouched.
async fn ensure_members(cluster: &PatroniCluster, ns: &str, ctx: &Context) -> Result<()> {
    grant_permissions(ns, ctx).await?;

    let cluster_name = cluster.name_any();
    for node in &cluster.spec.node_names {
        let member = member_name(&cluster_name, node);
        if ctx.platform.get_statefulset(ns, &member).await?.is_some() {
            continue;
        }

        let sts = synthesize_workload(node, cluster);
        ignore_already_exists(ctx.platform.create_statefulset(ns, &sts).await)?;
        info!(statefulset = %member, "Created member StatefulSet");
    }

    Ok(())
}

/// Ensure the ServiceAccount and ClusterRoleBinding for `ns` exist
async fn grant_permissions(ns: &str, ctx: &Context) -> Result<()> {
    let desired = synthesize_permissions(ns);

    let sa_name = desired.service_account.name_any();
    if ctx.platform.get_service_account(ns, &sa_name).await?.is_none() {
        ignore_already_exists(
            ctx.platform
                .create_service_account(ns, &desired.service_account)
                .await,
        )?;
        info!(service_account = %sa_name, "Created ServiceAccount");
    }

    let crb_name = desired.cluster_role_binding.name_any();
    if ctx
        .platform
        .get_cluster_role_binding(&crb_name)
        .await?
        .is_none()
    {
        ignore_already_exists(
            ctx.platform
                .create_cluster_role_binding(&desired.cluster_role_binding)
                .await,
        )?;
        info!(cluster_role_binding = %crb_name, "Created ClusterRoleBinding");
    }

    Ok(())
}

/// Another pass (or another cluster in the namespace) may create the
/// object between our get and create
fn ignore_already_exists<T>(result: Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => {
            debug!("Object already exists, skipping create");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
