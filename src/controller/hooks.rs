//! Extension points of the reconcile pass
//!
//! The controller owns the finalizer protocol and initial creation. What
//! happens on deletion before the finalizer is released, and what a
//! steady-state pass does beyond re-ensuring members exist, is delegated here.

use async_trait::async_trait;

use crate::controller::error::Result;
use crate::controller::reconciler::Outcome;
use crate::crd::PatroniCluster;

#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Runs before the finalizer is removed from a deleted cluster
    ///
    /// Member StatefulSets carry an owner reference and are garbage
    /// collected, so nothing needs deleting here by default.
    async fn on_delete(&self, _cluster: &PatroniCluster) -> Result<()> {
        Ok(())
    }

    /// Runs on every pass of a cluster that is neither new nor deleting
    async fn converge(&self, _cluster: &PatroniCluster) -> Result<Outcome> {
        Ok(Outcome::Done)
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}
