//! Worker pool draining the work queue
//!
//! Workers are identical: each loops `get -> reconcile -> done` until the
//! queue shuts down. A key is never held by two workers at once, and no
//! ordering is kept between different keys.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::bridge::split_key;
use crate::controller::context::Context;
use crate::controller::error::{Result, handle_error};
use crate::controller::lister::wait_for_cache_sync;
use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::{Outcome, reconcile};

/// Default number of concurrent workers
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default number of failed passes after which a key is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default bound on the initial cache sync
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Worker pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub worker_count: usize,
    /// Failed passes allowed per key; the failure that reaches it drops the key
    pub max_retries: u32,
    pub cache_sync_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
        }
    }
}

/// Take one key off the queue, reconcile it and settle its fate
///
/// Returns false once the queue has shut down.
pub async fn process_next_item(queue: &WorkQueue<String>, ctx: &Context, max_retries: u32) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    let start = Instant::now();
    let result = reconcile(&key, ctx).await;
    let (namespace, name) = split_key(&key).unwrap_or((None, key.as_str()));
    let namespace = namespace.unwrap_or_default();

    match result {
        Ok(outcome) => {
            ctx.record_reconcile(namespace, name, start.elapsed().as_secs_f64());
            record_outcome(ctx, outcome.as_str());
            match outcome {
                Outcome::RequeueAfter(delay) => {
                    queue.forget(&key);
                    queue.add_after(key.clone(), delay);
                }
                Outcome::RequeueNow => queue.add_rate_limited(key.clone()),
                Outcome::Done => queue.forget(&key),
            }
            debug!(key = %key, outcome = outcome.as_str(), "Reconciled");
        }
        Err(e) => {
            ctx.record_error(namespace, name);
            record_outcome(ctx, "error");

            // The failure being handled counts towards the ceiling
            let failures = queue.num_requeues(&key).saturating_add(1);
            if failures < max_retries {
                warn!(key = %key, error = %e, failures, "Error syncing PatroniCluster, retrying");
                queue.add_rate_limited(key.clone());
            } else {
                queue.forget(&key);
                handle_error(
                    &key,
                    &e,
                    ctx.health_state.as_ref().map(|s| &s.metrics),
                );
            }
        }
    }

    queue.done(&key);
    if let Some(ref state) = ctx.health_state {
        state.metrics.set_queue_depth(queue.len());
    }
    true
}

fn record_outcome(ctx: &Context, outcome: &str) {
    if let Some(ref state) = ctx.health_state {
        state.metrics.record_outcome(outcome);
    }
}

/// Reconciles PatroniCluster keys with a fixed pool of workers
pub struct Controller {
    ctx: Arc<Context>,
    queue: WorkQueue<String>,
    config: WorkerConfig,
}

impl Controller {
    pub fn new(ctx: Arc<Context>, queue: WorkQueue<String>, config: WorkerConfig) -> Self {
        Self { ctx, queue, config }
    }

    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Wait for the cache, run the workers, and block until `cancel` fires
    ///
    /// Fails without starting any worker if the cache does not sync within
    /// the configured timeout. On cancellation the queue is shut down and
    /// in-flight passes are allowed to finish.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        info!("Starting PatroniCluster controller");

        let synced = tokio::select! {
            res = wait_for_cache_sync(self.ctx.lister.as_ref(), self.config.cache_sync_timeout) => res,
            _ = cancel.cancelled() => Ok(()),
        };
        if let Err(e) = synced {
            self.queue.shut_down();
            return Err(e);
        }
        if cancel.is_cancelled() {
            self.queue.shut_down();
            return Ok(());
        }

        if let Some(ref state) = self.ctx.health_state {
            state.set_ready(true).await;
        }

        let mut workers = JoinSet::new();
        for id in 0..self.config.worker_count.max(1) {
            let queue = self.queue.clone();
            let ctx = Arc::clone(&self.ctx);
            let max_retries = self.config.max_retries;
            workers.spawn(async move {
                debug!(worker = id, "Worker started");
                while process_next_item(&queue, &ctx, max_retries).await {}
                debug!(worker = id, "Worker stopped");
            });
        }
        info!(workers = self.config.worker_count, "Workers started");

        cancel.cancelled().await;
        info!("Shutting down PatroniCluster controller");
        self.queue.shut_down();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task failed");
            }
        }

        if let Some(ref state) = self.ctx.health_state {
            state.set_ready(false).await;
        }
        Ok(())
    }
}
