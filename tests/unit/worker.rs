//! Worker pool: retry policy and controller lifecycle

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use patroni_operator::controller::{
    Context, Controller, Error, FINALIZER, LifecycleHooks, Outcome, Result, WorkQueue,
    WorkerConfig, process_next_item,
};
use patroni_operator::controller::queue::DEFAULT_BASE_DELAY;
use patroni_operator::crd::{ClusterStatus, PatroniCluster};
use patroni_operator::health::HealthState;

use crate::common::*;

fn context(
    platform: Arc<FakePlatform>,
    lister: FakeLister,
    health: Option<Arc<HealthState>>,
) -> Context {
    Context::new(platform, Arc::new(lister), health)
}

mod retry_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_key_dropped_after_max_retries() {
        let health = Arc::new(HealthState::new());
        let ctx = context(
            Arc::new(FakePlatform::new()),
            FakeLister::with_clusters(vec![]),
            Some(health.clone()),
        );
        let queue: WorkQueue<String> = WorkQueue::new();
        let key = "team-a/missing".to_string();
        queue.add(key.clone());

        assert!(process_next_item(&queue, &ctx, 3).await);
        assert_eq!(queue.num_requeues(&key), 1);

        assert!(process_next_item(&queue, &ctx, 3).await);
        assert_eq!(queue.num_requeues(&key), 2);

        // Third failure reaches the ceiling
        assert!(process_next_item(&queue, &ctx, 3).await);
        assert_eq!(queue.num_requeues(&key), 0);
        assert_eq!(health.metrics.dropped_keys.get(), 1);

        let next = tokio::time::timeout(Duration::from_secs(60), queue.get()).await;
        assert!(next.is_err(), "dropped key must not be retried");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_forgets_failures() {
        let platform = Arc::new(FakePlatform::new());
        let cluster = create_test_cluster("pg", "team-a");
        platform.insert_cluster(cluster.clone());
        let ctx = context(platform.clone(), FakeLister::with_clusters(vec![cluster]), None);
        let queue: WorkQueue<String> = WorkQueue::new();
        let key = "team-a/pg".to_string();

        platform.fail_next(1);
        queue.add(key.clone());
        assert!(process_next_item(&queue, &ctx, 3).await);
        assert_eq!(queue.num_requeues(&key), 1);

        assert!(process_next_item(&queue, &ctx, 3).await);
        assert_eq!(queue.num_requeues(&key), 0);
        assert_eq!(platform.statefulset_names().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_dropped_after_retries() {
        let platform = Arc::new(FakePlatform::new());
        let cluster = PatroniClusterBuilder::new("pg", "team-a").with_image("").build();
        platform.insert_cluster(cluster.clone());
        let ctx = context(platform.clone(), FakeLister::with_clusters(vec![cluster]), None);
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("team-a/pg".to_string());

        for _ in 0..3 {
            assert!(process_next_item(&queue, &ctx, 3).await);
        }
        assert!(queue.is_empty());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_returns_false_after_shut_down() {
        let ctx = context(
            Arc::new(FakePlatform::new()),
            FakeLister::with_clusters(vec![]),
            None,
        );
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.shut_down();
        assert!(!process_next_item(&queue, &ctx, 3).await);
    }
}

mod outcome_tests {
    use super::*;

    struct RequeueHooks;

    #[async_trait]
    impl LifecycleHooks for RequeueHooks {
        async fn converge(&self, _cluster: &PatroniCluster) -> Result<Outcome> {
            Ok(Outcome::RequeueAfter(Duration::from_secs(30)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_after_readds_key_later() {
        let platform = Arc::new(FakePlatform::new());
        let cluster = PatroniClusterBuilder::new("pg", "team-a")
            .with_finalizers(&[FINALIZER])
            .build();
        platform.insert_cluster(cluster.clone());
        let ctx = context(platform, FakeLister::with_clusters(vec![cluster]), None)
            .with_hooks(Arc::new(RequeueHooks));
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("team-a/pg".to_string());

        let start = tokio::time::Instant::now();
        assert!(process_next_item(&queue, &ctx, 3).await);
        assert!(queue.is_empty());

        let key = queue.get().await.unwrap();
        assert_eq!(key, "team-a/pg");
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(queue.num_requeues(&key), 0);
    }

    struct BackoffHooks;

    #[async_trait]
    impl LifecycleHooks for BackoffHooks {
        async fn converge(&self, _cluster: &PatroniCluster) -> Result<Outcome> {
            Ok(Outcome::RequeueNow)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_now_keeps_backoff_history() {
        let platform = Arc::new(FakePlatform::new());
        let cluster = PatroniClusterBuilder::new("pg", "team-a")
            .with_finalizers(&[FINALIZER])
            .with_status(ClusterStatus::Initialized)
            .build();
        platform.insert_cluster(cluster.clone());
        let ctx = context(platform, FakeLister::with_clusters(vec![cluster]), None)
            .with_hooks(Arc::new(BackoffHooks));
        let queue: WorkQueue<String> = WorkQueue::new();
        let key = "team-a/pg".to_string();
        queue.add(key.clone());

        let start = tokio::time::Instant::now();
        assert!(process_next_item(&queue, &ctx, 3).await);
        assert_eq!(queue.num_requeues(&key), 1);
        assert!(queue.is_empty());

        assert_eq!(queue.get().await.unwrap(), key);
        assert!(start.elapsed() >= DEFAULT_BASE_DELAY);
        queue.done(&key);

        // A second pass doubles the delay instead of starting over
        queue.add(key.clone());
        assert!(process_next_item(&queue, &ctx, 3).await);
        assert_eq!(queue.num_requeues(&key), 2);

        let start = tokio::time::Instant::now();
        assert_eq!(queue.get().await.unwrap(), key);
        assert!(start.elapsed() >= DEFAULT_BASE_DELAY * 2);
    }
}

mod controller_tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_when_cache_never_syncs() {
        let ctx = Arc::new(context(
            Arc::new(FakePlatform::new()),
            FakeLister::new(),
            None,
        ));
        let config = WorkerConfig {
            cache_sync_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let controller = Controller::new(ctx, WorkQueue::new(), config);

        let err = controller.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::CacheSyncError(_)));
        assert!(controller.queue().is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_reconcile_until_cancelled() {
        let platform = Arc::new(FakePlatform::new());
        let health = Arc::new(HealthState::new());
        let clusters = vec![
            create_test_cluster("pg", "team-a"),
            create_test_cluster("pg", "team-b"),
        ];
        for cluster in &clusters {
            platform.insert_cluster(cluster.clone());
        }
        let ctx = Arc::new(context(
            platform.clone(),
            FakeLister::with_clusters(clusters),
            Some(health.clone()),
        ));

        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("team-a/pg".to_string());
        queue.add("team-b/pg".to_string());

        let controller = Controller::new(ctx, queue.clone(), WorkerConfig::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { controller.start(cancel).await }
        });

        while platform.statefulset_names().len() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(health.is_ready().await);
        assert_eq!(
            platform.statefulset_names(),
            vec![
                "team-a/pg-a".to_string(),
                "team-a/pg-b".to_string(),
                "team-b/pg-a".to_string(),
                "team-b/pg-b".to_string(),
            ]
        );

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(queue.is_shutting_down());
        assert!(!health.is_ready().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_sync_starts_no_workers() {
        let ctx = Arc::new(context(
            Arc::new(FakePlatform::new()),
            FakeLister::new(),
            None,
        ));
        let controller = Controller::new(ctx, WorkQueue::new(), WorkerConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        controller.start(cancel).await.unwrap();
        assert!(controller.queue().is_shutting_down());
    }
}
