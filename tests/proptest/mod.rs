// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for PatroniCluster validation and resource generation
//!
//! These tests use proptest to generate random configurations and verify that:
//! 1. Valid specs always pass validation and synthesize without panicking
//! 2. Synthesis is a pure function of the node name and the cluster
//! 3. Arbitrary input is rejected with errors, not panics
//! 4. The lifecycle state machine never panics on any event sequence

use std::collections::HashSet;
use std::time::Duration;

use kube::ResourceExt;
use kube::core::ObjectMeta;
use proptest::prelude::*;

use patroni_operator::controller::queue::{ItemExponentialRateLimiter, RateLimiter};
use patroni_operator::controller::reconciler::{with_finalizer, without_finalizer};
use patroni_operator::controller::state_machine::{
    FINALIZER, LifecycleEvent, LifecycleState, LifecycleStateMachine, TransitionResult,
};
use patroni_operator::controller::validation::validate_spec;
use patroni_operator::controller::{key_for, split_key};
use patroni_operator::crd::{PatroniCluster, PatroniClusterSpec};
use patroni_operator::resources::synthesize_workload;

// =============================================================================
// Helper functions
// =============================================================================

fn cluster_from_spec(name: &str, namespace: &str, spec: PatroniClusterSpec) -> PatroniCluster {
    PatroniCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some("prop-uid".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

// =============================================================================
// Strategy generators
// =============================================================================

/// Cluster names short enough that every member name stays a valid label
fn cluster_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,19}"
}

fn namespace() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,10}[a-z0-9]"
}

/// Distinct node names, in the order the user listed them
fn node_list() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z0-9]{1,12}", 1..=7).prop_map(|s| s.into_iter().collect())
}

fn image() -> impl Strategy<Value = String> {
    ("[a-z]{1,12}", "[0-9]{1,2}").prop_map(|(repo, tag)| format!("{}:{}", repo, tag))
}

fn valid_spec() -> impl Strategy<Value = PatroniClusterSpec> {
    (
        node_list(),
        image(),
        any::<bool>(),
        proptest::option::of("[a-z]{1,10}"),
    )
        .prop_map(
            |(node_names, image, require_pod_anti_affinity, service_account)| PatroniClusterSpec {
                node_names,
                image,
                require_pod_anti_affinity,
                service_account,
                ..Default::default()
            },
        )
}

fn valid_cluster() -> impl Strategy<Value = PatroniCluster> {
    (cluster_name(), namespace(), valid_spec())
        .prop_map(|(name, ns, spec)| cluster_from_spec(&name, &ns, spec))
}

fn lifecycle_state() -> impl Strategy<Value = LifecycleState> {
    prop_oneof![
        Just(LifecycleState::NoFinalizer),
        Just(LifecycleState::FinalizerSet),
        Just(LifecycleState::Deleting),
        Just(LifecycleState::Released),
    ]
}

fn lifecycle_event() -> impl Strategy<Value = LifecycleEvent> {
    prop_oneof![
        Just(LifecycleEvent::CreationStarted),
        Just(LifecycleEvent::DeletionRequested),
        Just(LifecycleEvent::FinalizerReleased),
    ]
}

/// Finalizers owned by other controllers
fn foreign_finalizers() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,8}\\.example\\.com/[a-z]{1,8}", 0..4)
}

// =============================================================================
// Property-based tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Valid specs always pass validation
    #[test]
    fn prop_valid_spec_passes_validation(cluster in valid_cluster()) {
        let result = validate_spec(&cluster);
        prop_assert!(result.is_ok(), "Valid spec should pass validation: {:?}", result);
    }

    /// Property: Synthesis depends only on the node and the cluster
    #[test]
    fn prop_workload_deterministic(cluster in valid_cluster()) {
        for node in &cluster.spec.node_names {
            prop_assert_eq!(
                synthesize_workload(node, &cluster),
                synthesize_workload(node, &cluster)
            );
        }
    }

    /// Property: One single-replica StatefulSet per node, named `<cluster>-<node>`
    #[test]
    fn prop_workload_identity(cluster in valid_cluster()) {
        let cluster_name = cluster.name_any();
        let mut names = HashSet::new();

        for node in &cluster.spec.node_names {
            let sts = synthesize_workload(node, &cluster);
            let expected = format!("{}-{}", cluster_name, node);

            prop_assert_eq!(sts.name_any(), expected.clone());
            prop_assert_eq!(sts.namespace(), cluster.namespace());

            let spec = sts.spec.as_ref().unwrap();
            prop_assert_eq!(spec.replicas, Some(1));
            let selector = spec.selector.match_labels.as_ref().unwrap();
            prop_assert_eq!(selector.get("statefulset-id"), Some(&expected));
            prop_assert_eq!(selector.get("cluster-name"), Some(&cluster_name));

            names.insert(expected);
        }

        prop_assert_eq!(names.len(), cluster.spec.node_names.len());
    }

    /// Property: Exactly one anti-affinity form, chosen by `requirePodAntiAffinity`
    #[test]
    fn prop_anti_affinity_follows_flag(cluster in valid_cluster()) {
        let node = &cluster.spec.node_names[0];
        let sts = synthesize_workload(node, &cluster);
        let aa = sts
            .spec
            .unwrap()
            .template
            .spec
            .unwrap()
            .affinity
            .unwrap()
            .pod_anti_affinity
            .unwrap();

        let required = aa.required_during_scheduling_ignored_during_execution.is_some();
        let preferred = aa.preferred_during_scheduling_ignored_during_execution.is_some();
        prop_assert_eq!(required, cluster.spec.require_pod_anti_affinity);
        prop_assert_eq!(preferred, !cluster.spec.require_pod_anti_affinity);
    }

    /// Property: Arbitrary input never panics validation
    #[test]
    fn prop_validation_no_panic(
        name in ".{0,70}",
        nodes in prop::collection::vec(".{0,70}", 0..5),
        image in ".{0,20}",
    ) {
        let spec = PatroniClusterSpec {
            node_names: nodes,
            image,
            ..Default::default()
        };
        let _ = validate_spec(&cluster_from_spec(&name, "default", spec));
    }

    /// Property: A repeated node name is always rejected
    #[test]
    fn prop_duplicate_node_rejected(cluster in valid_cluster()) {
        let mut cluster = cluster;
        let dup = cluster.spec.node_names[0].clone();
        cluster.spec.node_names.push(dup);
        prop_assert!(validate_spec(&cluster).is_err());
    }

    /// Property: State machine never panics, and agrees with its own event table
    #[test]
    fn prop_state_machine_no_panic(
        start in lifecycle_state(),
        events in prop::collection::vec(lifecycle_event(), 0..20),
    ) {
        let sm = LifecycleStateMachine::new();
        let mut state = start;
        for event in events {
            let allowed = sm.valid_events(state).contains(&event);
            match sm.transition(state, event) {
                TransitionResult::Success { from, to, .. } => {
                    prop_assert!(allowed);
                    prop_assert_eq!(from, state);
                    state = to;
                }
                TransitionResult::InvalidTransition { current, .. } => {
                    prop_assert!(!allowed);
                    prop_assert_eq!(current, state);
                }
            }
        }
    }

    /// Property: Adding then removing the marker leaves other finalizers as they were
    #[test]
    fn prop_finalizer_marker_isolated(
        cluster in valid_cluster(),
        others in foreign_finalizers(),
    ) {
        let mut cluster = cluster;
        cluster.metadata.finalizers = Some(others.clone());

        let added = with_finalizer(&cluster);
        let markers = added
            .metadata
            .finalizers
            .as_ref()
            .unwrap()
            .iter()
            .filter(|f| f.as_str() == FINALIZER)
            .count();
        prop_assert_eq!(markers, 1);
        prop_assert_eq!(LifecycleState::observe(&added), LifecycleState::FinalizerSet);

        let removed = without_finalizer(&with_finalizer(&added));
        prop_assert_eq!(removed.metadata.finalizers, Some(others));
        prop_assert_eq!(removed.spec, cluster.spec);
    }

    /// Property: The key of an object splits back into its namespace and name
    #[test]
    fn prop_key_splits_back(cluster in valid_cluster()) {
        let key = key_for(&cluster).unwrap();
        let (ns, name) = split_key(&key).unwrap();
        prop_assert_eq!(ns.map(str::to_string), cluster.namespace());
        prop_assert_eq!(name.to_string(), cluster.name_any());
    }

    /// Property: Backoff never shrinks between forgets and never exceeds the cap
    #[test]
    fn prop_backoff_monotonic_and_capped(
        base_ms in 1..=100u64,
        max_secs in 1..=60u64,
        failures in 1..=80usize,
    ) {
        let max = Duration::from_secs(max_secs);
        let limiter = ItemExponentialRateLimiter::new(Duration::from_millis(base_ms), max);
        let key = "team-a/pg".to_string();

        let mut previous = Duration::ZERO;
        for _ in 0..failures {
            let delay = limiter.when(&key);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= max);
            previous = delay;
        }
        prop_assert_eq!(limiter.num_requeues(&key) as usize, failures);
    }
}
