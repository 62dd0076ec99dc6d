//! Patroni member workloads
//!
//! Every entry of `spec.nodeList` becomes its own single-replica StatefulSet
//! so each member keeps a stable identity and its own volume. Patroni inside
//! the pod handles leader election through Kubernetes Endpoints.
//!
//! Reference: https://github.com/patroni/patroni

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity, PodSpec,
    PodTemplateSpec, Probe, SecretKeySelector, VolumeMount, VolumeResourceRequirements,
    WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;

use super::common::{
    APPLICATION, DEFAULT_SERVICE_ACCOUNT, LABEL_APPLICATION, LABEL_STATEFULSET_ID,
    cluster_selector_labels, member_labels, member_name, owner_reference,
    replication_service_name,
};
use crate::crd::{PatroniCluster, PatroniClusterSpec};

/// Patroni REST API port
pub const PATRONI_API_PORT: i32 = 8008;

/// PostgreSQL listener port
pub const POSTGRES_PORT: i32 = 5432;

pub const DEFAULT_SUPERUSER_NAME: &str = "postgres";
pub const DEFAULT_REPLICATION_USER_NAME: &str = "standby";
// Used only when `.spec` does not reference a Secret.
const DEFAULT_PASSWORD: &str = "patroni";

/// Key read from user-provided credential Secrets
pub const PASSWORD_SECRET_KEY: &str = "password";

const PGDATA_VOLUME: &str = "pgdata";
const PGDATA_MOUNT_PATH: &str = "/home/postgres/pgdata";
const PGDATA_PATH: &str = "/home/postgres/pgdata/pgroot/data";
const PGPASS_PATH: &str = "/tmp/pgpass";
const PGDATA_SIZE: &str = "5Gi";

const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Generate pod anti-affinity among members of one cluster
///
/// Required keeps two members off the same node at the cost of unschedulable
/// pods on small clusters; preferred only nudges the scheduler.
pub fn generate_anti_affinity(cluster_name: &str, required: bool) -> PodAntiAffinity {
    let term = PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_labels: Some(cluster_selector_labels(cluster_name)),
            ..Default::default()
        }),
        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
        ..Default::default()
    };

    if required {
        PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![term]),
            ..Default::default()
        }
    } else {
        PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 1,
                    pod_affinity_term: term,
                },
            ]),
            ..Default::default()
        }
    }
}

/// ServiceAccount the member pods run as
pub fn service_account_name(spec: &PatroniClusterSpec) -> String {
    spec.service_account
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
        .to_string()
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Password variable, read from the referenced Secret when there is one
fn password_env(name: &str, secret_name: Option<&str>) -> EnvVar {
    match secret_name.filter(|s| !s.is_empty()) {
        Some(secret) => EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.to_string(),
                    key: PASSWORD_SECRET_KEY.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        None => plain_env(name, DEFAULT_PASSWORD),
    }
}

fn non_empty_or<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    value.filter(|s| !s.is_empty()).unwrap_or(default)
}

/// Environment describing cluster membership and credentials to Patroni
fn patroni_env(cluster_name: &str, spec: &PatroniClusterSpec) -> Vec<EnvVar> {
    vec![
        field_env("PATRONI_KUBERNETES_POD_IP", "status.podIP"),
        field_env("PATRONI_KUBERNETES_NAMESPACE", "metadata.namespace"),
        plain_env("PATRONI_KUBERNETES_BYPASS_API_SERVICE", "true"),
        plain_env("PATRONI_KUBERNETES_USE_ENDPOINTS", "true"),
        plain_env(
            "PATRONI_KUBERNETES_LABELS",
            format!(
                "{{{}: {}, cluster-name: {}}}",
                LABEL_APPLICATION, APPLICATION, cluster_name
            ),
        ),
        plain_env(
            "PATRONI_SUPERUSER_USERNAME",
            non_empty_or(spec.super_user_name.as_deref(), DEFAULT_SUPERUSER_NAME),
        ),
        password_env(
            "PATRONI_SUPERUSER_PASSWORD",
            spec.super_user_secret_name.as_deref(),
        ),
        plain_env(
            "PATRONI_REPLICATION_USERNAME",
            non_empty_or(
                spec.replication_user_name.as_deref(),
                DEFAULT_REPLICATION_USER_NAME,
            ),
        ),
        password_env(
            "PATRONI_REPLICATION_PASSWORD",
            spec.replication_user_secret_name.as_deref(),
        ),
        plain_env("PATRONI_SCOPE", cluster_name),
        field_env("PATRONI_NAME", "metadata.name"),
        plain_env("PATRONI_POSTGRESQL_DATA_DIR", PGDATA_PATH),
        plain_env("PATRONI_POSTGRESQL_PGPASS", PGPASS_PATH),
        plain_env("PATRONI_POSTGRESQL_LISTEN", format!("0.0.0.0:{}", POSTGRES_PORT)),
        plain_env("PATRONI_RESTAPI_LISTEN", format!("0.0.0.0:{}", PATRONI_API_PORT)),
    ]
}

/// Generate the StatefulSet for one cluster member
///
/// Pure function of the cluster and the node name: the reconciler recomputes
/// it on every pass and only ever creates it when missing.
pub fn synthesize_workload(node_name: &str, cluster: &PatroniCluster) -> StatefulSet {
    let cluster_name = cluster.name_any();
    let member = member_name(&cluster_name, node_name);
    let labels = member_labels(&cluster_name, &member);

    let readiness_probe = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/readiness".to_string()),
            port: IntOrString::Int(PATRONI_API_PORT),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(3),
        timeout_seconds: Some(5),
        period_seconds: Some(10),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    };

    let container = Container {
        name: "postgres".to_string(),
        image: Some(cluster.spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        readiness_probe: Some(readiness_probe),
        ports: Some(vec![
            ContainerPort {
                container_port: PATRONI_API_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: POSTGRES_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(patroni_env(&cluster_name, &cluster.spec)),
        volume_mounts: Some(vec![VolumeMount {
            name: PGDATA_VOLUME.to_string(),
            mount_path: PGDATA_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let pvc_template = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(PGDATA_VOLUME.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_APPLICATION.to_string(), APPLICATION.to_string()),
                (LABEL_STATEFULSET_ID.to_string(), member.clone()),
            ])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(PGDATA_SIZE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(member),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: Some(replication_service_name(&cluster_name)),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(Affinity {
                        pod_anti_affinity: Some(generate_anti_affinity(
                            &cluster_name,
                            cluster.spec.require_pod_anti_affinity,
                        )),
                        ..Default::default()
                    }),
                    containers: vec![container],
                    termination_grace_period_seconds: Some(0),
                    service_account_name: Some(service_account_name(&cluster.spec)),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![pvc_template]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
