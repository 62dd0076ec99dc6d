//! Operator configuration
//!
//! Settings come from an optional YAML file, then environment variables
//! override individual fields. A missing file is not an error; a file that
//! does not parse is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::{Deserialize, Serialize};

use crate::controller::error::{Error, Result};
use crate::controller::worker::{
    DEFAULT_CACHE_SYNC_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_WORKER_COUNT, WorkerConfig,
};
use crate::health::DEFAULT_HEALTH_PORT;

/// Config file read when `CONFIG_FILE` is not set
pub const DEFAULT_CONFIG_PATH: &str = "/controller-manager.yaml";

/// Default name of the leader election lease
pub const DEFAULT_LEASE_NAME: &str = "patroni-cluster-controller-leader";

/// Connection settings for the Kubernetes API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesConfig {
    /// Kubeconfig file; in-cluster or default config when unset
    pub kubeconfig: Option<PathBuf>,
}

/// Leader election settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    pub lease_name: String,
    /// Namespace holding the lease (defaults to the pod namespace)
    pub lease_namespace: Option<String>,
    /// Lease holder identity (defaults to the pod name or hostname)
    pub holder_id: Option<String>,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_namespace: None,
            holder_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    pub kubernetes: KubernetesConfig,
    /// Only watch this namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    pub worker_count: usize,
    pub max_retries: u32,
    pub health_port: u16,
    pub cache_sync_timeout_secs: u64,
    pub leader_election: LeaderElectionConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            kubernetes: KubernetesConfig::default(),
            watch_namespace: None,
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            health_port: DEFAULT_HEALTH_PORT,
            cache_sync_timeout_secs: DEFAULT_CACHE_SYNC_TIMEOUT.as_secs(),
            leader_election: LeaderElectionConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Load from `CONFIG_FILE` (or the default path) and the process environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Read a YAML file, falling back to defaults when it does not exist
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {}", e)))
    }

    /// Override fields from environment variables looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(path) = non_empty("KUBECONFIG") {
            self.kubernetes.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(ns) = non_empty("WATCH_NAMESPACE") {
            self.watch_namespace = Some(ns);
        }
        if let Some(v) = non_empty("WORKER_COUNT") {
            self.worker_count = parse_env("WORKER_COUNT", &v)?;
        }
        if let Some(v) = non_empty("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = non_empty("HEALTH_PORT") {
            self.health_port = parse_env("HEALTH_PORT", &v)?;
        }
        if let Some(v) = non_empty("CACHE_SYNC_TIMEOUT_SECS") {
            self.cache_sync_timeout_secs = parse_env("CACHE_SYNC_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = non_empty("LEADER_ELECTION") {
            self.leader_election.enabled = parse_env("LEADER_ELECTION", &v)?;
        }
        if let Some(pod_name) = non_empty("POD_NAME") {
            self.leader_election.holder_id.get_or_insert(pod_name);
        }
        if let Some(pod_ns) = non_empty("POD_NAMESPACE") {
            self.leader_election.lease_namespace.get_or_insert(pod_ns);
        }
        Ok(())
    }

    /// All problems with the configuration; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Some(ref path) = self.kubernetes.kubeconfig {
            if !path.exists() {
                problems.push(format!("kubeconfig {} does not exist", path.display()));
            }
        }
        if self.worker_count == 0 {
            problems.push("workerCount must be at least 1".to_string());
        }
        if self.max_retries == 0 {
            problems.push("maxRetries must be at least 1".to_string());
        }
        if self.cache_sync_timeout_secs == 0 {
            problems.push("cacheSyncTimeoutSecs must be at least 1".to_string());
        }
        if self.leader_election.enabled && self.leader_election.lease_name.is_empty() {
            problems.push("leaderElection.leaseName must not be empty".to_string());
        }

        problems
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            worker_count: self.worker_count,
            max_retries: self.max_retries,
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
        }
    }

    /// Build a client from the configured kubeconfig, or the default chain
    pub async fn create_client(&self) -> Result<Client> {
        let Some(ref path) = self.kubernetes.kubeconfig else {
            return Ok(Client::try_default().await?);
        };

        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            Error::InvalidConfig(format!("failed to read kubeconfig {}: {}", path.display(), e))
        })?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::InvalidConfig(format!("invalid kubeconfig: {}", e)))?;
        Ok(Client::try_from(config)?)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} has invalid value {:?}", name, value)))
}
