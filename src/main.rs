use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use patroni_operator::OperatorConfig;
use patroni_operator::health::{HealthState, run_health_server};
use patroni_operator::run_controller;

/// Lease configuration
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err(
            "Failed to install rustls crypto provider and no provider is available".into(),
        );
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("patroni_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting patroni-operator");

    let config = OperatorConfig::load()?;
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Invalid configuration: {}", problem);
        }
        return Err(format!("{} configuration problem(s)", problems.len()).into());
    }

    // Create Kubernetes client
    let client = config.create_client().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let cancel = CancellationToken::new();

    // Acquire leadership before starting controller
    let lease_renewal_handle = if config.leader_election.enabled {
        let lease = lease_params(&config);
        info!(
            holder_id = %lease.holder_id,
            namespace = %lease.namespace,
            lease_name = %lease.lease_name,
            "Initializing leader election"
        );
        acquire_leadership(&client, &lease).await;
        Some(tokio::spawn(renew_leadership(client.clone(), lease, cancel.clone())))
    } else {
        warn!("Leader election disabled, assuming leadership");
        None
    };

    info!("Watching PatroniCluster resources (apiVersion: patroni.example.com/v1alpha1)");

    // Start cluster controller (only runs as leader)
    let mut controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        let namespace = config.watch_namespace.clone();
        let worker_config = config.worker_config();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            run_controller(
                controller_client,
                namespace.as_deref(),
                worker_config,
                Some(health_state),
                cancel,
            )
            .await
        })
    };

    let lease_future = async {
        match lease_renewal_handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Lease renewal task panicked: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    // Wait for any task to complete (or fail), or shutdown signal
    let mut exit_error: Option<String> = None;
    tokio::select! {
        result = &mut controller_handle => {
            match result {
                Ok(Ok(())) => warn!("Controller stopped unexpectedly"),
                Ok(Err(e)) => {
                    error!("Controller failed: {}", e);
                    exit_error = Some(e.to_string());
                }
                Err(e) => error!("Cluster controller task panicked: {}", e),
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = lease_future => {
            error!("Lost leadership, shutting down");
            exit_error = Some("lost leadership".to_string());
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
        }
    }

    // Mark as not ready to stop receiving new work
    health_state.set_ready(false).await;
    cancel.cancel();

    // Give in-flight reconciliations time to complete
    if !controller_handle.is_finished() {
        info!(
            "Waiting up to {}s for in-flight reconciliations to complete...",
            SHUTDOWN_GRACE_PERIOD_SECS
        );
        if tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
            &mut controller_handle,
        )
        .await
        .is_err()
        {
            warn!("Grace period elapsed with reconciliations still running");
        }
    }

    info!("Operator stopped");
    match exit_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Resolved leader election identity
struct LeaseParams {
    holder_id: String,
    namespace: String,
    lease_name: String,
}

fn lease_params(config: &OperatorConfig) -> LeaseParams {
    let holder_id = config.leader_election.holder_id.clone().unwrap_or_else(|| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = config
        .leader_election
        .lease_namespace
        .clone()
        .unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            "default".to_string()
        });

    LeaseParams {
        holder_id,
        namespace,
        lease_name: config.leader_election.lease_name.clone(),
    }
}

fn lease_lock(client: &Client, lease: &LeaseParams) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        &lease.namespace,
        LeaseLockParams {
            holder_id: lease.holder_id.clone(),
            lease_name: lease.lease_name.clone(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    )
}

/// Block until this instance holds the lease
async fn acquire_leadership(client: &Client, lease: &LeaseParams) {
    let lock = lease_lock(client, lease);
    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }
}

/// Keep renewing the lease; returns when it is lost or `cancel` fires
async fn renew_leadership(client: Client, lease: LeaseParams, cancel: CancellationToken) {
    let lock = lease_lock(&client, &lease);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)) => {}
        }

        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("Lost leadership!");
                return;
            }
            Err(e) => {
                error!("Failed to renew lease: {}", e);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
