//! cluster-lifecycle-operator entry point.
//!
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - `run`: leader election, then the controller and the health server
//! - `migrate` and `upgrade`: one-shot commands, exit status 0 or 1

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use kube::{Client, ResourceExt};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio::signal;
use tracing::{error, info, warn};

use lifecycle_operator::artifacts::HttpArtifactSource;
use lifecycle_operator::cli::{
    Cli, Command, InstallationSource, Migration, decode_installation, read_installation,
    run_migration, upgrade_operator_chart,
};
use lifecycle_operator::config::OperatorConfig;
use lifecycle_operator::controller::context::{EngineSettings, LifecycleEngine};
use lifecycle_operator::health::{HealthState, run_health_server};
use lifecycle_operator::release::MetadataCache;
use lifecycle_operator::reporting::HttpNotifier;
use lifecycle_operator::run_controller;
use lifecycle_operator::store::KubeStore;

const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lifecycle_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    match cli.command {
        Some(Command::Run) | None => run_operator(client, cli.config).await,
        Some(Command::Migrate { migration }) => {
            let migration: Migration = migration.parse()?;
            let store = KubeStore::new(client);
            let metadata = MetadataCache::new(cli.config.metadata_timeout())?;
            run_migration(&store, &metadata, migration).await?;
            info!(migration = ?migration, "Migration completed");
            Ok(())
        }
        Some(Command::Upgrade {
            installation,
            installation_secret,
        }) => {
            let source = InstallationSource::from_args(
                installation.as_deref(),
                installation_secret.as_deref(),
            )?;
            let store = KubeStore::new(client);
            let metadata = MetadataCache::new(cli.config.metadata_timeout())?;
            let data = read_installation(&store, &source).await?;
            let installation = decode_installation(&data)?;
            info!(
                installation = %installation.name_any(),
                version = installation.spec.desired_version().unwrap_or_default(),
                "Upgrading operator"
            );
            upgrade_operator_chart(&store, &metadata, &installation).await?;
            info!("Upgrade command completed successfully");
            Ok(())
        }
    }
}

fn lease_lock(client: &Client, config: &OperatorConfig, holder_id: &str) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        &config.pod_namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: config.lease_name.clone(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    )
}

async fn run_operator(
    client: Client,
    config: OperatorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(version = %config.operator_version, "Starting cluster-lifecycle-operator");

    if config.pod_name.is_none() {
        warn!("POD_NAME not set, using hostname");
    }
    let holder_id = config.holder_id();

    let engine = Arc::new(LifecycleEngine::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(MetadataCache::new(config.metadata_timeout())?),
        Arc::new(HttpArtifactSource::new(config.metadata_timeout())?),
        Arc::new(HttpNotifier::new(config.metadata_timeout())?),
        EngineSettings::from(&config),
    ));

    info!(
        holder_id = %holder_id,
        namespace = %config.pod_namespace,
        lease_name = %config.lease_name,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());
    let is_leader = Arc::new(AtomicBool::new(false));

    // Probes must answer even as non-leader
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lock = lease_lock(&client, &config, &holder_id);
    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) => {
                if matches!(result, LeaseLockResult::Acquired(_)) {
                    info!("Acquired leadership");
                    is_leader.store(true, Ordering::SeqCst);
                    break;
                } else {
                    info!("Another instance is leader, waiting...");
                }
            }
            Err(e) => {
                warn!("Failed to acquire lease: {}, retrying...", e);
            }
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    let lease_renewal_handle = {
        let is_leader = is_leader.clone();
        let lock = lease_lock(&client, &config, &holder_id);

        #[allow(clippy::exit)]
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match lock.try_acquire_or_renew().await {
                    Ok(result) => {
                        if !matches!(result, LeaseLockResult::Acquired(_)) {
                            error!("Lost leadership! Shutting down...");
                            is_leader.store(false, Ordering::SeqCst);
                            // Exit so Kubernetes restarts us and we re-enter election
                            std::process::exit(1);
                        }
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        is_leader.store(false, Ordering::SeqCst);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        let instance = config.pod_name.clone();
        tokio::spawn(async move {
            run_controller(controller_client, engine, Some(health_state), instance).await;
        })
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Lease renewal only exits via process::exit() or panic
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
