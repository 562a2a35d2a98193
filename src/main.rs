use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use k8sadmin_backend::{
    api::AppState,
    config::Config,
    create_router,
    k8s::{ClusterClient, K8sClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        port = config.port,
        deletion_wait_secs = config.pod_deletion_wait_secs,
        grace_period_secs = config.pod_delete_grace_period_secs,
        "Starting k8sadmin backend"
    );

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let state = AppState::new(config.clone()).with_metrics(metrics);

    // Spawn K8s Connection Manager (Automatic Reconnection)
    tokio::spawn(connection_manager(state.clone()));

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connect to the cluster, then keep checking it. A failed health check drops
/// the client so handlers answer 503 until the next successful connect.
async fn connection_manager(state: AppState) {
    let interval = state.config.cluster_poll_interval();
    tracing::info!("K8s connection manager started");

    loop {
        let current = state.cluster.read().await.clone();
        match current {
            None => match K8sClient::new(state.config.kubeconfig.as_deref()).await {
                Ok(client) => match client.health_check().await {
                    Ok(version) => {
                        tracing::info!(%version, "Connected to Kubernetes cluster");
                        state.set_cluster(Arc::new(client)).await;
                    }
                    Err(e) => tracing::warn!("K8s client created but unhealthy: {}", e),
                },
                Err(e) => tracing::debug!("K8s connection attempt failed: {}", e),
            },
            Some(client) => {
                if let Err(e) = client.health_check().await {
                    tracing::error!("Lost K8s connection: {}. Reconnecting...", e);
                    state.clear_cluster().await;
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}
