use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbmanager_api::{config::Config, routes, services, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    services::password::check_entropy_source()?;

    let state = AppState::new(config);
    let config = state.config.clone();

    state
        .provisioning
        .registry()
        .acquire(&config.database_name)
        .await?;
    info!("Connected to database {}", config.database_name);

    if config.reconcile_on_startup {
        let changed = state.provisioning.reconcile().await?;
        info!("Startup reconciliation finished (changed={changed})");
    }

    services::metrics::start(state.provisioning.clone());

    let app = routes::router(state);

    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    info!("dbmanager API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM. In-flight requests finish; leases they hold
/// are released as their handlers return.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
