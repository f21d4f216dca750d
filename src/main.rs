use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use growmon_web::{create_app, AppState, WebConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting GrowMon web server");

    let config = match WebConfig::load() {
        Ok(config) => {
            tracing::info!("Configuration loaded, port: {}", config.port);
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let state = match AppState::new(config.clone()).await {
        Ok(state) => {
            tracing::info!("Database initialized and migrations applied");
            state
        }
        Err(e) => {
            tracing::error!("Failed to initialize application state: {}", e);
            return Err(e);
        }
    };

    // Periodically drop rate-limit windows that have expired so the
    // key table does not grow with client churn.
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.evict_expired();
        }
    });

    let gateway = state.gateway.clone();
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("GrowMon web server listening on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, draining realtime connections");
            gateway.begin_drain();

            // Hard stop if in-flight work outlives the grace period.
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                tracing::warn!("Shutdown grace period elapsed, exiting");
                std::process::exit(1);
            });
        })
        .await?;

    tracing::info!("GrowMon web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
