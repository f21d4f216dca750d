// GrowMon Web Backend Library
// Rust web backend for grow-room environmental alerting and notification fan-out

pub mod alerts;
pub mod config;
pub mod database;
pub mod error_handling;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod rate_limit;
pub mod realtime;
pub mod routes;
pub mod webhooks;

pub use config::WebConfig;
pub use database::Database;
pub use error_handling::{AppError, AppResult};
pub use models::*;

use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, response::Json, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use error_handling::{handle_404, trace_request};
use notifications::Notifier;
use rate_limit::RateLimiter;
use realtime::Gateway;

// Main application state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: WebConfig,
    pub rate_limiter: Arc<RateLimiter>,
    pub gateway: Arc<Gateway>,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    pub async fn new(config: WebConfig) -> anyhow::Result<Self> {
        let db = Database::new(&config.database_url).await?;
        db.migrate().await?;

        let gateway = Arc::new(Gateway::from_config(&config));
        let notifier = Arc::new(Notifier::new(
            db.pool().clone(),
            Duration::from_secs(config.throttle_window_secs),
        ));

        Ok(Self {
            db,
            config,
            rate_limiter: Arc::new(RateLimiter::new()),
            gateway,
            notifier,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", routes::api_routes())
        .route("/ws", get(realtime::gateway_ws_handler))
        .fallback(handle_404)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(trace_request))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let db_healthy = sqlx::query("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .is_ok();

    Ok(Json(serde_json::json!({
        "status": if db_healthy { "healthy" } else { "degraded" },
        "service": "growmon-web",
        "version": env!("CARGO_PKG_VERSION"),
        "database": if db_healthy { "healthy" } else { "unreachable" },
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
