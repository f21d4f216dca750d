use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::{handlers, AppState};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Sensor routes
        .route("/sensors", post(handlers::sensors::ingest_reading))
        .route("/sensors", get(handlers::sensors::list_readings))
        // Threshold routes
        .route("/thresholds", get(handlers::thresholds::list_thresholds))
        .route("/thresholds", post(handlers::thresholds::create_threshold))
        .route("/thresholds/:id", put(handlers::thresholds::update_threshold))
        .route(
            "/thresholds/:id",
            delete(handlers::thresholds::delete_threshold),
        )
        // Alert routes
        .route("/alerts", get(handlers::alerts::list_alerts))
        .route(
            "/alerts/:id/acknowledge",
            post(handlers::alerts::acknowledge_alert),
        )
        // Notification preference routes
        .route("/preferences", get(handlers::preferences::list_preferences))
        .route("/preferences", post(handlers::preferences::create_preference))
        .route(
            "/preferences/:id",
            put(handlers::preferences::update_preference),
        )
        .route(
            "/preferences/:id",
            delete(handlers::preferences::delete_preference),
        )
        // Notification routes
        .route("/notifications", get(handlers::notify::list_notifications))
        .route(
            "/notifications/send",
            post(handlers::notify::send_notification),
        )
        // Webhook registry routes
        .route("/webhooks", get(handlers::webhooks::list_webhooks))
        .route("/webhooks", post(handlers::webhooks::register_webhook))
        .route("/webhooks/:id", get(handlers::webhooks::get_webhook))
        .route("/webhooks/:id", put(handlers::webhooks::update_webhook))
        .route("/webhooks/:id", delete(handlers::webhooks::delete_webhook))
}
