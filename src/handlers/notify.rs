use axum::{extract::State, response::Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error_handling::{validation, AppResult};
use crate::models::{Notification, SendNotificationRequest};
use crate::notifications::{self, ChannelPayload};
use crate::AppState;

pub async fn send_notification(
    State(state): State<AppState>,
    Json(req): Json<SendNotificationRequest>,
) -> AppResult<Json<Value>> {
    let notification_type = validation::require(req.notification_type, "type")?;
    let title = validation::require(req.title, "title")?;
    let message = validation::require(req.message, "message")?;
    validation::validate_non_empty(&notification_type, "type")?;
    validation::validate_non_empty(&title, "title")?;

    let severity = req.severity.unwrap_or_else(|| "info".to_string());
    validation::validate_severity(&severity)?;

    let channels = req.channels.unwrap_or_else(|| vec!["in_app".to_string()]);
    notifications::validate_channels(&channels)?;

    // A broadcast notification is stored without a user scope so every
    // client sees it.
    let broadcast = req.broadcast.unwrap_or(false);
    let user_id = if broadcast { None } else { req.user_id };

    let payload = ChannelPayload {
        event: notification_type.clone(),
        title,
        message,
        severity,
        user_id,
        data: req.metadata.unwrap_or(Value::Null),
        timestamp: Utc::now(),
    };

    let names: Vec<&str> = channels.iter().map(String::as_str).collect();
    let dispatched = state.notifier.dispatch_channels(&names, &payload).await;

    Ok(Json(json!({
        "success": true,
        "channels": dispatched,
    })))
}

pub async fn list_notifications(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Notification>>> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications ORDER BY created_at DESC LIMIT 200",
    )
    .fetch_all(state.db.pool())
    .await?;

    Ok(Json(notifications))
}
