use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error_handling::{validation, AppError, AppResult};
use crate::models::{CreatePreferenceRequest, NotificationPreference};
use crate::AppState;

fn validate_quiet_hours(
    start: Option<&String>,
    end: Option<&String>,
) -> AppResult<()> {
    if let Some(start) = start {
        validation::parse_hhmm(start, "quiet_hours_start")?;
    }
    if let Some(end) = end {
        validation::parse_hhmm(end, "quiet_hours_end")?;
    }
    Ok(())
}

pub async fn create_preference(
    State(state): State<AppState>,
    Json(req): Json<CreatePreferenceRequest>,
) -> AppResult<Json<NotificationPreference>> {
    let event_type = req.event_type.unwrap_or_else(|| "*".to_string());
    validation::validate_non_empty(&event_type, "event_type")?;
    let min_severity = req.min_severity.unwrap_or_else(|| "info".to_string());
    validation::validate_severity(&min_severity)?;
    validate_quiet_hours(req.quiet_hours_start.as_ref(), req.quiet_hours_end.as_ref())?;

    let now = Utc::now();
    let pref = NotificationPreference {
        id: Uuid::new_v4().to_string(),
        user_id: req.user_id,
        event_type,
        min_severity,
        in_app: req.in_app.unwrap_or(true),
        push: req.push.unwrap_or(false),
        email: req.email.unwrap_or(false),
        sms: req.sms.unwrap_or(false),
        webhook: req.webhook.unwrap_or(false),
        discord: req.discord.unwrap_or(false),
        telegram: req.telegram.unwrap_or(false),
        quiet_hours_start: req.quiet_hours_start,
        quiet_hours_end: req.quiet_hours_end,
        throttle_rate: req.throttle_rate.unwrap_or(0).max(0),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO notification_preferences
         (id, user_id, event_type, min_severity, in_app, push, email, sms, webhook,
          discord, telegram, quiet_hours_start, quiet_hours_end, throttle_rate,
          created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&pref.id)
    .bind(&pref.user_id)
    .bind(&pref.event_type)
    .bind(&pref.min_severity)
    .bind(pref.in_app)
    .bind(pref.push)
    .bind(pref.email)
    .bind(pref.sms)
    .bind(pref.webhook)
    .bind(pref.discord)
    .bind(pref.telegram)
    .bind(&pref.quiet_hours_start)
    .bind(&pref.quiet_hours_end)
    .bind(pref.throttle_rate)
    .bind(pref.created_at)
    .bind(pref.updated_at)
    .execute(state.db.pool())
    .await?;

    Ok(Json(pref))
}

pub async fn list_preferences(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<NotificationPreference>>> {
    let prefs = sqlx::query_as::<_, NotificationPreference>(
        "SELECT * FROM notification_preferences ORDER BY created_at DESC",
    )
    .fetch_all(state.db.pool())
    .await?;

    Ok(Json(prefs))
}

pub async fn update_preference(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreatePreferenceRequest>,
) -> AppResult<Json<NotificationPreference>> {
    let mut pref = sqlx::query_as::<_, NotificationPreference>(
        "SELECT * FROM notification_preferences WHERE id = ?",
    )
    .bind(&id)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or_else(|| AppError::not_found(format!("preference {}", id)))?;

    validate_quiet_hours(req.quiet_hours_start.as_ref(), req.quiet_hours_end.as_ref())?;

    if let Some(event_type) = req.event_type {
        validation::validate_non_empty(&event_type, "event_type")?;
        pref.event_type = event_type;
    }
    if let Some(min_severity) = req.min_severity {
        validation::validate_severity(&min_severity)?;
        pref.min_severity = min_severity;
    }
    if req.user_id.is_some() {
        pref.user_id = req.user_id;
    }
    if let Some(in_app) = req.in_app {
        pref.in_app = in_app;
    }
    if let Some(push) = req.push {
        pref.push = push;
    }
    if let Some(email) = req.email {
        pref.email = email;
    }
    if let Some(sms) = req.sms {
        pref.sms = sms;
    }
    if let Some(webhook) = req.webhook {
        pref.webhook = webhook;
    }
    if let Some(discord) = req.discord {
        pref.discord = discord;
    }
    if let Some(telegram) = req.telegram {
        pref.telegram = telegram;
    }
    if req.quiet_hours_start.is_some() {
        pref.quiet_hours_start = req.quiet_hours_start;
    }
    if req.quiet_hours_end.is_some() {
        pref.quiet_hours_end = req.quiet_hours_end;
    }
    if let Some(throttle_rate) = req.throttle_rate {
        pref.throttle_rate = throttle_rate.max(0);
    }
    pref.updated_at = Utc::now();

    sqlx::query(
        "UPDATE notification_preferences
         SET user_id = ?, event_type = ?, min_severity = ?, in_app = ?, push = ?,
             email = ?, sms = ?, webhook = ?, discord = ?, telegram = ?,
             quiet_hours_start = ?, quiet_hours_end = ?, throttle_rate = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&pref.user_id)
    .bind(&pref.event_type)
    .bind(&pref.min_severity)
    .bind(pref.in_app)
    .bind(pref.push)
    .bind(pref.email)
    .bind(pref.sms)
    .bind(pref.webhook)
    .bind(pref.discord)
    .bind(pref.telegram)
    .bind(&pref.quiet_hours_start)
    .bind(&pref.quiet_hours_end)
    .bind(pref.throttle_rate)
    .bind(pref.updated_at)
    .bind(&id)
    .execute(state.db.pool())
    .await?;

    Ok(Json(pref))
}

pub async fn delete_preference(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM notification_preferences WHERE id = ?")
        .bind(&id)
        .execute(state.db.pool())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("preference {}", id)));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}
