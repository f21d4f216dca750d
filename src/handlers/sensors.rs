use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::alerts::evaluator;
use crate::error_handling::{validation, AppError, AppResult};
use crate::models::{IngestReadingRequest, IngestReadingResponse, SensorReading};
use crate::rate_limit::Decision;
use crate::AppState;

use super::client_key;

/// Ingests one environmental reading, evaluates it against the enabled
/// thresholds, and returns any synchronously triggered alerts. Notification
/// fan-out happens off the request path.
pub async fn ingest_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IngestReadingRequest>,
) -> AppResult<Json<IngestReadingResponse>> {
    let key = client_key(&headers);
    let decision = state.rate_limiter.check(
        &format!("ingest:{key}"),
        state.config.ingest_rate_limit,
        Duration::from_secs(state.config.ingest_rate_window_secs),
    );
    if let Decision::Denied { retry_after } = decision {
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        });
    }

    // Zero is a valid value for both fields; absence is not.
    let temperature = validation::require(req.temperature, "temperature")?;
    let humidity = validation::require(req.humidity, "humidity")?;

    let reading = SensorReading {
        id: Uuid::new_v4().to_string(),
        sensor_id: req.sensor_id,
        room_id: req.room_id,
        temperature,
        humidity,
        vpd: req.vpd,
        source: req.source,
        payload: req.payload.map(|p| p.to_string()),
        created_at: req.timestamp.unwrap_or_else(Utc::now),
    };

    sqlx::query(
        "INSERT INTO sensor_readings (id, sensor_id, room_id, temperature, humidity, vpd, source, payload, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&reading.id)
    .bind(&reading.sensor_id)
    .bind(&reading.room_id)
    .bind(reading.temperature)
    .bind(reading.humidity)
    .bind(reading.vpd)
    .bind(&reading.source)
    .bind(&reading.payload)
    .bind(reading.created_at)
    .execute(state.db.pool())
    .await?;

    let alerts = evaluator::evaluate_reading(state.db.pool(), &reading).await?;

    state.gateway.broadcast_reading(&reading);
    for alert in &alerts {
        state.gateway.broadcast_alert(alert);

        // Channel delivery must not block the ingesting client.
        let notifier = state.notifier.clone();
        let alert = alert.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_alert(&alert).await {
                tracing::error!(alert_id = %alert.id, "Notification routing failed: {}", e);
            }
        });
    }

    Ok(Json(IngestReadingResponse {
        id: reading.id,
        alerts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReadingQuery {
    pub sensor_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_readings(
    State(state): State<AppState>,
    Query(query): Query<ReadingQuery>,
) -> AppResult<Json<Vec<SensorReading>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let readings = match &query.sensor_id {
        Some(sensor_id) => {
            sqlx::query_as::<_, SensorReading>(
                "SELECT * FROM sensor_readings WHERE sensor_id = ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(sensor_id)
            .bind(limit)
            .fetch_all(state.db.pool())
            .await?
        }
        None => {
            sqlx::query_as::<_, SensorReading>(
                "SELECT * FROM sensor_readings ORDER BY created_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(state.db.pool())
            .await?
        }
    };

    Ok(Json(readings))
}
