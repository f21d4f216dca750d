use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error_handling::{validation, AppError, AppResult};
use crate::models::{AlertThreshold, CreateThresholdRequest, UpdateThresholdRequest};
use crate::AppState;

/// The name pre-check races with concurrent writers; the UNIQUE constraint
/// is the authority, so constraint hits surface as conflicts, not 500s.
fn unique_name_conflict(e: sqlx::Error, name: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::conflict(format!("threshold name already exists: {}", name))
        }
        _ => AppError::Database(e),
    }
}

async fn name_taken(state: &AppState, name: &str, exclude_id: Option<&str>) -> AppResult<bool> {
    let existing = sqlx::query_scalar::<_, String>(
        "SELECT id FROM alert_thresholds WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(state.db.pool())
    .await?;

    Ok(match (existing, exclude_id) {
        (Some(id), Some(exclude)) => id != exclude,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

pub async fn create_threshold(
    State(state): State<AppState>,
    Json(req): Json<CreateThresholdRequest>,
) -> AppResult<Json<AlertThreshold>> {
    let name = validation::require(req.name, "name")?;
    validation::validate_non_empty(&name, "name")?;
    let metric = validation::require(req.metric, "metric")?;
    validation::validate_non_empty(&metric, "metric")?;
    let condition = validation::require(req.condition, "condition")?;
    validation::validate_condition(&condition)?;
    let value = validation::require(req.value, "value")?;
    let severity = validation::require(req.severity, "severity")?;
    validation::validate_severity(&severity)?;

    if name_taken(&state, &name, None).await? {
        return Err(AppError::conflict(format!(
            "threshold name already exists: {}",
            name
        )));
    }

    let now = Utc::now();
    let threshold = AlertThreshold {
        id: Uuid::new_v4().to_string(),
        name,
        metric,
        condition,
        value,
        severity,
        sensor_id: req.sensor_id,
        room_id: req.room_id,
        enabled: req.enabled.unwrap_or(true),
        metadata: req.metadata.map(|m| m.to_string()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO alert_thresholds
         (id, name, metric, condition, value, severity, sensor_id, room_id, enabled, metadata, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&threshold.id)
    .bind(&threshold.name)
    .bind(&threshold.metric)
    .bind(&threshold.condition)
    .bind(threshold.value)
    .bind(&threshold.severity)
    .bind(&threshold.sensor_id)
    .bind(&threshold.room_id)
    .bind(threshold.enabled)
    .bind(&threshold.metadata)
    .bind(threshold.created_at)
    .bind(threshold.updated_at)
    .execute(state.db.pool())
    .await
    .map_err(|e| unique_name_conflict(e, &threshold.name))?;

    tracing::info!(name = %threshold.name, metric = %threshold.metric, "Created alert threshold");
    Ok(Json(threshold))
}

pub async fn list_thresholds(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<AlertThreshold>>> {
    let thresholds = sqlx::query_as::<_, AlertThreshold>(
        "SELECT * FROM alert_thresholds ORDER BY created_at DESC",
    )
    .fetch_all(state.db.pool())
    .await?;

    Ok(Json(thresholds))
}

pub async fn update_threshold(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateThresholdRequest>,
) -> AppResult<Json<AlertThreshold>> {
    let mut threshold = sqlx::query_as::<_, AlertThreshold>(
        "SELECT * FROM alert_thresholds WHERE id = ?",
    )
    .bind(&id)
    .fetch_optional(state.db.pool())
    .await?
    .ok_or_else(|| AppError::not_found(format!("threshold {}", id)))?;

    if let Some(name) = req.name {
        validation::validate_non_empty(&name, "name")?;
        if name_taken(&state, &name, Some(&id)).await? {
            return Err(AppError::conflict(format!(
                "threshold name already exists: {}",
                name
            )));
        }
        threshold.name = name;
    }
    if let Some(metric) = req.metric {
        validation::validate_non_empty(&metric, "metric")?;
        threshold.metric = metric;
    }
    if let Some(condition) = req.condition {
        validation::validate_condition(&condition)?;
        threshold.condition = condition;
    }
    if let Some(value) = req.value {
        threshold.value = value;
    }
    if let Some(severity) = req.severity {
        validation::validate_severity(&severity)?;
        threshold.severity = severity;
    }
    if req.sensor_id.is_some() {
        threshold.sensor_id = req.sensor_id;
    }
    if req.room_id.is_some() {
        threshold.room_id = req.room_id;
    }
    if let Some(enabled) = req.enabled {
        threshold.enabled = enabled;
    }
    if let Some(metadata) = req.metadata {
        threshold.metadata = Some(metadata.to_string());
    }
    threshold.updated_at = Utc::now();

    sqlx::query(
        "UPDATE alert_thresholds
         SET name = ?, metric = ?, condition = ?, value = ?, severity = ?,
             sensor_id = ?, room_id = ?, enabled = ?, metadata = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&threshold.name)
    .bind(&threshold.metric)
    .bind(&threshold.condition)
    .bind(threshold.value)
    .bind(&threshold.severity)
    .bind(&threshold.sensor_id)
    .bind(&threshold.room_id)
    .bind(threshold.enabled)
    .bind(&threshold.metadata)
    .bind(threshold.updated_at)
    .bind(&id)
    .execute(state.db.pool())
    .await
    .map_err(|e| unique_name_conflict(e, &threshold.name))?;

    Ok(Json(threshold))
}

pub async fn delete_threshold(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let result = sqlx::query("DELETE FROM alert_thresholds WHERE id = ?")
        .bind(&id)
        .execute(state.db.pool())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("threshold {}", id)));
    }

    tracing::info!(id = %id, "Deleted alert threshold");
    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    async fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/test.db", dir.path().display());
        let db = Database::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        (db, dir)
    }

    async fn insert_named(db: &Database, id: &str, name: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO alert_thresholds
             (id, name, metric, condition, value, severity, enabled, created_at, updated_at)
             VALUES (?, ?, 'temperature', 'gt', 85.0, 'warning', 1, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .map(|_| ())
    }

    #[tokio::test]
    async fn unique_violation_on_insert_maps_to_conflict() {
        let (db, _dir) = test_db().await;
        insert_named(&db, "a", "temp-high").await.unwrap();

        // Second writer with the same name loses to the UNIQUE constraint.
        let err = insert_named(&db, "b", "temp-high").await.unwrap_err();
        let mapped = unique_name_conflict(err, "temp-high");
        assert!(matches!(mapped, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn other_database_errors_pass_through() {
        let (db, _dir) = test_db().await;
        let err = sqlx::query("INSERT INTO no_such_table (id) VALUES (1)")
            .execute(db.pool())
            .await
            .unwrap_err();
        let mapped = unique_name_conflict(err, "temp-high");
        assert!(matches!(mapped, AppError::Database(_)));
    }
}
