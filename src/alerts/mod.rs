pub mod evaluator;

use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Sqlite};

use crate::error_handling::{AppError, AppResult};
use crate::models::{Alert, AlertQuery};

/// Persists a new alert. Creation is append-only; identical alerts are not
/// deduplicated here — suppression of repeat notifications is the router's
/// throttling concern.
pub async fn create_alert(pool: &Pool<Sqlite>, alert: &Alert) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO alerts (id, sensor_id, alert_type, severity, message, acknowledged, acknowledged_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&alert.id)
    .bind(&alert.sensor_id)
    .bind(&alert.alert_type)
    .bind(&alert.severity)
    .bind(&alert.message)
    .bind(alert.acknowledged)
    .bind(alert.acknowledged_at)
    .bind(alert.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Marks an alert acknowledged. Acknowledging an already-acknowledged alert
/// is a no-op that returns the row with its original `acknowledged_at`.
pub async fn acknowledge_alert(pool: &Pool<Sqlite>, id: &str) -> AppResult<Alert> {
    let alert = sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("alert {}", id)))?;

    if alert.acknowledged {
        return Ok(alert);
    }

    let acknowledged_at = Utc::now();
    sqlx::query("UPDATE alerts SET acknowledged = 1, acknowledged_at = ? WHERE id = ?")
        .bind(acknowledged_at)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(Alert {
        acknowledged: true,
        acknowledged_at: Some(acknowledged_at),
        ..alert
    })
}

pub async fn query_alerts(pool: &Pool<Sqlite>, filters: &AlertQuery) -> AppResult<Vec<Alert>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM alerts WHERE 1=1");

    if let Some(sensor_id) = &filters.sensor_id {
        builder.push(" AND sensor_id = ").push_bind(sensor_id);
    }
    if let Some(alert_type) = &filters.alert_type {
        builder.push(" AND alert_type = ").push_bind(alert_type);
    }
    if let Some(severity) = &filters.severity {
        builder.push(" AND severity = ").push_bind(severity);
    }
    if let Some(acknowledged) = filters.acknowledged {
        builder.push(" AND acknowledged = ").push_bind(acknowledged);
    }

    let limit = filters.limit.unwrap_or(100).clamp(1, 1000);
    builder.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit);

    let alerts = builder.build_query_as::<Alert>().fetch_all(pool).await?;
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::Severity;

    async fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/test.db", dir.path().display());
        let db = Database::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let (db, _dir) = test_db().await;
        let alert = Alert::new(None, "sensor_threshold".into(), Severity::Warning, "hot".into());
        create_alert(db.pool(), &alert).await.unwrap();

        let first = acknowledge_alert(db.pool(), &alert.id).await.unwrap();
        assert!(first.acknowledged);
        let first_ack_at = first.acknowledged_at.unwrap();

        let second = acknowledge_alert(db.pool(), &alert.id).await.unwrap();
        assert!(second.acknowledged);
        assert_eq!(second.acknowledged_at.unwrap(), first_ack_at);
    }

    #[tokio::test]
    async fn acknowledge_unknown_is_not_found() {
        let (db, _dir) = test_db().await;
        let err = acknowledge_alert(db.pool(), "missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn query_filters_by_severity_and_ack() {
        let (db, _dir) = test_db().await;
        let a = Alert::new(None, "sensor_threshold".into(), Severity::Critical, "a".into());
        let b = Alert::new(None, "sensor_threshold".into(), Severity::Info, "b".into());
        create_alert(db.pool(), &a).await.unwrap();
        create_alert(db.pool(), &b).await.unwrap();
        acknowledge_alert(db.pool(), &b.id).await.unwrap();

        let criticals = query_alerts(
            db.pool(),
            &AlertQuery {
                sensor_id: None,
                alert_type: None,
                severity: Some("critical".into()),
                acknowledged: None,
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(criticals.len(), 1);
        assert_eq!(criticals[0].id, a.id);

        let unacked = query_alerts(
            db.pool(),
            &AlertQuery {
                sensor_id: None,
                alert_type: None,
                severity: None,
                acknowledged: Some(false),
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(unacked.len(), 1);
        assert_eq!(unacked[0].id, a.id);
    }
}
