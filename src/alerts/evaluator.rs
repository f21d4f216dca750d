use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::error_handling::AppResult;
use crate::models::{Alert, AlertThreshold, Condition, SensorReading, Severity};

/// Metrics a reading exposes to threshold evaluation.
fn reading_metrics(reading: &SensorReading) -> Vec<(&'static str, f64)> {
    let mut metrics = vec![
        ("temperature", reading.temperature),
        ("humidity", reading.humidity),
    ];
    if let Some(vpd) = reading.vpd {
        metrics.push(("vpd", vpd));
    }
    metrics
}

fn scope_matches(rule: &AlertThreshold, reading: &SensorReading) -> bool {
    let sensor_ok = match &rule.sensor_id {
        Some(rule_sensor) => reading.sensor_id.as_deref() == Some(rule_sensor.as_str()),
        None => true,
    };
    let room_ok = match &rule.room_id {
        Some(rule_room) => reading.room_id.as_deref() == Some(rule_room.as_str()),
        None => true,
    };
    sensor_ok && room_ok
}

/// Returns every enabled threshold the value satisfies. Rules fire
/// independently; a single value can trigger zero, one, or many.
pub fn triggered_rules<'a>(
    rules: &'a [AlertThreshold],
    metric: &str,
    value: f64,
    reading: &SensorReading,
) -> Vec<&'a AlertThreshold> {
    rules
        .iter()
        .filter(|rule| rule.enabled && rule.metric == metric && scope_matches(rule, reading))
        .filter(|rule| {
            Condition::from_str(&rule.condition)
                .map(|cond| cond.check(value, rule.value))
                .unwrap_or(false)
        })
        .collect()
}

/// Evaluates a reading against the current enabled threshold set and creates
/// an alert per triggered rule. Rules are loaded at evaluation time so
/// disabled or stale rules never fire.
pub async fn evaluate_reading(
    pool: &Pool<Sqlite>,
    reading: &SensorReading,
) -> AppResult<Vec<Alert>> {
    let rules = sqlx::query_as::<_, AlertThreshold>(
        "SELECT * FROM alert_thresholds WHERE enabled = 1",
    )
    .fetch_all(pool)
    .await?;

    let mut alerts = Vec::new();
    for (metric, value) in reading_metrics(reading) {
        for rule in triggered_rules(&rules, metric, value, reading) {
            let severity = Severity::from_str(&rule.severity).unwrap_or(Severity::Warning);
            let alert = Alert::new(
                reading.sensor_id.clone(),
                "sensor_threshold".to_string(),
                severity,
                format!(
                    "{}: {} {} {} (value {})",
                    rule.name, metric, rule.condition, rule.value, value
                ),
            );
            super::create_alert(pool, &alert).await?;
            tracing::info!(
                rule = %rule.name,
                metric,
                value,
                severity = %alert.severity,
                "Threshold triggered"
            );
            alerts.push(alert);
        }
    }

    Ok(alerts)
}
