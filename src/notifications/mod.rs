pub mod channels;

use chrono::{Timelike, Utc};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;

use crate::error_handling::{AppError, AppResult};
use crate::models::{Alert, NotificationPreference, Severity};
use crate::rate_limit::RateLimiter;
use crate::webhooks::Dispatcher;
use channels::{Channel, InAppChannel, StubChannel};
pub use channels::ChannelPayload;

/// How long the router waits for a fan-out round before moving on. Slow
/// channels keep running in their own tasks; the alert is considered
/// processed either way.
const FANOUT_WAIT: Duration = Duration::from_secs(30);

/// Severity gate: a preference fires only at or above its minimum severity.
pub fn severity_gate(min_severity: Severity, alert_severity: Severity) -> bool {
    alert_severity >= min_severity
}

/// Event gate: `*` and `all` are wildcards, anything else is an exact match.
pub fn event_gate(preference_event: &str, alert_type: &str) -> bool {
    preference_event == "*" || preference_event == "all" || preference_event == alert_type
}

/// Quiet-hours gate. `start`/`end` are minutes past midnight; a window with
/// `end < start` wraps past midnight (22:00-06:00 covers 23:30 and 02:00
/// but not 12:00). Returns true when the notification should be suppressed.
pub fn quiet_hours_gate(start: Option<u32>, end: Option<u32>, now_minutes: u32) -> bool {
    let (Some(start), Some(end)) = (start, end) else {
        return false;
    };
    if start == end {
        return false;
    }
    if start < end {
        now_minutes >= start && now_minutes < end
    } else {
        now_minutes >= start || now_minutes < end
    }
}

fn hhmm_to_minutes(value: &str) -> Option<u32> {
    let (h, m) = value.split_once(':')?;
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

/// Matches active preferences to alerts and fans deliveries out across the
/// configured channels. One router instance is shared by the whole process;
/// its throttle counters are keyed by preference id.
pub struct Notifier {
    pool: Pool<Sqlite>,
    throttle: RateLimiter,
    throttle_window: Duration,
    webhooks: Arc<Dispatcher>,
}

impl Notifier {
    pub fn new(pool: Pool<Sqlite>, throttle_window: Duration) -> Self {
        let webhooks = Arc::new(Dispatcher::new(pool.clone()));
        Self {
            pool,
            throttle: RateLimiter::new(),
            throttle_window,
            webhooks,
        }
    }

    pub fn webhooks(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.webhooks)
    }

    /// Routes an alert through preference matching, quiet hours, and
    /// throttling, then dispatches every enabled channel of each surviving
    /// preference. Returns the channel names that were dispatched.
    pub async fn notify_alert(&self, alert: &Alert) -> AppResult<Vec<String>> {
        let preferences = sqlx::query_as::<_, NotificationPreference>(
            "SELECT * FROM notification_preferences",
        )
        .fetch_all(&self.pool)
        .await?;

        let alert_severity = alert.severity();
        let now = chrono::Local::now();
        let now_minutes = now.hour() * 60 + now.minute();

        let mut dispatched = Vec::new();

        for pref in &preferences {
            if !event_gate(&pref.event_type, &alert.alert_type) {
                continue;
            }
            if !severity_gate(pref.min_severity(), alert_severity) {
                continue;
            }

            let start = pref.quiet_hours_start.as_deref().and_then(hhmm_to_minutes);
            let end = pref.quiet_hours_end.as_deref().and_then(hhmm_to_minutes);
            if quiet_hours_gate(start, end, now_minutes) {
                tracing::debug!(preference = %pref.id, "Notification suppressed (quiet hours)");
                continue;
            }

            if pref.throttle_rate > 0 {
                let decision = self.throttle.check(
                    &pref.id,
                    pref.throttle_rate as u32,
                    self.throttle_window,
                );
                if !decision.is_allowed() {
                    tracing::debug!(preference = %pref.id, "Notification dropped (throttled)");
                    continue;
                }
            }

            let payload = ChannelPayload {
                event: alert.alert_type.clone(),
                title: format!("{} alert", alert.severity),
                message: alert.message.clone(),
                severity: alert.severity.clone(),
                user_id: pref.user_id.clone(),
                data: serde_json::json!({
                    "alert_id": alert.id,
                    "sensor_id": alert.sensor_id,
                    "severity": alert.severity,
                    "message": alert.message,
                }),
                timestamp: Utc::now(),
            };

            let mut sent = self
                .dispatch_channels(&pref.enabled_channels(), &payload)
                .await;
            dispatched.append(&mut sent);
        }

        Ok(dispatched)
    }

    /// Dispatches one payload to the named channels. The in-app write runs
    /// first and unconditionally so an audit record exists even if every
    /// external channel fails; external channels run concurrently and a
    /// failure in one never stops its siblings.
    pub async fn dispatch_channels(
        &self,
        channel_names: &[&str],
        payload: &ChannelPayload,
    ) -> Vec<String> {
        let mut dispatched = Vec::new();

        let in_app = InAppChannel::new(self.pool.clone());
        match in_app.send(payload).await {
            Ok(()) => dispatched.push("in_app".to_string()),
            Err(e) => tracing::error!("Failed to record in-app notification: {}", e),
        }

        let mut handles = Vec::new();
        for name in channel_names {
            // Resolve to the canonical static name so spawned tasks borrow
            // nothing from the caller.
            let Some(name) = crate::models::CHANNEL_NAMES
                .iter()
                .copied()
                .find(|known| known == name)
            else {
                tracing::warn!(channel = %name, "Unknown channel skipped");
                continue;
            };
            if name == "in_app" {
                continue;
            }

            let payload = payload.clone();
            let handle = match name {
                "webhook" => {
                    let webhooks = Arc::clone(&self.webhooks);
                    tokio::spawn(async move {
                        webhooks.dispatch_event(&payload.event, &payload.data).await;
                        name
                    })
                }
                _ => tokio::spawn(async move {
                    let channel = StubChannel::new(name);
                    if let Err(e) = channel.send(&payload).await {
                        tracing::error!(channel = name, "Channel delivery failed: {}", e);
                    }
                    name
                }),
            };
            handles.push(handle);
        }

        let joined = tokio::time::timeout(FANOUT_WAIT, futures::future::join_all(handles)).await;
        match joined {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(name) => dispatched.push(name.to_string()),
                        Err(e) => tracing::error!("Channel task panicked: {}", e),
                    }
                }
            }
            Err(_) => {
                tracing::warn!("Channel fan-out exceeded wait budget, continuing");
            }
        }

        dispatched
    }
}

/// Validates the channel names of a manual send request.
pub fn validate_channels(channels: &[String]) -> AppResult<()> {
    if channels.is_empty() {
        return Err(AppError::validation("channels must not be empty"));
    }
    for channel in channels {
        if !crate::models::is_valid_channel(channel) {
            return Err(AppError::validation(format!(
                "unrecognized channel: {}",
                channel
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use uuid::Uuid;

    #[test]
    fn severity_gate_respects_ordering() {
        assert!(severity_gate(Severity::Warning, Severity::Critical));
        assert!(severity_gate(Severity::Warning, Severity::Warning));
        assert!(!severity_gate(Severity::Warning, Severity::Info));
    }

    #[test]
    fn event_gate_wildcards_and_exact_match() {
        assert!(event_gate("*", "sensor_threshold"));
        assert!(event_gate("all", "sensor_threshold"));
        assert!(event_gate("sensor_threshold", "sensor_threshold"));
        assert!(!event_gate("plant_health", "sensor_threshold"));
    }

    #[test]
    fn quiet_hours_wrap_past_midnight() {
        let start = Some(22 * 60);
        let end = Some(6 * 60);

        assert!(quiet_hours_gate(start, end, 23 * 60 + 30));
        assert!(quiet_hours_gate(start, end, 2 * 60));
        assert!(!quiet_hours_gate(start, end, 12 * 60));
    }

    #[test]
    fn quiet_hours_plain_window_and_unset() {
        let start = Some(9 * 60);
        let end = Some(17 * 60);

        assert!(quiet_hours_gate(start, end, 12 * 60));
        assert!(!quiet_hours_gate(start, end, 18 * 60));
        assert!(!quiet_hours_gate(None, None, 12 * 60));
        assert!(!quiet_hours_gate(Some(60), None, 60));
    }

    #[test]
    fn channel_validation_rejects_unknown_names() {
        assert!(validate_channels(&["in_app".into(), "webhook".into()]).is_ok());
        assert!(validate_channels(&["carrier_pigeon".into()]).is_err());
        assert!(validate_channels(&[]).is_err());
    }

    async fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/test.db", dir.path().display());
        let db = Database::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        (db, dir)
    }

    async fn insert_preference(pool: &Pool<Sqlite>, throttle_rate: i64, min_severity: &str) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO notification_preferences
             (id, user_id, event_type, min_severity, in_app, push, email, sms, webhook,
              discord, telegram, quiet_hours_start, quiet_hours_end, throttle_rate,
              created_at, updated_at)
             VALUES (?, NULL, '*', ?, 1, 0, 0, 0, 0, 0, 0, NULL, NULL, ?, ?, ?)",
        )
        .bind(&id)
        .bind(min_severity)
        .bind(throttle_rate)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn notification_count(pool: &Pool<Sqlite>) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn throttle_admits_rate_then_drops_within_window() {
        let (db, _dir) = test_db().await;
        insert_preference(db.pool(), 2, "info").await;

        let notifier = Notifier::new(db.pool().clone(), Duration::from_secs(3600));
        let alert = Alert::new(None, "sensor_threshold".into(), Severity::Warning, "hot".into());

        for _ in 0..3 {
            notifier.notify_alert(&alert).await.unwrap();
        }

        // Two audit rows recorded, the third notification was throttled.
        assert_eq!(notification_count(db.pool()).await, 2);
    }

    #[tokio::test]
    async fn below_min_severity_is_not_routed() {
        let (db, _dir) = test_db().await;
        insert_preference(db.pool(), 0, "critical").await;

        let notifier = Notifier::new(db.pool().clone(), Duration::from_secs(60));
        let alert = Alert::new(None, "sensor_threshold".into(), Severity::Warning, "warm".into());
        let dispatched = notifier.notify_alert(&alert).await.unwrap();

        assert!(dispatched.is_empty());
        assert_eq!(notification_count(db.pool()).await, 0);
    }

    #[tokio::test]
    async fn dispatch_accepts_borrowed_channel_names() {
        let (db, _dir) = test_db().await;
        let notifier = Notifier::new(db.pool().clone(), Duration::from_secs(60));

        // Names owned by the caller, handed over as short-lived borrows.
        let requested: Vec<String> = vec!["push".into(), "email".into(), "fax".into()];
        let names: Vec<&str> = requested.iter().map(String::as_str).collect();

        let payload = ChannelPayload {
            event: "sensor_threshold".into(),
            title: "High temperature".into(),
            message: "tent-1 at 90F".into(),
            severity: "critical".into(),
            user_id: None,
            data: serde_json::json!({}),
            timestamp: Utc::now(),
        };

        let dispatched = notifier.dispatch_channels(&names, &payload).await;
        assert!(dispatched.contains(&"in_app".to_string()));
        assert!(dispatched.contains(&"push".to_string()));
        assert!(dispatched.contains(&"email".to_string()));
        assert!(!dispatched.contains(&"fax".to_string()));
    }

    #[tokio::test]
    async fn audit_row_is_recorded_for_surviving_preferences() {
        let (db, _dir) = test_db().await;
        insert_preference(db.pool(), 0, "info").await;

        let notifier = Notifier::new(db.pool().clone(), Duration::from_secs(60));
        let alert = Alert::new(
            Some("tent-1".into()),
            "sensor_threshold".into(),
            Severity::Critical,
            "way too hot".into(),
        );
        let dispatched = notifier.notify_alert(&alert).await.unwrap();

        assert_eq!(dispatched, vec!["in_app".to_string()]);
        assert_eq!(notification_count(db.pool()).await, 1);
    }
}
