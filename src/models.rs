use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Alert severity, ordered `info < warning < critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Threshold comparison operator. `eq`/`ne` are exact floating-point
/// comparisons with no tolerance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Gt,
    Lt,
    Eq,
    Ne,
}

impl Condition {
    pub fn check(&self, value: f64, bound: f64) -> bool {
        match self {
            Self::Gt => value > bound,
            Self::Lt => value < bound,
            Self::Eq => value == bound,
            Self::Ne => value != bound,
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            _ => Err(format!("unknown condition: {s}")),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, "gt"),
            Self::Lt => write!(f, "lt"),
            Self::Eq => write!(f, "eq"),
            Self::Ne => write!(f, "ne"),
        }
    }
}

/// Closed set of webhook event names. Unknown names are a validation error.
pub const WEBHOOK_EVENTS: &[&str] = &[
    "system_alert",
    "sensor_threshold",
    "plant_health",
    "automation_event",
    "harvest_ready",
    "system_failure",
    "analysis_complete",
    "user_action_required",
];

pub fn is_valid_webhook_event(event: &str) -> bool {
    WEBHOOK_EVENTS.contains(&event)
}

/// Notification channels addressable by name in API requests.
pub const CHANNEL_NAMES: &[&str] = &[
    "in_app", "push", "email", "sms", "webhook", "discord", "telegram",
];

pub fn is_valid_channel(channel: &str) -> bool {
    CHANNEL_NAMES.contains(&channel)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SensorReading {
    pub id: String,
    pub sensor_id: Option<String>,
    pub room_id: Option<String>,
    pub temperature: f64,
    pub humidity: f64,
    pub vpd: Option<f64>,
    pub source: Option<String>,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertThreshold {
    pub id: String,
    pub name: String,
    pub metric: String,
    pub condition: String,
    pub value: f64,
    pub severity: String,
    pub sensor_id: Option<String>,
    pub room_id: Option<String>,
    pub enabled: bool,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: String,
    pub sensor_id: Option<String>,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        sensor_id: Option<String>,
        alert_type: String,
        severity: Severity,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sensor_id,
            alert_type,
            severity: severity.to_string(),
            message,
            acknowledged: false,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::from_str(&self.severity).unwrap_or(Severity::Info)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationPreference {
    pub id: String,
    pub user_id: Option<String>,
    pub event_type: String,
    pub min_severity: String,
    pub in_app: bool,
    pub push: bool,
    pub email: bool,
    pub sms: bool,
    pub webhook: bool,
    pub discord: bool,
    pub telegram: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub throttle_rate: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    pub fn min_severity(&self) -> Severity {
        Severity::from_str(&self.min_severity).unwrap_or(Severity::Info)
    }

    /// Channel names enabled on this preference, in dispatch order.
    pub fn enabled_channels(&self) -> Vec<&'static str> {
        let flags = [
            ("in_app", self.in_app),
            ("push", self.push),
            ("email", self.email),
            ("sms", self.sms),
            ("webhook", self.webhook),
            ("discord", self.discord),
            ("telegram", self.telegram),
        ];
        flags
            .into_iter()
            .filter_map(|(name, on)| on.then_some(name))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: Option<String>,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookSubscription {
    pub id: String,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub events: String,
    pub retry_count: i64,
    pub timeout_secs: i64,
    pub enabled: bool,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_status: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn event_list(&self) -> Vec<String> {
        serde_json::from_str(&self.events).unwrap_or_default()
    }

    pub fn subscribes_to(&self, event: &str) -> bool {
        self.event_list().iter().any(|e| e == event)
    }
}

/// External view of a subscription. The secret is write-only: every
/// serialization path for consumers goes through this type.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookSubscriptionView {
    pub id: String,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub retry_count: i64,
    pub timeout_secs: i64,
    pub enabled: bool,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_status: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookSubscription> for WebhookSubscriptionView {
    fn from(sub: WebhookSubscription) -> Self {
        let events = sub.event_list();
        Self {
            id: sub.id,
            name: sub.name,
            url: sub.url,
            events,
            retry_count: sub.retry_count,
            timeout_secs: sub.timeout_secs,
            enabled: sub.enabled,
            success_count: sub.success_count,
            failure_count: sub.failure_count,
            last_status: sub.last_status,
            last_attempt_at: sub.last_attempt_at,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

// ---- Request / response types ----

#[derive(Debug, Deserialize)]
pub struct IngestReadingRequest {
    #[serde(rename = "sensorId")]
    pub sensor_id: Option<String>,
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub vpd: Option<f64>,
    pub source: Option<String>,
    /// Reading time reported by the bridge; server time when absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestReadingResponse {
    pub id: String,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
pub struct CreateThresholdRequest {
    pub name: Option<String>,
    pub metric: Option<String>,
    pub condition: Option<String>,
    pub value: Option<f64>,
    pub severity: Option<String>,
    pub sensor_id: Option<String>,
    pub room_id: Option<String>,
    pub enabled: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateThresholdRequest {
    pub name: Option<String>,
    pub metric: Option<String>,
    pub condition: Option<String>,
    pub value: Option<f64>,
    pub severity: Option<String>,
    pub sensor_id: Option<String>,
    pub room_id: Option<String>,
    pub enabled: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub sensor_id: Option<String>,
    pub alert_type: Option<String>,
    pub severity: Option<String>,
    pub acknowledged: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePreferenceRequest {
    pub user_id: Option<String>,
    pub event_type: Option<String>,
    pub min_severity: Option<String>,
    pub in_app: Option<bool>,
    pub push: Option<bool>,
    pub email: Option<bool>,
    pub sms: Option<bool>,
    pub webhook: Option<bool>,
    pub discord: Option<bool>,
    pub telegram: Option<bool>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub throttle_rate: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub severity: Option<String>,
    pub channels: Option<Vec<String>>,
    pub broadcast: Option<bool>,
    pub user_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub retry_count: Option<i64>,
    pub timeout_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub retry_count: Option<i64>,
    pub timeout_secs: Option<i64>,
    pub enabled: Option<bool>,
}
