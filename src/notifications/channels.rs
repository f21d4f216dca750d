use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

/// Payload handed to every channel. Channels must accept this shape and
/// must not panic; transport failures come back as errors.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelPayload {
    pub event: String,
    pub title: String,
    pub message: String,
    pub severity: String,
    pub user_id: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, payload: &ChannelPayload) -> anyhow::Result<()>;
}

/// In-app delivery: a synchronous write of a notification record. This is
/// also the audit trail, so the router invokes it even when every external
/// channel fails.
pub struct InAppChannel {
    pool: Pool<Sqlite>,
}

impl InAppChannel {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Channel for InAppChannel {
    fn name(&self) -> &'static str {
        "in_app"
    }

    async fn send(&self, payload: &ChannelPayload) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, notification_type, title, message, metadata, read, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&payload.user_id)
        .bind(&payload.event)
        .bind(&payload.title)
        .bind(&payload.message)
        .bind(payload.data.to_string())
        .bind(payload.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Placeholder transport for channels without a wired provider (push, email,
/// SMS, and the chat-platform integrations). Logs the delivery and succeeds
/// so callers see the same contract a real transport would offer.
pub struct StubChannel {
    kind: &'static str,
}

impl StubChannel {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Channel for StubChannel {
    fn name(&self) -> &'static str {
        self.kind
    }

    async fn send(&self, payload: &ChannelPayload) -> anyhow::Result<()> {
        tracing::info!(
            channel = self.kind,
            event = %payload.event,
            severity = %payload.severity,
            "Channel transport not configured, delivery skipped"
        );
        Ok(())
    }
}
