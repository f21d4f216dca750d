use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use uuid::Uuid;

use crate::error_handling::{validation, AppError, AppResult};
use crate::models::{
    is_valid_webhook_event, RegisterWebhookRequest, UpdateWebhookRequest, WebhookSubscription,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Event-Type";
const DEFAULT_RETRY_COUNT: i64 = 3;
const DEFAULT_TIMEOUT_SECS: i64 = 5;

/// HMAC-SHA256 over the raw request body, hex encoded. Receivers recompute
/// this from the shared secret and compare.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}

fn validate_events(events: &[String]) -> AppResult<()> {
    if events.is_empty() {
        return Err(AppError::validation("events must not be empty"));
    }
    for event in events {
        if !is_valid_webhook_event(event) {
            return Err(AppError::validation(format!(
                "unknown webhook event: {}",
                event
            )));
        }
    }
    Ok(())
}

// ---- Registry ----

pub async fn create_subscription(
    pool: &Pool<Sqlite>,
    req: RegisterWebhookRequest,
) -> AppResult<WebhookSubscription> {
    let name = validation::require(req.name, "name")?;
    validation::validate_non_empty(&name, "name")?;
    let url = validation::require(req.url, "url")?;
    validation::validate_non_empty(&url, "url")?;
    let events = validation::require(req.events, "events")?;
    validate_events(&events)?;

    let sub = WebhookSubscription {
        id: Uuid::new_v4().to_string(),
        name,
        url,
        secret: req.secret.unwrap_or_else(generate_secret),
        events: serde_json::to_string(&events)
            .map_err(|e| AppError::internal(e.to_string()))?,
        retry_count: req.retry_count.unwrap_or(DEFAULT_RETRY_COUNT).clamp(1, 10),
        timeout_secs: req.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).clamp(1, 60),
        enabled: true,
        success_count: 0,
        failure_count: 0,
        last_status: None,
        last_attempt_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO webhook_subscriptions
         (id, name, url, secret, events, retry_count, timeout_secs, enabled,
          success_count, failure_count, last_status, last_attempt_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, NULL, NULL, ?, ?)",
    )
    .bind(&sub.id)
    .bind(&sub.name)
    .bind(&sub.url)
    .bind(&sub.secret)
    .bind(&sub.events)
    .bind(sub.retry_count)
    .bind(sub.timeout_secs)
    .bind(sub.enabled)
    .bind(sub.created_at)
    .bind(sub.updated_at)
    .execute(pool)
    .await?;

    Ok(sub)
}

pub async fn get_subscription(pool: &Pool<Sqlite>, id: &str) -> AppResult<WebhookSubscription> {
    sqlx::query_as::<_, WebhookSubscription>("SELECT * FROM webhook_subscriptions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("webhook subscription {}", id)))
}

pub async fn list_subscriptions(pool: &Pool<Sqlite>) -> AppResult<Vec<WebhookSubscription>> {
    let subs = sqlx::query_as::<_, WebhookSubscription>(
        "SELECT * FROM webhook_subscriptions ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(subs)
}

pub async fn update_subscription(
    pool: &Pool<Sqlite>,
    id: &str,
    req: UpdateWebhookRequest,
) -> AppResult<WebhookSubscription> {
    let mut sub = get_subscription(pool, id).await?;

    if let Some(name) = req.name {
        validation::validate_non_empty(&name, "name")?;
        sub.name = name;
    }
    if let Some(url) = req.url {
        validation::validate_non_empty(&url, "url")?;
        sub.url = url;
    }
    if let Some(secret) = req.secret {
        sub.secret = secret;
    }
    if let Some(events) = req.events {
        validate_events(&events)?;
        sub.events =
            serde_json::to_string(&events).map_err(|e| AppError::internal(e.to_string()))?;
    }
    if let Some(retry_count) = req.retry_count {
        sub.retry_count = retry_count.clamp(1, 10);
    }
    if let Some(timeout_secs) = req.timeout_secs {
        sub.timeout_secs = timeout_secs.clamp(1, 60);
    }
    if let Some(enabled) = req.enabled {
        sub.enabled = enabled;
    }
    sub.updated_at = Utc::now();

    sqlx::query(
        "UPDATE webhook_subscriptions
         SET name = ?, url = ?, secret = ?, events = ?, retry_count = ?,
             timeout_secs = ?, enabled = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&sub.name)
    .bind(&sub.url)
    .bind(&sub.secret)
    .bind(&sub.events)
    .bind(sub.retry_count)
    .bind(sub.timeout_secs)
    .bind(sub.enabled)
    .bind(sub.updated_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(sub)
}

pub async fn delete_subscription(pool: &Pool<Sqlite>, id: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("webhook subscription {}", id)));
    }
    Ok(())
}

// ---- Delivery ----

/// Delivers signed event payloads to matching subscriptions. Delivery is
/// fire-and-forget: retries live only in the dispatching task, so in-flight
/// retries are lost if the process restarts.
pub struct Dispatcher {
    pool: Pool<Sqlite>,
    client: reqwest::Client,
}

#[derive(Debug)]
struct DeliveryOutcome {
    success: bool,
    attempts: u32,
    last_status: String,
}

impl Dispatcher {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
        }
    }

    /// Posts `event` to every enabled subscription that subscribes to it.
    /// Returns the number of successful deliveries.
    pub async fn dispatch_event(&self, event: &str, data: &serde_json::Value) -> usize {
        let subs = match sqlx::query_as::<_, WebhookSubscription>(
            "SELECT * FROM webhook_subscriptions WHERE enabled = 1",
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!("Failed to load webhook subscriptions: {}", e);
                return 0;
            }
        };

        let matching: Vec<_> = subs.into_iter().filter(|s| s.subscribes_to(event)).collect();
        if matching.is_empty() {
            return 0;
        }

        let deliveries = matching
            .iter()
            .map(|sub| self.deliver_to_subscription(sub, event, data));
        let outcomes = futures::future::join_all(deliveries).await;
        outcomes.iter().filter(|ok| **ok).count()
    }

    /// Attempts delivery up to the subscription's retry count, then records
    /// the terminal outcome in its rolling statistics. Never propagates an
    /// error: a failed delivery must not affect the triggering alert.
    async fn deliver_to_subscription(
        &self,
        sub: &WebhookSubscription,
        event: &str,
        data: &serde_json::Value,
    ) -> bool {
        let body = serde_json::json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string();
        let signature = sign_payload(&sub.secret, &body);

        let outcome = self.attempt_loop(sub, event, &body, &signature).await;

        if outcome.success {
            tracing::debug!(
                subscription = %sub.name,
                attempts = outcome.attempts,
                "Webhook delivered"
            );
        } else {
            tracing::warn!(
                subscription = %sub.name,
                attempts = outcome.attempts,
                last_status = %outcome.last_status,
                "Webhook delivery failed after final attempt"
            );
        }

        // Relative increments keep concurrent stat updates consistent.
        if let Err(e) = sqlx::query(
            "UPDATE webhook_subscriptions
             SET success_count = success_count + ?,
                 failure_count = failure_count + ?,
                 last_status = ?, last_attempt_at = ?
             WHERE id = ?",
        )
        .bind(if outcome.success { 1 } else { 0 })
        .bind(if outcome.success { 0 } else { 1 })
        .bind(&outcome.last_status)
        .bind(Utc::now())
        .bind(&sub.id)
        .execute(&self.pool)
        .await
        {
            tracing::error!("Failed to update webhook stats for {}: {}", sub.id, e);
        }

        outcome.success
    }

    async fn attempt_loop(
        &self,
        sub: &WebhookSubscription,
        event: &str,
        body: &str,
        signature: &str,
    ) -> DeliveryOutcome {
        let max_attempts = sub.retry_count.clamp(1, 10) as u32;
        let timeout = Duration::from_secs(sub.timeout_secs.clamp(1, 60) as u64);
        let mut last_status = String::new();

        for attempt in 1..=max_attempts {
            let result = self
                .client
                .post(&sub.url)
                .header("Content-Type", "application/json")
                .header(SIGNATURE_HEADER, signature)
                .header(EVENT_HEADER, event)
                .timeout(timeout)
                .body(body.to_string())
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return DeliveryOutcome {
                        success: true,
                        attempts: attempt,
                        last_status: resp.status().as_u16().to_string(),
                    };
                }
                Ok(resp) => {
                    last_status = resp.status().as_u16().to_string();
                }
                Err(e) => {
                    last_status = format!("transport error: {}", e);
                }
            }
        }

        DeliveryOutcome {
            success: false,
            attempts: max_attempts,
            last_status,
        }
    }
}
