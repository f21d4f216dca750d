use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use serde_json::{json, Value};

use crate::error_handling::{AppError, AppResult};
use crate::models::{RegisterWebhookRequest, UpdateWebhookRequest, WebhookSubscriptionView};
use crate::rate_limit::Decision;
use crate::webhooks;
use crate::AppState;

use super::client_key;

/// Registration is rate-limited separately from ingest so a misbehaving
/// integration cannot fill the registry.
pub async fn register_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterWebhookRequest>,
) -> AppResult<Json<WebhookSubscriptionView>> {
    let key = client_key(&headers);
    let decision = state.rate_limiter.check(
        &format!("webhook_register:{key}"),
        state.config.webhook_register_limit,
        Duration::from_secs(state.config.webhook_register_window_secs),
    );
    if let Decision::Denied { retry_after } = decision {
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        });
    }

    let sub = webhooks::create_subscription(state.db.pool(), req).await?;
    Ok(Json(WebhookSubscriptionView::from(sub)))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<WebhookSubscriptionView>>> {
    let subs = webhooks::list_subscriptions(state.db.pool()).await?;
    Ok(Json(subs.into_iter().map(WebhookSubscriptionView::from).collect()))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<WebhookSubscriptionView>> {
    let sub = webhooks::get_subscription(state.db.pool(), &id).await?;
    Ok(Json(WebhookSubscriptionView::from(sub)))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateWebhookRequest>,
) -> AppResult<Json<WebhookSubscriptionView>> {
    let sub = webhooks::update_subscription(state.db.pool(), &id, req).await?;
    Ok(Json(WebhookSubscriptionView::from(sub)))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    webhooks::delete_subscription(state.db.pool(), &id).await?;
    Ok(Json(json!({ "success": true })))
}
