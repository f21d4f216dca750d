use axum::{
    extract::{Path, Query, State},
    response::Json,
};

use crate::alerts;
use crate::error_handling::AppResult;
use crate::models::{Alert, AlertQuery};
use crate::AppState;

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> AppResult<Json<Vec<Alert>>> {
    let alerts = alerts::query_alerts(state.db.pool(), &query).await?;
    Ok(Json(alerts))
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Alert>> {
    let alert = alerts::acknowledge_alert(state.db.pool(), &id).await?;
    Ok(Json(alert))
}
