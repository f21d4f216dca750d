use axum::{
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: String, code: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message,
            code: code.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Database(e) => {
                error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "database_error",
                        "A database error occurred".to_string(),
                        "DB_ERROR",
                    ),
                )
            }

            AppError::Validation { message } => {
                warn!("Validation error: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::new("validation_error", message.clone(), "VALIDATION_FAILED"),
                )
            }

            AppError::NotFound { resource } => {
                warn!("Resource not found: {}", resource);
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new(
                        "not_found",
                        format!("Resource not found: {}", resource),
                        "NOT_FOUND",
                    ),
                )
            }

            AppError::Conflict { message } => {
                warn!("Conflict: {}", message);
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::new("conflict", message.clone(), "CONFLICT"),
                )
            }

            AppError::RateLimited { retry_after_secs } => {
                warn!("Rate limit exceeded, retry after {}s", retry_after_secs);
                let body = ErrorResponse::new(
                    "rate_limit_exceeded",
                    "Too many requests. Please try again later".to_string(),
                    "RATE_LIMIT",
                );
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    Json(body),
                )
                    .into_response();
            }

            AppError::Internal { message } => {
                error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "internal_error",
                        "An internal error occurred".to_string(),
                        "INTERNAL_ERROR",
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// 404 handler for unmatched routes
pub async fn handle_404(uri: Uri) -> impl IntoResponse {
    let error_response = ErrorResponse::new(
        "not_found",
        format!("No route found for {}", uri.path()),
        "ROUTE_NOT_FOUND",
    );

    (StatusCode::NOT_FOUND, Json(error_response))
}

pub type AppResult<T> = Result<T, AppError>;

// Validation helpers
pub mod validation {
    use super::*;

    pub fn require<T>(value: Option<T>, field_name: &str) -> AppResult<T> {
        value.ok_or_else(|| AppError::validation(format!("{} is required", field_name)))
    }

    pub fn validate_non_empty(value: &str, field_name: &str) -> AppResult<()> {
        if value.trim().is_empty() {
            Err(AppError::validation(format!("{} cannot be empty", field_name)))
        } else {
            Ok(())
        }
    }

    /// Parses a `HH:MM` local-time string into minutes past midnight.
    pub fn parse_hhmm(value: &str, field_name: &str) -> AppResult<u32> {
        let invalid =
            || AppError::validation(format!("{} must be in HH:MM format", field_name));

        let (h, m) = value.split_once(':').ok_or_else(invalid)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hours: u32 = h.parse().map_err(|_| invalid())?;
        let minutes: u32 = m.parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }
        Ok(hours * 60 + minutes)
    }

    pub fn validate_severity(value: &str) -> AppResult<()> {
        value
            .parse::<crate::models::Severity>()
            .map(|_| ())
            .map_err(AppError::validation)
    }

    pub fn validate_condition(value: &str) -> AppResult<()> {
        value
            .parse::<crate::models::Condition>()
            .map(|_| ())
            .map_err(AppError::validation)
    }
}

// Middleware for request tracing
use axum::{extract::Request, middleware::Next};

pub async fn trace_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let trace_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        uri = %uri,
        "Request started"
    );

    let response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed();

    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhmm_parsing() {
        assert_eq!(validation::parse_hhmm("22:00", "start").unwrap(), 22 * 60);
        assert_eq!(validation::parse_hhmm("06:30", "end").unwrap(), 6 * 60 + 30);
        assert!(validation::parse_hhmm("24:00", "start").is_err());
        assert!(validation::parse_hhmm("9:00", "start").is_err());
        assert!(validation::parse_hhmm("09:5", "start").is_err());
        assert!(validation::parse_hhmm("nine", "start").is_err());
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(
            AppError::validation("bad").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("alert x").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::conflict("dup").into_response().status(),
            StatusCode::CONFLICT
        );
        let resp = AppError::RateLimited { retry_after_secs: 30 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "30");
    }
}
