pub mod alerts;
pub mod notify;
pub mod preferences;
pub mod sensors;
pub mod thresholds;
pub mod webhooks;

use axum::http::HeaderMap;

/// Rate-limit key for the calling client. Proxied deployments pass the real
/// client in `X-Forwarded-For`; direct local callers collapse to one key.
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_key_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "local");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_key(&headers), "203.0.113.9");
    }
}
