//! Rate-limit headers and the 429 response.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ratelimit::Quota;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Carries the window end as an RFC 3339 UTC timestamp.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceeded {
    pub error: String,
    pub retry_after: u64,
    pub message: String,
}

impl RateLimitExceeded {
    pub fn new(limit: u32, retry_after_secs: u64) -> Self {
        Self {
            error: "Too many requests. Please try again later.".to_string(),
            retry_after: retry_after_secs,
            message: format!(
                "Rate limit exceeded. Maximum {} requests per {} seconds.",
                limit, retry_after_secs
            ),
        }
    }
}

/// Attach `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`.
pub fn apply_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    if let Ok(reset) = HeaderValue::from_str(&quota.reset_at_rfc3339()) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}

/// Terminal 429 response for a rejected request.
pub fn too_many_requests(quota: &Quota, retry_after_secs: u64) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    apply_quota_headers(&mut headers, quota);

    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        Json(RateLimitExceeded::new(quota.limit, retry_after_secs)),
    )
        .into_response()
}
