//! Axum middleware that puts a limiter in front of every request.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::{info, instrument};

use super::response::{apply_quota_headers, too_many_requests};
use crate::identity::{ChainResolver, IdentityKey, IdentityResolver};
use crate::ratelimit::{AdmissionControl, Decision, RoutePolicy};

/// Shared state for [`rate_limit`].
#[derive(Clone)]
pub struct RateLimitState {
    pub policy: Arc<RoutePolicy>,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl RateLimitState {
    pub fn new(policy: Arc<RoutePolicy>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { policy, resolver }
    }

    /// State using the default principal, forwarded-for, peer resolver chain.
    pub fn with_default_resolver(policy: Arc<RoutePolicy>) -> Self {
        Self::new(policy, Arc::new(ChainResolver::default()))
    }
}

/// Resolve the caller, consult the selected limiter, and either continue with
/// rate-limit headers attached or answer 429 without running the handler.
#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = state
        .resolver
        .resolve(request.headers(), request.extensions());

    let selection = state.policy.select(request.method(), request.uri().path());
    let decision = selection
        .limiter
        .limiter()
        .admit_now(identity.as_ref().map(IdentityKey::as_str));

    match decision {
        Decision::Allow(quota) => {
            let mut response = next.run(request).await;
            if let Some(quota) = quota {
                apply_quota_headers(response.headers_mut(), &quota);
            }
            response
        }
        Decision::Reject {
            quota,
            retry_after_secs,
        } => {
            info!(
                identity = %identity.as_ref().map(IdentityKey::as_str).unwrap_or("-"),
                limiter = %selection.limiter.name(),
                retry_after_secs = retry_after_secs,
                "Request rejected by rate limiter"
            );
            too_many_requests(&quota, retry_after_secs)
        }
    }
}
