//! HTTP integration: middleware, 429 responses and the server front end.

mod middleware;
mod response;
mod server;

pub use middleware::{rate_limit, RateLimitState};
pub use response::{
    apply_quota_headers, too_many_requests, RateLimitExceeded, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::HttpServer;
