//! HTTP server implementation.

use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit, RateLimitState};
use crate::error::{Result, ShopgateError};
use crate::identity::IdentityResolver;
use crate::ratelimit::RoutePolicy;

/// HTTP front end that meters every routed request.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Limiter and route selection
    policy: Arc<RoutePolicy>,
    /// Caller identity strategy
    resolver: Arc<dyn IdentityResolver>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        addr: SocketAddr,
        policy: Arc<RoutePolicy>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            addr,
            policy,
            resolver,
        }
    }

    /// Build the router.
    ///
    /// `/health` is registered after the rate-limit layer and is never metered.
    pub fn router(&self) -> Router {
        let state = RateLimitState::new(self.policy.clone(), self.resolver.clone());

        Router::new()
            .fallback(relay)
            .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
            .route("/health", get(health))
            .with_state(state)
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            routes = self.policy.routes().len(),
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            ShopgateError::Io(e)
        })
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Answer an admitted request with the upstream it would be relayed to.
async fn relay(State(state): State<RateLimitState>, method: Method, uri: Uri) -> Response {
    match state.policy.select(&method, uri.path()).route {
        Some(route) => Json(json!({
            "upstream": route.upstream(),
            "path": uri.path(),
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No upstream route for path" })),
        )
            .into_response(),
    }
}
