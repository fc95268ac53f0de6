//! HTTP API server: webhook intake, poll trigger, health
//!
//! The server carries no business logic - handlers decode payloads, pick
//! the integration, and hand canonical events to the pipeline.

pub mod webhooks;

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::channels::{InstagramRelay, UpdateDedup};
use crate::db::{DbPool, IntegrationRepo};
use crate::pipeline::Pipeline;
use crate::{Result, poll};

/// Shared state for API handlers
pub struct ApiState {
    pub db: DbPool,
    pub integrations: IntegrationRepo,
    pub pipeline: Pipeline,
    pub relay: Option<InstagramRelay>,
    /// Webhook update-id dedup cache
    pub telegram_dedup: Mutex<UpdateDedup>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create the server
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Build the router with all routes
    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health))
            .route("/api/poll/instagram", get(poll_instagram))
            .with_state(self.state.clone())
            .nest("/api/webhooks", webhooks::router(self.state.clone()))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Trigger one Instagram sweep (external scheduler endpoint)
///
/// Store failures surface per integration inside the aggregate report; only
/// a failure to enumerate integrations fails the whole request.
async fn poll_instagram(
    State(state): State<Arc<ApiState>>,
) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    match poll::sweep(&state.integrations, state.relay.as_ref(), &state.pipeline).await {
        Ok(report) => (
            axum::http::StatusCode::OK,
            Json(serde_json::json!({"success": true, "outcomes": report.outcomes})),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Instagram sweep failed");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            )
        }
    }
}
