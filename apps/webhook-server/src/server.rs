//! HTTP Server implementation

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use webhook_core::model::SearchFilter;
use webhook_delivery::intake;
use webhook_delivery::search;

use crate::app::AppState;
use crate::cli::Args;

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Result<Self> {
        Ok(Self { args, state })
    }

    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.args.port));

        let app = self.build_http_router();

        info!("HTTP server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind HTTP server")?;

        axum::serve(listener, app.into_make_service())
            .await
            .context("HTTP server error")?;

        Ok(())
    }

    fn build_http_router(&self) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics))
            .route("/webhooks/ingest", post(ingest))
            .route("/webhooks/search", post(search_events))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Webhook Delivery",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check().await;
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[derive(Serialize)]
struct IngestResponse {
    results: Vec<intake::IntakeResult>,
}

async fn ingest(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> impl IntoResponse {
    let signature_header = match headers.get("X-Signature").and_then(|v| v.to_str().ok()) {
        Some(sig) => sig.to_string(),
        None => return (StatusCode::UNAUTHORIZED, Json(json!({"error": "missing X-Signature"}))).into_response(),
    };

    let new_events = match intake::parse_batch(&state.config.hmac_secret, &body, &signature_header) {
        Ok(events) => events,
        Err(webhook_delivery::DeliveryError::InvalidSignature) => {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid signature"}))).into_response();
        }
        Err(webhook_delivery::DeliveryError::BadRequest) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "malformed request body"}))).into_response();
        }
        Err(e) => {
            warn!(error = %e, "intake failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal error"}))).into_response();
        }
    };

    let mut results = Vec::with_capacity(new_events.len());
    for new_event in new_events {
        state.metrics.events_received_total.inc();
        match state.store.insert(new_event).await {
            Ok(webhook_core::model::InsertOutcome::Inserted(event)) => {
                if let Err(e) = state.queue.enqueue(&event.id, event.received_at).await {
                    warn!(error = %e, event_id = %event.id, "failed to enqueue freshly inserted event");
                }
                results.push(intake::IntakeResult {
                    id: event.id,
                    duplicate: false,
                });
            }
            Ok(webhook_core::model::InsertOutcome::Duplicate { existing_id }) => {
                results.push(intake::IntakeResult {
                    id: existing_id,
                    duplicate: true,
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to insert event");
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal error"}))).into_response();
            }
        }
    }

    (StatusCode::ACCEPTED, Json(IngestResponse { results })).into_response()
}

async fn search_events(State(state): State<AppState>, Json(filter): Json<SearchFilter>) -> impl IntoResponse {
    match search::search(&state.store, filter).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            warn!(error = %e, "search failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal error"}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "Webhook Delivery");
    }

    #[tokio::test]
    async fn test_health_check_handler() {
        let status = health_check().await;
        assert_eq!(status, StatusCode::OK);
    }
}
