use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::json;
use switchyard_core::scheduler::OutboxConsumer;
use tower_http::trace::TraceLayer;

use crate::wiring::Services;

#[derive(Clone, Debug)]
pub struct AppState {
    pub consumer: OutboxConsumer,
    pub store_kind: &'static str,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(consumer: OutboxConsumer, store_kind: &'static str) -> Self {
        Self {
            consumer,
            store_kind,
            started_at: Utc::now(),
        }
    }

    pub fn from_services(services: &Services) -> Self {
        Self::new(services.consumer.clone(), services.store_kind)
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/outbox", get(outbox_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "stores": state.store_kind,
        "started_at": state.started_at,
        "timestamp": Utc::now(),
    }))
}

/// Consumer progress. Answers 503 while the most recent cycle has failed.
async fn outbox_health(State(state): State<AppState>) -> Response {
    let health = state.consumer.health().await;
    let status = if health.last_error.is_some() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(health)).into_response()
}
