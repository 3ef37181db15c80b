//! sensorlog server library logic.

pub mod api;
pub mod config;

use axum::{routing::get, Extension, Json, Router};
use chrono::Utc;
use sensorlog_events::{format_timestamp, QueryService};
use sensorlog_mqtt::BrokerStatus;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Read path over the event store.
    pub query: QueryService,
    /// Live view of the broker connection.
    pub broker_status: watch::Receiver<BrokerStatus>,
}

/// Health check handler.
///
/// Always `200 OK`; reports server time and the broker connection state
/// without touching the store.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let broker = state.broker_status.borrow().clone();
    Json(json!({
        "status": "ok",
        "time": format_timestamp(Utc::now()),
        "version": env!("CARGO_PKG_VERSION"),
        "broker": broker,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/latest", get(api::recent_events_handler))
        .route("/messages", get(api::recent_events_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
