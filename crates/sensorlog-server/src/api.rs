//! Recent-events API handlers.
//!
//! Provides `GET /latest` and its alias `GET /messages`.

use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sensorlog_events::{parse_limit, Event};
use std::sync::Arc;

/// Picks the `limit` parameter out of the raw query pairs.
///
/// Pairs are taken as text so that malformed parameters fall back to the
/// default limit instead of rejecting the request. A repeated `limit` is
/// ambiguous and is treated as absent.
fn requested_limit(params: &[(String, String)]) -> Option<&str> {
    let mut limits = params.iter().filter(|(key, _)| key == "limit");
    match (limits.next(), limits.next()) {
        (Some((_, value)), None) => Some(value.as_str()),
        _ => None,
    }
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": "event store unavailable" })),
    )
        .into_response()
}

/// Handler for `GET /latest` and `GET /messages`.
///
/// Returns the most recent events, newest first, as a JSON array of
/// `{topic, payload, received_at}`. Store failures become `503` without
/// internal details.
pub async fn recent_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Event>>, Response> {
    let limit = parse_limit(requested_limit(&params));
    let query = state.query.clone();

    let events = tokio::task::spawn_blocking(move || query.recent(limit))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "recent events task failed");
            unavailable()
        })?
        .map_err(|e| {
            tracing::warn!(error = ?e, "recent events query failed");
            unavailable()
        })?;

    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn repeated_limit_is_treated_as_absent() {
        let params = pairs(&[("limit", "2"), ("limit", "3")]);
        assert_eq!(requested_limit(&params), None);
    }

    #[test]
    fn other_parameters_are_ignored() {
        let params = pairs(&[("topic", "x"), ("limit", "7")]);
        assert_eq!(requested_limit(&params), Some("7"));
        assert_eq!(requested_limit(&pairs(&[("topic", "x")])), None);
    }
}
