//! HTTP request handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};

use super::app::AppState;
use super::types::RouteRequestBody;
use crate::error::Error;
use crate::router::REQUEST_ID_KEY;

/// Response header: correlation ID (UUID v4 unless the caller supplied one).
pub const CONCORD_REQUEST_ID_HEADER: &str = "x-concord-request-id";
/// Response header: wall-clock latency in milliseconds (integer).
pub const CONCORD_LATENCY_MS_HEADER: &str = "x-concord-latency-ms";

/// Attach concord metadata headers to a response.
///
/// Caller-supplied request ids that aren't valid header values are skipped.
fn attach_concord_headers(response: &mut Response, request_id: &str, latency_ms: u64) {
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static(CONCORD_REQUEST_ID_HEADER), value);
    }
    headers.insert(
        HeaderName::from_static(CONCORD_LATENCY_MS_HEADER),
        HeaderValue::from(latency_ms),
    );
}

/// Handle POST /v1/route
///
/// Bodies that fail to parse get the same JSON error shape as any other
/// invalid request.
pub async fn route(
    State(state): State<AppState>,
    payload: Result<Json<RouteRequestBody>, JsonRejection>,
) -> Response {
    let start = std::time::Instant::now();

    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let request_id = uuid::Uuid::new_v4().to_string();
            tracing::warn!(
                request_id = %request_id,
                error = %rejection.body_text(),
                "rejected malformed route request"
            );
            let mut response = Error::InvalidRequest(rejection.body_text()).into_response();
            attach_concord_headers(
                &mut response,
                &request_id,
                start.elapsed().as_millis() as u64,
            );
            return response;
        }
    };

    let request_id = body
        .metadata
        .get(REQUEST_ID_KEY)
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let outcome = match body.into_request(&state.defaults) {
        Ok(request) => {
            tracing::info!(
                request_id = %request_id,
                strategy = %request.consensus_strategy,
                explicit = request.explicit_models.is_some(),
                "received route request"
            );
            state
                .router
                .route(request.with_metadata(REQUEST_ID_KEY, request_id.clone()))
                .await
        }
        Err(e) => Err(e),
    };

    let latency_ms = start.elapsed().as_millis() as u64;
    let mut response = match outcome {
        Ok(result) => {
            tracing::info!(
                request_id = %request_id,
                confidence = result.confidence,
                agreement = result.agreement_ratio,
                responses = result.individual_responses.len(),
                latency_ms,
                "route request completed"
            );
            Json(result).into_response()
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                latency_ms,
                "route request failed"
            );
            e.into_response()
        }
    };

    attach_concord_headers(&mut response, &request_id, latency_ms);
    response
}

/// Handle GET /v1/models - registered models with live statistics
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let selector = state.router.selector();
    let models: Vec<serde_json::Value> = selector
        .list_models()
        .into_iter()
        .map(|model| {
            let score = selector.composite_score(&model);
            serde_json::json!({
                "id": model.key.to_string(),
                "provider": model.key.provider,
                "model_id": model.key.model_id,
                "weight": model.weight,
                "avg_latency_secs": model.avg_latency,
                "success_rate": model.success_rate,
                "cost_per_unit": model.cost_per_unit,
                "score": score,
            })
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": models
    }))
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "concord",
        "models": state.router.selector().len(),
        "providers": state.router.provider_names(),
    }))
}
