//! HTTP handlers for plant-health-service.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use std::any::Any;

use crate::forwarder::{ForwardResponse, ResponseShape};
use crate::services::get_metrics;
use crate::services::metrics::record_outcome;
use crate::startup::AppState;

/// Forward a plant image request to Plant.id.
///
/// The raw body is taken so that malformed JSON is reported by the forwarder
/// in the deployment's response shape instead of axum's extractor rejection.
/// Bodies that cannot be buffered (e.g. over the size limit) are answered in
/// the same shape.
pub async fn forward(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> ForwardResponse {
    match body {
        Ok(body) => state.forwarder.handle(&body).await,
        Err(rejection) => {
            let shape = state.config.forwarder.response_shape;
            tracing::warn!(
                status = %rejection.status(),
                reason = %rejection.body_text(),
                "Request body rejected"
            );
            record_outcome("rejected");
            ForwardResponse::new(rejection.status(), shape.error_body(&rejection.body_text()))
        }
    }
}

/// Liveness check.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "plant-health-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness check: not ready until an API key is configured.
pub async fn readiness_check(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    if !state.forwarder.is_configured() {
        return Err(AppError::ServiceUnavailable(
            "API key not configured".to_string(),
        ));
    }

    Ok((StatusCode::OK, Json(json!({ "status": "ready" }))))
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Turn a panic inside a handler into a 500 in the deployment's response shape.
pub fn panic_response(shape: ResponseShape, err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "Handler panicked");

    ForwardResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        shape.error_body(&format!("Unhandled exception: {}", detail)),
    )
    .into_response()
}
