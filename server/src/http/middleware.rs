use core::time::Duration;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_http::{
    classify::ServerErrorsFailureClass,
    trace::{DefaultOnFailure, OnFailure},
};

/// Failure handling for the trace layer.
///
/// `/health` answers 503 while a stop or restart of the run is pending; those responses
/// are logged at `INFO` instead of `ERROR`.
#[derive(Clone, Copy)]
pub(super) struct LevelAdjustingOnFailure;

impl OnFailure<ServerErrorsFailureClass> for LevelAdjustingOnFailure {
    fn on_failure(
        &mut self,
        failure_classification: ServerErrorsFailureClass,
        latency: Duration,
        span: &tracing::Span,
    ) {
        if let ServerErrorsFailureClass::StatusCode(StatusCode::SERVICE_UNAVAILABLE) =
            failure_classification
        {
            tracing::info!(
                latency_ms = latency.as_millis(),
                "Unavailable while the run is stopping"
            );
        } else {
            DefaultOnFailure::default().on_failure(failure_classification, latency, span);
        }
    }
}

/// Middleware to set security headers on all responses.
///
/// Inline scripts are not allowed; the API documentation page and the web client ship
/// their scripts as files.
pub(super) async fn secure_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(concat!(
            "default-src 'self'; ",
            "object-src 'none'; ",
            "base-uri 'none'; ",
            "frame-ancestors 'self'; ",
        )),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    response
}
