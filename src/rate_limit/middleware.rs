use super::service::AdmissionDispatcher;
use super::types::CallContext;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Method name of a request path: its last non-empty segment.
///
/// gRPC paths (`/pkg.Service/Method`) map to `Method`.
pub fn method_name_from_path(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
}

/// Build the call context from request headers, reusing the request id
fn call_context(headers: &HeaderMap) -> CallContext {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(CallContext::with_request_id)
        .unwrap_or_default()
}

/// Create a 429 Too Many Requests response
fn create_overload_response(method: &str) -> Response {
    let body = serde_json::json!({
        "error": "Overloaded",
        "status": 429,
        "method": method,
    });

    (StatusCode::TOO_MANY_REQUESTS, body.to_string()).into_response()
}

/// Axum middleware function for per-method admission control
pub async fn admission_middleware(
    State(dispatcher): State<AdmissionDispatcher>,
    request: Request,
    next: Next,
) -> Response {
    let method = method_name_from_path(request.uri().path()).to_string();
    let ctx = call_context(request.headers());

    if dispatcher.can_pass(&ctx, &method).await {
        next.run(request).await
    } else {
        debug!(request_id = ctx.request_id(), "Rejected call to {}", method);
        create_overload_response(&method)
    }
}
