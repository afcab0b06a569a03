//! Admission filter for the protected notification endpoints.
//!
//! Extracts the caller's API key, runs the admission decision pipeline, and
//! either forwards the request with rate-limit headers or rejects it with
//! 401/403/429/503. CORS preflight passes through untouched.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::json;
use tracing::{error, warn};

use crate::domain::{LimitKind, ThrottleType};
use crate::error::ErrorDetails;
use crate::gateway_util::AppStateData;
use crate::rate_limit::classifier;
use crate::rate_limit::limiter::RateLimitResult;
use crate::subscription_store::SubscriptionStore as _;
use crate::util::format_duration;

const API_KEY_HEADER: &str = "x-api-key";
const RATE_LIMIT_LIMIT_HEADER: &str = "X-RateLimit-Limit";
const RATE_LIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";
const RETRY_AFTER_HEADER: &str = "Retry-After";
const THROTTLE_TYPE_HEADER: &str = "X-Throttle-Type";
const THROTTLE_DELAY_HEADER: &str = "X-Suggested-Delay-Ms";

pub async fn admission_filter(
    State(state): State<AppStateData>,
    request: Request,
    next: Next,
) -> Response {
    // CORS preflight short-circuits past rate limiting.
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();

    let api_key = match request.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if !key.trim().is_empty() => key.trim().to_string(),
        _ => return unauthorized_response("Missing X-API-Key header"),
    };

    let client = match state.subscription_store.find_client_by_api_key(&api_key).await {
        Ok(Some(client)) => client,
        Ok(None) => return unauthorized_response("Invalid API key"),
        Err(e) => return store_failure_response(&path, e),
    };

    if !client.active {
        return forbidden_response("Client is inactive");
    }

    let result = match state.rate_limiter.try_consume(client.id).await {
        Ok(result) => result,
        Err(e) => return store_failure_response(&path, e),
    };

    if result.allowed {
        classifier::log_global_usage(state.rate_limiter.config(), result.global_usage_ratio);
        let mut response = next.run(request).await;
        set_rate_limit_headers(&mut response, &result);
        return response;
    }

    handle_denial(&state, &path, result).await
}

/// Apply the soft-throttle delay when configured, then serve the 429.
async fn handle_denial(state: &AppStateData, path: &str, result: RateLimitResult) -> Response {
    if result.exceeded_kind == Some(LimitKind::Global) {
        if let Some(ratio) = result.global_usage_ratio {
            let config = state.rate_limiter.config();
            if ratio >= config.global_full_threshold && ratio < config.global_hard_threshold {
                warn!(
                    usage_percent = format!("{:.0}", ratio * 100.0),
                    "Global rate limit at or over capacity, rejecting request"
                );
            }
        }
    }

    if result.throttle == ThrottleType::Soft && result.soft_delay_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(result.soft_delay_ms)).await;
    }

    too_many_requests_response(path, &result)
}

fn set_rate_limit_headers(response: &mut Response, result: &RateLimitResult) {
    if result.limit == 0 {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&result.limit.to_string()) {
        response.headers_mut().insert(RATE_LIMIT_LIMIT_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&result.remaining.to_string()) {
        response.headers_mut().insert(RATE_LIMIT_REMAINING_HEADER, value);
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "Unauthorized",
            "message": message,
        })),
    )
        .into_response()
}

fn forbidden_response(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "Forbidden",
            "message": message,
        })),
    )
        .into_response()
}

/// Map store failures to 503 (fail closed) and anything else to its status.
/// The downstream handler is never invoked on this path.
fn store_failure_response(path: &str, e: crate::error::Error) -> Response {
    let (status, error_label, message) = match e.get_details() {
        ErrorDetails::CounterStore { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable",
            "Rate limiting service temporarily unavailable".to_string(),
        ),
        ErrorDetails::SubscriptionStore { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable",
            "Subscription lookup temporarily unavailable".to_string(),
        ),
        _ => {
            error!("Unexpected error in admission filter: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
                "An error occurred while processing your request".to_string(),
            )
        }
    };
    (
        status,
        Json(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "status": status.as_u16(),
            "error": error_label,
            "message": message,
            "path": path,
        })),
    )
        .into_response()
}

fn too_many_requests_response(path: &str, result: &RateLimitResult) -> Response {
    let formatted_retry = format_duration(result.retry_after_seconds);

    let message = match result.exceeded_kind {
        None => "No active subscription. An active subscription plan is required.".to_string(),
        Some(kind) => {
            let description = if kind == LimitKind::Global {
                "Global system limit"
            } else {
                "Your subscription plan limit"
            };
            format!(
                "{description} exhausted. Limit: {} requests. Retry after {formatted_retry}.",
                result.limit
            )
        }
    };

    let mut body = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        "error": "Too Many Requests",
        "message": message,
        "path": path,
        "throttleType": result.throttle.to_string(),
        "limit": result.limit,
        "current": result.current,
        "retryAfterSeconds": result.retry_after_seconds,
        "retryAfterFormatted": formatted_retry,
        "suggestedDelayMs": result.soft_delay_ms,
    });
    if let Some(kind) = result.exceeded_kind {
        body["limitType"] = json!(kind.to_string());
    }

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&result.retry_after_seconds.to_string()) {
        headers.insert(RETRY_AFTER_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&result.throttle.to_string()) {
        headers.insert(THROTTLE_TYPE_HEADER, value);
    }
    if result.soft_delay_ms > 0 {
        if let Ok(value) = HeaderValue::from_str(&result.soft_delay_ms.to_string()) {
            headers.insert(THROTTLE_DELAY_HEADER, value);
        }
    }
    if result.limit > 0 {
        if let Ok(value) = HeaderValue::from_str(&result.limit.to_string()) {
            headers.insert(RATE_LIMIT_LIMIT_HEADER, value);
        }
        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from_static("0"));
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denial(kind: Option<LimitKind>, throttle: ThrottleType) -> RateLimitResult {
        RateLimitResult {
            allowed: false,
            limit: 5,
            current: 5,
            remaining: 0,
            retry_after_seconds: 42,
            exceeded_kind: kind,
            global_usage_ratio: None,
            throttle,
            soft_delay_ms: 0,
        }
    }

    #[test]
    fn test_429_headers() {
        let response = too_many_requests_response("/api/notify/sms", &denial(
            Some(LimitKind::Window),
            ThrottleType::Hard,
        ));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get(RETRY_AFTER_HEADER).unwrap(), "42");
        assert_eq!(headers.get(THROTTLE_TYPE_HEADER).unwrap(), "HARD");
        assert_eq!(headers.get(RATE_LIMIT_LIMIT_HEADER).unwrap(), "5");
        assert_eq!(headers.get(RATE_LIMIT_REMAINING_HEADER).unwrap(), "0");
        assert!(headers.get(THROTTLE_DELAY_HEADER).is_none());
    }

    #[test]
    fn test_429_soft_delay_header() {
        let mut result = denial(Some(LimitKind::Global), ThrottleType::Soft);
        result.soft_delay_ms = 500;
        let response = too_many_requests_response("/api/notify/sms", &result);
        let headers = response.headers();
        assert_eq!(headers.get(THROTTLE_TYPE_HEADER).unwrap(), "SOFT");
        assert_eq!(headers.get(THROTTLE_DELAY_HEADER).unwrap(), "500");
    }

    #[test]
    fn test_no_subscription_denial_has_no_limit_headers() {
        let mut result = denial(None, ThrottleType::Hard);
        result.limit = 0;
        result.current = 0;
        result.retry_after_seconds = 0;
        let response = too_many_requests_response("/api/notify/email", &result);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(RATE_LIMIT_LIMIT_HEADER).is_none());
    }

    #[test]
    fn test_unauthorized_response_status() {
        let response = unauthorized_response("Missing X-API-Key header");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
