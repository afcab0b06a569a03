pub mod admin;
pub mod notify;
pub mod status;

use axum::http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::gateway_util::AppStateData;
use crate::rate_limit::admission_filter;

/// Assemble the full application router. The admission filter wraps only the
/// notification routes; the admin surface and health check are unguarded.
pub fn build_router(state: AppStateData) -> Router {
    let notify_routes = Router::new()
        .route("/sms", post(notify::send_sms))
        .route("/email", post(notify::send_email))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_filter,
        ));

    Router::new()
        .nest("/api/notify", notify_routes)
        .route("/api/plans", post(admin::create_plan).get(admin::list_plans))
        .route("/api/plans/:id", get(admin::get_plan).put(admin::update_plan))
        .route(
            "/api/clients",
            post(admin::create_client).get(admin::list_clients),
        )
        .route("/api/clients/:id", get(admin::get_client))
        .route("/api/limits", post(admin::create_rule).get(admin::list_rules))
        .route("/api/limits/:id", get(admin::get_rule).put(admin::update_rule))
        .route("/health", get(status::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("retry-after"),
            HeaderName::from_static("x-throttle-type"),
            HeaderName::from_static("x-suggested-delay-ms"),
        ])
}
