//! Router construction.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::middleware::rate_limit::RateLimitLayer;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::middleware::security_headers::SecurityHeadersLayer;
use crate::web::{reports, status};

/// Creates the web server router.
///
/// Handlers resolve the client address from proxy headers or from
/// `ConnectInfo<SocketAddr>`, so serve with
/// `into_make_service_with_connect_info`.
pub fn create_router(app_state: AppState, config: &Config) -> Router {
    let mut report_router = Router::new()
        .route("/csp", post(reports::csp_report))
        .route("/hpkp", post(reports::hpkp_report))
        .route("/ct", post(reports::expect_ct_report))
        .layer(DefaultBodyLimit::max(config.max_body_bytes));

    if let Some(limits) = &app_state.rate_limits {
        report_router =
            report_router.layer(RateLimitLayer::new(limits.clone(), app_state.proxy_trust));
    }

    let router = Router::new()
        .route("/", get(status::index))
        .merge(report_router)
        .fallback(not_found)
        .with_state(app_state);

    router.layer((
        // Outermost: per-request ID span + severity-proportional response logging.
        RequestIdLayer,
        // Fixed headers on every response, errors included.
        SecurityHeadersLayer::default(),
        TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, config.request_timeout),
    ))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
