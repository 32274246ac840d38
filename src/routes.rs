//! Application routing configuration with the interceptor pipeline.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────────┐
//! │  Security Headers    │ ← HSTS, nosniff, X-Frame-Options on every response
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │      Tracing         │ ← HTTP request/response spans
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │   Host Redirect      │ ← 301 for the bare host, nothing below runs
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │   Threat Signal      │ ← log entry for bot/crawler/scanner agents
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │   Body Size Limit    │
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐
//! │ Callback Normalizer  │ ← POST <callback path> only
//! └──────────┬───────────┘
//!            ▼
//!         Handler
//! ```
//!
//! # Routes
//!
//! - `GET /health` - Liveness check
//! - `POST /accounts/telegram/login/callback/` - Telegram login callback
//!   (path configurable via `TELEGRAM_CALLBACK_PATH`)

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue};
use axum::http::header::{STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS};
use axum::routing::{get, post};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{Config, HEALTH_PATH};
use crate::error::{AppError, AppResult};
use crate::handlers;
use crate::middleware::{CallbackNormalizerLayer, HostRedirectLayer, ThreatSignalLayer};
use crate::sink::SharedSink;
use crate::state::AppState;

/// Build the application router with all routes and the interceptor pipeline.
///
/// # Arguments
///
/// * `state` - Application state containing config
/// * `sink` - Destination for interceptor events and faults
///
/// # Errors
///
/// Returns `AppError::ConfigError` if a security header value is invalid.
pub fn build_router(state: AppState, sink: SharedSink) -> AppResult<Router> {
    let config = state.config.clone();

    let router = Router::new()
        .route(HEALTH_PATH, get(handlers::health_check))
        .route(
            &config.telegram_callback_path,
            post(handlers::telegram_callback),
        )
        .with_state(state);

    apply_pipeline(router, &config, sink)
}

/// Wrap `router` in the interceptor pipeline.
///
/// Layers are added innermost first; the last one added sees the request
/// first.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if a security header value is invalid.
pub fn apply_pipeline(mut router: Router, config: &Config, sink: SharedSink) -> AppResult<Router> {
    // 1. Callback normalizer, directly in front of the handlers
    info!(
        path = %config.telegram_callback_path,
        "Telegram callback normalization enabled"
    );
    router = router.layer(CallbackNormalizerLayer::from_config(config, sink.clone()));

    // 2. Request body size limit for extractors
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 3. Threat signals
    info!(
        markers = ?config.threat_agent_markers,
        trust_proxy_headers = config.trust_proxy_headers,
        "Threat signal logging enabled"
    );
    router = router.layer(ThreatSignalLayer::from_config(config, sink.clone()));

    // 4. Host redirect, first interceptor to see the request
    info!(
        from = %config.bare_host,
        to = %config.canonical_origin(),
        "Canonical host redirect enabled"
    );
    router = router.layer(HostRedirectLayer::from_config(config, sink));

    // 5. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 6. Security headers, also applied to redirect responses
    for (name, value) in security_headers(config)? {
        router = router.layer(SetResponseHeaderLayer::if_not_present(name, value));
    }

    Ok(router)
}

/// Response headers from the security settings, skipping disabled ones.
fn security_headers(config: &Config) -> AppResult<Vec<(HeaderName, HeaderValue)>> {
    let mut headers = Vec::with_capacity(3);

    if let Some(hsts) = config.hsts_header_value() {
        headers.push((STRICT_TRANSPORT_SECURITY, header_value(&hsts)?));
    }
    if config.content_type_nosniff {
        headers.push((X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")));
    }
    if !config.frame_options.is_empty() {
        headers.push((X_FRAME_OPTIONS, header_value(&config.frame_options)?));
    }

    Ok(headers)
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::ConfigError(format!("invalid header value '{value}': {e}")))
}
