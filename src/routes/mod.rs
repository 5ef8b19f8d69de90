//! HTTP routes.
//!
//! Health probes sit outside the session layer so they keep answering when
//! the session store is down. Everything else gets a `CurrentSession`; the
//! proxy routes and the static pages additionally sit behind both auth guards.
//!
//! Request tracing is enabled via middleware that assigns a request ID to each
//! incoming request, allowing correlation of all logs within a request.

pub mod auth;
pub mod health;
pub mod proxy;

use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};

use crate::middleware::{request_id_layer, require_authenticated, require_authorized, session_layer};
use crate::state::AppState;

/// Cache-Control for auth responses, which are stateful
const CACHE_CONTROL_AUTH: &str = "no-store";

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Auth routes - no caching (stateful)
    let auth_routes = Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", get(auth::logout))
        .route("/auth/status", get(auth::status))
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_AUTH),
        ));

    // Webhook relay - authenticated and authorized users only
    let proxy_routes = Router::new()
        .route("/proxy/webhook", any(proxy::webhook))
        .route("/proxy/webhook-test", any(proxy::webhook_test))
        .route_layer(middleware::from_fn(require_authorized))
        .route_layer(middleware::from_fn(require_authenticated));

    // Protected static pages (the chat UI)
    let static_pages: Router = Router::new()
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(middleware::from_fn(require_authorized))
        .layer(middleware::from_fn(require_authenticated));

    let session_routes = Router::new()
        .merge(auth_routes)
        .merge(proxy_routes)
        .fallback_service(static_pages)
        .layer(middleware::from_fn_with_state(state.clone(), session_layer));

    // Health checks - no session, always fresh for probes
    let health_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz));

    Router::new()
        .merge(health_routes)
        .merge(session_routes)
        .with_state(state)
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
