//! Request middleware.
//!
//! - `request_id_layer`: request id span and completion log
//! - `session_layer`: loads the session named by the cookie
//! - `require_authenticated` / `require_authorized`: route guards

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Extension,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{AppError, ResponseFormat};
use crate::session::CurrentSession;
use crate::state::AppState;

/// Header carrying the request id in both directions
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest incoming request id that is reused as-is
const MAX_REQUEST_ID_LEN: usize = 128;

/// Extension type for accessing the request ID in handlers if needed.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Middleware that assigns a request ID and creates a request span.
///
/// A well-formed incoming `x-request-id` is kept, otherwise a UUID v4 is
/// generated. The id is echoed on the response. This should be the outermost
/// layer so the span wraps all request processing.
pub async fn request_id_layer(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .filter(|v| v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    async move {
        let mut response = next.run(request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Resolve the session for the request and attach it as a `CurrentSession`
/// extension. A store failure ends the request with 503.
pub async fn session_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = PrivateCookieJar::from_headers(request.headers(), state.cookie_key.clone());

    match state.sessions.load(&jar).await {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(e) => {
            let format = ResponseFormat::from_request(request.headers(), request.uri().path());
            AppError::Store(e).respond_as(format).into_response()
        }
    }
}

/// Guard: the session must carry an authenticated user.
///
/// Browsers are sent to the login route with the original path and query as
/// `returnTo`; API callers get 401.
pub async fn require_authenticated(
    Extension(session): Extension<CurrentSession>,
    request: Request,
    next: Next,
) -> Response {
    if session.user().is_some() {
        return next.run(request).await;
    }

    let format = ResponseFormat::from_request(request.headers(), request.uri().path());
    tracing::debug!(path = %request.uri().path(), ?format, "Unauthenticated request");

    match format {
        ResponseFormat::Json => AppError::Unauthenticated.respond_as(format).into_response(),
        ResponseFormat::Html => {
            let original = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let location = format!("/auth/login?returnTo={}", urlencoding::encode(original));
            Redirect::to(&location).into_response()
        }
    }
}

/// Guard: the authenticated user must have passed the group check at login.
pub async fn require_authorized(
    Extension(session): Extension<CurrentSession>,
    request: Request,
    next: Next,
) -> Response {
    let format = ResponseFormat::from_request(request.headers(), request.uri().path());

    match session.user() {
        Some(user) if user.authorized => next.run(request).await,
        Some(user) => {
            tracing::info!(sub = %user.sub, "Denied request from unauthorized user");
            AppError::Forbidden {
                user: Some(user.display_name().to_string()),
            }
            .respond_as(format)
            .into_response()
        }
        None => AppError::Unauthenticated.respond_as(format).into_response(),
    }
}
