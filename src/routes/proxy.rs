//! Webhook relay routes, mounted behind both auth guards.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method},
    response::Response,
    Extension,
};
use tracing::instrument;

use crate::proxy::{ProxyError, WebhookTarget};
use crate::session::CurrentSession;
use crate::state::AppState;

#[instrument(name = "proxy::webhook", skip_all, fields(sub = tracing::field::Empty))]
pub async fn webhook(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    relay(&state, &session, WebhookTarget::Production, method, headers, body).await
}

#[instrument(name = "proxy::webhook_test", skip_all, fields(sub = tracing::field::Empty))]
pub async fn webhook_test(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    relay(&state, &session, WebhookTarget::Test, method, headers, body).await
}

async fn relay(
    state: &AppState,
    session: &CurrentSession,
    target: WebhookTarget,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    if let Some(user) = session.user() {
        tracing::Span::current().record("sub", user.sub.as_str());
    }
    tracing::debug!(bytes = body.len(), "Relaying request");
    state.proxy.forward(target, method, &headers, body).await
}
