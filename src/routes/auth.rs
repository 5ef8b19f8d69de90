//! Authentication routes for the OIDC login flow.
//!
//! Routes:
//! - GET /auth/login - Start the authorization code flow
//! - GET /auth/callback - Handle the identity provider callback
//! - GET /auth/logout - Destroy the session and sign out at the provider
//! - GET /auth/status - Report the current session as JSON

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::authz::AuthzError;
use crate::oidc::{CallbackParams, OidcError};
use crate::session::{CurrentSession, SessionUser, StoreError};
use crate::state::AppState;
use crate::templates::render_error_page;

/// Query parameters for login initiation
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Where to go after a successful login
    #[serde(rename = "returnTo")]
    pub return_to: Option<String>,
}

/// Start a login and redirect to the identity provider
#[instrument(name = "auth::login", skip(state, session, jar))]
pub async fn login(
    State(state): State<AppState>,
    Extension(mut session): Extension<CurrentSession>,
    jar: PrivateCookieJar,
    Query(query): Query<LoginQuery>,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let oidc = state.oidc.as_ref().ok_or(AuthError::NotConfigured)?;

    let authorize_url = oidc
        .begin_login(&mut session.record, query.return_to.as_deref())
        .await?;
    let jar = state.sessions.save(&mut session, jar).await?;

    Ok((jar, Redirect::to(authorize_url.as_str())))
}

/// Handle the identity provider callback
#[instrument(name = "auth::callback", skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    Extension(mut session): Extension<CurrentSession>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let oidc = state.oidc.as_ref().ok_or(AuthError::NotConfigured)?;

    let completed = match oidc.complete_login(&mut session.record, &params).await {
        Ok(completed) => completed,
        Err(e) => {
            discard_transaction(&state, &session).await;
            return Err(e.into());
        }
    };

    let authorized = match state.authorizer.evaluate(&completed.claims) {
        Ok(authorized) => authorized,
        Err(e) => {
            discard_transaction(&state, &session).await;
            return Err(e.into());
        }
    };

    let claims = completed.claims;
    tracing::info!(sub = %claims.sub, authorized, "User signed in");

    session.record.user = Some(SessionUser {
        email: claims.email_address().map(str::to_string),
        name: claims.name.clone(),
        sub: claims.sub,
        authorized,
        id_token: completed.tokens.id_token,
    });

    // Fresh id on privilege change
    state.sessions.regenerate(&mut session).await?;
    let jar = state.sessions.save(&mut session, jar).await?;

    Ok((jar, Redirect::to(&completed.return_to)))
}

/// Write the session back after a failed callback so the consumed
/// transaction cannot be reused.
async fn discard_transaction(state: &AppState, session: &CurrentSession) {
    if session.is_new {
        return;
    }
    if let Err(e) = state.sessions.persist(session).await {
        tracing::warn!(error = %e, "Failed to clear login transaction");
    }
}

/// Destroy the session and redirect to the provider's end-session endpoint
#[instrument(name = "auth::logout", skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let id_token = session.user().map(|user| user.id_token.clone());
    if let Some(user) = session.user() {
        tracing::info!(sub = %user.sub, "User signed out");
    }

    let jar = state.sessions.destroy(&session, jar).await?;

    let target = match &state.oidc {
        Some(oidc) => match oidc.build_logout_url(id_token.as_deref()).await {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Provider logout unavailable, signing out locally");
                state.config.post_logout_redirect_uri()
            }
        },
        None => "/".to_string(),
    };

    Ok((jar, Redirect::to(&target)))
}

/// Report whether the caller is signed in
#[instrument(name = "auth::status", skip_all)]
pub async fn status(Extension(session): Extension<CurrentSession>) -> Json<Value> {
    match session.user() {
        Some(user) => Json(json!({
            "authenticated": true,
            "user": {
                "email": user.email,
                "name": user.name,
                "authorized": user.authorized,
            },
        })),
        None => Json(json!({ "authenticated": false })),
    }
}

/// Auth-specific error type
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("OIDC authentication is not configured")]
    NotConfigured,

    #[error(transparent)]
    Oidc(#[from] OidcError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

const RESTART_MESSAGE: &str = "Your sign-in attempt was invalid or has expired. Please sign in again.";

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, title, message, retry) = match &self {
            AuthError::NotConfigured => (
                StatusCode::NOT_FOUND,
                "Authentication Error",
                "Authentication is not configured on this server".to_string(),
                false,
            ),
            AuthError::Oidc(OidcError::ProviderRejected { error, description }) => {
                tracing::warn!(error = %error, description = %description, "IdP returned error");
                (
                    StatusCode::BAD_REQUEST,
                    "Authentication Error",
                    format!("Authentication failed: {}", description),
                    true,
                )
            }
            AuthError::Oidc(
                e @ (OidcError::NoTransaction
                | OidcError::TransactionExpired
                | OidcError::StateMismatch
                | OidcError::NonceMismatch
                | OidcError::MissingCode),
            ) => {
                tracing::warn!(error = %e, "Login callback rejected");
                (
                    StatusCode::BAD_REQUEST,
                    "Authentication Error",
                    RESTART_MESSAGE.to_string(),
                    true,
                )
            }
            AuthError::Oidc(e) => {
                tracing::error!(error = %e, "Auth error");
                (
                    StatusCode::BAD_GATEWAY,
                    "Authentication Error",
                    "Failed to complete authentication with provider".to_string(),
                    true,
                )
            }
            AuthError::Authz(e) => {
                tracing::warn!(error = ?e, "Authorization could not be evaluated");
                (StatusCode::FORBIDDEN, "Access denied", e.to_string(), false)
            }
            AuthError::Store(e) => {
                tracing::error!(error = %e, "Session store failure during login");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable",
                    "Sessions are temporarily unavailable. Please try again shortly.".to_string(),
                    false,
                )
            }
        };

        let page = render_error_page(title, &message, retry.then_some("/auth/login"));
        (status, Html(page)).into_response()
    }
}
