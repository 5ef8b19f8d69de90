//! OpenID Connect authorization code flow with PKCE.
//!
//! `OidcClient` owns the login transaction lifecycle:
//! - `begin_login`: state, nonce and PKCE generation, authorization redirect
//! - `complete_login`: callback validation, code exchange, nonce check
//! - `build_logout_url`: provider end-session redirect
//!
//! The provider itself sits behind `IdentityProvider` and is discovered at
//! most once per process through a `ProviderDiscovery`.

pub mod pkce;
pub mod provider;
pub mod return_to;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use url::Url;

use crate::config::{AppConfig, OIDC_RANDOM_BYTES, OIDC_SCOPES};
use crate::session::{OidcTransaction, SessionRecord};

pub use provider::HttpDiscovery;
pub use return_to::sanitize_return_to;

/// Error type for OIDC operations
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("Identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Invalid provider metadata: {0}")]
    InvalidMetadata(String),

    #[error("No login in progress")]
    NoTransaction,

    #[error("Login transaction expired")]
    TransactionExpired,

    #[error("State parameter does not match")]
    StateMismatch,

    #[error("Nonce in ID token does not match")]
    NonceMismatch,

    #[error("Missing authorization code")]
    MissingCode,

    #[error("Identity provider returned error: {error} - {description}")]
    ProviderRejected { error: String, description: String },

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),
}

/// Claims read from a verified ID token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IdClaims {
    pub sub: String,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Group object ids, when the provider embeds them
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    /// Distributed claim sources; a `groups` entry signals group overage
    #[serde(default, rename = "_claim_names")]
    pub claim_names: Option<HashMap<String, serde_json::Value>>,
    /// Implicit-flow overage indicator
    #[serde(default)]
    pub hasgroups: Option<bool>,
}

impl IdClaims {
    /// Email claim, falling back to the preferred username
    pub fn email_address(&self) -> Option<&str> {
        self.email.as_deref().or(self.preferred_username.as_deref())
    }

    /// Whether the provider left groups out because there were too many
    pub fn has_group_overage(&self) -> bool {
        self.claim_names
            .as_ref()
            .is_some_and(|names| names.contains_key("groups"))
            || self.hasgroups == Some(true)
    }
}

/// Tokens returned by the code exchange together with the verified claims.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    pub expires_in: Option<u64>,
    pub claims: IdClaims,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[redacted]")
            .field("id_token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .field("claims", &self.claims)
            .finish()
    }
}

/// Query parameters from the provider callback
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a successful callback
#[derive(Debug)]
pub struct CompletedLogin {
    pub tokens: TokenSet,
    pub claims: IdClaims,
    pub return_to: String,
}

/// A discovered identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn authorization_endpoint(&self) -> &Url;

    fn end_session_endpoint(&self) -> Option<&Url>;

    /// Redeem an authorization code and verify the returned ID token's
    /// signature, issuer, audience and expiry. The nonce is left to the caller.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, OidcError>;
}

/// Produces the identity provider handle, typically over the network.
#[async_trait]
pub trait ProviderDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Arc<dyn IdentityProvider>, OidcError>;
}

/// Drives the login round trip against a lazily discovered provider.
pub struct OidcClient {
    discovery: Arc<dyn ProviderDiscovery>,
    provider: OnceCell<Arc<dyn IdentityProvider>>,
    client_id: String,
    redirect_uri: String,
    post_logout_redirect_uri: String,
    base_url: Url,
}

impl OidcClient {
    pub fn new(config: &AppConfig, client_id: String, discovery: Arc<dyn ProviderDiscovery>) -> Self {
        Self {
            discovery,
            provider: OnceCell::new(),
            client_id,
            redirect_uri: config.redirect_uri(),
            post_logout_redirect_uri: config.post_logout_redirect_uri(),
            base_url: config.http.base_url.clone(),
        }
    }

    /// Get the provider, running discovery on first use.
    ///
    /// Concurrent first callers wait on the same discovery. A failed
    /// discovery is not cached, so the next request tries again.
    pub async fn provider(&self) -> Result<Arc<dyn IdentityProvider>, OidcError> {
        self.provider
            .get_or_try_init(|| async {
                tracing::info!("Discovering identity provider");
                self.discovery.discover().await
            })
            .await
            .map(Arc::clone)
    }

    /// Start a login: record a fresh transaction on the session and return
    /// the provider authorization URL.
    pub async fn begin_login(
        &self,
        session: &mut SessionRecord,
        return_to: Option<&str>,
    ) -> Result<Url, OidcError> {
        let provider = self.provider().await?;

        let state = pkce::random_token(OIDC_RANDOM_BYTES);
        let nonce = pkce::random_token(OIDC_RANDOM_BYTES);
        let code_verifier = pkce::generate_code_verifier();
        let challenge = pkce::code_challenge(&code_verifier);
        let return_to = sanitize_return_to(return_to, &self.base_url);

        let mut url = provider.authorization_endpoint().clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", OIDC_SCOPES)
            .append_pair("state", &state)
            .append_pair("nonce", &nonce)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        if session.oidc_transaction.is_some() {
            tracing::debug!("Replacing pending login transaction");
        }
        session.oidc_transaction = Some(OidcTransaction::new(state, nonce, code_verifier, return_to));

        Ok(url)
    }

    /// Finish a login from the provider callback.
    ///
    /// The pending transaction is removed from the session before any check
    /// runs, so it is gone whether the callback succeeds or fails.
    pub async fn complete_login(
        &self,
        session: &mut SessionRecord,
        params: &CallbackParams,
    ) -> Result<CompletedLogin, OidcError> {
        let txn = session.oidc_transaction.take().ok_or(OidcError::NoTransaction)?;

        if txn.is_expired_at(Utc::now().timestamp_millis()) {
            return Err(OidcError::TransactionExpired);
        }

        if let Some(error) = &params.error {
            return Err(OidcError::ProviderRejected {
                error: error.clone(),
                description: params
                    .error_description
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        if params.state.as_deref() != Some(txn.state.as_str()) {
            return Err(OidcError::StateMismatch);
        }

        let code = params.code.as_deref().ok_or(OidcError::MissingCode)?;

        let provider = self.provider().await?;
        let tokens = provider
            .exchange_code(code, &txn.code_verifier, &self.redirect_uri)
            .await?;

        if tokens.claims.nonce.as_deref() != Some(txn.nonce.as_str()) {
            return Err(OidcError::NonceMismatch);
        }

        Ok(CompletedLogin {
            claims: tokens.claims.clone(),
            tokens,
            return_to: txn.return_to,
        })
    }

    /// Build the provider end-session URL.
    ///
    /// Falls back to the post-logout URI when the provider has no end-session
    /// endpoint.
    pub async fn build_logout_url(&self, id_token_hint: Option<&str>) -> Result<Url, OidcError> {
        let provider = self.provider().await?;

        let Some(endpoint) = provider.end_session_endpoint() else {
            return Url::parse(&self.post_logout_redirect_uri)
                .map_err(|e| OidcError::InvalidMetadata(e.to_string()));
        };

        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("post_logout_redirect_uri", &self.post_logout_redirect_uri);
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
        }
        Ok(url)
    }
}

/// Decode the payload segment of a compact JWT without verifying it.
///
/// Only call this on tokens whose signature has already been checked.
pub fn decode_claims(token: &str) -> Result<IdClaims, OidcError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| OidcError::InvalidIdToken("malformed token".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| OidcError::InvalidIdToken(format!("payload is not base64url: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| OidcError::InvalidIdToken(format!("payload is not valid claims: {}", e)))
}
