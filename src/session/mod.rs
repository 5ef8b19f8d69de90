//! Server-side sessions.
//!
//! Provides:
//! - `SessionRecord`: what the store keeps per session id
//! - `SessionUser`: the authenticated user and the authorization decision
//! - `OidcTransaction`: temporary state during the authorization code flow
//! - `SessionManager`: load, persist, regenerate and destroy sessions, and
//!   keep the encrypted session cookie in sync

pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use chrono::Utc;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::Duration as TimeDuration;

use crate::config::{OIDC_TRANSACTION_TTL, SESSION_COOKIE_NAME, SESSION_ID_BYTES, SESSION_TTL};
use crate::oidc::pkce::random_token;

pub use store::{MemorySessionStore, RedisSessionStore, SessionStore, StoreError};

/// Authenticated user information kept in the session.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// Subject identifier from the identity provider
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Result of the group check at login time
    pub authorized: bool,
    /// Raw ID token, replayed as `id_token_hint` on logout
    pub id_token: String,
}

impl SessionUser {
    /// Get the display name, falling back to email or subject ID
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

impl std::fmt::Debug for SessionUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionUser")
            .field("sub", &self.sub)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("authorized", &self.authorized)
            .field("id_token", &"[redacted]")
            .finish()
    }
}

/// State held between the login redirect and the provider callback.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OidcTransaction {
    /// CSRF protection token (sent as "state" parameter)
    pub state: String,
    /// Replay protection, echoed inside the ID token
    pub nonce: String,
    /// PKCE code verifier
    pub code_verifier: String,
    /// Validated path to redirect to after login
    pub return_to: String,
    /// Creation time in Unix milliseconds
    pub created_at: i64,
}

impl OidcTransaction {
    pub fn new(state: String, nonce: String, code_verifier: String, return_to: String) -> Self {
        Self {
            state,
            nonce,
            code_verifier,
            return_to,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Whether the transaction is older than the allowed login round trip
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis - self.created_at > OIDC_TRANSACTION_TTL.as_millis() as i64
    }
}

impl std::fmt::Debug for OidcTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcTransaction")
            .field("return_to", &self.return_to)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Everything stored under one session id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_transaction: Option<OidcTransaction>,
}

/// The session attached to the current request by the session layer.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub id: String,
    pub record: SessionRecord,
    /// True when no stored record matched the request cookie
    pub is_new: bool,
}

impl CurrentSession {
    pub fn user(&self) -> Option<&SessionUser> {
        self.record.user.as_ref()
    }
}

/// Loads and writes sessions through a `SessionStore` and manages the cookie.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie_secure: bool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, cookie_secure: bool) -> Self {
        Self {
            store,
            cookie_secure,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Resolve the session named by the request cookie.
    ///
    /// A missing cookie or an unknown id yields a fresh, unsaved session.
    /// Store failures are returned to the caller.
    pub async fn load(&self, jar: &PrivateCookieJar) -> Result<CurrentSession, StoreError> {
        if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
            let id = cookie.value().to_string();
            if let Some(record) = self.store.get(&id).await? {
                return Ok(CurrentSession {
                    id,
                    record,
                    is_new: false,
                });
            }
            tracing::debug!("Session cookie names an unknown or expired session");
        }

        Ok(CurrentSession {
            id: new_session_id(),
            record: SessionRecord::default(),
            is_new: true,
        })
    }

    /// Write the record to the store without touching the cookie.
    pub async fn persist(&self, session: &CurrentSession) -> Result<(), StoreError> {
        self.store.set(&session.id, &session.record).await
    }

    /// Write the record and set the session cookie on the jar.
    pub async fn save(
        &self,
        session: &mut CurrentSession,
        jar: PrivateCookieJar,
    ) -> Result<PrivateCookieJar, StoreError> {
        self.persist(session).await?;
        session.is_new = false;
        Ok(jar.add(self.session_cookie(session.id.clone())))
    }

    /// Move the session to a fresh id, keeping its data.
    ///
    /// The old id is destroyed first so it can never be replayed. The caller
    /// must `save` afterwards to store the record under the new id and send
    /// the new cookie.
    pub async fn regenerate(&self, session: &mut CurrentSession) -> Result<(), StoreError> {
        if !session.is_new {
            self.store.destroy(&session.id).await?;
        }
        session.id = new_session_id();
        session.is_new = true;
        Ok(())
    }

    /// Remove the session from the store and expire the cookie.
    pub async fn destroy(
        &self,
        session: &CurrentSession,
        jar: PrivateCookieJar,
    ) -> Result<PrivateCookieJar, StoreError> {
        if !session.is_new {
            self.store.destroy(&session.id).await?;
        }
        let removal = Cookie::build((SESSION_COOKIE_NAME, ""))
            .path("/")
            .max_age(TimeDuration::ZERO)
            .build();
        Ok(jar.remove(removal))
    }

    fn session_cookie(&self, id: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE_NAME, id))
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .max_age(cookie_max_age(SESSION_TTL))
            .build()
    }
}

fn cookie_max_age(ttl: Duration) -> TimeDuration {
    TimeDuration::seconds(ttl.as_secs() as i64)
}

/// Generate an opaque, unguessable session identifier
pub fn new_session_id() -> String {
    random_token(SESSION_ID_BYTES)
}

/// Derive a 64-byte cookie key from an arbitrary-length secret using HKDF
pub fn derive_cookie_key(secret: &str) -> Key {
    let hkdf = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut key_bytes = [0u8; 64];
    hkdf.expand(b"chatgate-session-cookie", &mut key_bytes)
        .expect("64 bytes is a valid length for HKDF-SHA256");

    Key::from(&key_bytes)
}
