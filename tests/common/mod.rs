//! Shared fixtures for the integration tests.
//!
//! - `FakeProvider` / `FakeDiscovery`: in-process identity provider
//! - `FailingStore`: session store that is always down
//! - `TestApp`: router wired with the fakes and an in-memory store
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use axum::Router;
use axum::response::IntoResponse;
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar};
use tower::ServiceExt;
use url::Url;

use chatgate::config::{AppConfig, SESSION_COOKIE_NAME};
use chatgate::oidc::{IdClaims, IdentityProvider, OidcError, ProviderDiscovery, TokenSet};
use chatgate::session::{derive_cookie_key, MemorySessionStore, SessionRecord, SessionStore, StoreError};
use chatgate::{create_router, AppState};

pub const BASE_URL: &str = "https://chat.example.com";
pub const SESSION_SECRET: &str = "integration-test-secret";
pub const ALLOWED_GROUP: &str = "g-chat";
pub const FAKE_ID_TOKEN: &str = "fake.id.token";

/// Identity provider that hands out codes on request.
pub struct FakeProvider {
    authorize: Url,
    end_session: Option<Url>,
    codes: Mutex<HashMap<String, IdClaims>>,
    pub exchanges: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            authorize: Url::parse("https://idp.example.com/authorize").unwrap(),
            end_session: Some(Url::parse("https://idp.example.com/logout").unwrap()),
            codes: Mutex::new(HashMap::new()),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// Register an authorization code whose ID token carries `claims`
    pub fn issue_code(&self, claims: IdClaims) -> String {
        let code = format!("code-{}", self.codes.lock().unwrap().len() + 1);
        self.codes.lock().unwrap().insert(code.clone(), claims);
        code
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorization_endpoint(&self) -> &Url {
        &self.authorize
    }

    fn end_session_endpoint(&self) -> Option<&Url> {
        self.end_session.as_ref()
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, OidcError> {
        assert_eq!(redirect_uri, format!("{}/auth/callback", BASE_URL));
        assert!(code_verifier.len() >= 43);
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        let claims = self
            .codes
            .lock()
            .unwrap()
            .remove(code)
            .ok_or_else(|| OidcError::TokenExchange("invalid_grant".to_string()))?;

        Ok(TokenSet {
            access_token: "fake-access-token".to_string(),
            id_token: FAKE_ID_TOKEN.to_string(),
            expires_in: Some(3600),
            claims,
        })
    }
}

pub struct FakeDiscovery {
    pub provider: Arc<FakeProvider>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ProviderDiscovery for FakeDiscovery {
    async fn discover(&self) -> Result<Arc<dyn IdentityProvider>, OidcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone())
    }
}

/// Session store whose backend is unreachable.
pub struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn get(&self, _id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _id: &str, _record: &SessionRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn destroy(&self, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Configuration with a complete OIDC registration plus `overrides`
pub fn test_config(overrides: &[(&str, &str)]) -> AppConfig {
    let mut env: HashMap<String, String> = [
        ("BASE_URL", BASE_URL),
        ("SESSION_SECRET", SESSION_SECRET),
        ("OIDC_ISSUER_URL", "https://idp.example.com"),
        ("OIDC_CLIENT_ID", "client-id"),
        ("OIDC_CLIENT_SECRET", "client-secret"),
        ("ALLOWED_GROUP_ID", ALLOWED_GROUP),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        env.insert(k.to_string(), v.to_string());
    }
    AppConfig::from_lookup(|key| env.get(key).cloned()).expect("test config should load")
}

/// Claims for a user, with the given nonce and groups
pub fn claims(nonce: &str, groups: Option<Vec<&str>>) -> IdClaims {
    IdClaims {
        sub: "user-1".to_string(),
        nonce: Some(nonce.to_string()),
        email: Some("ada@example.com".to_string()),
        name: Some("Ada Lovelace".to_string()),
        groups: groups.map(|g| g.into_iter().map(String::from).collect()),
        ..Default::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub provider: Arc<FakeProvider>,
    pub discovery: Arc<FakeDiscovery>,
    pub store: Arc<MemorySessionStore>,
    pub key: Key,
}

impl TestApp {
    pub fn new(overrides: &[(&str, &str)]) -> Self {
        let provider = Arc::new(FakeProvider::new());
        let discovery = Arc::new(FakeDiscovery {
            provider: provider.clone(),
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemorySessionStore::new());
        let state = AppState::new(test_config(overrides), store.clone(), Some(discovery.clone()))
            .expect("state should build");

        Self {
            router: create_router(state),
            provider,
            discovery,
            store,
            key: derive_cookie_key(SESSION_SECRET),
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    /// Start a login; returns the session cookie and the authorization URL
    pub async fn begin_login(&self, return_to: &str) -> (String, Url) {
        let uri = format!("/auth/login?returnTo={}", urlencoding::encode(return_to));
        let response = self.get(&uri, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = session_cookie(&response).expect("login should set the session cookie");
        (cookie, Url::parse(location(&response)).unwrap())
    }

    /// Run the full login round trip; returns the callback response
    pub async fn login_with_groups(&self, return_to: &str, groups: Option<Vec<&str>>) -> Response<Body> {
        let (cookie, authorize) = self.begin_login(return_to).await;
        let params = query_params(&authorize);
        let code = self.provider.issue_code(claims(&params["nonce"], groups));
        let uri = format!("/auth/callback?code={}&state={}", code, params["state"]);
        self.get(&uri, Some(&cookie)).await
    }

    /// Log in as a member of the allowed group; returns the session cookie
    pub async fn login(&self) -> String {
        let response = self.login_with_groups("/", Some(vec![ALLOWED_GROUP])).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        session_cookie(&response).expect("callback should set the session cookie")
    }

    /// Decrypt the session id from a `chatgate.sid=...` cookie pair
    pub fn session_id(&self, cookie: &str) -> String {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        PrivateCookieJar::from_headers(&headers, self.key.clone())
            .get(SESSION_COOKIE_NAME)
            .map(|c| c.value().to_string())
            .expect("cookie should decrypt")
    }
}

/// Encrypt an arbitrary session id into a `chatgate.sid=...` cookie pair
pub fn forge_session_cookie(id: &str) -> String {
    let jar = PrivateCookieJar::new(derive_cookie_key(SESSION_SECRET))
        .add(Cookie::new(SESSION_COOKIE_NAME, id.to_string()));
    session_cookie(&jar.into_response()).expect("jar should set the cookie")
}

/// The `chatgate.sid=...` pair from a response's Set-Cookie headers
pub fn session_cookie<B>(response: &Response<B>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{}=", SESSION_COOKIE_NAME)))
        .filter(|pair| pair.len() > SESSION_COOKIE_NAME.len() + 1)
        .map(str::to_string)
}

pub fn location<B>(response: &Response<B>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("response should redirect")
        .to_str()
        .unwrap()
}

pub fn query_params(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}
