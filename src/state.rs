//! Shared application state for request handlers.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::authz::GroupAuthorizer;
use crate::config::AppConfig;
use crate::oidc::{OidcClient, ProviderDiscovery};
use crate::proxy::ProxyForwarder;
use crate::session::{derive_cookie_key, SessionManager, SessionStore};

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionManager,
    /// `None` when no identity provider is configured (development only)
    pub oidc: Option<Arc<OidcClient>>,
    pub authorizer: GroupAuthorizer,
    pub proxy: ProxyForwarder,
    pub cookie_key: Key,
}

impl AppState {
    /// Wire up the application from its configuration, a session store and an
    /// optional provider discovery.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SessionStore>,
        discovery: Option<Arc<dyn ProviderDiscovery>>,
    ) -> Result<Self, reqwest::Error> {
        let cookie_key = derive_cookie_key(&config.session.secret);
        let sessions = SessionManager::new(store, config.session.cookie_secure);

        let oidc = match (&config.oidc, discovery) {
            (Some(settings), Some(discovery)) => Some(Arc::new(OidcClient::new(
                &config,
                settings.client_id.clone(),
                discovery,
            ))),
            _ => {
                tracing::warn!("OIDC not configured, login is disabled");
                None
            }
        };

        let authorizer = GroupAuthorizer::new(config.allowed_group.clone());
        let proxy = ProxyForwarder::new(&config.webhook)?;

        Ok(Self {
            config: Arc::new(config),
            sessions,
            oidc,
            authorizer,
            proxy,
            cookie_key,
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
