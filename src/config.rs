//! Configuration loading and constants.
//!
//! Settings come from the process environment and are validated once at
//! startup. In production a missing required value aborts startup; in any
//! other environment it is logged and replaced by a development default.
//! `AppConfig` is the root configuration struct and is immutable afterwards.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use url::Url;

// =============================================================================
// Session Constants
// =============================================================================

/// Name of the cookie carrying the encrypted session identifier
pub const SESSION_COOKIE_NAME: &str = "chatgate.sid";

/// Session lifetime in the store and on the cookie (24 hours)
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Random bytes in a session identifier
pub const SESSION_ID_BYTES: usize = 32;

/// Key prefix for session records in Redis
pub const REDIS_SESSION_PREFIX: &str = "sess:";

/// Maximum connection attempts against the session store at startup
pub const STORE_CONNECT_ATTEMPTS: u32 = 10;

/// Linear backoff step between store connection attempts (milliseconds)
pub const STORE_RETRY_STEP_MS: u64 = 100;

/// Upper bound for the store connection backoff (milliseconds)
pub const STORE_RETRY_CAP_MS: u64 = 3000;

/// Timeout for establishing a single store connection
pub const STORE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for a single store command
pub const STORE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// OIDC Constants
// =============================================================================

/// Scopes requested from the identity provider
pub const OIDC_SCOPES: &str = "openid profile email";

/// Lifetime of a pending login transaction (5 minutes)
pub const OIDC_TRANSACTION_TTL: Duration = Duration::from_secs(5 * 60);

/// Random bytes in the `state` and `nonce` parameters
pub const OIDC_RANDOM_BYTES: usize = 32;

/// Callback path registered with the identity provider
pub const OIDC_CALLBACK_PATH: &str = "/auth/callback";

/// Timeout for discovery, JWKS and token requests (seconds)
pub const OIDC_HTTP_TIMEOUT_SECS: u64 = 10;

/// Authority used to build the issuer URL from a tenant identifier
pub const ENTRA_AUTHORITY: &str = "https://login.microsoftonline.com";

// =============================================================================
// Proxy Constants
// =============================================================================

/// Default upstream request timeout in seconds
pub const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 120;

/// Upstream connect timeout in seconds
pub const PROXY_CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Defaults
// =============================================================================

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "chatgate=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Default bind address
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Directory holding the protected static pages
pub const DEFAULT_STATIC_DIR: &str = "public";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    /// HTTP listener and public origin
    pub http: HttpServerConfig,
    pub session: SessionConfig,
    /// Identity provider settings; `None` disables login outside production
    pub oidc: Option<OidcSettings>,
    /// Group required for access; `None` admits every authenticated user
    pub allowed_group: Option<String>,
    pub webhook: WebhookConfig,
    /// Directory of the protected static pages
    pub static_dir: String,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Public base URL, used for the callback and post-logout redirects
    pub base_url: Url,
}

impl HttpServerConfig {
    /// Listen address; works for IPv4 and IPv6 hosts alike
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub cookie_secure: bool,
    /// Redis connection string; the in-memory store is used when absent
    pub redis_url: Option<String>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"[redacted]")
            .field("cookie_secure", &self.cookie_secure)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Identity provider registration
#[derive(Clone)]
pub struct OidcSettings {
    pub issuer_url: Url,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for OidcSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcSettings")
            .field("issuer_url", &self.issuer_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

/// Downstream chat webhook
#[derive(Clone)]
pub struct WebhookConfig {
    pub url: Option<Url>,
    pub test_url: Option<Url>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl WebhookConfig {
    /// Check if Basic credentials are configured (both username and password)
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("test_url", &self.test_url.as_ref().map(Url::as_str))
            .field("has_credentials", &self.has_credentials())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values count as missing. Required values are collected so a
    /// production start reports every missing key at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let environment = Environment::parse(get("APP_ENV").as_deref());
        let mut missing: Vec<&'static str> = Vec::new();

        let host = parse_host(get("HOST").as_deref().unwrap_or(DEFAULT_HOST))?;
        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                message: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let base_url = match get("BASE_URL") {
            Some(raw) => parse_url("BASE_URL", &raw)?,
            None => {
                missing.push("BASE_URL");
                parse_url("BASE_URL", &format!("http://localhost:{}", port))?
            }
        };

        let secret = match get("SESSION_SECRET") {
            Some(secret) => secret,
            None => {
                missing.push("SESSION_SECRET");
                crate::oidc::pkce::random_token(SESSION_ID_BYTES)
            }
        };

        let cookie_secure = match get("COOKIE_SECURE") {
            Some(raw) => parse_bool("COOKIE_SECURE", &raw)?,
            None => environment.is_production(),
        };

        let redis_url = get("REDIS_URL");
        if redis_url.is_none() {
            missing.push("REDIS_URL");
        }

        let oidc = load_oidc(&get, &mut missing)?;

        let webhook = WebhookConfig {
            url: get("WEBHOOK_URL")
                .map(|raw| parse_url("WEBHOOK_URL", &raw))
                .transpose()?,
            test_url: get("WEBHOOK_TEST_URL")
                .map(|raw| parse_url("WEBHOOK_TEST_URL", &raw))
                .transpose()?,
            username: get("WEBHOOK_USERNAME"),
            password: get("WEBHOOK_PASSWORD"),
            timeout: Duration::from_secs(match get("PROXY_TIMEOUT_SECS") {
                Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                    key: "PROXY_TIMEOUT_SECS",
                    message: e.to_string(),
                })?,
                None => DEFAULT_PROXY_TIMEOUT_SECS,
            }),
        };

        if !missing.is_empty() {
            if environment.is_production() {
                return Err(ConfigError::Missing(missing));
            }
            for key in &missing {
                tracing::warn!(key = %key, "Required setting missing, using development default");
            }
        }

        if webhook.url.is_none() {
            tracing::warn!("WEBHOOK_URL not set, /proxy/webhook will answer 500");
        }
        if webhook.url.is_some() && !webhook.has_credentials() {
            tracing::warn!("Webhook credentials not set, proxied requests carry no Basic auth");
        }

        Ok(Self {
            environment,
            http: HttpServerConfig {
                host,
                port,
                base_url,
            },
            session: SessionConfig {
                secret,
                cookie_secure,
                redis_url,
            },
            oidc,
            allowed_group: get("ALLOWED_GROUP_ID"),
            webhook,
            static_dir: get("STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
        })
    }

    /// Absolute callback URL registered with the identity provider
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}",
            self.http.base_url.as_str().trim_end_matches('/'),
            OIDC_CALLBACK_PATH
        )
    }

    /// Where the provider sends the browser after signing out
    pub fn post_logout_redirect_uri(&self) -> String {
        format!("{}/", self.http.base_url.as_str().trim_end_matches('/'))
    }
}

fn load_oidc<G>(get: &G, missing: &mut Vec<&'static str>) -> Result<Option<OidcSettings>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let issuer_url = match (get("OIDC_ISSUER_URL"), get("OIDC_TENANT_ID")) {
        (Some(issuer), _) => Some(parse_url("OIDC_ISSUER_URL", &issuer)?),
        (None, Some(tenant)) => Some(parse_url(
            "OIDC_TENANT_ID",
            &format!("{}/{}/v2.0", ENTRA_AUTHORITY, tenant),
        )?),
        (None, None) => {
            missing.push("OIDC_TENANT_ID");
            None
        }
    };
    let client_id = get("OIDC_CLIENT_ID");
    if client_id.is_none() {
        missing.push("OIDC_CLIENT_ID");
    }
    let client_secret = get("OIDC_CLIENT_SECRET");
    if client_secret.is_none() {
        missing.push("OIDC_CLIENT_SECRET");
    }

    Ok(match (issuer_url, client_id, client_secret) {
        (Some(issuer_url), Some(client_id), Some(client_secret)) => Some(OidcSettings {
            issuer_url,
            client_id,
            client_secret,
        }),
        _ => None,
    })
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

/// Accepts bare or bracketed IPv6 literals (`::`, `[::1]`)
fn parse_host(raw: &str) -> Result<IpAddr, ConfigError> {
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map_err(|e| ConfigError::Invalid {
            key: "HOST",
            message: e.to_string(),
        })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
