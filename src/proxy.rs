//! Authenticated relay to the downstream chat webhook.

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{
        header::{self, HeaderName},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use url::Url;

use crate::config::{WebhookConfig, PROXY_CONNECT_TIMEOUT_SECS};

/// Headers that describe a single connection and are never relayed
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Which configured webhook a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookTarget {
    Production,
    Test,
}

impl WebhookTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "webhook",
            Self::Test => "webhook-test",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No URL configured for {}", .0.as_str())]
    NotConfigured(WebhookTarget),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match &self {
            ProxyError::NotConfigured(target) => {
                tracing::error!(webhook = target.as_str(), "Webhook URL not configured");
                "Webhook URL not configured"
            }
            ProxyError::Upstream(e) => {
                tracing::error!(error = %e, timeout = e.is_timeout(), "Proxy request failed");
                "Proxy request failed"
            }
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
    }
}

/// Forwards requests to the webhook with the configured Basic credentials.
#[derive(Clone)]
pub struct ProxyForwarder {
    client: reqwest::Client,
    url: Option<Url>,
    test_url: Option<Url>,
    credentials: Option<(String, String)>,
}

impl ProxyForwarder {
    pub fn new(config: &WebhookConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(PROXY_CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            url: config.url.clone(),
            test_url: config.test_url.clone(),
            credentials,
        })
    }

    fn url_for(&self, target: WebhookTarget) -> Option<&Url> {
        match target {
            WebhookTarget::Production => self.url.as_ref(),
            WebhookTarget::Test => self.test_url.as_ref(),
        }
    }

    /// Relay one request and stream the upstream response back.
    ///
    /// GET and HEAD go out without a body. Single attempt, no retry.
    pub async fn forward(
        &self,
        target: WebhookTarget,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, ProxyError> {
        let url = self
            .url_for(target)
            .ok_or(ProxyError::NotConfigured(target))?;

        let mut request = self.client.request(method.clone(), url.clone());

        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }
        if let Some(accept) = headers.get(header::ACCEPT) {
            request = request.header(header::ACCEPT, accept.clone());
        }
        if method != Method::GET && method != Method::HEAD {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("application/json"));
            request = request.header(header::CONTENT_TYPE, content_type).body(body);
        }

        let upstream = request.send().await?;
        let status = upstream.status();
        tracing::info!(
            webhook = target.as_str(),
            method = %method,
            status = status.as_u16(),
            "Webhook responded"
        );

        let mut response_headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            if is_relayed_header(name) {
                response_headers.append(name.clone(), value.clone());
            }
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Whether an upstream response header may be copied to the client.
/// `content-length` is dropped because the body is re-streamed.
fn is_relayed_header(name: &HeaderName) -> bool {
    *name != header::CONTENT_LENGTH && !HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: Option<&str>) -> WebhookConfig {
        WebhookConfig {
            url: url.map(|u| Url::parse(u).unwrap()),
            test_url: None,
            username: Some("svc".to_string()),
            password: Some("pw".to_string()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        for name in ["connection", "keep-alive", "transfer-encoding", "upgrade", "content-length"] {
            assert!(!is_relayed_header(&HeaderName::from_static(name)), "{}", name);
        }
        assert!(is_relayed_header(&header::CONTENT_TYPE));
        assert!(is_relayed_header(&HeaderName::from_static("x-custom")));
    }

    #[tokio::test]
    async fn test_unconfigured_target_is_an_error() {
        let proxy = ProxyForwarder::new(&config(Some("http://127.0.0.1:9/hook"))).unwrap();
        let err = proxy
            .forward(WebhookTarget::Test, Method::POST, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotConfigured(WebhookTarget::Test)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_target_names() {
        assert_eq!(WebhookTarget::Production.as_str(), "webhook");
        assert_eq!(WebhookTarget::Test.as_str(), "webhook-test");
    }
}
