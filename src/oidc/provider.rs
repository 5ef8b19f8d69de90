//! Network-backed identity provider.
//!
//! `HttpDiscovery` fetches `/.well-known/openid-configuration` and the JWKS
//! document; the resulting `DiscoveredProvider` redeems authorization codes at
//! the token endpoint and verifies the returned ID token with `openidconnect`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use openidconnect::core::{CoreIdToken, CoreIdTokenVerifier, CoreJsonWebKeySet};
use openidconnect::{ClientId, ClientSecret, IssuerUrl, Nonce};
use serde::Deserialize;
use url::Url;

use super::{decode_claims, IdentityProvider, OidcError, ProviderDiscovery, TokenSet};
use crate::config::OidcSettings;

/// Subset of the provider metadata document that the login flow needs
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
    #[serde(default)]
    end_session_endpoint: Option<String>,
}

/// Token endpoint response
#[derive(Deserialize)]
struct TokenResponseData {
    access_token: String,
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Discovers the provider over HTTP.
pub struct HttpDiscovery {
    settings: OidcSettings,
    http_client: reqwest::Client,
}

impl HttpDiscovery {
    pub fn new(settings: &OidcSettings, http_client: reqwest::Client) -> Self {
        Self {
            settings: settings.clone(),
            http_client,
        }
    }

    fn well_known_url(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            self.settings.issuer_url.as_str().trim_end_matches('/')
        )
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, OidcError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| OidcError::ProviderUnreachable(format!("GET {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(OidcError::ProviderUnreachable(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OidcError::InvalidMetadata(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl ProviderDiscovery for HttpDiscovery {
    async fn discover(&self) -> Result<Arc<dyn IdentityProvider>, OidcError> {
        let document: DiscoveryDocument = self.fetch_json(&self.well_known_url()).await?;
        let jwks: CoreJsonWebKeySet = self.fetch_json(&document.jwks_uri).await?;

        let issuer = IssuerUrl::new(document.issuer.clone())
            .map_err(|e| OidcError::InvalidMetadata(format!("issuer: {}", e)))?;
        let authorization_endpoint = parse_endpoint("authorization_endpoint", &document.authorization_endpoint)?;
        let token_endpoint = parse_endpoint("token_endpoint", &document.token_endpoint)?;
        let end_session_endpoint = document
            .end_session_endpoint
            .as_deref()
            .map(|raw| parse_endpoint("end_session_endpoint", raw))
            .transpose()?;

        tracing::info!(
            issuer = %document.issuer,
            has_end_session = end_session_endpoint.is_some(),
            "Identity provider discovered"
        );

        Ok(Arc::new(DiscoveredProvider {
            issuer,
            authorization_endpoint,
            token_endpoint,
            end_session_endpoint,
            jwks,
            client_id: self.settings.client_id.clone(),
            client_secret: self.settings.client_secret.clone(),
            http_client: self.http_client.clone(),
        }))
    }
}

fn parse_endpoint(name: &str, raw: &str) -> Result<Url, OidcError> {
    Url::parse(raw).map_err(|e| OidcError::InvalidMetadata(format!("{} '{}': {}", name, raw, e)))
}

/// Provider metadata and signing keys captured at discovery time.
pub struct DiscoveredProvider {
    issuer: IssuerUrl,
    authorization_endpoint: Url,
    token_endpoint: Url,
    end_session_endpoint: Option<Url>,
    jwks: CoreJsonWebKeySet,
    client_id: String,
    client_secret: String,
    http_client: reqwest::Client,
}

impl DiscoveredProvider {
    /// Check signature, issuer, audience and expiry of a raw ID token.
    fn verify_id_token(&self, raw: &str) -> Result<(), OidcError> {
        let id_token = CoreIdToken::from_str(raw)
            .map_err(|e| OidcError::InvalidIdToken(format!("unparseable: {}", e)))?;

        let verifier = CoreIdTokenVerifier::new_confidential_client(
            ClientId::new(self.client_id.clone()),
            ClientSecret::new(self.client_secret.clone()),
            self.issuer.clone(),
            self.jwks.clone(),
        );

        // The nonce is compared against the login transaction by the caller
        id_token
            .claims(&verifier, |_: Option<&Nonce>| -> Result<(), String> { Ok(()) })
            .map_err(|e| OidcError::InvalidIdToken(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for DiscoveredProvider {
    fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    fn end_session_endpoint(&self) -> Option<&Url> {
        self.end_session_endpoint.as_ref()
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, OidcError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http_client
            .post(self.token_endpoint.as_str())
            .form(&params)
            .send()
            .await
            .map_err(|e| OidcError::TokenExchange(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Token exchange failed");
            return Err(OidcError::TokenExchange(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        let data: TokenResponseData = response
            .json()
            .await
            .map_err(|e| OidcError::TokenExchange(format!("Failed to parse response: {}", e)))?;

        let id_token = data
            .id_token
            .ok_or_else(|| OidcError::InvalidIdToken("token response carries no id_token".to_string()))?;

        self.verify_id_token(&id_token)?;
        let claims = decode_claims(&id_token)?;

        Ok(TokenSet {
            access_token: data.access_token,
            id_token,
            expires_in: data.expires_in,
            claims,
        })
    }
}
