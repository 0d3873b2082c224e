//! HTTP calls to Apple's token and key set endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::AppleEndpoints;
use crate::context::CallContext;
use crate::error::{AppleAuthError, AppleResult, ProviderError};
use crate::identity::IdentityClaims;
use crate::jwks::{JwkSet, KeySetSource};

/// Maximum key set response size (512KB).
const MAX_JWKS_SIZE: usize = 512 * 1024;

/// Longest error body kept in `UnexpectedStatus`.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Build the HTTP client used when the caller does not supply one.
///
/// # Errors
///
/// Returns `AppleAuthError::Http` if the TLS backend cannot be initialised.
pub fn default_http_client(timeout: Duration) -> AppleResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Grant presented to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantParameters<'a> {
    /// Exchange an authorization code from the redirect.
    AuthorizationCode {
        code: &'a str,
        redirect_uri: Option<&'a str>,
    },
    /// Obtain a new access token for a returning user.
    RefreshToken { refresh_token: &'a str },
}

impl GrantParameters<'_> {
    /// Value of the `grant_type` form field.
    #[must_use]
    pub fn grant_type(&self) -> &'static str {
        match self {
            GrantParameters::AuthorizationCode { .. } => "authorization_code",
            GrantParameters::RefreshToken { .. } => "refresh_token",
        }
    }

    fn form_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![("grant_type", self.grant_type())];
        match *self {
            GrantParameters::AuthorizationCode { code, redirect_uri } => {
                fields.push(("code", code));
                if let Some(redirect_uri) = redirect_uri {
                    fields.push(("redirect_uri", redirect_uri));
                }
            }
            GrantParameters::RefreshToken { refresh_token } => {
                fields.push(("refresh_token", refresh_token));
            }
        }
        fields
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    #[serde(default)]
    pub token_type: String,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,

    /// Only issued for the authorization code grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Verified identity, filled in by `AppleClient::authenticate`.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityClaims>,
}

/// Client for Apple's token and key set endpoints.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http_client: reqwest::Client,
    client_id: String,
    endpoints: AppleEndpoints,
}

impl TokenExchangeClient {
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        client_id: impl Into<String>,
        endpoints: AppleEndpoints,
    ) -> Self {
        Self {
            http_client,
            client_id: client_id.into(),
            endpoints,
        }
    }

    #[must_use]
    pub fn endpoints(&self) -> &AppleEndpoints {
        &self.endpoints
    }

    /// POST a grant to the token endpoint.
    ///
    /// # Errors
    ///
    /// - `Provider` - Apple answered non-2xx with an error body
    /// - `UnexpectedStatus` - non-2xx without a decodable error body
    /// - `Http` - transport failure or undecodable success body
    /// - `Canceled` / `DeadlineExceeded` - interrupted by `ctx`
    #[instrument(skip(self, grant, client_secret, ctx), fields(grant_type = grant.grant_type()))]
    pub async fn exchange(
        &self,
        grant: &GrantParameters<'_>,
        client_secret: &str,
        ctx: &CallContext,
    ) -> AppleResult<TokenResponse> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", client_secret),
        ];
        form.extend(grant.form_fields());

        ctx.run(async {
            let response = self
                .http_client
                .post(&self.endpoints.token_url)
                .form(&form)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await?;
                return Err(Self::rejection(status.as_u16(), body));
            }

            let tokens: TokenResponse = response.json().await?;
            debug!(
                has_id_token = tokens.id_token.is_some(),
                has_refresh_token = tokens.refresh_token.is_some(),
                "Token exchange succeeded"
            );
            Ok(tokens)
        })
        .await
    }

    fn rejection(status: u16, body: String) -> AppleAuthError {
        match serde_json::from_str::<ProviderError>(&body) {
            Ok(error) => {
                warn!(status, error = %error.error, "Apple rejected token request");
                AppleAuthError::Provider(error)
            }
            Err(_) => {
                warn!(status, "Apple token endpoint returned an unexpected response");
                AppleAuthError::UnexpectedStatus {
                    status,
                    body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                }
            }
        }
    }

    /// GET the current public key set.
    ///
    /// # Errors
    ///
    /// - `KeyEndpointUnavailable` - the request could not be sent
    /// - `KeyFetch` - non-2xx, oversized or undecodable response
    /// - `Canceled` / `DeadlineExceeded` - interrupted by `ctx`
    #[instrument(skip(self, ctx))]
    pub async fn fetch_key_set(&self, ctx: &CallContext) -> AppleResult<JwkSet> {
        ctx.run(async {
            let response = self
                .http_client
                .get(&self.endpoints.keys_url)
                .send()
                .await
                .map_err(AppleAuthError::KeyEndpointUnavailable)?;

            if !response.status().is_success() {
                return Err(AppleAuthError::KeyFetch(format!(
                    "HTTP {}",
                    response.status()
                )));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| AppleAuthError::KeyFetch(format!("Failed to read response: {e}")))?;

            if bytes.len() > MAX_JWKS_SIZE {
                return Err(AppleAuthError::KeyFetch(format!(
                    "Response too large: {} bytes (max {MAX_JWKS_SIZE})",
                    bytes.len()
                )));
            }

            let key_set: JwkSet = serde_json::from_slice(&bytes)
                .map_err(|e| AppleAuthError::KeyFetch(format!("Failed to parse JWKS: {e}")))?;

            debug!(key_count = key_set.keys.len(), "Fetched Apple public key set");
            Ok(key_set)
        })
        .await
    }
}

#[async_trait]
impl KeySetSource for TokenExchangeClient {
    async fn fetch_key_set(&self, ctx: &CallContext) -> AppleResult<JwkSet> {
        TokenExchangeClient::fetch_key_set(self, ctx).await
    }
}
