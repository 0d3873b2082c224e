//! Sign in with Apple client.
//!
//! Ties the pieces together: signs a client secret, exchanges the grant at
//! Apple's token endpoint, verifies the returned ID token against Apple's
//! rotating key set and attaches the identity it carries.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::client_secret::sign_client_secret;
use crate::config::AppleConfig;
use crate::context::CallContext;
use crate::credential::SigningCredential;
use crate::error::{AppleAuthError, AppleResult};
use crate::exchange::{default_http_client, GrantParameters, TokenExchangeClient, TokenResponse};
use crate::identity::{extract_identity, IdentityClaims};
use crate::jwks::{JwkSet, KeySetSource, KeyStore};
use crate::verifier::TokenVerifier;

/// Scopes requested in the authorization redirect.
const AUTHORIZE_SCOPE: &str = "name email";

/// Where the builder takes the signing credential from.
enum CredentialSource {
    Loaded(SigningCredential),
    Pem(Vec<u8>),
    File(PathBuf),
}

impl CredentialSource {
    fn load(self) -> AppleResult<SigningCredential> {
        match self {
            CredentialSource::Loaded(credential) => Ok(credential),
            CredentialSource::Pem(data) => SigningCredential::from_pem(&data),
            CredentialSource::File(path) => SigningCredential::from_file(path),
        }
    }
}

/// Builder for [`AppleClient`].
pub struct AppleClientBuilder {
    config: AppleConfig,
    credential: Option<CredentialSource>,
    http_client: Option<reqwest::Client>,
    public_keys: Option<JwkSet>,
    key_set_source: Option<Arc<dyn KeySetSource>>,
}

impl AppleClientBuilder {
    /// Create a builder for `config`.
    #[must_use]
    pub fn new(config: AppleConfig) -> Self {
        Self {
            config,
            credential: None,
            http_client: None,
            public_keys: None,
            key_set_source: None,
        }
    }

    /// Use an already loaded signing credential.
    #[must_use]
    pub fn credential(mut self, credential: SigningCredential) -> Self {
        self.credential = Some(CredentialSource::Loaded(credential));
        self
    }

    /// Load the signing credential from PEM bytes when building.
    #[must_use]
    pub fn credential_pem(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.credential = Some(CredentialSource::Pem(data.into()));
        self
    }

    /// Load the signing credential from a `.p8` file when building.
    #[must_use]
    pub fn credential_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential = Some(CredentialSource::File(path.into()));
        self
    }

    /// Use a caller-configured HTTP client instead of the default one.
    #[must_use]
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Seed the key store with a known key set.
    #[must_use]
    pub fn public_keys(mut self, key_set: JwkSet) -> Self {
        self.public_keys = Some(key_set);
        self
    }

    /// Refresh the key store from `source` instead of Apple's key endpoint.
    #[must_use]
    pub fn key_set_source(mut self, source: Arc<dyn KeySetSource>) -> Self {
        self.key_set_source = Some(source);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// - `ConfigInvalid` - the configuration does not validate
    /// - any credential loading error
    /// - `KeyParse` - the seeded key set contains a malformed entry
    /// - `Http` - the default HTTP client cannot be created
    pub fn build(self) -> AppleResult<AppleClient> {
        self.config.validate()?;

        let credential = self.credential.map(CredentialSource::load).transpose()?;

        let http_client = match self.http_client {
            Some(http_client) => http_client,
            None => default_http_client(self.config.request_timeout)?,
        };

        let exchange = Arc::new(TokenExchangeClient::new(
            http_client,
            self.config.client_id.clone(),
            self.config.endpoints.clone(),
        ));

        let source = self
            .key_set_source
            .unwrap_or_else(|| Arc::clone(&exchange) as Arc<dyn KeySetSource>);
        let key_store = KeyStore::new(source);
        if let Some(ref key_set) = self.public_keys {
            key_store.replace_all(key_set)?;
        }

        let verifier = TokenVerifier::new(self.config.validation());

        debug!(
            client_id = %self.config.client_id,
            has_credential = credential.is_some(),
            seeded_keys = key_store.len(),
            "Apple client built"
        );

        Ok(AppleClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                credential,
                exchange,
                key_store,
                verifier,
            }),
        })
    }
}

struct ClientInner {
    config: AppleConfig,
    credential: Option<SigningCredential>,
    exchange: Arc<TokenExchangeClient>,
    key_store: KeyStore,
    verifier: TokenVerifier,
}

/// Sign in with Apple client.
///
/// Cheap to clone; clones share the key store and HTTP client.
///
/// # Example
///
/// ```rust,ignore
/// use xavyo_apple_auth::{AppleClient, AppleConfig, CallContext};
///
/// let config = AppleConfig::from_env()?;
/// let client = AppleClient::builder(config)
///     .credential_file("/etc/secrets/AuthKey_ABC123.p8")
///     .build()?;
///
/// // Redirect the user to Apple
/// let url = client.callback_url(&state);
///
/// // Then, on the callback
/// let tokens = client.authenticate(&code, &CallContext::background()).await?;
/// let identity = tokens.identity.expect("authenticate always verifies the ID token");
/// ```
#[derive(Clone)]
pub struct AppleClient {
    inner: Arc<ClientInner>,
}

impl AppleClient {
    /// Start building a client for `config`.
    #[must_use]
    pub fn builder(config: AppleConfig) -> AppleClientBuilder {
        AppleClientBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &AppleConfig {
        &self.inner.config
    }

    /// Keys currently trusted for ID token verification.
    #[must_use]
    pub fn key_store(&self) -> &KeyStore {
        &self.inner.key_store
    }

    /// Whether a signing credential is loaded.
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.inner.credential.is_some()
    }

    /// Sign a fresh client secret.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if no credential is loaded, or `Signing`.
    pub fn client_secret(&self) -> AppleResult<String> {
        let credential = self
            .inner
            .credential
            .as_ref()
            .ok_or(AppleAuthError::MissingCredential)?;

        let config = &self.inner.config;
        sign_client_secret(
            credential,
            &config.team_id,
            &config.client_id,
            &config.key_id,
            config.token_ttl,
        )
    }

    /// URL to redirect the user to for authorization.
    #[must_use]
    pub fn callback_url(&self, state: &str) -> String {
        let config = &self.inner.config;
        let mut url = format!(
            "{}?response_type=code",
            self.inner.exchange.endpoints().authorize_url
        );
        if let Some(ref redirect_uri) = config.redirect_uri {
            url.push_str("&redirect_uri=");
            url.push_str(&urlencoding::encode(redirect_uri));
        }
        url.push_str(&format!(
            "&client_id={}&state={}&scope={}",
            urlencoding::encode(&config.client_id),
            urlencoding::encode(state),
            urlencoding::encode(AUTHORIZE_SCOPE),
        ));
        url
    }

    /// Exchange an authorization code and verify the returned ID token.
    ///
    /// The returned response carries the verified identity in `identity`.
    ///
    /// # Errors
    ///
    /// - `MissingCredential` - no credential loaded; nothing is sent
    /// - `Provider` / `UnexpectedStatus` / `Http` - the exchange failed
    /// - `MalformedToken` - Apple returned no ID token
    /// - any verification error of [`TokenVerifier::verify`]
    #[instrument(skip(self, auth_code, ctx))]
    pub async fn authenticate(
        &self,
        auth_code: &str,
        ctx: &CallContext,
    ) -> AppleResult<TokenResponse> {
        let client_secret = self.client_secret()?;

        let grant = GrantParameters::AuthorizationCode {
            code: auth_code,
            redirect_uri: self.inner.config.redirect_uri.as_deref(),
        };
        let mut tokens = self
            .inner
            .exchange
            .exchange(&grant, &client_secret, ctx)
            .await?;

        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AppleAuthError::MalformedToken("token response has no id_token".to_string())
        })?;

        self.inner
            .verifier
            .verify(id_token, &self.inner.key_store, ctx)
            .await?;
        let identity = extract_identity(id_token)?;

        info!(subject = %identity.sub, "Apple sign-in authenticated");

        tokens.identity = Some(identity);
        Ok(tokens)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The ID token in the response, if any, is not verified.
    ///
    /// # Errors
    ///
    /// - `MissingCredential` - no credential loaded; nothing is sent
    /// - `Provider` / `UnexpectedStatus` / `Http` - the exchange failed
    #[instrument(skip(self, refresh_token, ctx))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &CallContext,
    ) -> AppleResult<TokenResponse> {
        let client_secret = self.client_secret()?;

        let grant = GrantParameters::RefreshToken { refresh_token };
        self.inner
            .exchange
            .exchange(&grant, &client_secret, ctx)
            .await
    }

    /// Verify a token against the client's key store and validation rules.
    ///
    /// # Errors
    ///
    /// Any error of [`TokenVerifier::verify`].
    pub async fn validate_token(&self, token: &str, ctx: &CallContext) -> AppleResult<()> {
        self.inner
            .verifier
            .verify(token, &self.inner.key_store, ctx)
            .await
    }

    /// Read the identity claims of a token without verifying it.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` if the payload cannot be decoded.
    pub fn parse_identity(&self, token: &str) -> AppleResult<IdentityClaims> {
        extract_identity(token)
    }

    /// Replace the trusted keys with `key_set`.
    ///
    /// # Errors
    ///
    /// Returns `KeyParse` and keeps the current keys if any entry is malformed.
    pub fn set_public_keys(&self, key_set: &JwkSet) -> AppleResult<()> {
        self.inner.key_store.replace_all(key_set)
    }

    /// Fetch Apple's current key set and install it, returning the key count.
    ///
    /// # Errors
    ///
    /// Any key set fetch error, or `KeyParse`.
    pub async fn fetch_public_keys(&self, ctx: &CallContext) -> AppleResult<usize> {
        let key_set = self.inner.exchange.fetch_key_set(ctx).await?;
        self.inner.key_store.replace_all(&key_set)?;
        Ok(key_set.keys.len())
    }
}

impl std::fmt::Debug for AppleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleClient")
            .field("client_id", &self.inner.config.client_id)
            .field("has_credential", &self.has_credential())
            .field("key_store", &self.inner.key_store)
            .finish_non_exhaustive()
    }
}
