//! Sign in with Apple client configuration.

use std::env;
use std::time::Duration;

use crate::client_secret::{DEFAULT_CLIENT_SECRET_TTL, MAX_CLIENT_SECRET_TTL};
use crate::error::{AppleAuthError, AppleResult};
use crate::verifier::{ValidationConfig, DEFAULT_LEEWAY_SECS};

/// Issuer of every Apple ID token.
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Apple's production base URL.
pub const APPLE_BASE_URL: &str = "https://appleid.apple.com";

/// Default timeout for requests to Apple.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Apple endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppleEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub keys_url: String,
}

impl AppleEndpoints {
    /// Derive every endpoint from a base URL (e.g. a mock server).
    #[must_use]
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{base}/auth/authorize"),
            token_url: format!("{base}/auth/token"),
            keys_url: format!("{base}/auth/keys"),
        }
    }
}

impl Default for AppleEndpoints {
    fn default() -> Self {
        Self::from_base_url(APPLE_BASE_URL)
    }
}

/// Sign in with Apple client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppleConfig {
    /// Apple Developer Team ID.
    pub team_id: String,
    /// Services ID (the OAuth client ID).
    pub client_id: String,
    /// ID of the signing key in the developer account.
    pub key_id: String,
    /// Redirect URI registered for the Services ID.
    pub redirect_uri: Option<String>,
    /// Lifetime of each generated client secret.
    pub token_ttl: Duration,
    /// Timeout of the default HTTP client.
    pub request_timeout: Duration,
    pub endpoints: AppleEndpoints,
    /// Require `iss` to be [`APPLE_ISSUER`] (default: true).
    pub validate_issuer: bool,
    /// Require `aud` to contain `client_id` (default: true).
    pub validate_audience: bool,
    /// Clock skew tolerance in seconds.
    pub leeway: u64,
}

impl AppleConfig {
    /// Create a configuration with defaults for everything but the identifiers.
    #[must_use]
    pub fn new(
        team_id: impl Into<String>,
        client_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            client_id: client_id.into(),
            key_id: key_id.into(),
            redirect_uri: None,
            token_ttl: DEFAULT_CLIENT_SECRET_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            endpoints: AppleEndpoints::default(),
            validate_issuer: true,
            validate_audience: true,
            leeway: DEFAULT_LEEWAY_SECS,
        }
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: AppleEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Point every endpoint at `base_url`.
    #[must_use]
    pub fn with_base_url(self, base_url: &str) -> Self {
        self.with_endpoints(AppleEndpoints::from_base_url(base_url))
    }

    #[must_use]
    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    /// Skip the `iss` check when verifying ID tokens.
    #[must_use]
    pub fn skip_issuer_validation(mut self) -> Self {
        self.validate_issuer = false;
        self
    }

    /// Skip the `aud` check when verifying ID tokens.
    #[must_use]
    pub fn skip_audience_validation(mut self) -> Self {
        self.validate_audience = false;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `APPLE_TEAM_ID`: Apple Developer Team ID
    /// - `APPLE_CLIENT_ID`: Services ID
    /// - `APPLE_KEY_ID`: Signing key ID
    ///
    /// Optional:
    /// - `APPLE_REDIRECT_URI`: Registered redirect URI
    /// - `APPLE_TOKEN_TTL_SECS`: Client secret lifetime (default: 3600)
    /// - `APPLE_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 10)
    /// - `APPLE_BASE_URL`: Override for Apple's base URL
    pub fn from_env() -> AppleResult<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> AppleResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppleAuthError::ConfigMissing {
                    var: var.to_string(),
                })
        };
        let seconds = |var: &str| -> AppleResult<Option<Duration>> {
            lookup(var)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|e| AppleAuthError::ConfigInvalid {
                            var: var.to_string(),
                            reason: e.to_string(),
                        })
                })
                .transpose()
        };

        let mut config = Self::new(
            required("APPLE_TEAM_ID")?,
            required("APPLE_CLIENT_ID")?,
            required("APPLE_KEY_ID")?,
        );

        config.redirect_uri = lookup("APPLE_REDIRECT_URI").filter(|v| !v.is_empty());

        if let Some(ttl) = seconds("APPLE_TOKEN_TTL_SECS")? {
            config.token_ttl = ttl;
        }
        if let Some(timeout) = seconds("APPLE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = timeout;
        }
        if let Some(base_url) = lookup("APPLE_BASE_URL").filter(|v| !v.is_empty()) {
            config.endpoints = AppleEndpoints::from_base_url(&base_url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can produce valid client secrets.
    pub fn validate(&self) -> AppleResult<()> {
        for (var, value) in [
            ("APPLE_TEAM_ID", &self.team_id),
            ("APPLE_CLIENT_ID", &self.client_id),
            ("APPLE_KEY_ID", &self.key_id),
        ] {
            if value.trim().is_empty() {
                return Err(AppleAuthError::ConfigInvalid {
                    var: var.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        if self.token_ttl.is_zero() || self.token_ttl > MAX_CLIENT_SECRET_TTL {
            return Err(AppleAuthError::ConfigInvalid {
                var: "APPLE_TOKEN_TTL_SECS".to_string(),
                reason: format!(
                    "must be between 1 and {} seconds",
                    MAX_CLIENT_SECRET_TTL.as_secs()
                ),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(AppleAuthError::ConfigInvalid {
                var: "APPLE_REQUEST_TIMEOUT_SECS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Claim checks applied to ID tokens.
    #[must_use]
    pub fn validation(&self) -> ValidationConfig {
        let mut validation = ValidationConfig::with_leeway(self.leeway);
        if self.validate_issuer {
            validation = validation.issuer(APPLE_ISSUER);
        }
        if self.validate_audience {
            validation = validation.audience(vec![self.client_id.clone()]);
        }
        validation
    }
}
