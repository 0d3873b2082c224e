//! ID token signature and claim verification.

use std::collections::HashSet;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use tracing::{debug, info, instrument, warn};

use crate::context::CallContext;
use crate::error::{AppleAuthError, AppleResult};
use crate::identity::IdentityClaims;
use crate::jwks::{is_rsa_algorithm, KeyStore};

/// Default clock skew tolerance in seconds.
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// Claim checks applied after the signature is verified.
///
/// `exp` and `nbf` are checked whenever a token carries them and must be
/// integer UNIX seconds. Issuer and audience are only checked when
/// configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Clock skew tolerance in seconds.
    pub leeway: u64,
    /// Expected `iss` claim.
    pub issuer: Option<String>,
    /// Accepted `aud` values; the token must carry at least one.
    pub audience: Option<Vec<String>>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            leeway: DEFAULT_LEEWAY_SECS,
            issuer: None,
            audience: None,
        }
    }
}

impl ValidationConfig {
    /// Create a validation config with custom leeway.
    #[must_use]
    pub fn with_leeway(leeway: u64) -> Self {
        Self {
            leeway,
            ..Default::default()
        }
    }

    /// Set the expected issuer.
    #[must_use]
    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.issuer = Some(iss.into());
        self
    }

    /// Set the expected audience.
    #[must_use]
    pub fn audience(mut self, aud: Vec<impl Into<String>>) -> Self {
        self.audience = Some(aud.into_iter().map(Into::into).collect());
        self
    }

    fn to_validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.required_spec_claims = HashSet::new();

        if let Some(ref issuer) = self.issuer {
            validation.set_issuer(&[issuer]);
        }

        match self.audience {
            Some(ref audience) => validation.set_audience(audience.as_slice()),
            None => validation.validate_aud = false,
        }

        validation
    }
}

/// The parts of a JWS header verification depends on.
struct TokenHeader {
    kid: String,
    alg: Algorithm,
}

fn parse_header(token: &str) -> AppleResult<TokenHeader> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() < 3 {
        return Err(AppleAuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|e| AppleAuthError::MalformedToken(format!("invalid header encoding: {e}")))?;
    let header: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| AppleAuthError::MalformedToken(format!("invalid header: {e}")))?;

    let kid = header
        .get("kid")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppleAuthError::MalformedToken("header has no string kid".to_string()))?
        .to_string();

    let alg_name = header
        .get("alg")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppleAuthError::InvalidAlgorithm("missing".to_string()))?;
    let alg = Algorithm::from_str(alg_name)
        .ok()
        .filter(|alg| is_rsa_algorithm(*alg))
        .ok_or_else(|| AppleAuthError::InvalidAlgorithm(alg_name.to_string()))?;

    Ok(TokenHeader { kid, alg })
}

/// Map jsonwebtoken errors to `AppleAuthError`.
/// jsonwebtoken skips temporal claims it cannot parse as `u64`.
fn check_numeric_dates(claims: &serde_json::Value) -> AppleResult<()> {
    for claim in ["exp", "nbf"] {
        match claims.get(claim) {
            None => {}
            Some(value) if value.is_u64() => {}
            Some(value) => {
                return Err(AppleAuthError::MalformedToken(format!(
                    "{claim} must be integer seconds, got {value}"
                )));
            }
        }
    }
    Ok(())
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AppleAuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AppleAuthError::TokenExpired,
        ErrorKind::ImmatureSignature => AppleAuthError::TokenNotYetValid,
        ErrorKind::InvalidSignature => AppleAuthError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => AppleAuthError::InvalidAlgorithm(err.to_string()),
        ErrorKind::InvalidIssuer => AppleAuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AppleAuthError::InvalidAudience,
        ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => AppleAuthError::InvalidIssuer,
        ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => AppleAuthError::InvalidAudience,
        _ => AppleAuthError::MalformedToken(err.to_string()),
    }
}

/// Verifies Apple-signed tokens against the keys in a [`KeyStore`].
#[derive(Debug, Clone, Default)]
pub struct TokenVerifier {
    config: ValidationConfig,
}

impl TokenVerifier {
    /// Create a verifier applying `config` to every token.
    #[must_use]
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// The claim checks this verifier applies.
    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Verify a token's signature and claims.
    ///
    /// An unknown `kid` triggers one refresh of `keys`, bounded by `ctx`.
    ///
    /// # Errors
    ///
    /// - `MalformedToken` - not a compact JWS, or the header has no string kid
    /// - `InvalidAlgorithm` - not an RSA algorithm, or not the key's declared one
    /// - `UnknownKey` - kid absent after refreshing the key set
    /// - `InvalidSignature` - signature does not match the key
    /// - `TokenExpired` / `TokenNotYetValid` - temporal claims out of range
    /// - `MalformedToken` - `exp` or `nbf` present but not integer seconds
    /// - `InvalidIssuer` / `InvalidAudience` - configured checks failed
    #[instrument(skip(self, token, keys, ctx))]
    pub async fn verify(&self, token: &str, keys: &KeyStore, ctx: &CallContext) -> AppleResult<()> {
        self.decode_verified(token, keys, ctx).await.map(|_| ())
    }

    /// Verify a token and return its identity claims.
    ///
    /// # Errors
    ///
    /// Same as [`TokenVerifier::verify`], plus `MalformedToken` if the
    /// verified payload is not a valid set of identity claims.
    #[instrument(skip(self, token, keys, ctx))]
    pub async fn verify_claims(
        &self,
        token: &str,
        keys: &KeyStore,
        ctx: &CallContext,
    ) -> AppleResult<IdentityClaims> {
        let payload = self.decode_verified(token, keys, ctx).await?;
        serde_json::from_value(payload)
            .map_err(|e| AppleAuthError::MalformedToken(format!("invalid claims: {e}")))
    }

    async fn decode_verified(
        &self,
        token: &str,
        keys: &KeyStore,
        ctx: &CallContext,
    ) -> AppleResult<serde_json::Value> {
        let header = parse_header(token).map_err(|e| {
            warn!(error = %e, "Rejected token header");
            e
        })?;

        debug!(kid = %header.kid, alg = ?header.alg, "Verifying token");

        let entry = keys.lookup(&header.kid, ctx).await?;

        if let Some(declared) = entry.algorithm() {
            if declared != header.alg {
                warn!(
                    kid = %header.kid,
                    declared = ?declared,
                    actual = ?header.alg,
                    "Token algorithm does not match key"
                );
                return Err(AppleAuthError::InvalidAlgorithm(format!(
                    "{:?} does not match key algorithm {:?}",
                    header.alg, declared
                )));
            }
        }

        let validation = self.config.to_validation(header.alg);
        let data = decode::<serde_json::Value>(token, entry.decoding_key(), &validation)
            .map_err(|e| {
                let err = map_jwt_error(e);
                warn!(kid = %header.kid, error = %err, "Token verification failed");
                err
            })?;

        check_numeric_dates(&data.claims).map_err(|e| {
            warn!(kid = %header.kid, error = %e, "Rejected temporal claims");
            e
        })?;

        info!(kid = %header.kid, "Token verified successfully");
        Ok(data.claims)
    }
}
