//! Client secret generation.
//!
//! Apple does not issue static client secrets. Each token request carries a
//! short-lived JWT signed with the team's ES256 key instead.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Header};
use serde::{Deserialize, Serialize};

use crate::credential::SigningCredential;
use crate::error::{AppleAuthError, AppleResult};

/// Audience Apple expects in every client secret.
pub const APPLE_AUDIENCE: &str = "https://appleid.apple.com";

/// Default client secret lifetime (one hour).
pub const DEFAULT_CLIENT_SECRET_TTL: Duration = Duration::from_secs(3600);

/// Longest client secret lifetime Apple accepts (six months).
pub const MAX_CLIENT_SECRET_TTL: Duration = Duration::from_secs(15_777_000);

/// Claims of the client secret JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecretClaims {
    /// Apple Developer Team ID.
    pub iss: String,
    /// Issued at (UNIX seconds).
    pub iat: u64,
    /// Expiration (UNIX seconds).
    pub exp: u64,
    /// Always [`APPLE_AUDIENCE`].
    pub aud: String,
    /// Services ID the secret authenticates.
    pub sub: String,
}

impl ClientSecretClaims {
    /// Build claims issued at `issued_at` and valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `AppleAuthError::Signing` if the expiry overflows.
    pub fn new(
        team_id: &str,
        client_id: &str,
        issued_at: u64,
        ttl: Duration,
    ) -> AppleResult<Self> {
        let exp = issued_at
            .checked_add(ttl.as_secs())
            .ok_or_else(|| AppleAuthError::Signing("ttl out of range".to_string()))?;

        Ok(Self {
            iss: team_id.to_string(),
            iat: issued_at,
            exp,
            aud: APPLE_AUDIENCE.to_string(),
            sub: client_id.to_string(),
        })
    }
}

/// Sign a fresh client secret.
///
/// The result is never cached; every token request should carry its own.
///
/// # Arguments
///
/// * `credential` - The team's signing key
/// * `team_id` - Apple Developer Team ID (`iss`)
/// * `client_id` - Services ID (`sub`)
/// * `key_id` - ID of the signing key in the developer account (`kid` header)
/// * `ttl` - Lifetime of the secret
///
/// # Errors
///
/// Returns `AppleAuthError::Signing` if `ttl` is zero or longer than
/// [`MAX_CLIENT_SECRET_TTL`], the clock is unusable, or the key material
/// cannot produce a signature.
pub fn sign_client_secret(
    credential: &SigningCredential,
    team_id: &str,
    client_id: &str,
    key_id: &str,
    ttl: Duration,
) -> AppleResult<String> {
    if ttl.is_zero() || ttl > MAX_CLIENT_SECRET_TTL {
        return Err(AppleAuthError::Signing(format!(
            "ttl out of range: {}s (max {}s)",
            ttl.as_secs(),
            MAX_CLIENT_SECRET_TTL.as_secs()
        )));
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppleAuthError::Signing(format!("Time error: {e}")))?
        .as_secs();

    let claims = ClientSecretClaims::new(team_id, client_id, now, ttl)?;

    let mut header = Header::new(credential.algorithm());
    header.kid = Some(key_id.to_string());

    encode(&header, &claims, credential.encoding_key())
        .map_err(|e| AppleAuthError::Signing(e.to_string()))
}
