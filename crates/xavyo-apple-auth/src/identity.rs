//! Identity claims carried by Apple ID tokens.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AppleAuthError, AppleResult};

/// Handles `aud` being either a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Check if the audience contains a specific value.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(s) => s == value,
            Audience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }
}

impl Default for Audience {
    fn default() -> Self {
        Audience::Multiple(Vec::new())
    }
}

/// Claims decoded from an Apple ID token.
///
/// See <https://developer.apple.com/documentation/sign_in_with_apple/authenticating-users-with-sign-in-with-apple>.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable, team-scoped user identifier.
    pub sub: String,

    #[serde(default)]
    pub iss: String,

    #[serde(default)]
    pub aud: Audience,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Only present when the user shared it, usually on first sign-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub email_verified: Option<bool>,

    /// Whether `email` is a private relay address.
    #[serde(
        default,
        deserialize_with = "lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_private_email: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub nonce_supported: Option<bool>,

    /// 0 = unsupported, 1 = unknown, 2 = likely real.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_user_status: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,

    /// Claims not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl IdentityClaims {
    /// Whether Apple vouches for the email address.
    #[must_use]
    pub fn is_email_verified(&self) -> bool {
        self.email_verified.unwrap_or(false)
    }
}

/// Apple sends some booleans as the strings `"true"` / `"false"`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::String(s)) => match s.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected boolean, got '{other}'"
            ))),
        },
    }
}

/// Decode the payload of a signed token into identity claims.
///
/// This does NOT verify the signature. Only trust the result for a token
/// that has passed [`crate::TokenVerifier::verify`].
///
/// # Errors
///
/// Returns `AppleAuthError::MalformedToken` if the token has fewer than two
/// segments or its payload is not base64url-encoded JSON claims.
pub fn extract_identity(token: &str) -> AppleResult<IdentityClaims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_), Some(payload)) => payload,
        _ => {
            return Err(AppleAuthError::MalformedToken(
                "expected at least header and payload segments".to_string(),
            ))
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AppleAuthError::MalformedToken(format!("invalid payload encoding: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AppleAuthError::MalformedToken(format!("invalid claims: {e}")))
}
