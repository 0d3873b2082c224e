//! Error types for Sign in with Apple operations.
//!
//! Provides explicit error variants for every failure mode so callers can
//! branch on the kind of failure instead of matching strings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error payload returned by Apple's token endpoint on a non-success status.
///
/// See <https://developer.apple.com/documentation/sign_in_with_apple/errorresponse>.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    /// Machine-readable error code (e.g. `invalid_grant`).
    pub error: String,

    /// Human-readable description, when Apple supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ProviderError {
    /// Create a provider error with just an error code.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: None,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Sign in with Apple error types.
#[derive(Debug, Error)]
pub enum AppleAuthError {
    // Credential and configuration errors
    /// The credential bytes are not a decodable PEM envelope.
    #[error("Invalid credential envelope: {0}")]
    CredentialFormat(String),

    /// Key material inside a credential or key set entry is malformed.
    #[error("Invalid key{}: {reason}", .kid.as_deref().map(|kid| format!(" '{kid}'")).unwrap_or_default())]
    KeyParse {
        /// Key identifier of the offending key set entry, if any.
        kid: Option<String>,
        reason: String,
    },

    /// The credential file could not be read.
    #[error("Failed to read credential file {}: {source}", .path.display())]
    CredentialIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A signing operation was attempted without a loaded credential.
    #[error("No signing credential loaded")]
    MissingCredential,

    /// The private key belongs to an algorithm family the client cannot sign with.
    #[error("Unsupported signing key: {0}")]
    UnsupportedKeyType(String),

    /// Producing the client secret failed.
    #[error("Client secret signing failed: {0}")]
    Signing(String),

    /// A required configuration variable is not set.
    #[error("Missing configuration: {var}")]
    ConfigMissing { var: String },

    /// A configuration value is present but unusable.
    #[error("Invalid configuration for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    // Key set errors
    /// The key set endpoint could not be reached.
    #[error("Apple key endpoint unavailable: {0}")]
    KeyEndpointUnavailable(#[source] reqwest::Error),

    /// The key set endpoint answered with an error or an unusable body.
    #[error("Apple key set fetch failed: {0}")]
    KeyFetch(String),

    // Token validation errors
    /// Token is not a well-formed compact JWS or its claims cannot be decoded.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Token signature does not match the resolved public key.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Token declares an algorithm that cannot be used with Apple's keys.
    #[error("Invalid token algorithm: {0}")]
    InvalidAlgorithm(String),

    /// Token has expired (exp claim is in the past).
    #[error("Token has expired")]
    TokenExpired,

    /// Token is not valid yet (nbf claim is in the future).
    #[error("Token is not yet valid")]
    TokenNotYetValid,

    /// Token issuer does not match the expected issuer.
    #[error("Token issuer mismatch")]
    InvalidIssuer,

    /// Token audience does not contain the expected audience.
    #[error("Token audience mismatch")]
    InvalidAudience,

    /// No key with this kid exists, even after refreshing the key set.
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    // Provider errors
    /// Apple rejected the request with a structured error response.
    #[error("Apple rejected the request: {0}")]
    Provider(ProviderError),

    /// Apple answered with a non-success status and no structured error body.
    #[error("Unexpected response from Apple: HTTP {status}")]
    UnexpectedStatus { status: u16, body: String },

    // Transport errors
    /// HTTP transport error, passed through from the client.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The caller cancelled the operation.
    #[error("Operation canceled")]
    Canceled,

    /// The caller's deadline passed before the operation finished.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl AppleAuthError {
    /// The provider's error response, if Apple rejected the request.
    #[must_use]
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            AppleAuthError::Provider(error) => Some(error),
            _ => None,
        }
    }

    /// Check if this error comes from validating a token.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AppleAuthError::MalformedToken(_)
                | AppleAuthError::InvalidSignature
                | AppleAuthError::InvalidAlgorithm(_)
                | AppleAuthError::TokenExpired
                | AppleAuthError::TokenNotYetValid
                | AppleAuthError::InvalidIssuer
                | AppleAuthError::InvalidAudience
                | AppleAuthError::UnknownKey(_)
        )
    }

    /// Check if this error comes from fetching the key set.
    #[must_use]
    pub fn is_key_fetch_error(&self) -> bool {
        matches!(
            self,
            AppleAuthError::KeyEndpointUnavailable(_) | AppleAuthError::KeyFetch(_)
        )
    }

    /// Check if this error is a credential or configuration problem.
    ///
    /// These are fatal to the calling operation and never retried.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AppleAuthError::CredentialFormat(_)
                | AppleAuthError::KeyParse { kid: None, .. }
                | AppleAuthError::CredentialIo { .. }
                | AppleAuthError::MissingCredential
                | AppleAuthError::UnsupportedKeyType(_)
                | AppleAuthError::Signing(_)
                | AppleAuthError::ConfigMissing { .. }
                | AppleAuthError::ConfigInvalid { .. }
        )
    }

    /// Check if this error is a transport, cancellation or deadline failure.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            AppleAuthError::Http(_) | AppleAuthError::Canceled | AppleAuthError::DeadlineExceeded
        )
    }
}

/// Result type alias for Sign in with Apple operations.
pub type AppleResult<T> = Result<T, AppleAuthError>;
