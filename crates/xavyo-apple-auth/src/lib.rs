//! Sign in with Apple client library for xavyo.
//!
//! This crate provides:
//! - ES256 client secret signing from Apple `.p8` keys
//! - Authorization code and refresh token exchange
//! - ID token verification against Apple's rotating key set, refreshed on
//!   unknown `kid`
//! - Identity claim extraction
//!
//! # Example
//!
//! ```rust,ignore
//! use xavyo_apple_auth::{AppleClient, AppleConfig, CallContext};
//!
//! let client = AppleClient::builder(AppleConfig::from_env()?)
//!     .credential_file("AuthKey_ABC123.p8")
//!     .build()?;
//!
//! let tokens = client.authenticate(&code, &CallContext::background()).await?;
//! if let Some(identity) = tokens.identity {
//!     println!("signed in as {}", identity.sub);
//! }
//! ```

mod client;
mod client_secret;
mod config;
mod context;
mod credential;
mod error;
mod exchange;
mod identity;
mod jwks;
mod verifier;


// Re-export public API
pub use client::{AppleClient, AppleClientBuilder};
pub use client_secret::{
    sign_client_secret, ClientSecretClaims, APPLE_AUDIENCE, DEFAULT_CLIENT_SECRET_TTL,
    MAX_CLIENT_SECRET_TTL,
};
pub use config::{AppleConfig, AppleEndpoints, APPLE_BASE_URL, APPLE_ISSUER, DEFAULT_REQUEST_TIMEOUT};
pub use context::CallContext;
pub use credential::SigningCredential;
pub use error::{AppleAuthError, AppleResult, ProviderError};
pub use exchange::{default_http_client, GrantParameters, TokenExchangeClient, TokenResponse};
pub use identity::{extract_identity, Audience, IdentityClaims};
pub use jwks::{Jwk, JwkSet, KeySetSource, KeyStore, PublicKeyEntry};
pub use verifier::{TokenVerifier, ValidationConfig, DEFAULT_LEEWAY_SECS};
