//! Mock Apple endpoints
//!
//! Mounts Apple's token and key set endpoints on a wiremock server.

use serde::{Deserialize, Serialize};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xavyo_apple_auth::JwkSet;

/// `OAuth2` error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthError {
    pub error: String,
    pub error_description: String,
}

impl OAuthError {
    #[must_use]
    pub fn invalid_grant() -> Self {
        Self {
            error: "invalid_grant".to_string(),
            error_description: "The authorization code has expired or is invalid".to_string(),
        }
    }

    #[must_use]
    pub fn invalid_client() -> Self {
        Self {
            error: "invalid_client".to_string(),
            error_description: "Client authentication failed".to_string(),
        }
    }
}

/// Token endpoint answer for a successful exchange
#[must_use]
pub fn token_response(id_token: Option<&str>) -> serde_json::Value {
    json!({
        "access_token": "a.apple-access-token",
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "r.apple-refresh-token",
        "id_token": id_token
    })
}

/// Setup mock token endpoint for the authorization code grant
pub async fn setup_token_endpoint_success(server: &MockServer, id_token: Option<&str>) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(id_token)))
        .mount(server)
        .await;
}

/// Setup mock token endpoint for the refresh token grant
pub async fn setup_refresh_endpoint_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a.refreshed-access-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "id_token": null
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Setup mock token endpoint that returns error response
pub async fn setup_token_endpoint_error(server: &MockServer, error: OAuthError, status_code: u16) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(status_code).set_body_json(error))
        .mount(server)
        .await;
}

/// Setup mock key set endpoint, expecting exactly `calls` requests
pub async fn setup_keys_endpoint(server: &MockServer, key_set: &JwkSet, calls: u64) {
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(key_set))
        .expect(calls)
        .mount(server)
        .await;
}

/// Setup mock key set endpoint that fails with `status_code`
pub async fn setup_keys_endpoint_error(server: &MockServer, status_code: u16) {
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(ResponseTemplate::new(status_code))
        .mount(server)
        .await;
}
