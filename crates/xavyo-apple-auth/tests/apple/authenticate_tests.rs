//! Apple Sign In Flow Tests
//!
//! Tests for the authorization code flow including:
//! - Client secret and form fields sent to the token endpoint
//! - ID token verification against the published key set
//! - Identity extraction and private relay email handling
//! - Error scenarios

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};
use xavyo_apple_auth::{AppleAuthError, CallContext};

use super::common::{
    key_set, now, sign_id_token, tamper_signature, AppleTestFixture, MockAppleUser, CLIENT_ID,
};
use super::mock_server::{setup_keys_endpoint, setup_token_endpoint_success, token_response};

const TEST_AUTH_CODE: &str = "c.test-authorization-code";

#[tokio::test]
async fn test_apple_authenticate_success() {
    let fixture = AppleTestFixture::new().await;
    let user = MockAppleUser::private_relay();

    let id_token = sign_id_token("k1", &user.id_token_claims());
    setup_keys_endpoint(&fixture.server, &key_set(&["k1"]), 1).await;
    setup_token_endpoint_success(&fixture.server, Some(&id_token)).await;

    let tokens = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await
        .unwrap();

    assert_eq!(tokens.access_token, "a.apple-access-token");
    assert_eq!(tokens.refresh_token.as_deref(), Some("r.apple-refresh-token"));
    assert_eq!(tokens.id_token.as_deref(), Some(id_token.as_str()));

    let identity = tokens.identity.unwrap();
    assert_eq!(identity.sub, user.sub);
    assert_eq!(identity.email.as_deref(), Some(user.email.as_str()));
    assert!(identity.is_email_verified());
    assert_eq!(identity.is_private_email, Some(true));
    assert!(identity.aud.contains(CLIENT_ID));
}

#[tokio::test]
async fn test_apple_authenticate_real_email() {
    let fixture = AppleTestFixture::new().await;
    let user = MockAppleUser::real_email();

    let id_token = sign_id_token("k1", &user.id_token_claims());
    setup_keys_endpoint(&fixture.server, &key_set(&["k1"]), 1).await;
    setup_token_endpoint_success(&fixture.server, Some(&id_token)).await;

    let tokens = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await
        .unwrap();

    let identity = tokens.identity.unwrap();
    assert_eq!(identity.email.as_deref(), Some("realuser@example.com"));
    assert_eq!(identity.is_private_email, Some(false));
}

#[tokio::test]
async fn test_apple_authenticate_sends_grant_and_client_secret() {
    let fixture = AppleTestFixture::new().await;
    let id_token = sign_id_token("k1", &MockAppleUser::private_relay().id_token_claims());
    fixture.client.set_public_keys(&key_set(&["k1"])).unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("client_id=com.example.app"))
        .and(body_string_contains("client_secret=eyJ"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=c.test-authorization-code"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Fexample.com%2Fauth%2Fapple%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(Some(&id_token))))
        .expect(1)
        .mount(&fixture.server)
        .await;

    fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_apple_authenticate_without_credential_sends_nothing() {
    let fixture = AppleTestFixture::without_credential().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fixture.server)
        .await;

    let result = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await;

    assert!(matches!(result, Err(AppleAuthError::MissingCredential)));
    let requests = fixture.server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_apple_authenticate_tampered_signature() {
    let fixture = AppleTestFixture::new().await;

    let id_token = sign_id_token("k1", &MockAppleUser::private_relay().id_token_claims());
    let tampered = tamper_signature(&id_token);
    setup_keys_endpoint(&fixture.server, &key_set(&["k1"]), 1).await;
    setup_token_endpoint_success(&fixture.server, Some(&tampered)).await;

    let result = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await;

    assert!(matches!(result, Err(AppleAuthError::InvalidSignature)));
}

#[tokio::test]
async fn test_apple_authenticate_missing_id_token() {
    let fixture = AppleTestFixture::new().await;
    setup_token_endpoint_success(&fixture.server, None).await;

    let result = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await;

    assert!(matches!(result, Err(AppleAuthError::MalformedToken(_))));
}

#[tokio::test]
async fn test_apple_authenticate_wrong_audience() {
    let fixture = AppleTestFixture::new().await;
    fixture.client.set_public_keys(&key_set(&["k1"])).unwrap();

    let mut claims = MockAppleUser::private_relay().id_token_claims();
    claims["aud"] = json!("com.other.app");
    let id_token = sign_id_token("k1", &claims);
    setup_token_endpoint_success(&fixture.server, Some(&id_token)).await;

    let result = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await;

    assert!(matches!(result, Err(AppleAuthError::InvalidAudience)));
}

#[tokio::test]
async fn test_apple_authenticate_wrong_issuer() {
    let fixture = AppleTestFixture::new().await;
    fixture.client.set_public_keys(&key_set(&["k1"])).unwrap();

    let mut claims = MockAppleUser::private_relay().id_token_claims();
    claims["iss"] = json!("https://accounts.google.com");
    let id_token = sign_id_token("k1", &claims);
    setup_token_endpoint_success(&fixture.server, Some(&id_token)).await;

    let result = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await;

    assert!(matches!(result, Err(AppleAuthError::InvalidIssuer)));
}

#[tokio::test]
async fn test_apple_authenticate_expired_id_token() {
    let fixture = AppleTestFixture::new().await;
    fixture.client.set_public_keys(&key_set(&["k1"])).unwrap();

    let mut claims = MockAppleUser::private_relay().id_token_claims();
    claims["iat"] = json!(now() - 7200);
    claims["exp"] = json!(now() - 3600);
    let id_token = sign_id_token("k1", &claims);
    setup_token_endpoint_success(&fixture.server, Some(&id_token)).await;

    let result = fixture
        .client
        .authenticate(TEST_AUTH_CODE, &CallContext::background())
        .await;

    assert!(matches!(result, Err(AppleAuthError::TokenExpired)));
}

#[tokio::test]
async fn test_apple_validate_token_and_parse_identity() {
    let fixture = AppleTestFixture::new().await;
    let user = MockAppleUser::private_relay();
    setup_keys_endpoint(&fixture.server, &key_set(&["k1"]), 1).await;

    let id_token = sign_id_token("k1", &user.id_token_claims());
    fixture
        .client
        .validate_token(&id_token, &CallContext::background())
        .await
        .unwrap();

    let identity = fixture.client.parse_identity(&id_token).unwrap();
    assert_eq!(identity.sub, user.sub);

    let result = fixture.client.parse_identity("not-a-token");
    assert!(matches!(result, Err(AppleAuthError::MalformedToken(_))));
}

#[tokio::test]
async fn test_apple_callback_url_points_at_configured_endpoint() {
    let fixture = AppleTestFixture::new().await;

    let url = fixture.client.callback_url("csrf-state-123");

    assert!(url.starts_with(&format!("{}/auth/authorize?", fixture.server.uri())));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("client_id=com.example.app"));
    assert!(url.contains("state=csrf-state-123"));
    assert!(url.contains("scope=name%20email"));
    assert!(url.contains("redirect_uri=https%3A%2F%2Fexample.com%2Fauth%2Fapple%2Fcallback"));
}
