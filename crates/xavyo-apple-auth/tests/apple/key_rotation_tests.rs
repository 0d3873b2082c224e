//! Key Rotation Tests
//!
//! Tests for the key store refreshing itself when Apple rotates keys:
//! - Refresh on unknown kid, at most once per lookup
//! - Rotated-away keys are dropped
//! - Concurrent misses share one fetch
//! - Malformed key sets never replace good ones

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};
use xavyo_apple_auth::{AppleAuthError, CallContext, JwkSet};

use super::common::{
    jwk, key_set, sign_id_token, AppleTestFixture, MockAppleUser, OTHER_RSA_MODULUS,
};
use super::mock_server::{setup_keys_endpoint, setup_keys_endpoint_error};

#[tokio::test]
async fn test_unknown_kid_fetches_key_set_once() {
    let fixture = AppleTestFixture::new().await;
    setup_keys_endpoint(&fixture.server, &key_set(&["k1"]), 1).await;

    let id_token = sign_id_token("k1", &MockAppleUser::private_relay().id_token_claims());

    // First validation misses and fetches, the second hits the cache
    for _ in 0..2 {
        fixture
            .client
            .validate_token(&id_token, &CallContext::background())
            .await
            .unwrap();
    }

    assert_eq!(fixture.client.key_store().generation(), 1);
}

#[tokio::test]
async fn test_rotated_key_replaces_previous_set() {
    let fixture = AppleTestFixture::new().await;
    fixture
        .client
        .set_public_keys(&JwkSet {
            keys: vec![jwk("k-old", OTHER_RSA_MODULUS)],
        })
        .unwrap();
    setup_keys_endpoint(&fixture.server, &key_set(&["k-new"]), 1).await;

    let id_token = sign_id_token("k-new", &MockAppleUser::private_relay().id_token_claims());
    fixture
        .client
        .validate_token(&id_token, &CallContext::background())
        .await
        .unwrap();

    assert_eq!(fixture.client.key_store().key_ids(), vec!["k-new".to_string()]);
}

#[tokio::test]
async fn test_kid_missing_after_refresh_is_unknown() {
    let fixture = AppleTestFixture::new().await;
    setup_keys_endpoint(&fixture.server, &key_set(&["k1"]), 1).await;

    let id_token = sign_id_token("k9", &MockAppleUser::private_relay().id_token_claims());
    let result = fixture
        .client
        .validate_token(&id_token, &CallContext::background())
        .await;

    match result {
        Err(AppleAuthError::UnknownKey(kid)) => assert_eq!(kid, "k9"),
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validations_share_one_fetch() {
    let fixture = AppleTestFixture::new().await;
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(key_set(&["k1"]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&fixture.server)
        .await;

    let id_token = sign_id_token("k1", &MockAppleUser::private_relay().id_token_claims());

    let validations: Vec<_> = (0..10)
        .map(|_| {
            let client = fixture.client.clone();
            let id_token = id_token.clone();
            tokio::spawn(async move {
                client
                    .validate_token(&id_token, &CallContext::background())
                    .await
            })
        })
        .collect();

    for validation in validations {
        validation.await.unwrap().unwrap();
    }

    assert_eq!(fixture.client.key_store().generation(), 1);
}

#[tokio::test]
async fn test_malformed_key_set_keeps_previous_keys() {
    let fixture = AppleTestFixture::new().await;
    fixture.client.set_public_keys(&key_set(&["k1"])).unwrap();

    let mut broken = key_set(&["k2"]);
    broken.keys.push(jwk("k3", "###"));
    setup_keys_endpoint(&fixture.server, &broken, 1).await;

    let id_token = sign_id_token("k2", &MockAppleUser::private_relay().id_token_claims());
    let result = fixture
        .client
        .validate_token(&id_token, &CallContext::background())
        .await;

    match result {
        Err(AppleAuthError::KeyParse { kid, .. }) => assert_eq!(kid.as_deref(), Some("k3")),
        other => panic!("expected KeyParse, got {other:?}"),
    }
    assert_eq!(fixture.client.key_store().key_ids(), vec!["k1".to_string()]);
}

#[tokio::test]
async fn test_key_endpoint_failure_propagates() {
    let fixture = AppleTestFixture::new().await;
    setup_keys_endpoint_error(&fixture.server, 500).await;

    let id_token = sign_id_token("k1", &MockAppleUser::private_relay().id_token_claims());
    let err = fixture
        .client
        .validate_token(&id_token, &CallContext::background())
        .await
        .unwrap_err();

    assert!(err.is_key_fetch_error());
    assert!(!err.is_token_error());
}

#[tokio::test]
async fn test_fetch_public_keys_installs_key_set() {
    let fixture = AppleTestFixture::new().await;
    setup_keys_endpoint(&fixture.server, &key_set(&["k1", "k2", "k3"]), 1).await;

    let count = fixture
        .client
        .fetch_public_keys(&CallContext::background())
        .await
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(fixture.client.key_store().len(), 3);

    // Cached keys need no further fetch
    let id_token = sign_id_token("k2", &MockAppleUser::private_relay().id_token_claims());
    fixture
        .client
        .validate_token(&id_token, &CallContext::background())
        .await
        .unwrap();
}
