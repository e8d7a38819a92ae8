//! API integration tests for attestgate-server.
//!
//! These drive the full challenge / attest / assert flow through the REST
//! endpoints against the in-memory backend, with a scripted platform adapter
//! standing in for the vendor checks.

use std::sync::Arc;

use async_trait::async_trait;
use attestgate_core::platform::{
    AssertionEvidence, AttestationEvidence, VerifiedAssertion, VerifiedAttestation,
};
use attestgate_core::{
    AttestationStorage, AttestationVerifier, Platform, PlatformVerifier, PlatformVerifiers,
    SystemClock, VerificationFailure,
};
use attestgate_server::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use tower::ServiceExt;

const APP_ID: &str = "ABCDE12345.com.example.app";

/// Accepts attestations whose token is `"valid"`; assertions carry their
/// counter as `"counter:<n>"`.
struct ScriptedVerifier;

#[async_trait]
impl PlatformVerifier for ScriptedVerifier {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn verify_attestation(
        &self,
        evidence: &AttestationEvidence<'_>,
        _challenge: &str,
        _bound_identifier: &str,
    ) -> Result<VerifiedAttestation, VerificationFailure> {
        if evidence.token != "valid" {
            return Err(VerificationFailure::Malformed("bad token".to_string()));
        }
        Ok(VerifiedAttestation {
            device_id: evidence.key_id.to_string(),
            public_key: vec![4; 65],
            initial_counter: 0,
        })
    }

    async fn verify_assertion(
        &self,
        evidence: &AssertionEvidence<'_>,
        _client_data: &[u8],
        _public_key: &[u8],
    ) -> Result<VerifiedAssertion, VerificationFailure> {
        evidence
            .assertion
            .strip_prefix("counter:")
            .and_then(|n| n.parse().ok())
            .map(|counter| VerifiedAssertion { counter })
            .ok_or_else(|| VerificationFailure::Malformed("bad assertion".to_string()))
    }
}

fn create_test_app(enabled: bool) -> Router {
    let storage =
        AttestationStorage::in_memory(chrono::Duration::seconds(300), Arc::new(SystemClock));
    let verifiers = PlatformVerifiers::new().with_ios(Arc::new(ScriptedVerifier), APP_ID);
    create_router(AppState::new(AttestationVerifier::new(
        enabled, verifiers, storage,
    )))
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn issue_challenge(app: &Router, identifier: &str) -> String {
    let (status, body) = post_json(
        app,
        "/attestation/challenge",
        json!({ "identifier": identifier }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["challenge"].as_str().unwrap().to_string()
}

async fn attest(app: &Router, key_id: &str) -> (StatusCode, Value) {
    let challenge = issue_challenge(app, key_id).await;
    post_json(
        app,
        "/attestation/verify",
        json!({
            "platform": "ios",
            "token": "valid",
            "key_id": key_id,
            "challenge": challenge,
        }),
    )
    .await
}

fn assertion(key_id: &str, counter: u64) -> Value {
    json!({
        "assertion": format!("counter:{counter}"),
        "client_data": BASE64.encode(b"POST /v1/transfer"),
        "key_id": key_id,
    })
}

// ============================================================================
// Health & Readiness Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(true);
    let (status, body) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "attestgate-server");
    assert_eq!(body["attestation_enabled"], true);
    assert_eq!(body["storage_backend"], "memory");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = create_test_app(true);
    let (status, body) = get(&app, "/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_test_app(true);
    let (status, body) = get(&app, "/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/attestation/verify"].is_object());
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let app = create_test_app(true);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

// ============================================================================
// Challenge Tests
// ============================================================================

#[tokio::test]
async fn test_challenge_issued() {
    let app = create_test_app(true);
    let (status, body) = post_json(
        &app,
        "/attestation/challenge",
        json!({ "identifier": "install-1" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["challenge"].as_str().unwrap().len() >= 43);
    assert!(chrono::DateTime::parse_from_rfc3339(body["expires_at"].as_str().unwrap()).is_ok());
}

#[tokio::test]
async fn test_challenge_empty_identifier_rejected() {
    let app = create_test_app(true);
    let (status, body) =
        post_json(&app, "/attestation/challenge", json!({ "identifier": "  " })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

// ============================================================================
// Attestation Tests
// ============================================================================

#[tokio::test]
async fn test_attestation_flow() {
    let app = create_test_app(true);
    let (status, body) = attest(&app, "key-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["key_id"], "key-1");
    assert_eq!(body["platform"], "ios");
}

#[tokio::test]
async fn test_challenge_is_single_use() {
    let app = create_test_app(true);
    let challenge = issue_challenge(&app, "key-1").await;
    let request = json!({
        "platform": "ios",
        "token": "valid",
        "key_id": "key-1",
        "challenge": challenge,
    });

    let (first, _) = post_json(&app, "/attestation/verify", request.clone()).await;
    let (second, body) = post_json(&app, "/attestation/verify", request).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_attestation");
}

#[tokio::test]
async fn test_missing_evidence_requires_attestation() {
    let app = create_test_app(true);
    let (status, body) =
        post_json(&app, "/attestation/verify", json!({ "platform": "ios" })).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "attestation_required");
}

#[tokio::test]
async fn test_unsupported_platform() {
    let app = create_test_app(true);
    let challenge = issue_challenge(&app, "key-1").await;
    let (status, body) = post_json(
        &app,
        "/attestation/verify",
        json!({
            "platform": "android",
            "token": "valid",
            "key_id": "key-1",
            "challenge": challenge,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_platform");
}

#[tokio::test]
async fn test_invalid_attestation_message_is_generic() {
    let app = create_test_app(true);
    let challenge = issue_challenge(&app, "key-1").await;
    let (status, body) = post_json(
        &app,
        "/attestation/verify",
        json!({
            "platform": "ios",
            "token": "forged",
            "key_id": "key-1",
            "challenge": challenge,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "invalid_attestation");
    assert!(!body["message"].as_str().unwrap().contains("bad token"));
}

// ============================================================================
// Assertion Tests
// ============================================================================

#[tokio::test]
async fn test_assertion_flow_and_replay() {
    let app = create_test_app(true);
    attest(&app, "key-1").await;

    let (status, body) = post_json(&app, "/attestation/assert", assertion("key-1", 1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counter"], 1);

    let (status, body) = post_json(&app, "/attestation/assert", assertion("key-1", 1)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "replay_detected");

    let (status, body) = post_json(&app, "/attestation/assert", assertion("key-1", 2)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counter"], 2);
}

#[tokio::test]
async fn test_assertion_unknown_key() {
    let app = create_test_app(true);
    let (status, body) = post_json(&app, "/attestation/assert", assertion("nobody", 1)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "key_not_found");
}

#[tokio::test]
async fn test_assertion_bad_client_data() {
    let app = create_test_app(true);
    let (status, body) = post_json(
        &app,
        "/attestation/assert",
        json!({ "assertion": "counter:1", "client_data": "%%%", "key_id": "key-1" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_missing_assertion_requires_attestation() {
    let app = create_test_app(true);
    let (status, body) = post_json(&app, "/attestation/assert", json!({ "key_id": "key-1" })).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "attestation_required");
}

// ============================================================================
// Disabled Mode Tests
// ============================================================================

#[tokio::test]
async fn test_disabled_mode_passes_through() {
    let app = create_test_app(false);

    let (status, body) =
        post_json(&app, "/attestation/verify", json!({ "platform": "ios" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert!(body.get("key_id").is_none());

    let (status, _) = post_json(&app, "/attestation/assert", assertion("nobody", 1)).await;
    assert_eq!(status, StatusCode::OK);
}
