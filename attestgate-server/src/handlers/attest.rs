//! Attestation handler
//!
//! Handles POST /attestation/verify requests: verifies platform attestation
//! evidence against an issued challenge and registers the device key.

use attestgate_core::{AttestationData, Platform};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Attestation evidence submitted by a client.
#[derive(Deserialize, ToSchema)]
pub struct AttestRequest {
    /// Claimed platform: `ios` or `android`
    #[schema(example = "ios")]
    pub platform: String,
    /// Base64 App Attest object (iOS) or Play Integrity token (Android).
    /// Omitted when the client has no evidence.
    #[serde(default)]
    pub token: Option<String>,
    /// App Attest key ID (base64). Optional on Android.
    #[serde(default)]
    #[schema(example = "bXlLZXlJZA==")]
    pub key_id: String,
    /// Challenge previously issued by `/attestation/challenge`
    #[serde(default)]
    pub challenge: String,
    /// Identifier the challenge was issued for (defaults to `key_id`)
    #[serde(default)]
    pub identifier: String,
    /// App ID or package name the client claims
    #[serde(default)]
    pub bound_identifier: Option<String>,
}

/// Attestation result.
#[derive(Serialize, ToSchema)]
pub struct AttestResponse {
    #[schema(example = true)]
    pub verified: bool,
    /// Registered key ID, absent when attestation is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "ios")]
    pub platform: Option<String>,
}

/// Verify a device attestation.
#[utoipa::path(
    post,
    path = "/attestation/verify",
    tag = "Attestation",
    request_body = AttestRequest,
    responses(
        (status = 200, description = "Attestation accepted", body = AttestResponse),
        (status = 400, description = "Unsupported platform", body = ErrorBody),
        (status = 401, description = "Attestation required", body = ErrorBody),
        (status = 403, description = "Invalid attestation", body = ErrorBody)
    )
)]
pub async fn attest_handler(
    State(state): State<AppState>,
    Json(request): Json<AttestRequest>,
) -> Result<Json<AttestResponse>, ApiError> {
    let data = request.token.map(|token| AttestationData {
        platform: request.platform.parse().unwrap_or(Platform::Unspecified),
        token,
        key_id: request.key_id,
        challenge: request.challenge,
        identifier: request.identifier,
        bound_identifier: request.bound_identifier,
    });

    let verified = state.verifier.verify(data.as_ref()).await?;

    Ok(Json(AttestResponse {
        verified: true,
        key_id: verified.key_id,
        platform: verified.platform.map(|p| p.to_string()),
    }))
}
