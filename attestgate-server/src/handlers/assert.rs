//! Assertion handler
//!
//! Handles POST /attestation/assert requests: checks a per-request assertion
//! from an attested key and advances its counter.

use attestgate_core::AssertionData;
use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Assertion submitted with a protected request.
#[derive(Deserialize, ToSchema)]
pub struct AssertRequest {
    /// Base64 assertion object. Omitted when the client has none.
    #[serde(default)]
    pub assertion: Option<String>,
    /// Base64 of the exact client data bytes the assertion signs over
    #[serde(default)]
    #[schema(example = "UE9TVCAvdjEvdHJhbnNmZXI=")]
    pub client_data: String,
    /// Key ID returned at attestation
    #[serde(default)]
    pub key_id: String,
}

/// Assertion result.
#[derive(Serialize, ToSchema)]
pub struct AssertResponse {
    #[schema(example = true)]
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Counter value now stored for the key
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 42)]
    pub counter: Option<u64>,
}

/// Verify a per-request assertion.
#[utoipa::path(
    post,
    path = "/attestation/assert",
    tag = "Attestation",
    request_body = AssertRequest,
    responses(
        (status = 200, description = "Assertion accepted", body = AssertResponse),
        (status = 400, description = "Malformed client data or unsupported platform", body = ErrorBody),
        (status = 401, description = "Assertion missing or key unknown", body = ErrorBody),
        (status = 403, description = "Invalid assertion or replay", body = ErrorBody)
    )
)]
pub async fn assert_handler(
    State(state): State<AppState>,
    Json(request): Json<AssertRequest>,
) -> Result<Json<AssertResponse>, ApiError> {
    let data = match request.assertion {
        Some(assertion) => Some(AssertionData {
            assertion,
            client_data: BASE64
                .decode(&request.client_data)
                .map_err(|e| ApiError::bad_request(format!("Invalid base64 client_data: {}", e)))?,
            key_id: request.key_id,
        }),
        None => None,
    };

    let verified = state.verifier.verify_assertion(data.as_ref()).await?;

    Ok(Json(AssertResponse {
        verified: true,
        key_id: verified.key_id,
        counter: verified.counter,
    }))
}
