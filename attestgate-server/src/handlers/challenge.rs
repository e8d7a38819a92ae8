//! Challenge issuance handler
//!
//! Handles POST /attestation/challenge requests.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Request for a fresh attestation challenge.
#[derive(Deserialize, ToSchema)]
pub struct ChallengeRequest {
    /// Identifier the challenge is scoped to (typically the App Attest key ID
    /// or an installation ID)
    #[schema(example = "install-7f3a9c")]
    pub identifier: String,
}

/// Issued challenge.
#[derive(Serialize, ToSchema)]
pub struct ChallengeResponse {
    /// Single-use nonce to embed in the attestation
    #[schema(example = "q9vX2lJc0mS7oT1v8bYb3Zl2eN0aK4hW5pQ6rS7tU8w")]
    pub challenge: String,
    /// Expiry time (RFC 3339)
    #[schema(example = "2026-01-07T10:05:00Z")]
    pub expires_at: String,
}

/// Issue a single-use attestation challenge.
#[utoipa::path(
    post,
    path = "/attestation/challenge",
    tag = "Attestation",
    request_body = ChallengeRequest,
    responses(
        (status = 200, description = "Challenge issued", body = ChallengeResponse),
        (status = 400, description = "Empty identifier", body = ErrorBody),
        (status = 403, description = "Challenge could not be issued", body = ErrorBody)
    )
)]
pub async fn challenge_handler(
    State(state): State<AppState>,
    Json(request): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.verifier.generate_challenge(&request.identifier).await?;

    Ok(Json(ChallengeResponse {
        challenge: challenge.nonce,
        expires_at: challenge.expires_at.to_rfc3339(),
    }))
}
