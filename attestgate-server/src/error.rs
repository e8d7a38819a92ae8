//! API error handling module
//!
//! Maps attestation outcomes and malformed requests onto HTTP responses with
//! a stable `{"error": code, "message": ...}` body.

use attestgate_core::AttestationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided malformed input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Attestation outcome from the verifier
    #[error(transparent)]
    Attestation(#[from] AttestationError),
}

/// Error response body
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code
    #[schema(example = "invalid_attestation")]
    pub error: &'static str,
    /// Human-readable message
    #[schema(example = "invalid attestation")]
    pub message: String,
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Attestation(e) => match e {
                AttestationError::AttestationRequired | AttestationError::KeyNotFound => {
                    StatusCode::UNAUTHORIZED
                }
                AttestationError::InvalidAttestation
                | AttestationError::InvalidAssertion
                | AttestationError::ReplayDetected => StatusCode::FORBIDDEN,
                AttestationError::UnsupportedPlatform | AttestationError::InvalidRequest => {
                    StatusCode::BAD_REQUEST
                }
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request",
            Self::Attestation(e) => e.code(),
        }
    }

    /// Message for the client. Attestation failures never carry detail.
    fn client_message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Attestation(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match &self {
            Self::BadRequest(_) => {
                tracing::warn!(status = %status, code = code, error = %self, "Client error");
            }
            Self::Attestation(_) => {
                tracing::info!(status = %status, code = code, "Attestation rejected");
            }
        }

        let body = ErrorBody {
            error: code,
            message: self.client_message(),
        };
        (status, Json(body)).into_response()
    }
}
