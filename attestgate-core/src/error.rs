//! Error types for the attestation subsystem.
//!
//! [`AttestationError`] is the only error surface exposed to callers. Storage,
//! vendor and platform detail is carried by [`StorageError`] and
//! [`VerificationFailure`], which are logged and then collapsed into one of
//! the externally visible kinds.

use thiserror::Error;

/// Externally visible verification outcome kinds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationError {
    #[error("attestation required but not provided")]
    AttestationRequired,

    #[error("unsupported platform")]
    UnsupportedPlatform,

    #[error("invalid attestation")]
    InvalidAttestation,

    #[error("invalid assertion")]
    InvalidAssertion,

    #[error("attestation key not found, re-attestation required")]
    KeyNotFound,

    #[error("assertion replay detected")]
    ReplayDetected,

    #[error("invalid request")]
    InvalidRequest,
}

impl AttestationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AttestationRequired => "attestation_required",
            Self::UnsupportedPlatform => "unsupported_platform",
            Self::InvalidAttestation => "invalid_attestation",
            Self::InvalidAssertion => "invalid_assertion",
            Self::KeyNotFound => "key_not_found",
            Self::ReplayDetected => "replay_detected",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage connection error: {0}")]
    Connection(String),

    #[error("Storage migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Random number generator failure")]
    Random,
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Query(err.to_string())
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

/// Typed failure produced by a platform adapter.
///
/// Never shown to clients; the orchestrator logs it and returns
/// [`AttestationError::InvalidAttestation`] or
/// [`AttestationError::InvalidAssertion`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("malformed evidence: {0}")]
    Malformed(String),

    #[error("bad signature")]
    BadSignature,

    #[error("untrusted certificate chain: {0}")]
    UntrustedChain(String),

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error("bound identifier mismatch: {0}")]
    IdentifierMismatch(String),

    #[error("key identifier does not match attested key")]
    KeyMismatch,

    #[error("app not recognized: {0}")]
    AppNotRecognized(String),

    #[error("device integrity too weak: {0}")]
    IntegrityTooWeak(String),

    #[error("evidence is stale: {0}")]
    Stale(String),

    #[error("operation not supported on this platform")]
    Unsupported,

    #[error("vendor call failed: {0}")]
    Vendor(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required when {1}")]
    Missing(&'static str, String),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    #[error("ATTESTATION_ENABLED is true but no platform configured (set ATTESTATION_IOS_BUNDLE_ID or ATTESTATION_ANDROID_PACKAGE)")]
    NoPlatform,

    #[error("iOS attestation is configured but no App Attest trust root was supplied")]
    NoTrustRoot,
}

pub type Result<T> = std::result::Result<T, AttestationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            AttestationError::AttestationRequired.code(),
            "attestation_required"
        );
        assert_eq!(AttestationError::ReplayDetected.code(), "replay_detected");
        assert_eq!(AttestationError::KeyNotFound.code(), "key_not_found");
    }

    #[test]
    fn test_failure_detail_not_in_external_message() {
        let failure = VerificationFailure::UntrustedChain("leaf expired".into());
        assert!(failure.to_string().contains("leaf expired"));
        assert_eq!(
            AttestationError::InvalidAttestation.to_string(),
            "invalid attestation"
        );
    }
}
