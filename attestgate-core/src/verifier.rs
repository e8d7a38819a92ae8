//! Attestation and assertion orchestration.
//!
//! [`AttestationVerifier`] composes the challenge store, the device key store
//! and the platform adapters. It holds no per-request state; every decision
//! is made against the stores. Internal failures (storage, vendor transport,
//! deadline expiry) are logged with detail and surfaced only as one of the
//! [`AttestationError`] kinds.

use std::time::Duration;

use tokio::time::Instant;

use crate::challenge::Challenge;
use crate::device_key::{mask_identifier, CounterAdvance, NewDeviceKey, Platform, RegisterOutcome};
use crate::error::{AttestationError, Result, VerificationFailure};
use crate::platform::{AssertionEvidence, AttestationEvidence, PlatformVerifiers};
use crate::storage::AttestationStorage;

/// Default per-operation deadline.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Attestation submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationData {
    pub platform: Platform,
    /// Base64 attestation object (iOS) or integrity token (Android)
    pub token: String,
    pub key_id: String,
    /// Nonce previously issued by [`AttestationVerifier::generate_challenge`]
    pub challenge: String,
    /// Identifier the challenge was issued for (defaults to `key_id`)
    pub identifier: String,
    /// Bound identifier claimed by the client, if any
    pub bound_identifier: Option<String>,
}

impl AttestationData {
    fn challenge_identifier(&self) -> &str {
        if self.identifier.is_empty() {
            &self.key_id
        } else {
            &self.identifier
        }
    }
}

/// Assertion submitted by a client on a protected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionData {
    /// Base64 assertion object
    pub assertion: String,
    /// Exact bytes the assertion signs over
    pub client_data: Vec<u8>,
    pub key_id: String,
}

/// Successful verification outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verified {
    pub key_id: Option<String>,
    pub platform: Option<Platform>,
    pub counter: Option<u64>,
}

impl Verified {
    /// Outcome when attestation is disabled.
    pub fn pass_through() -> Self {
        Self::default()
    }
}

/// Verification result returned by the orchestrator.
pub type VerificationResult = Result<Verified>;

/// Orchestrates attestation, assertion and challenge issuance.
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    enabled: bool,
    verifiers: PlatformVerifiers,
    storage: AttestationStorage,
    verify_timeout: Duration,
}

impl AttestationVerifier {
    /// An enabled verifier with no adapters rejects all evidence.
    pub fn new(enabled: bool, verifiers: PlatformVerifiers, storage: AttestationStorage) -> Self {
        if enabled && verifiers.is_empty() {
            tracing::error!(
                "Attestation enabled with no platform adapter; all evidence will be rejected"
            );
        }
        Self {
            enabled,
            verifiers,
            storage,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Whether verification is enforced.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_ios_enabled(&self) -> bool {
        self.enabled && self.verifiers.is_enabled(Platform::Ios)
    }

    pub fn is_android_enabled(&self) -> bool {
        self.enabled && self.verifiers.is_enabled(Platform::Android)
    }

    pub fn storage(&self) -> &AttestationStorage {
        &self.storage
    }

    fn default_deadline(&self) -> Instant {
        Instant::now() + self.verify_timeout
    }

    /// Issue a challenge scoped to `identifier` with the default deadline.
    pub async fn generate_challenge(&self, identifier: &str) -> Result<Challenge> {
        self.generate_challenge_until(identifier, self.default_deadline())
            .await
    }

    /// Issue a challenge, failing with `InvalidAttestation` at `deadline`.
    pub async fn generate_challenge_until(
        &self,
        identifier: &str,
        deadline: Instant,
    ) -> Result<Challenge> {
        if identifier.trim().is_empty() {
            return Err(AttestationError::InvalidRequest);
        }

        let generate = self.storage.challenges.generate(identifier);
        match tokio::time::timeout_at(deadline, generate).await {
            Ok(Ok(challenge)) => {
                tracing::debug!(
                    identifier = %mask_identifier(identifier),
                    expires_at = %challenge.expires_at,
                    "Challenge issued"
                );
                Ok(challenge)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to store challenge");
                Err(AttestationError::InvalidAttestation)
            }
            Err(_) => {
                tracing::error!("Challenge issuance timed out");
                Err(AttestationError::InvalidAttestation)
            }
        }
    }

    /// Verify an attestation with the default deadline.
    pub async fn verify(&self, data: Option<&AttestationData>) -> VerificationResult {
        self.verify_until(data, self.default_deadline()).await
    }

    /// Verify an attestation, failing with `InvalidAttestation` at `deadline`.
    pub async fn verify_until(
        &self,
        data: Option<&AttestationData>,
        deadline: Instant,
    ) -> VerificationResult {
        if !self.is_enabled() {
            return Ok(Verified::pass_through());
        }
        let Some(data) = data else {
            tracing::warn!("Attestation required but not provided");
            return Err(AttestationError::AttestationRequired);
        };

        match tokio::time::timeout_at(deadline, self.attest(data)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    key_id = %mask_identifier(&data.key_id),
                    platform = %data.platform,
                    "Attestation deadline exceeded"
                );
                Err(AttestationError::InvalidAttestation)
            }
        }
    }

    async fn attest(&self, data: &AttestationData) -> VerificationResult {
        let masked = mask_identifier(&data.key_id);

        let Some(registered) = self.verifiers.get(data.platform) else {
            tracing::warn!(platform = %data.platform, "Attestation for unsupported platform");
            return Err(AttestationError::UnsupportedPlatform);
        };

        if let Some(claimed) = &data.bound_identifier {
            if claimed != &registered.bound_identifier {
                tracing::warn!(
                    key_id = %masked,
                    claimed = %claimed,
                    "Attestation for a different bound identifier"
                );
                return Err(AttestationError::InvalidAttestation);
            }
        }

        let identifier = data.challenge_identifier();
        if identifier.is_empty() || data.challenge.is_empty() {
            tracing::warn!(key_id = %masked, "Attestation without challenge");
            return Err(AttestationError::InvalidAttestation);
        }

        match self
            .storage
            .challenges
            .validate(identifier, &data.challenge)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(key_id = %masked, "Challenge invalid, expired or already used");
                return Err(AttestationError::InvalidAttestation);
            }
            Err(e) => {
                tracing::error!(key_id = %masked, error = %e, "Challenge store unavailable");
                return Err(AttestationError::InvalidAttestation);
            }
        }

        let evidence = AttestationEvidence {
            token: &data.token,
            key_id: &data.key_id,
        };
        let verified = registered
            .verifier
            .verify_attestation(&evidence, &data.challenge, &registered.bound_identifier)
            .await
            .map_err(|failure| {
                log_failure(&failure, &masked, data.platform, "Attestation rejected");
                AttestationError::InvalidAttestation
            })?;

        if verified.device_id.is_empty() {
            tracing::info!(
                platform = %data.platform,
                "Attestation verified without key registration"
            );
            return Ok(Verified {
                key_id: None,
                platform: Some(data.platform),
                counter: None,
            });
        }

        let new_key = NewDeviceKey {
            key_id: verified.device_id.clone(),
            platform: data.platform,
            public_key: verified.public_key,
            bound_identifier: registered.bound_identifier.clone(),
            initial_counter: verified.initial_counter,
        };
        let device_masked = mask_identifier(&new_key.key_id);
        match self.storage.keys.register(new_key).await {
            Ok(RegisterOutcome::Created) => {
                tracing::info!(
                    key_id = %device_masked,
                    platform = %data.platform,
                    "Device key registered"
                );
            }
            Ok(RegisterOutcome::AlreadyRegistered) => {
                tracing::info!(
                    key_id = %device_masked,
                    platform = %data.platform,
                    "Device key already registered"
                );
            }
            Ok(RegisterOutcome::Conflict) => {
                tracing::warn!(
                    key_id = %device_masked,
                    platform = %data.platform,
                    "Conflicting key material for registered key id"
                );
                return Err(AttestationError::InvalidAttestation);
            }
            Err(e) => {
                tracing::error!(key_id = %device_masked, error = %e, "Failed to register device key");
                return Err(AttestationError::InvalidAttestation);
            }
        }

        Ok(Verified {
            key_id: Some(verified.device_id),
            platform: Some(data.platform),
            counter: Some(verified.initial_counter),
        })
    }

    /// Verify an assertion with the default deadline.
    pub async fn verify_assertion(&self, data: Option<&AssertionData>) -> VerificationResult {
        self.verify_assertion_until(data, self.default_deadline())
            .await
    }

    /// Verify an assertion, failing with `InvalidAssertion` at `deadline`.
    pub async fn verify_assertion_until(
        &self,
        data: Option<&AssertionData>,
        deadline: Instant,
    ) -> VerificationResult {
        if !self.is_enabled() {
            return Ok(Verified::pass_through());
        }
        let Some(data) = data else {
            tracing::warn!("Assertion required but not provided");
            return Err(AttestationError::AttestationRequired);
        };

        match tokio::time::timeout_at(deadline, self.assert(data)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    key_id = %mask_identifier(&data.key_id),
                    "Assertion deadline exceeded"
                );
                Err(AttestationError::InvalidAssertion)
            }
        }
    }

    async fn assert(&self, data: &AssertionData) -> VerificationResult {
        let masked = mask_identifier(&data.key_id);
        if data.key_id.is_empty() {
            return Err(AttestationError::KeyNotFound);
        }

        let key = match self.storage.keys.get(&data.key_id).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                tracing::warn!(key_id = %masked, "Assertion for unknown key");
                return Err(AttestationError::KeyNotFound);
            }
            Err(e) => {
                tracing::error!(key_id = %masked, error = %e, "Device key store unavailable");
                return Err(AttestationError::InvalidAssertion);
            }
        };

        let Some(registered) = self.verifiers.get(key.platform) else {
            tracing::warn!(key_id = %masked, platform = %key.platform, "Platform no longer enabled");
            return Err(AttestationError::UnsupportedPlatform);
        };

        let evidence = AssertionEvidence {
            assertion: &data.assertion,
            key_id: &data.key_id,
        };
        let presented = match registered
            .verifier
            .verify_assertion(&evidence, &data.client_data, &key.public_key)
            .await
        {
            Ok(verified) => verified.counter,
            Err(VerificationFailure::Unsupported) => {
                tracing::warn!(key_id = %masked, platform = %key.platform, "Platform has no assertion protocol");
                return Err(AttestationError::UnsupportedPlatform);
            }
            Err(failure) => {
                log_failure(&failure, &masked, key.platform, "Assertion rejected");
                return Err(AttestationError::InvalidAssertion);
            }
        };

        match self.storage.keys.advance_counter(&data.key_id, presented).await {
            Ok(CounterAdvance::Accepted(counter)) => {
                tracing::debug!(key_id = %masked, counter, "Assertion accepted");
                Ok(Verified {
                    key_id: Some(data.key_id.clone()),
                    platform: Some(key.platform),
                    counter: Some(counter),
                })
            }
            Ok(CounterAdvance::ReplayRejected) => {
                tracing::warn!(
                    key_id = %masked,
                    presented,
                    stored = key.counter,
                    "Assertion replay detected"
                );
                Err(AttestationError::ReplayDetected)
            }
            Ok(CounterAdvance::NotFound) => {
                tracing::warn!(key_id = %masked, "Device key removed during assertion");
                Err(AttestationError::KeyNotFound)
            }
            Err(e) => {
                tracing::error!(key_id = %masked, error = %e, "Failed to advance counter");
                Err(AttestationError::InvalidAssertion)
            }
        }
    }

    /// Purge expired challenges now (also done by the background sweeper).
    pub async fn purge_expired_challenges(&self) -> usize {
        match self.storage.challenges.purge_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Challenge purge failed");
                0
            }
        }
    }
}

fn log_failure(failure: &VerificationFailure, key_id: &str, platform: Platform, message: &str) {
    match failure {
        VerificationFailure::Vendor(_) => {
            tracing::error!(key_id = %key_id, platform = %platform, reason = %failure, "{message}");
        }
        _ => {
            tracing::warn!(key_id = %key_id, platform = %platform, reason = %failure, "{message}");
        }
    }
}
