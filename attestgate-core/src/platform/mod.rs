//! Platform verification adapters.
//!
//! Each supported platform implements [`PlatformVerifier`]:
//!
//! - [`apple::AppAttestVerifier`] - Apple App Attest (attestation and assertion)
//! - [`android::PlayIntegrityVerifier`] - Google Play Integrity (attestation only)
//!
//! Vendor trust roots are injected capabilities ([`apple::AppleTrustRoot`],
//! [`android::IntegrityTokenDecoder`]), so tests substitute scripted fakes.

pub mod android;
pub mod apple;
mod authdata;

use std::sync::Arc;

use async_trait::async_trait;

pub use authdata::{AttestedCredential, AuthenticatorData};

use crate::device_key::Platform;
use crate::error::VerificationFailure;

/// Raw attestation evidence supplied by the client.
#[derive(Debug, Clone, Copy)]
pub struct AttestationEvidence<'a> {
    /// Base64 attestation object or integrity token
    pub token: &'a str,
    pub key_id: &'a str,
}

/// Raw assertion evidence supplied by the client.
#[derive(Debug, Clone, Copy)]
pub struct AssertionEvidence<'a> {
    /// Base64 assertion object
    pub assertion: &'a str,
    pub key_id: &'a str,
}

/// Identity established by a successful attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAttestation {
    /// Key identifier to register (empty when nothing should be stored)
    pub device_id: String,
    pub public_key: Vec<u8>,
    pub initial_counter: u64,
}

/// Result of a successful assertion signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedAssertion {
    /// Counter presented by the client, not yet checked for monotonicity
    pub counter: u64,
}

/// Verifies platform evidence against the vendor's root of trust.
#[async_trait]
pub trait PlatformVerifier: Send + Sync {
    fn platform(&self) -> Platform;

    async fn verify_attestation(
        &self,
        evidence: &AttestationEvidence<'_>,
        challenge: &str,
        bound_identifier: &str,
    ) -> Result<VerifiedAttestation, VerificationFailure>;

    async fn verify_assertion(
        &self,
        evidence: &AssertionEvidence<'_>,
        client_data: &[u8],
        public_key: &[u8],
    ) -> Result<VerifiedAssertion, VerificationFailure>;
}

/// A platform adapter plus the identifier keys are bound to on that platform.
#[derive(Clone)]
pub struct RegisteredPlatform {
    pub verifier: Arc<dyn PlatformVerifier>,
    /// App ID (`TEAMID.bundle`) for iOS, package name for Android
    pub bound_identifier: String,
}

impl std::fmt::Debug for RegisteredPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlatform")
            .field("platform", &self.verifier.platform())
            .field("bound_identifier", &self.bound_identifier)
            .finish()
    }
}

/// Enabled platform adapters, dispatched by [`Platform`].
#[derive(Debug, Clone, Default)]
pub struct PlatformVerifiers {
    ios: Option<RegisteredPlatform>,
    android: Option<RegisteredPlatform>,
}

impl PlatformVerifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ios(
        mut self,
        verifier: Arc<dyn PlatformVerifier>,
        app_id: impl Into<String>,
    ) -> Self {
        self.ios = Some(RegisteredPlatform {
            verifier,
            bound_identifier: app_id.into(),
        });
        self
    }

    pub fn with_android(
        mut self,
        verifier: Arc<dyn PlatformVerifier>,
        package_name: impl Into<String>,
    ) -> Self {
        self.android = Some(RegisteredPlatform {
            verifier,
            bound_identifier: package_name.into(),
        });
        self
    }

    /// Adapter for `platform`, if enabled.
    pub fn get(&self, platform: Platform) -> Option<&RegisteredPlatform> {
        match platform {
            Platform::Ios => self.ios.as_ref(),
            Platform::Android => self.android.as_ref(),
            Platform::Unspecified => None,
        }
    }

    pub fn is_enabled(&self, platform: Platform) -> bool {
        self.get(platform).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.ios.is_none() && self.android.is_none()
    }
}
