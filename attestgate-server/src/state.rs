//! Application state module
//!
//! Defines shared state accessible across all request handlers, and the
//! wiring from [`AttestationConfig`] to a ready [`AttestationVerifier`].

use std::sync::Arc;

use attestgate_core::platform::android::{
    PlayIntegrityClient, PlayIntegrityClientConfig, PlayIntegrityPolicy, PlayIntegrityVerifier,
    ServiceAccountKey,
};
use attestgate_core::platform::apple::{AppAttestVerifier, AppleTrustRoot};
use attestgate_core::{
    AttestationConfig, AttestationStorage, AttestationVerifier, Clock, ConfigError,
    PlatformVerifiers, StorageError, SystemClock,
};
use thiserror::Error;

/// Startup failures while building [`AppState`].
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Application state containing shared resources.
#[derive(Clone, Debug)]
pub struct AppState {
    pub verifier: Arc<AttestationVerifier>,
}

impl AppState {
    pub fn new(verifier: AttestationVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }

    /// Connect storage and register the configured platform adapters.
    ///
    /// Enabled iOS attestation requires `apple_trust_root`, since certificate
    /// chain validation is provided by the embedding deployment. Startup fails
    /// without it rather than serving with iOS enforcement missing.
    pub async fn from_config(
        config: &AttestationConfig,
        apple_trust_root: Option<Arc<dyn AppleTrustRoot>>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let storage =
            AttestationStorage::connect(&config.storage, config.challenge_ttl(), clock.clone())
                .await?;

        let verifiers = build_verifiers(config, apple_trust_root, clock)?;
        let verifier = AttestationVerifier::new(config.enabled, verifiers, storage)
            .with_verify_timeout(config.verify_timeout);

        tracing::info!(
            enabled = verifier.is_enabled(),
            ios = verifier.is_ios_enabled(),
            android = verifier.is_android_enabled(),
            backend = verifier.storage().backend_name(),
            "Attestation verifier ready"
        );

        Ok(Self::new(verifier))
    }
}

fn build_verifiers(
    config: &AttestationConfig,
    apple_trust_root: Option<Arc<dyn AppleTrustRoot>>,
    clock: Arc<dyn Clock>,
) -> Result<PlatformVerifiers, ConfigError> {
    let mut verifiers = PlatformVerifiers::new();
    if !config.enabled {
        return Ok(verifiers);
    }

    if let Some(ios) = &config.ios {
        let trust_root = apple_trust_root.ok_or(ConfigError::NoTrustRoot)?;
        let app_id = ios.app_id();
        let adapter = AppAttestVerifier::new(&app_id, ios.environment, trust_root);
        verifiers = verifiers.with_ios(Arc::new(adapter), app_id);
    }

    if let Some(android) = &config.android {
        let path = android.credentials_file.as_deref().ok_or(ConfigError::Missing(
            "ATTESTATION_GCP_CREDENTIALS_FILE",
            "ATTESTATION_ANDROID_PACKAGE is set".to_string(),
        ))?;
        let credentials = ServiceAccountKey::from_file(path)?;

        let mut client_config =
            PlayIntegrityClientConfig::new(android.package_name.clone(), credentials);
        client_config.project_id = android.project_id.clone();
        let client = PlayIntegrityClient::new(client_config)?;

        let policy = PlayIntegrityPolicy {
            require_strong_integrity: config.require_strong_integrity,
            max_token_age: config.challenge_ttl(),
            allowed_clock_skew: chrono::Duration::from_std(config.allowed_clock_skew)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
        };
        let adapter = PlayIntegrityVerifier::new(Arc::new(client), policy, clock);
        verifiers = verifiers.with_android(Arc::new(adapter), android.package_name.clone());
    }

    if verifiers.is_empty() {
        return Err(ConfigError::NoPlatform);
    }
    Ok(verifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attestgate_core::{AttestationError, IosConfig, VerificationFailure};

    #[tokio::test]
    async fn test_disabled_config_builds_pass_through_state() {
        let state = AppState::from_config(&AttestationConfig::default(), None)
            .await
            .unwrap();
        assert!(!state.verifier.is_enabled());
        assert_eq!(state.verifier.storage().backend_name(), "memory");
    }

    fn ios_config() -> AttestationConfig {
        AttestationConfig {
            enabled: true,
            ios: Some(IosConfig {
                team_id: "ABCDE12345".to_string(),
                bundle_id: "com.example.app".to_string(),
                environment: Default::default(),
            }),
            ..Default::default()
        }
    }

    struct RejectingTrustRoot;

    impl AppleTrustRoot for RejectingTrustRoot {
        fn verify_chain(
            &self,
            _x5c: &[Vec<u8>],
            _nonce: &[u8; 32],
        ) -> Result<Vec<u8>, VerificationFailure> {
            Err(VerificationFailure::UntrustedChain("test root".to_string()))
        }
    }

    #[tokio::test]
    async fn test_ios_without_trust_root_fails_startup() {
        let err = AppState::from_config(&ios_config(), None).await.unwrap_err();
        assert!(matches!(err, StartupError::Config(ConfigError::NoTrustRoot)));
    }

    #[tokio::test]
    async fn test_ios_with_trust_root_enforces() {
        let state = AppState::from_config(&ios_config(), Some(Arc::new(RejectingTrustRoot)))
            .await
            .unwrap();
        assert!(state.verifier.is_enabled());
        assert!(state.verifier.is_ios_enabled());
        assert_eq!(
            state.verifier.verify(None).await,
            Err(AttestationError::AttestationRequired)
        );
        assert_eq!(
            state.verifier.verify_assertion(None).await,
            Err(AttestationError::AttestationRequired)
        );
    }

    #[tokio::test]
    async fn test_enabled_without_platform_fails() {
        let config = AttestationConfig {
            enabled: true,
            ..Default::default()
        };
        let err = AppState::from_config(&config, None).await.unwrap_err();
        assert!(matches!(err, StartupError::Config(ConfigError::NoPlatform)));
    }
}
