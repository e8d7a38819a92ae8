//! Google Play Integrity verification.
//!
//! Integrity tokens are decrypted by Google's `decodeIntegrityToken` API
//! ([`PlayIntegrityClient`]); the verdict is then evaluated locally by
//! [`PlayIntegrityVerifier`]. Play Integrity has no assertion protocol.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use chrono::{TimeZone, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    AssertionEvidence, AttestationEvidence, PlatformVerifier, VerifiedAssertion,
    VerifiedAttestation,
};
use crate::clock::Clock;
use crate::device_key::Platform;
use crate::error::{ConfigError, VerificationFailure};

pub const PLAY_RECOGNIZED: &str = "PLAY_RECOGNIZED";
pub const MEETS_STRONG_INTEGRITY: &str = "MEETS_STRONG_INTEGRITY";
pub const MEETS_DEVICE_INTEGRITY: &str = "MEETS_DEVICE_INTEGRITY";

const DEFAULT_API_BASE: &str = "https://playintegrity.googleapis.com/v1";
const PLAY_INTEGRITY_SCOPE: &str = "https://www.googleapis.com/auth/playintegrity";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh cached access tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Decrypted integrity token (`tokenPayloadExternal`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub request_details: RequestDetails,
    #[serde(default)]
    pub app_integrity: AppIntegrity,
    #[serde(default)]
    pub device_integrity: DeviceIntegrity,
    #[serde(default)]
    pub account_details: Option<AccountDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub request_package_name: String,
    #[serde(default)]
    pub nonce: Option<String>,
    /// Milliseconds since the epoch, encoded as a JSON string
    pub timestamp_millis: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIntegrity {
    #[serde(default)]
    pub app_recognition_verdict: String,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub certificate_sha256_digest: Vec<String>,
    #[serde(default)]
    pub version_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIntegrity {
    #[serde(default)]
    pub device_recognition_verdict: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    #[serde(default)]
    pub app_licensing_verdict: String,
}

/// Decrypts and verifies an integrity token with Google.
#[async_trait]
pub trait IntegrityTokenDecoder: Send + Sync {
    async fn decode(&self, token: &str) -> Result<TokenPayload, VerificationFailure>;
}

/// Verdict policy for one Android package.
#[derive(Debug, Clone)]
pub struct PlayIntegrityPolicy {
    pub require_strong_integrity: bool,
    /// Maximum token age (challenge timeout)
    pub max_token_age: chrono::Duration,
    pub allowed_clock_skew: chrono::Duration,
}

impl Default for PlayIntegrityPolicy {
    fn default() -> Self {
        Self {
            require_strong_integrity: false,
            max_token_age: chrono::Duration::seconds(300),
            allowed_clock_skew: chrono::Duration::seconds(30),
        }
    }
}

/// Play Integrity adapter.
pub struct PlayIntegrityVerifier {
    decoder: Arc<dyn IntegrityTokenDecoder>,
    policy: PlayIntegrityPolicy,
    clock: Arc<dyn Clock>,
}

impl PlayIntegrityVerifier {
    pub fn new(
        decoder: Arc<dyn IntegrityTokenDecoder>,
        policy: PlayIntegrityPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            decoder,
            policy,
            clock,
        }
    }

    /// Evaluate a decoded verdict.
    pub fn evaluate(
        &self,
        payload: &TokenPayload,
        challenge: &str,
        package_name: &str,
    ) -> Result<(), VerificationFailure> {
        let request = &payload.request_details;
        if request.request_package_name != package_name {
            return Err(VerificationFailure::IdentifierMismatch(format!(
                "request package {}",
                request.request_package_name
            )));
        }
        if let Some(app_package) = &payload.app_integrity.package_name {
            if app_package != package_name {
                return Err(VerificationFailure::IdentifierMismatch(format!(
                    "app package {app_package}"
                )));
            }
        }

        let nonce = request.nonce.as_deref().unwrap_or_default();
        if nonce.trim_end_matches('=') != challenge.trim_end_matches('=') {
            return Err(VerificationFailure::ChallengeMismatch);
        }

        self.check_freshness(&request.timestamp_millis)?;

        let recognition = payload.app_integrity.app_recognition_verdict.as_str();
        if recognition != PLAY_RECOGNIZED {
            return Err(VerificationFailure::AppNotRecognized(recognition.to_string()));
        }

        let verdicts = &payload.device_integrity.device_recognition_verdict;
        let has = |v: &str| verdicts.iter().any(|x| x == v);
        let meets = if self.policy.require_strong_integrity {
            has(MEETS_STRONG_INTEGRITY)
        } else {
            has(MEETS_STRONG_INTEGRITY) || has(MEETS_DEVICE_INTEGRITY)
        };
        if !meets {
            return Err(VerificationFailure::IntegrityTooWeak(verdicts.join(",")));
        }

        Ok(())
    }

    fn check_freshness(&self, timestamp_millis: &str) -> Result<(), VerificationFailure> {
        let millis: i64 = timestamp_millis.parse().map_err(|_| {
            VerificationFailure::Malformed(format!("invalid timestampMillis {timestamp_millis}"))
        })?;
        let issued = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| VerificationFailure::Malformed("timestamp out of range".to_string()))?;

        let now = self.clock.now();
        let skew = self.policy.allowed_clock_skew;
        if issued > now + skew {
            return Err(VerificationFailure::Stale(format!(
                "token issued {}s in the future",
                (issued - now).num_seconds()
            )));
        }
        if now - issued > self.policy.max_token_age + skew {
            return Err(VerificationFailure::Stale(format!(
                "token is {}s old",
                (now - issued).num_seconds()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PlayIntegrityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayIntegrityVerifier")
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl PlatformVerifier for PlayIntegrityVerifier {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn verify_attestation(
        &self,
        evidence: &AttestationEvidence<'_>,
        challenge: &str,
        bound_identifier: &str,
    ) -> Result<VerifiedAttestation, VerificationFailure> {
        if evidence.token.is_empty() {
            return Err(VerificationFailure::Malformed("missing token".to_string()));
        }

        let payload = self.decoder.decode(evidence.token).await?;
        self.evaluate(&payload, challenge, bound_identifier)?;

        Ok(VerifiedAttestation {
            device_id: evidence.key_id.to_string(),
            public_key: Vec::new(),
            initial_counter: 0,
        })
    }

    async fn verify_assertion(
        &self,
        _evidence: &AssertionEvidence<'_>,
        _client_data: &[u8],
        _public_key: &[u8],
    ) -> Result<VerifiedAssertion, VerificationFailure> {
        Err(VerificationFailure::Unsupported)
    }
}

/// Google service account key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Invalid(
                "ATTESTATION_GCP_CREDENTIALS_FILE",
                format!("{}: {e}", path.display()),
            )
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Invalid("ATTESTATION_GCP_CREDENTIALS_FILE", e.to_string()))
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// HTTP settings for [`PlayIntegrityClient`].
#[derive(Debug, Clone)]
pub struct PlayIntegrityClientConfig {
    pub package_name: String,
    /// Sent as `x-goog-user-project` when set
    pub project_id: Option<String>,
    pub credentials: ServiceAccountKey,
    pub api_base: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl PlayIntegrityClientConfig {
    pub fn new(package_name: impl Into<String>, credentials: ServiceAccountKey) -> Self {
        Self {
            package_name: package_name.into(),
            project_id: None,
            credentials,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Serialize)]
struct JwtGrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct DecodeRequest<'a> {
    integrity_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecodeResponse {
    token_payload_external: TokenPayload,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Production [`IntegrityTokenDecoder`] calling the Play Integrity API.
pub struct PlayIntegrityClient {
    client: Client,
    config: PlayIntegrityClientConfig,
    signing_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl PlayIntegrityClient {
    pub fn new(config: PlayIntegrityClientConfig) -> Result<Self, ConfigError> {
        let signing_key = EncodingKey::from_rsa_pem(config.credentials.private_key.as_bytes())
            .map_err(|e| {
                ConfigError::Invalid("ATTESTATION_GCP_CREDENTIALS_FILE", format!("private key: {e}"))
            })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .https_only(true)
            .build()
            .map_err(|e| ConfigError::Invalid("http client", e.to_string()))?;

        Ok(Self {
            client,
            config,
            signing_key,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, VerificationFailure> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.mint_access_token().await?;
        let value = fresh.access_token.clone();
        *cached = Some(CachedToken {
            value: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(value)
    }

    async fn mint_access_token(&self) -> Result<AccessTokenResponse, VerificationFailure> {
        let credentials = &self.config.credentials;
        let iat = Utc::now().timestamp();
        let claims = JwtGrantClaims {
            iss: &credentials.client_email,
            scope: PLAY_INTEGRITY_SCOPE,
            aud: &credentials.token_uri,
            iat,
            exp: iat + 3600,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
                .map_err(|e| VerificationFailure::Vendor(format!("JWT signing failed: {e}")))?;

        let response = self
            .client
            .post(&credentials.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| VerificationFailure::Vendor(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerificationFailure::Vendor(format!(
                "token endpoint returned status: {status}"
            )));
        }

        debug!("Minted Play Integrity access token");
        response
            .json()
            .await
            .map_err(|e| VerificationFailure::Vendor(format!("invalid token response: {e}")))
    }

    async fn decode_once(
        &self,
        token: &str,
    ) -> Result<TokenPayload, backoff::Error<VerificationFailure>> {
        let start = Instant::now();
        let access_token = self
            .access_token()
            .await
            .map_err(backoff::Error::transient)?;

        let url = format!(
            "{}/{}:decodeIntegrityToken",
            self.config.api_base, self.config.package_name
        );
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&DecodeRequest {
                integrity_token: token,
            });
        if let Some(project) = &self.config.project_id {
            request = request.header("x-goog-user-project", project);
        }

        let response = request.send().await.map_err(|e| {
            let latency_ms = start.elapsed().as_millis() as u64;
            let err = VerificationFailure::Vendor(format!("decode request failed: {e}"));
            if is_transient_error(&e) {
                warn!(error = %e, latency_ms, "Transient error, will retry");
                backoff::Error::transient(err)
            } else {
                warn!(error = %e, latency_ms, "Permanent error, aborting");
                backoff::Error::permanent(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let latency_ms = start.elapsed().as_millis() as u64;
            return if is_transient_status(status) {
                warn!(status = %status, latency_ms, "Transient HTTP status, will retry");
                Err(backoff::Error::transient(VerificationFailure::Vendor(
                    format!("Play Integrity returned status: {status}"),
                )))
            } else if status == StatusCode::BAD_REQUEST {
                // Google rejects undecryptable or foreign tokens with 400
                Err(backoff::Error::permanent(VerificationFailure::Malformed(
                    "integrity token rejected by Google".to_string(),
                )))
            } else {
                warn!(status = %status, latency_ms, "Permanent HTTP error");
                Err(backoff::Error::permanent(VerificationFailure::Vendor(
                    format!("Play Integrity returned status: {status}"),
                )))
            };
        }

        let decoded: DecodeResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(VerificationFailure::Vendor(format!(
                "invalid decode response: {e}"
            )))
        })?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Integrity token decoded"
        );
        Ok(decoded.token_payload_external)
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for PlayIntegrityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayIntegrityClient")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl IntegrityTokenDecoder for PlayIntegrityClient {
    async fn decode(&self, token: &str) -> Result<TokenPayload, VerificationFailure> {
        retry_notify(
            self.build_backoff(),
            || async move { self.decode_once(token).await },
            |err: VerificationFailure, duration: Duration| {
                warn!(
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .await
    }
}

/// Check if a reqwest error is transient and should be retried.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

/// Check if an HTTP status code indicates a transient error.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const PACKAGE: &str = "com.example.app";
    const CHALLENGE: &str = "q5s8V3yq0kWcKJ3kB7m1xA";
    const MEETS_BASIC_INTEGRITY: &str = "MEETS_BASIC_INTEGRITY";

    struct FakeDecoder(Result<TokenPayload, VerificationFailure>);

    #[async_trait]
    impl IntegrityTokenDecoder for FakeDecoder {
        async fn decode(&self, _token: &str) -> Result<TokenPayload, VerificationFailure> {
            self.0.clone()
        }
    }

    fn payload(clock: &ManualClock) -> TokenPayload {
        TokenPayload {
            request_details: RequestDetails {
                request_package_name: PACKAGE.to_string(),
                nonce: Some(CHALLENGE.to_string()),
                timestamp_millis: clock.now().timestamp_millis().to_string(),
            },
            app_integrity: AppIntegrity {
                app_recognition_verdict: PLAY_RECOGNIZED.to_string(),
                package_name: Some(PACKAGE.to_string()),
                ..Default::default()
            },
            device_integrity: DeviceIntegrity {
                device_recognition_verdict: vec![
                    MEETS_BASIC_INTEGRITY.to_string(),
                    MEETS_DEVICE_INTEGRITY.to_string(),
                ],
            },
            account_details: None,
        }
    }

    fn verifier(
        clock: Arc<ManualClock>,
        result: Result<TokenPayload, VerificationFailure>,
        strong: bool,
    ) -> PlayIntegrityVerifier {
        PlayIntegrityVerifier::new(
            Arc::new(FakeDecoder(result)),
            PlayIntegrityPolicy {
                require_strong_integrity: strong,
                ..Default::default()
            },
            clock,
        )
    }

    async fn attest(
        verifier: &PlayIntegrityVerifier,
        key_id: &str,
    ) -> Result<VerifiedAttestation, VerificationFailure> {
        let evidence = AttestationEvidence {
            token: "opaque-integrity-token",
            key_id,
        };
        verifier
            .verify_attestation(&evidence, CHALLENGE, PACKAGE)
            .await
    }

    #[tokio::test]
    async fn test_device_integrity_accepted() {
        let clock = Arc::new(ManualClock::default());
        let v = verifier(clock.clone(), Ok(payload(&clock)), false);
        let verified = attest(&v, "android-key-1").await.unwrap();
        assert_eq!(verified.device_id, "android-key-1");
        assert!(verified.public_key.is_empty());
    }

    #[tokio::test]
    async fn test_strong_integrity_required() {
        let clock = Arc::new(ManualClock::default());
        let v = verifier(clock.clone(), Ok(payload(&clock)), true);
        assert!(matches!(
            attest(&v, "k").await,
            Err(VerificationFailure::IntegrityTooWeak(_))
        ));

        let mut strong = payload(&clock);
        strong
            .device_integrity
            .device_recognition_verdict
            .push(MEETS_STRONG_INTEGRITY.to_string());
        let v = verifier(clock.clone(), Ok(strong), true);
        assert!(attest(&v, "k").await.is_ok());
    }

    #[tokio::test]
    async fn test_basic_integrity_only_rejected() {
        let clock = Arc::new(ManualClock::default());
        let mut weak = payload(&clock);
        weak.device_integrity.device_recognition_verdict = vec![MEETS_BASIC_INTEGRITY.to_string()];
        let v = verifier(clock.clone(), Ok(weak), false);
        assert!(matches!(
            attest(&v, "k").await,
            Err(VerificationFailure::IntegrityTooWeak(_))
        ));
    }

    #[tokio::test]
    async fn test_nonce_must_match_challenge() {
        let clock = Arc::new(ManualClock::default());
        let mut p = payload(&clock);
        p.request_details.nonce = Some("some-other-nonce".to_string());
        let v = verifier(clock.clone(), Ok(p), false);
        assert_eq!(
            attest(&v, "k").await.unwrap_err(),
            VerificationFailure::ChallengeMismatch
        );
    }

    #[tokio::test]
    async fn test_package_mismatch() {
        let clock = Arc::new(ManualClock::default());
        let mut p = payload(&clock);
        p.request_details.request_package_name = "com.attacker.app".to_string();
        let v = verifier(clock.clone(), Ok(p), false);
        assert!(matches!(
            attest(&v, "k").await,
            Err(VerificationFailure::IdentifierMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_unrecognized_app() {
        let clock = Arc::new(ManualClock::default());
        let mut p = payload(&clock);
        p.app_integrity.app_recognition_verdict = "UNRECOGNIZED_VERSION".to_string();
        let v = verifier(clock.clone(), Ok(p), false);
        assert!(matches!(
            attest(&v, "k").await,
            Err(VerificationFailure::AppNotRecognized(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_token() {
        let clock = Arc::new(ManualClock::default());
        let p = payload(&clock);
        clock.advance(chrono::Duration::seconds(331));
        let v = verifier(clock.clone(), Ok(p), false);
        assert!(matches!(
            attest(&v, "k").await,
            Err(VerificationFailure::Stale(_))
        ));
    }

    #[tokio::test]
    async fn test_token_within_skew_accepted() {
        let clock = Arc::new(ManualClock::default());
        let p = payload(&clock);
        clock.advance(chrono::Duration::seconds(320));
        let v = verifier(clock.clone(), Ok(p), false);
        assert!(attest(&v, "k").await.is_ok());
    }

    #[tokio::test]
    async fn test_vendor_failure_propagates() {
        let clock = Arc::new(ManualClock::default());
        let v = verifier(
            clock,
            Err(VerificationFailure::Vendor("connection reset".into())),
            false,
        );
        assert!(matches!(
            attest(&v, "k").await,
            Err(VerificationFailure::Vendor(_))
        ));
    }

    #[tokio::test]
    async fn test_assertion_unsupported() {
        let clock = Arc::new(ManualClock::default());
        let v = verifier(clock.clone(), Ok(payload(&clock)), false);
        let evidence = AssertionEvidence {
            assertion: "x",
            key_id: "k",
        };
        assert_eq!(
            v.verify_assertion(&evidence, b"data", &[]).await.unwrap_err(),
            VerificationFailure::Unsupported
        );
    }

    #[test]
    fn test_decode_response_shape() {
        let json = r#"{
            "tokenPayloadExternal": {
                "requestDetails": {
                    "requestPackageName": "com.example.app",
                    "nonce": "abc",
                    "timestampMillis": "1700000000000"
                },
                "appIntegrity": {
                    "appRecognitionVerdict": "PLAY_RECOGNIZED",
                    "packageName": "com.example.app",
                    "certificateSha256Digest": ["6a6a14"],
                    "versionCode": "42"
                },
                "deviceIntegrity": {
                    "deviceRecognitionVerdict": ["MEETS_DEVICE_INTEGRITY"]
                },
                "accountDetails": { "appLicensingVerdict": "LICENSED" }
            }
        }"#;
        let decoded: DecodeResponse = serde_json::from_str(json).unwrap();
        let payload = decoded.token_payload_external;
        assert_eq!(payload.request_details.timestamp_millis, "1700000000000");
        assert_eq!(payload.app_integrity.version_code.as_deref(), Some("42"));
        assert_eq!(
            payload.account_details.unwrap().app_licensing_verdict,
            "LICENSED"
        );
    }

    #[test]
    fn test_transient_status_codes() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }
}
