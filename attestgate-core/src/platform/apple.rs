//! Apple App Attest verification.
//!
//! Attestation objects are CBOR maps
//! `{fmt: "apple-appattest", attStmt: {x5c, receipt}, authData}`; assertions
//! are CBOR maps `{signature, authenticatorData}`. Certificate chain
//! validation against the Apple App Attestation Root CA is delegated to an
//! [`AppleTrustRoot`].

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use ciborium::Value;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};
use sha2::{Digest, Sha256};

use super::{
    AssertionEvidence, AttestationEvidence, AuthenticatorData, PlatformVerifier,
    VerifiedAssertion, VerifiedAttestation,
};
use crate::device_key::Platform;
use crate::error::{ConfigError, VerificationFailure};

const ATTESTATION_FORMAT: &str = "apple-appattest";

/// App Attest environment, selecting the expected AAGUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppAttestEnvironment {
    #[default]
    Production,
    Development,
}

impl AppAttestEnvironment {
    pub fn aaguid(&self) -> &'static [u8; 16] {
        match self {
            Self::Production => b"appattest\0\0\0\0\0\0\0",
            Self::Development => b"appattestdevelop",
        }
    }
}

impl FromStr for AppAttestEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => Err(ConfigError::Invalid("ATTESTATION_IOS_ENV", other.to_string())),
        }
    }
}

/// Validates an App Attest certificate chain.
///
/// Implementations check `x5c` (leaf first) up to the Apple App Attestation
/// Root CA, confirm the leaf's nonce extension (OID 1.2.840.113635.100.8.2)
/// equals `nonce`, and return the leaf's SEC1 uncompressed P-256 public key.
pub trait AppleTrustRoot: Send + Sync {
    fn verify_chain(
        &self,
        x5c: &[Vec<u8>],
        nonce: &[u8; 32],
    ) -> Result<Vec<u8>, VerificationFailure>;
}

/// App Attest adapter for one App ID.
pub struct AppAttestVerifier {
    app_id_hash: [u8; 32],
    environment: AppAttestEnvironment,
    trust_root: Arc<dyn AppleTrustRoot>,
}

impl AppAttestVerifier {
    /// `app_id` is `TEAMID.bundle.identifier`.
    pub fn new(
        app_id: &str,
        environment: AppAttestEnvironment,
        trust_root: Arc<dyn AppleTrustRoot>,
    ) -> Self {
        Self {
            app_id_hash: sha256(app_id.as_bytes()),
            environment,
            trust_root,
        }
    }
}

impl std::fmt::Debug for AppAttestVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAttestVerifier")
            .field("app_id_hash", &hex::encode(self.app_id_hash))
            .field("environment", &self.environment)
            .finish()
    }
}

#[async_trait]
impl PlatformVerifier for AppAttestVerifier {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn verify_attestation(
        &self,
        evidence: &AttestationEvidence<'_>,
        challenge: &str,
        bound_identifier: &str,
    ) -> Result<VerifiedAttestation, VerificationFailure> {
        if evidence.key_id.is_empty() {
            return Err(malformed("missing key id"));
        }
        let key_id = STANDARD
            .decode(evidence.key_id)
            .map_err(|_| malformed("key id is not base64"))?;

        let object = decode_cbor_map(evidence.token)?;
        let fmt = text_field(&object, "fmt")?;
        if fmt != ATTESTATION_FORMAT {
            return Err(VerificationFailure::Malformed(format!(
                "unexpected attestation format {fmt}"
            )));
        }
        let statement = map_field(&object, "attStmt")?;
        let x5c = certificate_chain(statement)?;
        let auth_data = bytes_field(&object, "authData")?;

        let client_data_hash = sha256(challenge.as_bytes());
        let nonce = sha256_concat(auth_data, &client_data_hash);
        let public_key = self.trust_root.verify_chain(&x5c, &nonce)?;

        if sha256(&public_key).as_slice() != key_id.as_slice() {
            return Err(VerificationFailure::KeyMismatch);
        }

        let parsed = AuthenticatorData::parse(auth_data)?;
        if parsed.rp_id_hash != sha256(bound_identifier.as_bytes()) {
            return Err(VerificationFailure::IdentifierMismatch(
                "rpIdHash does not match app id".to_string(),
            ));
        }
        if parsed.counter != 0 {
            return Err(VerificationFailure::Malformed(format!(
                "attestation counter is {}",
                parsed.counter
            )));
        }
        let credential = parsed
            .attested_credential
            .ok_or_else(|| malformed("missing attested credential data"))?;
        if &credential.aaguid != self.environment.aaguid() {
            return Err(VerificationFailure::IdentifierMismatch(format!(
                "aaguid does not match {:?} environment",
                self.environment
            )));
        }
        if credential.credential_id != key_id {
            return Err(VerificationFailure::KeyMismatch);
        }

        Ok(VerifiedAttestation {
            device_id: evidence.key_id.to_string(),
            public_key,
            initial_counter: 0,
        })
    }

    async fn verify_assertion(
        &self,
        evidence: &AssertionEvidence<'_>,
        client_data: &[u8],
        public_key: &[u8],
    ) -> Result<VerifiedAssertion, VerificationFailure> {
        let object = decode_cbor_map(evidence.assertion)?;
        let signature = bytes_field(&object, "signature")?;
        let auth_data = bytes_field(&object, "authenticatorData")?;

        let parsed = AuthenticatorData::parse(auth_data)?;
        if parsed.rp_id_hash != self.app_id_hash {
            return Err(VerificationFailure::IdentifierMismatch(
                "rpIdHash does not match app id".to_string(),
            ));
        }

        let nonce = sha256_concat(auth_data, &sha256(client_data));
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key)
            .verify(&nonce, signature)
            .map_err(|_| VerificationFailure::BadSignature)?;

        Ok(VerifiedAssertion {
            counter: u64::from(parsed.counter),
        })
    }
}

type CborMap = Vec<(Value, Value)>;

fn decode_cbor_map(encoded: &str) -> Result<CborMap, VerificationFailure> {
    if encoded.is_empty() {
        return Err(malformed("missing token"));
    }
    let raw = STANDARD
        .decode(encoded)
        .map_err(|_| malformed("token is not base64"))?;
    let value: Value = ciborium::de::from_reader(raw.as_slice())
        .map_err(|e| VerificationFailure::Malformed(format!("invalid CBOR: {e}")))?;
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(malformed("CBOR root is not a map")),
    }
}

fn field<'a>(map: &'a [(Value, Value)], name: &str) -> Result<&'a Value, VerificationFailure> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
        .ok_or_else(|| VerificationFailure::Malformed(format!("missing field {name}")))
}

fn text_field<'a>(map: &'a [(Value, Value)], name: &str) -> Result<&'a str, VerificationFailure> {
    field(map, name)?
        .as_text()
        .ok_or_else(|| VerificationFailure::Malformed(format!("{name} is not text")))
}

fn bytes_field<'a>(
    map: &'a [(Value, Value)],
    name: &str,
) -> Result<&'a [u8], VerificationFailure> {
    field(map, name)?
        .as_bytes()
        .map(Vec::as_slice)
        .ok_or_else(|| VerificationFailure::Malformed(format!("{name} is not a byte string")))
}

fn map_field<'a>(
    map: &'a [(Value, Value)],
    name: &str,
) -> Result<&'a [(Value, Value)], VerificationFailure> {
    field(map, name)?
        .as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| VerificationFailure::Malformed(format!("{name} is not a map")))
}

fn certificate_chain(statement: &[(Value, Value)]) -> Result<Vec<Vec<u8>>, VerificationFailure> {
    let certs = field(statement, "x5c")?
        .as_array()
        .ok_or_else(|| malformed("x5c is not an array"))?;
    if certs.is_empty() {
        return Err(VerificationFailure::UntrustedChain(
            "empty certificate chain".to_string(),
        ));
    }
    certs
        .iter()
        .map(|cert| {
            cert.as_bytes()
                .cloned()
                .ok_or_else(|| malformed("x5c entry is not a byte string"))
        })
        .collect()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn sha256_concat(first: &[u8], second: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize().into()
}

fn malformed(reason: &str) -> VerificationFailure {
    VerificationFailure::Malformed(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::authdata::encode;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

    const APP_ID: &str = "TEAMID1234.com.example.app";
    const CHALLENGE: &str = "server-issued-challenge";

    /// Accepts any chain whose nonce matches and returns a fixed key.
    struct FakeTrustRoot {
        public_key: Vec<u8>,
    }

    impl AppleTrustRoot for FakeTrustRoot {
        fn verify_chain(
            &self,
            x5c: &[Vec<u8>],
            nonce: &[u8; 32],
        ) -> Result<Vec<u8>, VerificationFailure> {
            // The fake "leaf" carries the expected nonce verbatim
            if x5c[0].as_slice() != nonce.as_slice() {
                return Err(VerificationFailure::UntrustedChain("nonce".into()));
            }
            Ok(self.public_key.clone())
        }
    }

    struct Device {
        key_pair: EcdsaKeyPair,
        rng: SystemRandom,
    }

    impl Device {
        fn new() -> Self {
            let rng = SystemRandom::new();
            let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
            let key_pair =
                EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                    .unwrap();
            Self { key_pair, rng }
        }

        fn public_key(&self) -> Vec<u8> {
            self.key_pair.public_key().as_ref().to_vec()
        }

        fn key_id_bytes(&self) -> [u8; 32] {
            sha256(&self.public_key())
        }

        fn key_id(&self) -> String {
            STANDARD.encode(self.key_id_bytes())
        }

        fn attestation(&self, aaguid: &[u8; 16], counter: u32, app_id: &str) -> String {
            let key_id = self.key_id_bytes();
            let auth_data = encode(&sha256(app_id.as_bytes()), counter, Some((aaguid, key_id.as_slice())));
            let nonce = sha256_concat(&auth_data, &sha256(CHALLENGE.as_bytes()));
            let object = Value::Map(vec![
                (Value::Text("fmt".into()), Value::Text(ATTESTATION_FORMAT.into())),
                (
                    Value::Text("attStmt".into()),
                    Value::Map(vec![
                        (
                            Value::Text("x5c".into()),
                            Value::Array(vec![Value::Bytes(nonce.to_vec())]),
                        ),
                        (Value::Text("receipt".into()), Value::Bytes(vec![1, 2, 3])),
                    ]),
                ),
                (Value::Text("authData".into()), Value::Bytes(auth_data)),
            ]);
            to_base64_cbor(&object)
        }

        fn assertion(&self, counter: u32, client_data: &[u8]) -> String {
            let auth_data = encode(&sha256(APP_ID.as_bytes()), counter, None);
            let nonce = sha256_concat(&auth_data, &sha256(client_data));
            let signature = self.key_pair.sign(&self.rng, &nonce).unwrap();
            let object = Value::Map(vec![
                (
                    Value::Text("signature".into()),
                    Value::Bytes(signature.as_ref().to_vec()),
                ),
                (
                    Value::Text("authenticatorData".into()),
                    Value::Bytes(auth_data),
                ),
            ]);
            to_base64_cbor(&object)
        }
    }

    fn to_base64_cbor(value: &Value) -> String {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf).unwrap();
        STANDARD.encode(buf)
    }

    fn verifier(device: &Device, environment: AppAttestEnvironment) -> AppAttestVerifier {
        AppAttestVerifier::new(
            APP_ID,
            environment,
            Arc::new(FakeTrustRoot {
                public_key: device.public_key(),
            }),
        )
    }

    #[tokio::test]
    async fn test_valid_attestation() {
        let device = Device::new();
        let token = device.attestation(b"appattestdevelop", 0, APP_ID);
        let key_id = device.key_id();
        let evidence = AttestationEvidence {
            token: &token,
            key_id: &key_id,
        };

        let verified = verifier(&device, AppAttestEnvironment::Development)
            .verify_attestation(&evidence, CHALLENGE, APP_ID)
            .await
            .unwrap();
        assert_eq!(verified.device_id, key_id);
        assert_eq!(verified.public_key, device.public_key());
        assert_eq!(verified.initial_counter, 0);
    }

    #[tokio::test]
    async fn test_wrong_challenge_fails_chain_nonce() {
        let device = Device::new();
        let token = device.attestation(b"appattestdevelop", 0, APP_ID);
        let key_id = device.key_id();
        let evidence = AttestationEvidence {
            token: &token,
            key_id: &key_id,
        };

        let err = verifier(&device, AppAttestEnvironment::Development)
            .verify_attestation(&evidence, "another-challenge", APP_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::UntrustedChain(_)));
    }

    #[tokio::test]
    async fn test_environment_mismatch() {
        let device = Device::new();
        let token = device.attestation(b"appattestdevelop", 0, APP_ID);
        let key_id = device.key_id();
        let evidence = AttestationEvidence {
            token: &token,
            key_id: &key_id,
        };

        let err = verifier(&device, AppAttestEnvironment::Production)
            .verify_attestation(&evidence, CHALLENGE, APP_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::IdentifierMismatch(_)));
    }

    #[tokio::test]
    async fn test_app_id_mismatch() {
        let device = Device::new();
        let token = device.attestation(b"appattestdevelop", 0, "OTHERTEAM.com.example.app");
        let key_id = device.key_id();
        let evidence = AttestationEvidence {
            token: &token,
            key_id: &key_id,
        };

        let err = verifier(&device, AppAttestEnvironment::Development)
            .verify_attestation(&evidence, CHALLENGE, APP_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::IdentifierMismatch(_)));
    }

    #[tokio::test]
    async fn test_key_id_must_hash_public_key() {
        let device = Device::new();
        let token = device.attestation(b"appattestdevelop", 0, APP_ID);
        let wrong_key_id = STANDARD.encode([0u8; 32]);
        let evidence = AttestationEvidence {
            token: &token,
            key_id: &wrong_key_id,
        };

        let err = verifier(&device, AppAttestEnvironment::Development)
            .verify_attestation(&evidence, CHALLENGE, APP_ID)
            .await
            .unwrap_err();
        assert_eq!(err, VerificationFailure::KeyMismatch);
    }

    #[tokio::test]
    async fn test_nonzero_attestation_counter_rejected() {
        let device = Device::new();
        let token = device.attestation(b"appattestdevelop", 3, APP_ID);
        let key_id = device.key_id();
        let evidence = AttestationEvidence {
            token: &token,
            key_id: &key_id,
        };

        let err = verifier(&device, AppAttestEnvironment::Development)
            .verify_attestation(&evidence, CHALLENGE, APP_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::Malformed(_)));
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let device = Device::new();
        let key_id = device.key_id();
        let evidence = AttestationEvidence {
            token: "!!not base64!!",
            key_id: &key_id,
        };
        let err = verifier(&device, AppAttestEnvironment::Development)
            .verify_attestation(&evidence, CHALLENGE, APP_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationFailure::Malformed(_)));
    }

    #[tokio::test]
    async fn test_valid_assertion_returns_counter() {
        let device = Device::new();
        let client_data = br#"{"path":"/v1/orders","nonce":"abc"}"#;
        let assertion = device.assertion(7, client_data);
        let key_id = device.key_id();
        let evidence = AssertionEvidence {
            assertion: &assertion,
            key_id: &key_id,
        };

        let verified = verifier(&device, AppAttestEnvironment::Development)
            .verify_assertion(&evidence, client_data, &device.public_key())
            .await
            .unwrap();
        assert_eq!(verified.counter, 7);
    }

    #[tokio::test]
    async fn test_assertion_over_other_client_data_fails() {
        let device = Device::new();
        let assertion = device.assertion(7, b"original");
        let key_id = device.key_id();
        let evidence = AssertionEvidence {
            assertion: &assertion,
            key_id: &key_id,
        };

        let err = verifier(&device, AppAttestEnvironment::Development)
            .verify_assertion(&evidence, b"tampered", &device.public_key())
            .await
            .unwrap_err();
        assert_eq!(err, VerificationFailure::BadSignature);
    }

    #[tokio::test]
    async fn test_assertion_with_other_key_fails() {
        let device = Device::new();
        let other = Device::new();
        let assertion = device.assertion(1, b"data");
        let key_id = device.key_id();
        let evidence = AssertionEvidence {
            assertion: &assertion,
            key_id: &key_id,
        };

        let err = verifier(&device, AppAttestEnvironment::Development)
            .verify_assertion(&evidence, b"data", &other.public_key())
            .await
            .unwrap_err();
        assert_eq!(err, VerificationFailure::BadSignature);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "development".parse::<AppAttestEnvironment>().unwrap(),
            AppAttestEnvironment::Development
        );
        assert_eq!(
            "Production".parse::<AppAttestEnvironment>().unwrap(),
            AppAttestEnvironment::Production
        );
        assert!("staging".parse::<AppAttestEnvironment>().is_err());
        assert_eq!(AppAttestEnvironment::Production.aaguid().len(), 16);
    }
}
