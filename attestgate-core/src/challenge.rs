//! Single-use attestation challenges.
//!
//! A challenge binds a platform attestation to one server-issued request.
//! Stores must guarantee that a nonce validates at most once and never at or
//! after its expiry. Several challenges may be outstanding for the same
//! identifier at once; issuing a new one leaves earlier ones valid.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::StorageError;

/// Nonce size in bytes (256 bits).
pub const NONCE_BYTES: usize = 32;

/// Issued challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Caller-supplied identifier the challenge is scoped to
    pub identifier: String,
    /// Base64url (no padding) random token
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn new(identifier: &str, nonce: String, issued_at: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            identifier: identifier.to_string(),
            nonce,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    /// Whether the challenge has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage for outstanding challenges.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Create and persist a new challenge for `identifier`.
    async fn generate(&self, identifier: &str) -> Result<Challenge, StorageError>;

    /// Atomically consume a challenge.
    ///
    /// Returns `true` only if the challenge exists, belongs to `identifier`
    /// and has not expired; the challenge is removed in that case. Of several
    /// concurrent callers with the same pair, at most one sees `true`.
    async fn validate(&self, identifier: &str, nonce: &str) -> Result<bool, StorageError>;

    /// Delete expired challenges, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, StorageError>;
}

/// Generate a fresh random nonce from the OS CSPRNG.
pub fn generate_nonce() -> Result<String, StorageError> {
    let mut bytes = [0u8; NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| StorageError::Random)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Spawn a task that purges expired challenges every `interval`.
pub fn spawn_challenge_sweeper(
    store: Arc<dyn ChallengeStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired challenges"),
                Err(e) => tracing::warn!(error = %e, "Challenge sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_has_256_bits() {
        let nonce = generate_nonce().unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(&nonce).unwrap();
        assert_eq!(decoded.len(), NONCE_BYTES);
    }

    #[test]
    fn test_nonces_are_unique() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let challenge = Challenge::new("dev-1", "n".into(), now, chrono::Duration::seconds(300));
        assert!(!challenge.is_expired(now + chrono::Duration::seconds(299)));
        assert!(challenge.is_expired(now + chrono::Duration::seconds(300)));
    }
}
