//! Registered device keys and their replay counters.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Mobile platform a request claims to come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    #[serde(other)]
    Unspecified,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    /// Lenient parse; anything unrecognised becomes `Unspecified`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "ios" | "apple" => Self::Ios,
            "android" | "google" => Self::Android,
            _ => Self::Unspecified,
        })
    }
}

/// A registered device key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKey {
    pub key_id: String,
    pub platform: Platform,
    /// Opaque public key handle (SEC1 point for App Attest, empty for Play Integrity)
    pub public_key: Vec<u8>,
    pub bound_identifier: String,
    /// Last accepted signature counter
    pub counter: u64,
    pub created_at: DateTime<Utc>,
}

/// Registration request for a freshly attested key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeviceKey {
    pub key_id: String,
    pub platform: Platform,
    pub public_key: Vec<u8>,
    pub bound_identifier: String,
    pub initial_counter: u64,
}

impl NewDeviceKey {
    pub fn into_device_key(self, created_at: DateTime<Utc>) -> DeviceKey {
        DeviceKey {
            key_id: self.key_id,
            platform: self.platform,
            public_key: self.public_key,
            bound_identifier: self.bound_identifier,
            counter: self.initial_counter,
            created_at,
        }
    }

    /// Whether `existing` describes the same key material and scope.
    pub fn matches(&self, existing: &DeviceKey) -> bool {
        existing.platform == self.platform
            && existing.public_key == self.public_key
            && existing.bound_identifier == self.bound_identifier
    }
}

/// Result of [`DeviceKeyStore::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// New key stored with its initial counter
    Created,
    /// Identical key already stored; its counter was left untouched
    AlreadyRegistered,
    /// A different key is stored under this identifier
    Conflict,
}

/// Result of [`DeviceKeyStore::advance_counter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterAdvance {
    Accepted(u64),
    ReplayRejected,
    NotFound,
}

/// Persistent store of device keys.
///
/// Re-registering an identical key is idempotent and never resets the
/// counter; registering different key material under an existing `key_id`
/// is a conflict.
#[async_trait]
pub trait DeviceKeyStore: Send + Sync {
    async fn register(&self, key: NewDeviceKey) -> Result<RegisterOutcome, StorageError>;

    async fn get(&self, key_id: &str) -> Result<Option<DeviceKey>, StorageError>;

    /// Store `presented` if it is strictly greater than the current counter.
    ///
    /// Must be a single atomic compare-and-set per key.
    async fn advance_counter(
        &self,
        key_id: &str,
        presented: u64,
    ) -> Result<CounterAdvance, StorageError>;
}

/// Mask an identifier for logging: `abcd***wxyz`.
pub fn mask_identifier(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}
