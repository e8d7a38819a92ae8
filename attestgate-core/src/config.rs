//! Attestation configuration
//!
//! Loaded from environment variables (`ATTESTATION_*`, `REDIS_*`,
//! `DATABASE_*`). Unlike the server settings, malformed or incomplete
//! values are errors rather than silently defaulted.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::platform::apple::AppAttestEnvironment;
use crate::storage::{StorageBackend, DEFAULT_KEY_PREFIX};

/// iOS App Attest settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IosConfig {
    pub team_id: String,
    pub bundle_id: String,
    pub environment: AppAttestEnvironment,
}

impl IosConfig {
    /// App ID (`TEAMID.bundle.identifier`) keys are bound to.
    pub fn app_id(&self) -> String {
        format!("{}.{}", self.team_id, self.bundle_id)
    }
}

/// Android Play Integrity settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidConfig {
    pub package_name: String,
    pub project_id: Option<String>,
    /// Google service account JSON used to call the Play Integrity API
    pub credentials_file: Option<PathBuf>,
}

/// Attestation subsystem configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationConfig {
    /// Master switch (default: false)
    pub enabled: bool,
    pub ios: Option<IosConfig>,
    pub android: Option<AndroidConfig>,
    /// Require MEETS_STRONG_INTEGRITY on Android (default: false)
    pub require_strong_integrity: bool,
    /// Challenge lifetime (default: 300s)
    pub challenge_timeout: Duration,
    /// Tolerated vendor clock drift (default: 30s)
    pub allowed_clock_skew: Duration,
    /// Default deadline for one verification (default: 10s)
    pub verify_timeout: Duration,
    /// Expired challenge sweep period (default: 60s)
    pub sweep_interval: Duration,
    pub storage: StorageBackend,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ios: None,
            android: None,
            require_strong_integrity: false,
            challenge_timeout: Duration::from_secs(300),
            allowed_clock_skew: Duration::from_secs(30),
            verify_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            storage: StorageBackend::Memory,
        }
    }
}

impl AttestationConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let enabled = parse_bool(&get, "ATTESTATION_ENABLED")?.unwrap_or(false);

        let ios = match (get("ATTESTATION_IOS_TEAM_ID"), get("ATTESTATION_IOS_BUNDLE_ID")) {
            (Some(team_id), Some(bundle_id)) => Some(IosConfig {
                team_id,
                bundle_id,
                environment: get("ATTESTATION_IOS_ENV")
                    .map(|v| v.parse())
                    .transpose()?
                    .unwrap_or_default(),
            }),
            (None, Some(_)) => {
                return Err(ConfigError::Missing(
                    "ATTESTATION_IOS_TEAM_ID",
                    "ATTESTATION_IOS_BUNDLE_ID is set".to_string(),
                ))
            }
            (Some(_), None) => {
                return Err(ConfigError::Missing(
                    "ATTESTATION_IOS_BUNDLE_ID",
                    "ATTESTATION_IOS_TEAM_ID is set".to_string(),
                ))
            }
            (None, None) => None,
        };

        let android = get("ATTESTATION_ANDROID_PACKAGE").map(|package_name| AndroidConfig {
            package_name,
            project_id: get("ATTESTATION_GCP_PROJECT_ID"),
            credentials_file: get("ATTESTATION_GCP_CREDENTIALS_FILE").map(PathBuf::from),
        });

        let require_strong_integrity =
            parse_bool(&get, "ATTESTATION_REQUIRE_STRONG_INTEGRITY")?.unwrap_or(false);

        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                None => Ok(default),
                Some(v) => v
                    .parse::<u64>()
                    .ok()
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::Invalid(key, v)),
            }
        };

        let storage = match get("ATTESTATION_STORAGE")
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("memory") => StorageBackend::Memory,
            Some("redis") => StorageBackend::Redis {
                url: get("REDIS_URL").ok_or_else(|| {
                    ConfigError::Missing("REDIS_URL", "ATTESTATION_STORAGE=redis".to_string())
                })?,
                key_prefix: get("REDIS_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            },
            Some("postgres") | Some("postgresql") => StorageBackend::Postgres {
                url: get("DATABASE_URL").ok_or_else(|| {
                    ConfigError::Missing("DATABASE_URL", "ATTESTATION_STORAGE=postgres".to_string())
                })?,
                max_connections: match get("DATABASE_MAX_CONNECTIONS") {
                    None => 10,
                    Some(v) => v
                        .parse()
                        .map_err(|_| ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", v))?,
                },
            },
            Some(other) => {
                return Err(ConfigError::Invalid(
                    "ATTESTATION_STORAGE",
                    other.to_string(),
                ))
            }
        };

        let config = Self {
            enabled,
            ios,
            android,
            require_strong_integrity,
            challenge_timeout: secs("ATTESTATION_CHALLENGE_TIMEOUT_SECS", defaults.challenge_timeout)?,
            allowed_clock_skew: secs("ATTESTATION_CLOCK_SKEW_SECS", defaults.allowed_clock_skew)?,
            verify_timeout: secs("ATTESTATION_VERIFY_TIMEOUT_SECS", defaults.verify_timeout)?,
            sweep_interval: secs("ATTESTATION_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            storage,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.ios.is_none() && self.android.is_none() {
            return Err(ConfigError::NoPlatform);
        }
        if let Some(android) = &self.android {
            if android.credentials_file.is_none() {
                return Err(ConfigError::Missing(
                    "ATTESTATION_GCP_CREDENTIALS_FILE",
                    "ATTESTATION_ANDROID_PACKAGE is set".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn challenge_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.challenge_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300))
    }
}

fn parse_bool<G>(get: &G, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid(key, v)),
        },
    }
}
