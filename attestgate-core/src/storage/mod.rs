//! Storage backend selection.
//!
//! Provides challenge and device-key storage over one of:
//! - **Memory**: process-local `DashMap`s, single-instance deployments only.
//! - **Redis**: shared state via Lua scripts, for multi-instance deployments.
//! - **PostgreSQL**: shared, durable state via conditional statements.
//!
//! The backend is explicit configuration. A shared backend that cannot be
//! reached is a startup error; there is no fallback to memory, since mixing
//! local and shared state across instances would accept replays.

mod memory;
mod postgres;
mod redis;

pub use self::memory::{MemoryChallengeStore, MemoryDeviceKeyStore};
pub use self::postgres::{PostgresChallengeStore, PostgresDeviceKeyStore, PostgresStore};
pub use self::redis::{RedisChallengeStore, RedisDeviceKeyStore, RedisStore, DEFAULT_KEY_PREFIX};

use std::sync::Arc;

use chrono::Duration;

use crate::challenge::ChallengeStore;
use crate::clock::Clock;
use crate::device_key::DeviceKeyStore;
use crate::error::StorageError;

/// Which backend holds challenge and device-key state.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis {
        url: String,
        key_prefix: String,
    },
    Postgres {
        url: String,
        max_connections: u32,
    },
}

impl StorageBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis { .. } => "redis",
            Self::Postgres { .. } => "postgres",
        }
    }

    /// Whether state is visible to every server instance.
    pub fn is_shared(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // URLs may embed credentials
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::Redis { key_prefix, .. } => f
                .debug_struct("Redis")
                .field("url", &"[REDACTED]")
                .field("key_prefix", key_prefix)
                .finish(),
            Self::Postgres {
                max_connections, ..
            } => f
                .debug_struct("Postgres")
                .field("url", &"[REDACTED]")
                .field("max_connections", max_connections)
                .finish(),
        }
    }
}

/// Connection held for health checks.
#[derive(Debug, Clone)]
enum BackendHandle {
    Memory,
    Redis(RedisStore),
    Postgres(PostgresStore),
}

/// Challenge and device-key stores over one backend.
#[derive(Clone)]
pub struct AttestationStorage {
    pub challenges: Arc<dyn ChallengeStore>,
    pub keys: Arc<dyn DeviceKeyStore>,
    handle: BackendHandle,
}

impl AttestationStorage {
    /// Build the stores for `backend`.
    pub async fn connect(
        backend: &StorageBackend,
        challenge_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        match backend {
            StorageBackend::Memory => {
                tracing::warn!(
                    "Using in-memory attestation storage - state is lost on restart and not shared between instances"
                );
                Ok(Self::in_memory(challenge_ttl, clock))
            }
            StorageBackend::Redis { url, key_prefix } => {
                let store = RedisStore::connect(url, key_prefix).await?;
                tracing::info!("Using Redis attestation storage");
                Ok(Self {
                    challenges: Arc::new(RedisChallengeStore::new(
                        store.clone(),
                        challenge_ttl,
                        clock.clone(),
                    )),
                    keys: Arc::new(RedisDeviceKeyStore::new(store.clone(), clock)),
                    handle: BackendHandle::Redis(store),
                })
            }
            StorageBackend::Postgres {
                url,
                max_connections,
            } => {
                let store = PostgresStore::connect(url, *max_connections).await?;
                tracing::info!("Using PostgreSQL attestation storage");
                Ok(Self {
                    challenges: Arc::new(PostgresChallengeStore::new(
                        store.clone(),
                        challenge_ttl,
                        clock.clone(),
                    )),
                    keys: Arc::new(PostgresDeviceKeyStore::new(store.clone(), clock)),
                    handle: BackendHandle::Postgres(store),
                })
            }
        }
    }

    /// In-memory stores (single instance, tests).
    pub fn in_memory(challenge_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            challenges: Arc::new(MemoryChallengeStore::new(challenge_ttl, clock.clone())),
            keys: Arc::new(MemoryDeviceKeyStore::new(clock)),
            handle: BackendHandle::Memory,
        }
    }

    /// Wrap caller-provided stores.
    pub fn from_stores(
        challenges: Arc<dyn ChallengeStore>,
        keys: Arc<dyn DeviceKeyStore>,
    ) -> Self {
        Self {
            challenges,
            keys,
            handle: BackendHandle::Memory,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.handle {
            BackendHandle::Memory => "memory",
            BackendHandle::Redis(_) => "redis",
            BackendHandle::Postgres(_) => "postgres",
        }
    }

    /// Check backend connectivity (always Ok for memory).
    pub async fn check_health(&self) -> Result<(), StorageError> {
        match &self.handle {
            BackendHandle::Memory => Ok(()),
            BackendHandle::Redis(store) => store.check_health().await,
            BackendHandle::Postgres(store) => store.check_health().await,
        }
    }
}

impl std::fmt::Debug for AttestationStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationStorage")
            .field("backend", &self.backend_name())
            .finish()
    }
}
