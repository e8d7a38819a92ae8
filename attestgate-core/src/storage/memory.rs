//! In-process storage for challenges and device keys.
//!
//! Suitable for single-instance deployments only. All critical sections run
//! under a `DashMap` shard lock and never span an `.await`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::challenge::{generate_nonce, Challenge, ChallengeStore};
use crate::clock::Clock;
use crate::device_key::{CounterAdvance, DeviceKey, DeviceKeyStore, NewDeviceKey, RegisterOutcome};
use crate::error::StorageError;

/// In-memory challenge store keyed by nonce.
pub struct MemoryChallengeStore {
    challenges: DashMap<String, Challenge>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryChallengeStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            challenges: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Number of outstanding (possibly expired) challenges.
    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn generate(&self, identifier: &str) -> Result<Challenge, StorageError> {
        loop {
            let nonce = generate_nonce()?;
            let challenge = Challenge::new(identifier, nonce.clone(), self.clock.now(), self.ttl);
            // 256-bit nonces do not collide in practice; never overwrite if one does.
            if let Entry::Vacant(slot) = self.challenges.entry(nonce) {
                slot.insert(challenge.clone());
                return Ok(challenge);
            }
        }
    }

    async fn validate(&self, identifier: &str, nonce: &str) -> Result<bool, StorageError> {
        let now = self.clock.now();

        if self
            .challenges
            .remove_if(nonce, |_, c| c.identifier == identifier && !c.is_expired(now))
            .is_some()
        {
            return Ok(true);
        }

        // Lazy reclamation of an expired entry
        self.challenges.remove_if(nonce, |_, c| c.is_expired(now));
        Ok(false)
    }

    async fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = self.clock.now();
        let before = self.challenges.len();
        self.challenges.retain(|_, c| !c.is_expired(now));
        Ok(before.saturating_sub(self.challenges.len()))
    }
}

impl std::fmt::Debug for MemoryChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChallengeStore")
            .field("challenges", &self.challenges.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// In-memory device key store.
pub struct MemoryDeviceKeyStore {
    keys: DashMap<String, DeviceKey>,
    clock: Arc<dyn Clock>,
}

impl MemoryDeviceKeyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl DeviceKeyStore for MemoryDeviceKeyStore {
    async fn register(&self, key: NewDeviceKey) -> Result<RegisterOutcome, StorageError> {
        match self.keys.entry(key.key_id.clone()) {
            Entry::Occupied(existing) => {
                if key.matches(existing.get()) {
                    Ok(RegisterOutcome::AlreadyRegistered)
                } else {
                    Ok(RegisterOutcome::Conflict)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(key.into_device_key(self.clock.now()));
                Ok(RegisterOutcome::Created)
            }
        }
    }

    async fn get(&self, key_id: &str) -> Result<Option<DeviceKey>, StorageError> {
        Ok(self.keys.get(key_id).map(|entry| entry.value().clone()))
    }

    async fn advance_counter(
        &self,
        key_id: &str,
        presented: u64,
    ) -> Result<CounterAdvance, StorageError> {
        // get_mut holds the shard write lock for the compare-and-set
        let Some(mut entry) = self.keys.get_mut(key_id) else {
            return Ok(CounterAdvance::NotFound);
        };
        if presented > entry.counter {
            entry.counter = presented;
            Ok(CounterAdvance::Accepted(presented))
        } else {
            Ok(CounterAdvance::ReplayRejected)
        }
    }
}

impl std::fmt::Debug for MemoryDeviceKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDeviceKeyStore")
            .field("keys", &self.keys.len())
            .finish()
    }
}
