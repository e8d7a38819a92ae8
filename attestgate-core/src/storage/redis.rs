//! Redis storage for challenges and device keys.
//!
//! Every read-modify-write runs as a Lua script so it is atomic across all
//! server instances sharing the database. Challenges additionally carry a
//! Redis TTL so abandoned ones are reclaimed by the server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::Script;

use crate::challenge::{generate_nonce, Challenge, ChallengeStore};
use crate::clock::Clock;
use crate::device_key::{
    CounterAdvance, DeviceKey, DeviceKeyStore, NewDeviceKey, Platform, RegisterOutcome,
};
use crate::error::StorageError;

/// Default key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "attest:";

const CREATE_CHALLENGE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'identifier', ARGV[1], 'issued_at_ms', ARGV[2], 'expires_at_ms', ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
"#;

// 1 = consumed, 0 = rejected (expired entries are deleted)
const CONSUME_CHALLENGE: &str = r#"
local identifier = redis.call('HGET', KEYS[1], 'identifier')
if not identifier then
    return 0
end
local expires_at = tonumber(redis.call('HGET', KEYS[1], 'expires_at_ms'))
if expires_at <= tonumber(ARGV[2]) then
    redis.call('DEL', KEYS[1])
    return 0
end
if identifier ~= ARGV[1] then
    return 0
end
redis.call('DEL', KEYS[1])
return 1
"#;

// 0 = created, 1 = identical record exists, 2 = conflict
const REGISTER_KEY: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    local existing = redis.call('HMGET', KEYS[1], 'platform', 'public_key', 'bound_identifier')
    if existing[1] == ARGV[1] and existing[2] == ARGV[2] and existing[3] == ARGV[3] then
        return 1
    end
    return 2
end
redis.call('HSET', KEYS[1],
    'platform', ARGV[1],
    'public_key', ARGV[2],
    'bound_identifier', ARGV[3],
    'counter', ARGV[4],
    'created_at_ms', ARGV[5])
return 0
"#;

// -1 = not found, 0 = replay, 1 = accepted
//
// Counters are canonical decimal strings (no sign, no leading zeros), so they
// are ordered by length then bytewise. Lua numbers are doubles and would lose
// precision above 2^53.
const ADVANCE_COUNTER: &str = r#"
local current = redis.call('HGET', KEYS[1], 'counter')
if not current then
    return -1
end
local presented = ARGV[1]
local greater
if #presented ~= #current then
    greater = #presented > #current
else
    greater = presented > current
end
if greater then
    redis.call('HSET', KEYS[1], 'counter', ARGV[1])
    return 1
end
return 0
"#;

/// Shared Redis connection plus key prefix.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(url).map_err(|e| StorageError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(prefix = %prefix, "Connected to Redis");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    /// Round-trip a PING.
    pub async fn check_health(&self) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn challenge_key(&self, nonce: &str) -> String {
        format!("{}challenge:{}", self.prefix, nonce)
    }

    fn device_key(&self, key_id: &str) -> String {
        format!("{}device:{}", self.prefix, key_id)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("conn", &"<ConnectionManager>")
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Redis-backed [`ChallengeStore`].
pub struct RedisChallengeStore {
    store: RedisStore,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisChallengeStore {
    pub fn new(store: RedisStore, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { store, ttl, clock }
    }
}

impl std::fmt::Debug for RedisChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisChallengeStore")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn generate(&self, identifier: &str) -> Result<Challenge, StorageError> {
        let script = Script::new(CREATE_CHALLENGE);
        let mut conn = self.store.conn.clone();

        loop {
            let nonce = generate_nonce()?;
            let challenge = Challenge::new(identifier, nonce, self.clock.now(), self.ttl);
            let created: i64 = script
                .key(self.store.challenge_key(&challenge.nonce))
                .arg(identifier)
                .arg(challenge.issued_at.timestamp_millis())
                .arg(challenge.expires_at.timestamp_millis())
                .arg(self.ttl.num_milliseconds().max(1))
                .invoke_async(&mut conn)
                .await?;
            if created == 1 {
                return Ok(challenge);
            }
        }
    }

    async fn validate(&self, identifier: &str, nonce: &str) -> Result<bool, StorageError> {
        let mut conn = self.store.conn.clone();
        let consumed: i64 = Script::new(CONSUME_CHALLENGE)
            .key(self.store.challenge_key(nonce))
            .arg(identifier)
            .arg(self.clock.now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(consumed == 1)
    }

    /// Redis expires challenge keys on its own.
    async fn purge_expired(&self) -> Result<usize, StorageError> {
        Ok(0)
    }
}

/// Redis-backed [`DeviceKeyStore`].
pub struct RedisDeviceKeyStore {
    store: RedisStore,
    clock: Arc<dyn Clock>,
}

impl RedisDeviceKeyStore {
    pub fn new(store: RedisStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl std::fmt::Debug for RedisDeviceKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDeviceKeyStore")
            .field("store", &self.store)
            .finish()
    }
}

#[async_trait]
impl DeviceKeyStore for RedisDeviceKeyStore {
    async fn register(&self, key: NewDeviceKey) -> Result<RegisterOutcome, StorageError> {
        let mut conn = self.store.conn.clone();
        let outcome: i64 = Script::new(REGISTER_KEY)
            .key(self.store.device_key(&key.key_id))
            .arg(key.platform.as_str())
            .arg(STANDARD.encode(&key.public_key))
            .arg(&key.bound_identifier)
            .arg(key.initial_counter)
            .arg(self.clock.now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            0 => Ok(RegisterOutcome::Created),
            1 => Ok(RegisterOutcome::AlreadyRegistered),
            2 => Ok(RegisterOutcome::Conflict),
            other => Err(StorageError::Query(format!(
                "unexpected register result {other}"
            ))),
        }
    }

    async fn get(&self, key_id: &str) -> Result<Option<DeviceKey>, StorageError> {
        let mut conn = self.store.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.store.device_key(key_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        decode_device_key(key_id, &fields).map(Some)
    }

    async fn advance_counter(
        &self,
        key_id: &str,
        presented: u64,
    ) -> Result<CounterAdvance, StorageError> {
        let mut conn = self.store.conn.clone();
        let result: i64 = Script::new(ADVANCE_COUNTER)
            .key(self.store.device_key(key_id))
            .arg(presented)
            .invoke_async(&mut conn)
            .await?;

        Ok(match result {
            1 => CounterAdvance::Accepted(presented),
            0 => CounterAdvance::ReplayRejected,
            _ => CounterAdvance::NotFound,
        })
    }
}

fn decode_device_key(
    key_id: &str,
    fields: &HashMap<String, String>,
) -> Result<DeviceKey, StorageError> {
    let corrupt = |reason: &str| StorageError::Corrupt {
        key: key_id.to_string(),
        reason: reason.to_string(),
    };
    let field = |name: &str| fields.get(name).ok_or_else(|| corrupt(name));

    let platform = field("platform")?
        .parse::<Platform>()
        .map_err(|_| corrupt("platform"))?;
    let public_key = STANDARD
        .decode(field("public_key")?)
        .map_err(|_| corrupt("public_key"))?;
    let counter = field("counter")?
        .parse::<u64>()
        .map_err(|_| corrupt("counter"))?;
    let created_ms = field("created_at_ms")?
        .parse::<i64>()
        .map_err(|_| corrupt("created_at_ms"))?;
    let created_at: DateTime<Utc> = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .ok_or_else(|| corrupt("created_at_ms"))?;

    Ok(DeviceKey {
        key_id: key_id.to_string(),
        platform,
        public_key,
        bound_identifier: field("bound_identifier")?.clone(),
        counter,
        created_at,
    })
}
