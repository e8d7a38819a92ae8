//! PostgreSQL storage for challenges and device keys.
//!
//! Consumption and counter advancement are single conditional statements
//! (`DELETE … RETURNING`, `UPDATE … WHERE counter < $2 RETURNING`), so row
//! locking gives the per-key linearizability the verifier relies on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::challenge::{generate_nonce, Challenge, ChallengeStore};
use crate::clock::Clock;
use crate::device_key::{
    CounterAdvance, DeviceKey, DeviceKeyStore, NewDeviceKey, Platform, RegisterOutcome,
};
use crate::error::StorageError;

/// Connection pool shared by both Postgres stores.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL database");
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Check database connection health
    pub async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

/// Postgres-backed [`ChallengeStore`].
pub struct PostgresChallengeStore {
    store: PostgresStore,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl PostgresChallengeStore {
    pub fn new(store: PostgresStore, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { store, ttl, clock }
    }
}

impl std::fmt::Debug for PostgresChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresChallengeStore")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl ChallengeStore for PostgresChallengeStore {
    async fn generate(&self, identifier: &str) -> Result<Challenge, StorageError> {
        loop {
            let nonce = generate_nonce()?;
            let challenge = Challenge::new(identifier, nonce, self.clock.now(), self.ttl);

            let inserted = sqlx::query(
                r#"
                INSERT INTO attestation_challenges (nonce, identifier, issued_at, expires_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (nonce) DO NOTHING
                "#,
            )
            .bind(&challenge.nonce)
            .bind(&challenge.identifier)
            .bind(challenge.issued_at)
            .bind(challenge.expires_at)
            .execute(&self.store.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                return Ok(challenge);
            }
        }
    }

    async fn validate(&self, identifier: &str, nonce: &str) -> Result<bool, StorageError> {
        let now = self.clock.now();

        let consumed: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM attestation_challenges
            WHERE nonce = $1 AND identifier = $2 AND expires_at > $3
            RETURNING nonce
            "#,
        )
        .bind(nonce)
        .bind(identifier)
        .bind(now)
        .fetch_optional(&self.store.pool)
        .await?;

        if consumed.is_some() {
            return Ok(true);
        }

        sqlx::query("DELETE FROM attestation_challenges WHERE nonce = $1 AND expires_at <= $2")
            .bind(nonce)
            .bind(now)
            .execute(&self.store.pool)
            .await?;
        Ok(false)
    }

    async fn purge_expired(&self) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM attestation_challenges WHERE expires_at <= $1")
            .bind(self.clock.now())
            .execute(&self.store.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

/// Postgres-backed [`DeviceKeyStore`].
pub struct PostgresDeviceKeyStore {
    store: PostgresStore,
    clock: Arc<dyn Clock>,
}

impl PostgresDeviceKeyStore {
    pub fn new(store: PostgresStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl std::fmt::Debug for PostgresDeviceKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDeviceKeyStore")
            .field("store", &self.store)
            .finish()
    }
}

#[async_trait]
impl DeviceKeyStore for PostgresDeviceKeyStore {
    async fn register(&self, key: NewDeviceKey) -> Result<RegisterOutcome, StorageError> {
        let initial_counter = counter_to_db(key.initial_counter)?;
        let now = self.clock.now();

        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO device_keys
                (key_id, platform, public_key, bound_identifier, counter, created_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (key_id) DO NOTHING
            RETURNING key_id
            "#,
        )
        .bind(&key.key_id)
        .bind(key.platform.as_str())
        .bind(&key.public_key)
        .bind(&key.bound_identifier)
        .bind(initial_counter)
        .bind(now)
        .fetch_optional(&self.store.pool)
        .await?;

        if inserted.is_some() {
            tracing::info!(platform = %key.platform, "Device key stored in database");
            return Ok(RegisterOutcome::Created);
        }

        match self.get(&key.key_id).await? {
            Some(existing) if key.matches(&existing) => Ok(RegisterOutcome::AlreadyRegistered),
            _ => Ok(RegisterOutcome::Conflict),
        }
    }

    async fn get(&self, key_id: &str) -> Result<Option<DeviceKey>, StorageError> {
        let row = sqlx::query_as::<_, DeviceKeyRow>(
            r#"
            SELECT key_id, platform, public_key, bound_identifier, counter, created_at
            FROM device_keys
            WHERE key_id = $1
            "#,
        )
        .bind(key_id)
        .fetch_optional(&self.store.pool)
        .await?;

        row.map(DeviceKeyRow::into_device_key).transpose()
    }

    async fn advance_counter(
        &self,
        key_id: &str,
        presented: u64,
    ) -> Result<CounterAdvance, StorageError> {
        let presented_db = counter_to_db(presented)?;

        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE device_keys
            SET counter = $2, last_used_at = $3
            WHERE key_id = $1 AND counter < $2
            RETURNING counter
            "#,
        )
        .bind(key_id)
        .bind(presented_db)
        .bind(self.clock.now())
        .fetch_optional(&self.store.pool)
        .await?;

        if updated.is_some() {
            return Ok(CounterAdvance::Accepted(presented));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM device_keys WHERE key_id = $1)")
                .bind(key_id)
                .fetch_one(&self.store.pool)
                .await?;

        Ok(if exists {
            CounterAdvance::ReplayRejected
        } else {
            CounterAdvance::NotFound
        })
    }
}

fn counter_to_db(counter: u64) -> Result<i64, StorageError> {
    i64::try_from(counter)
        .map_err(|_| StorageError::Serialization(format!("counter {counter} exceeds BIGINT")))
}

/// Database row for device keys
#[derive(sqlx::FromRow)]
struct DeviceKeyRow {
    key_id: String,
    platform: String,
    public_key: Vec<u8>,
    bound_identifier: String,
    counter: i64,
    created_at: DateTime<Utc>,
}

impl DeviceKeyRow {
    fn into_device_key(self) -> Result<DeviceKey, StorageError> {
        let platform = match self.platform.parse::<Platform>() {
            Ok(Platform::Unspecified) | Err(_) => {
                return Err(StorageError::Corrupt {
                    key: self.key_id,
                    reason: format!("unknown platform {}", self.platform),
                })
            }
            Ok(p) => p,
        };
        let counter = u64::try_from(self.counter).map_err(|_| StorageError::Corrupt {
            key: self.key_id.clone(),
            reason: "negative counter".to_string(),
        })?;

        Ok(DeviceKey {
            key_id: self.key_id,
            platform,
            public_key: self.public_key,
            bound_identifier: self.bound_identifier,
            counter,
            created_at: self.created_at,
        })
    }
}
