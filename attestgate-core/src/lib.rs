//! Attestgate Core - device attestation and replay protection
//!
//! This crate decides whether a request comes from a genuine, untampered
//! instance of a mobile application, using the OS vendors' integrity
//! evidence, and rejects replays of previously accepted evidence.
//!
//! # Features
//!
//! - Single-use, expiring challenges
//! - Apple App Attest attestation and assertion verification
//! - Google Play Integrity verdict evaluation
//! - Monotonic per-key signature counters
//! - In-memory, Redis or PostgreSQL state
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use attestgate_core::{AttestationStorage, AttestationVerifier, PlatformVerifiers, SystemClock};
//!
//! # async fn example() -> attestgate_core::Result<()> {
//! let storage = AttestationStorage::in_memory(chrono::Duration::seconds(300), Arc::new(SystemClock));
//! // Register platform adapters with `PlatformVerifiers::with_ios` / `with_android`
//! let verifier = AttestationVerifier::new(true, PlatformVerifiers::new(), storage);
//!
//! let challenge = verifier.generate_challenge("install-42").await?;
//! println!("send {} to the client", challenge.nonce);
//! # Ok(())
//! # }
//! ```

pub mod challenge;
pub mod clock;
pub mod config;
pub mod device_key;
pub mod error;
pub mod platform;
pub mod storage;
pub mod verifier;

// Re-export main types for convenience
pub use challenge::{spawn_challenge_sweeper, Challenge, ChallengeStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AndroidConfig, AttestationConfig, IosConfig};
pub use device_key::{
    mask_identifier, CounterAdvance, DeviceKey, DeviceKeyStore, NewDeviceKey, Platform,
    RegisterOutcome,
};
pub use error::{AttestationError, ConfigError, Result, StorageError, VerificationFailure};
pub use platform::{PlatformVerifier, PlatformVerifiers};
pub use storage::{AttestationStorage, StorageBackend};
pub use verifier::{
    AssertionData, AttestationData, AttestationVerifier, VerificationResult, Verified,
};
