//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod assert;
pub mod attest;
pub mod challenge;
pub mod health;

pub use crate::state::AppState;
pub use assert::{assert_handler, AssertRequest, AssertResponse};
pub use attest::{attest_handler, AttestRequest, AttestResponse};
pub use challenge::{challenge_handler, ChallengeRequest, ChallengeResponse};
pub use health::{health, ready, HealthResponse, ReadyResponse};
