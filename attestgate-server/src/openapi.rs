//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::error::ErrorBody;
use crate::handlers::{
    AssertRequest, AssertResponse, AttestRequest, AttestResponse, ChallengeRequest,
    ChallengeResponse, HealthResponse, ReadyResponse,
};

/// Attestgate API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Attestgate - Device Attestation API",
        version = "0.1.0",
        description = r#"
## Mobile App Attestation and Replay Protection

Attestgate decides whether a request comes from a genuine, untampered copy of
your mobile application:

- **Apple App Attest** - attestation objects and per-request assertions
- **Google Play Integrity** - integrity verdicts decoded through Google

### How It Works

1. Request a single-use challenge via `POST /attestation/challenge`
2. Produce platform evidence over the challenge on the device
3. Submit it via `POST /attestation/verify` to register the device key
4. Sign later requests and check them via `POST /attestation/assert`
5. A replayed assertion or reused challenge is rejected
"#,
        license(
            name = "MIT OR Apache-2.0",
            url = "https://github.com/ArthurDEV44/attestgate/blob/main/LICENSE"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    tags(
        (name = "Attestation", description = "Challenge issuance, attestation and assertion verification"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::challenge::challenge_handler,
        crate::handlers::attest::attest_handler,
        crate::handlers::assert::assert_handler,
    ),
    components(
        schemas(
            ChallengeRequest,
            ChallengeResponse,
            AttestRequest,
            AttestResponse,
            AssertRequest,
            AssertResponse,
            HealthResponse,
            ReadyResponse,
            ErrorBody,
        )
    )
)]
pub struct ApiDoc;
