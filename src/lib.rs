#![forbid(unsafe_code)]
#![doc = r#"
Keygate

Authenticate HTTP requests by an API key carried in a request header (`X-Api-Key` by default).

Crate highlights
- Repository: `ApiKeyRepository` async trait; `InMemoryApiKeyStore` keeps id and key indexes consistent under one lock.
- Engine: `AuthenticationEngine::authenticate` yields no result, a ticket (consumer name + role claims) or a failure.
- Problem bodies: challenge (401) and forbidden (403) responses negotiated between JSON and XML from `Accept`.
- HTTP server (in `server`): status, identity and key-management routes for actix-web.

Modules
- `hasher`: key generation and salted digests.
- `record`: issued key records.
- `store`: repository contract and in-memory implementation.
- `engine`: authentication state machine, claims, challenge/forbid rendering.
- `negotiate`: representation selection and RFC 7807 serialization.
- `config`: engine options, CLI/env settings, seed files.
- `server`: Actix routes and role gate.
- `util`: tracing, env and CORS helpers.
"#]

pub mod config;
pub mod engine;
pub mod hasher;
pub mod negotiate;
pub mod record;
pub mod server;
pub mod store;
pub mod util;

pub use crate::config::{ApiKeyOptions, ConfigError, Settings};
pub use crate::engine::{
    AuthenticateResult, AuthenticationEngine, AuthenticationFailure, AuthenticationTicket, Claim,
    ClaimType, ClaimsIdentity, ClaimsPrincipal,
};
pub use crate::hasher::{generate_key, hash, verify_hash, HashAlgorithm};
pub use crate::negotiate::{ProblemDetails, ProblemSettings, Representation, ResponseNegotiator};
pub use crate::record::{ApiKeyInfo, ApiKeyRecord};
pub use crate::store::{ApiKeyRepository, InMemoryApiKeyStore, StoreError};
