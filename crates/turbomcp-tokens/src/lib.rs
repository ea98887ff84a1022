//! # TurboMCP Tokens
//!
//! Credential issuance and verification core: signed access/refresh token
//! pairs, verification with local keys or a published JWKS, and a bounded
//! session cache.
//!
//! ## Architecture
//!
//! - [`claims`] - Token payload and permission checks
//! - [`keys`] - Key identifiers, signing keys, JWK / JWKS model
//! - [`validator`] - Shared verification routine and the [`Validator`] trait
//! - [`manager`] - [`TokenManager`]: mint, sign, verify with local keys
//! - [`jwks`] - [`JwksValidator`] and the refreshing [`CachedJwksValidator`]
//! - [`session`] - [`SessionCache`] keyed by (user, project)
//! - [`config`] - Serde configuration with file and environment loading
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use turbomcp_tokens::{
//!     Claims, JwksValidator, KeyId, KeyKind, RandomSource, SigningKey, TokenManager,
//!     TokenManagerConfig,
//! };
//!
//! # fn main() -> turbomcp_tokens::Result<()> {
//! let random = Arc::new(RandomSource::from_entropy());
//! let kid = KeyId::generate(&random, 1_700_000_000_000);
//! let key = SigningKey::generate(kid, &random, KeyKind::P256)?;
//!
//! let config = TokenManagerConfig::new("api", "https://auth.example.com");
//! let issuer = TokenManager::with_signing_keys(&config, [key])?.with_random(random);
//! let pair = issuer.create_token_pair(Claims::for_subject("user-1"))?;
//!
//! // A different service verifies against the published key set
//! let verifier = JwksValidator::new(&issuer.jwks(), "api", "https://auth.example.com")?;
//! let claims = verifier.verify(&pair.access_token)?;
//! assert_eq!(claims.sub.as_deref(), Some("user-1"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Error handling
//!
//! Every fallible operation returns [`Result`]. Verification failures are
//! fine-grained; collapse them with [`TokenError::is_authentication_failure`]
//! before answering a client.

pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod jwks;
pub mod keys;
pub mod manager;
pub mod random;
pub mod session;
pub mod validator;

pub use claims::{Claims, RegisteredClaims};
pub use clock::{Clock, ManualClock, SystemClock, system_clock};
pub use config::{ConfigError, JwksConfig, SessionCacheConfig, TokenManagerConfig, TokensConfig};
pub use error::{ErrorCategory, Result, TokenError};
pub use jwks::{CachedJwksValidator, JwksValidator};
pub use keys::{
    Jwk, JwkSet, KeyId, KeyKind, MIN_RSA_BITS, PublicKey, PublicKeySet, SigningKey,
    generate_private_key_pem,
};
pub use manager::{Token, TokenManager, TokenPair};
pub use random::RandomSource;
pub use session::SessionCache;
pub use validator::{ClaimsPolicy, KeySelector, Validator};
