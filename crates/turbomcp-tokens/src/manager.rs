//! Token issuance and local verification
//!
//! [`TokenManager`] owns a registry of signing keys indexed by [`KeyId`]. The
//! greatest identifier is the current signing key; every registered key stays
//! valid for verification, so tokens signed before a rotation keep verifying
//! until they expire.
//!
//! ```rust,no_run
//! use turbomcp_tokens::{Claims, TokenManager, TokenManagerConfig};
//!
//! # fn main() -> turbomcp_tokens::Result<()> {
//! let config = TokenManagerConfig::new("api", "https://auth.example.com")
//!     .with_key("01890a5d-ac96-774b-bcce-b302099a8057", "/etc/keys/current.pem");
//! let manager = TokenManager::new(&config)?;
//!
//! let pair = manager.create_token_pair(
//!     Claims::for_subject("user-1").with_permissions(["topics:read"]),
//! )?;
//! let claims = manager.verify(&pair.access_token)?;
//! assert!(claims.has_permission("topics:read"));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use jsonwebtoken::{Algorithm, Header, encode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::claims::{Claims, RegisteredClaims};
use crate::clock::Clock;
use crate::config::TokenManagerConfig;
use crate::error::{Result, TokenError};
use crate::keys::{JwkSet, KeyId, PublicKeySet, SigningKey};
use crate::random::RandomSource;
use crate::validator::{ClaimsPolicy, Validator};

/// Unsigned token: header plus claims
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// JOSE header; `alg` and `kid` are stamped at signing time
    pub header: Header,
    /// Payload
    pub claims: Claims,
}

impl Token {
    /// Token with a `typ: JWT` header
    pub fn new(claims: Claims) -> Self {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        Self { header, claims }
    }
}

/// Signed access and refresh tokens sharing one id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Compact access token
    pub access_token: String,
    /// Compact refresh token
    pub refresh_token: String,
    /// Shared `jti`
    pub id: String,
    /// Access token expiry, Unix seconds
    pub expires_at: i64,
}

/// Issues and verifies tokens with locally held keys
#[derive(Debug)]
pub struct TokenManager {
    signers: BTreeMap<KeyId, SigningKey>,
    keys: PublicKeySet,
    policy: ClaimsPolicy,
    random: Arc<RandomSource>,
    access_duration: TimeDelta,
    refresh_duration: TimeDelta,
    overlap: TimeDelta,
}

impl TokenManager {
    /// Load every key file named in `config`
    ///
    /// # Errors
    ///
    /// - [`TokenError::NoSigningKey`] if `config.keys` is empty
    /// - [`TokenError::InvalidKeyId`] if an identifier is not a UUIDv7, or two
    ///   identifiers are equal once normalized
    /// - [`TokenError::KeyMaterial`] if a file can't be read or parsed
    /// - [`TokenError::InvalidConfig`] if `config` fails validation
    pub fn new(config: &TokenManagerConfig) -> Result<Self> {
        config.validate()?;
        if config.keys.is_empty() {
            return Err(TokenError::NoSigningKey);
        }

        let keys = config
            .keys
            .iter()
            .map(|(kid, path)| SigningKey::from_file(KeyId::parse(kid)?, path))
            .collect::<Result<Vec<_>>>()?;
        Self::with_signing_keys(config, keys)
    }

    /// Construct from keys already in memory; `config.keys` is ignored
    ///
    /// # Errors
    ///
    /// - [`TokenError::NoSigningKey`] if `keys` is empty
    /// - [`TokenError::InvalidKeyId`] if two keys share an identifier
    /// - [`TokenError::InvalidConfig`] if `config` fails validation
    pub fn with_signing_keys(
        config: &TokenManagerConfig,
        keys: impl IntoIterator<Item = SigningKey>,
    ) -> Result<Self> {
        config.validate()?;

        let mut signers: BTreeMap<KeyId, SigningKey> = BTreeMap::new();
        for key in keys {
            match signers.entry(key.kid().clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(key);
                }
                Entry::Occupied(slot) => {
                    return Err(TokenError::InvalidKeyId {
                        kid: slot.key().to_string(),
                        reason: "duplicate key identifier".to_string(),
                    });
                }
            }
        }
        let (current_kid, current) = signers.last_key_value().ok_or(TokenError::NoSigningKey)?;

        let mut public = PublicKeySet::new();
        for key in signers.values() {
            public.insert(key.public_key().clone());
        }

        info!(
            kid = %current_kid,
            algorithm = ?current.algorithm(),
            key_count = signers.len(),
            issuer = %config.issuer,
            "Token manager initialized"
        );

        Ok(Self::assemble(config, signers, public))
    }

    /// Verify-only manager; signing fails with [`TokenError::NotInitialized`]
    ///
    /// # Errors
    ///
    /// [`TokenError::InvalidKeySet`] if `keys` is empty, or a validation error.
    pub fn verifying(config: &TokenManagerConfig, keys: PublicKeySet) -> Result<Self> {
        config.validate()?;
        if keys.is_empty() {
            return Err(TokenError::InvalidKeySet("no verification keys".to_string()));
        }
        info!(key_count = keys.len(), issuer = %config.issuer, "Verify-only token manager initialized");
        Ok(Self::assemble(config, BTreeMap::new(), keys))
    }

    fn assemble(
        config: &TokenManagerConfig,
        signers: BTreeMap<KeyId, SigningKey>,
        keys: PublicKeySet,
    ) -> Self {
        Self {
            signers,
            keys,
            policy: ClaimsPolicy::new(&config.audience, &config.issuer).with_leeway(config.leeway),
            random: Arc::new(RandomSource::from_entropy()),
            access_duration: config.access_duration(),
            refresh_duration: config.refresh_duration(),
            overlap: config.overlap(),
        }
    }

    /// Use `clock` for issuance timestamps and verification
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.policy = self.policy.with_clock(clock);
        self
    }

    /// Draw token ids from `random`
    pub fn with_random(mut self, random: Arc<RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Unsigned access token for `claims`
    ///
    /// Assigns a fresh `jti`, stamps audience and issuer, and sets
    /// `iat = nbf = now`, `exp = now + access_duration`. Subject and extension
    /// claims are kept as given.
    pub fn create_access_token(&self, claims: Claims) -> Token {
        let clock = self.policy.clock();
        let now = clock.now();
        let jti = self
            .random
            .uuid_v7(u64::try_from(clock.now_millis()).unwrap_or_default());

        Token::new(Claims {
            jti: Some(jti.hyphenated().to_string()),
            aud: vec![self.policy.audience().to_string()],
            iss: Some(self.policy.issuer().to_string()),
            iat: Some(now),
            nbf: Some(now),
            exp: Some(now + self.access_duration.num_seconds()),
            ..claims
        })
    }

    /// Unsigned refresh token paired with `access`
    ///
    /// Shares `jti`, `aud`, `iss`, `sub` and `iat` with the access token. Valid
    /// from `access.exp + overlap` until `access.iat + refresh_duration`. Drops
    /// `name` and `email`.
    ///
    /// # Errors
    ///
    /// [`TokenError::MissingClaim`] if the access claims lack `iat` or `exp`.
    pub fn create_refresh_token(&self, access: &Token) -> Result<Token> {
        let claims = &access.claims;
        let iat = claims.iat.ok_or(TokenError::MissingClaim("iat"))?;
        let exp = claims.exp.ok_or(TokenError::MissingClaim("exp"))?;

        Ok(Token::new(Claims {
            jti: claims.jti.clone(),
            sub: claims.sub.clone(),
            aud: claims.aud.clone(),
            iss: claims.iss.clone(),
            iat: Some(iat),
            nbf: Some(exp + self.overlap.num_seconds()),
            exp: Some(iat + self.refresh_duration.num_seconds()),
            name: None,
            email: None,
            org: claims.org.clone(),
            project: claims.project.clone(),
            permissions: claims.permissions.clone(),
        }))
    }

    /// Create and sign an access/refresh pair
    ///
    /// # Errors
    ///
    /// Any error from [`create_refresh_token`](Self::create_refresh_token) or
    /// [`sign`](Self::sign).
    pub fn create_token_pair(&self, claims: Claims) -> Result<TokenPair> {
        let access = self.create_access_token(claims);
        let refresh = self.create_refresh_token(&access)?;

        let access_token = self.sign(&access)?;
        let refresh_token = self.sign(&refresh)?;

        let id = access.claims.jti.unwrap_or_default();
        let expires_at = access.claims.exp.unwrap_or_default();
        debug!(
            jti = %id,
            sub = ?access.claims.sub,
            expires_at,
            "Issued token pair"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            id,
            expires_at,
        })
    }

    /// Sign `token` with the current key
    ///
    /// Sets `alg`, `kid` and `typ` in the header.
    ///
    /// # Errors
    ///
    /// - [`TokenError::NotInitialized`] on a verify-only manager
    /// - [`TokenError::Signing`] if encoding fails
    pub fn sign(&self, token: &Token) -> Result<String> {
        let (kid, key) = self
            .signers
            .last_key_value()
            .ok_or(TokenError::NotInitialized)?;

        let mut header = token.header.clone();
        header.alg = key.algorithm();
        header.kid = Some(kid.to_string());
        header.typ = Some("JWT".to_string());

        encode(&header, &token.claims, key.encoding_key()).map_err(|e| {
            warn!(kid = %kid, error = %e, "Token signing failed");
            TokenError::Signing(e.to_string())
        })
    }

    /// Verify signature, audience, issuer, not-before and expiry
    ///
    /// # Errors
    ///
    /// Any verification error; see [`TokenError::is_authentication_failure`].
    pub fn verify(&self, tks: &str) -> Result<Claims> {
        self.verify_as(tks)
    }

    /// Verify the signature only
    ///
    /// # Errors
    ///
    /// Signature, structure and key-selection errors.
    pub fn parse(&self, tks: &str) -> Result<Claims> {
        self.parse_as(tks)
    }

    /// [`verify`](Self::verify) into a custom claims type
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify).
    pub fn verify_as<C>(&self, tks: &str) -> Result<C>
    where
        C: DeserializeOwned + RegisteredClaims,
    {
        self.policy.verify(&self.keys, tks)
    }

    /// [`parse`](Self::parse) into a custom claims type
    ///
    /// # Errors
    ///
    /// Same as [`parse`](Self::parse).
    pub fn parse_as<C: DeserializeOwned>(&self, tks: &str) -> Result<C> {
        self.policy.parse(&self.keys, tks)
    }

    /// Mint a new pair from a refresh token and its (possibly expired) access token
    ///
    /// The refresh token is fully verified; the access token gets a
    /// signature-only check. Both must carry the same `jti` and `sub`.
    ///
    /// # Errors
    ///
    /// [`TokenError::PairMismatch`] for tokens from different pairs, otherwise
    /// any verification or signing error.
    pub fn refresh_token_pair(&self, access_tks: &str, refresh_tks: &str) -> Result<TokenPair> {
        let refresh = self.verify(refresh_tks)?;
        let access = self.parse(access_tks)?;

        if refresh.jti.is_none() || refresh.jti != access.jti || refresh.sub != access.sub {
            warn!(
                access_jti = ?access.jti,
                refresh_jti = ?refresh.jti,
                "Refresh rejected: tokens belong to different pairs"
            );
            return Err(TokenError::PairMismatch);
        }

        info!(previous_jti = ?access.jti, sub = ?access.sub, "Refreshing token pair");
        self.create_token_pair(access)
    }

    /// Public keys of every registered key, as a JWKS document
    pub fn jwks(&self) -> JwkSet {
        self.keys.to_jwk_set()
    }

    /// Public key set used for verification
    pub fn public_keys(&self) -> &PublicKeySet {
        &self.keys
    }

    /// Identifier of the current signing key, `None` when verify-only
    pub fn current_key_id(&self) -> Option<&KeyId> {
        self.signers.last_key_value().map(|(kid, _)| kid)
    }
}

#[async_trait]
impl Validator for TokenManager {
    async fn verify(&self, tks: &str) -> Result<Claims> {
        TokenManager::verify(self, tks)
    }

    async fn parse(&self, tks: &str) -> Result<Claims> {
        TokenManager::parse(self, tks)
    }
}
