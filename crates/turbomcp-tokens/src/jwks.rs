//! Verification against published key sets
//!
//! [`JwksValidator`] verifies tokens against a fixed JWKS document.
//! [`CachedJwksValidator`] fetches the document from an endpoint, keeps the
//! last good copy, and re-fetches when it grows older than the refresh interval
//! or when asked to.
//!
//! - HTTPS required for JWKS endpoints (HTTP only on loopback hosts)
//! - A failed re-fetch keeps serving the previous key set
//! - Only one lazy re-fetch runs at a time

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

use crate::claims::{Claims, RegisteredClaims};
use crate::clock::Clock;
use crate::config::JwksConfig;
use crate::error::{Result, TokenError};
use crate::keys::{JwkSet, PublicKeySet};
use crate::validator::{ClaimsPolicy, Validator};

/// Verifies tokens against a fixed public key set
#[derive(Debug, Clone)]
pub struct JwksValidator {
    keys: PublicKeySet,
    policy: ClaimsPolicy,
}

impl JwksValidator {
    /// Validator for `set`, expecting `audience` and `issuer`
    ///
    /// # Errors
    ///
    /// [`TokenError::InvalidKeySet`] if no key in `set` is usable.
    pub fn new(set: &JwkSet, audience: impl Into<String>, issuer: impl Into<String>) -> Result<Self> {
        let keys = PublicKeySet::from_jwk_set(set)?;
        Ok(Self::from_keys(keys, ClaimsPolicy::new(audience, issuer)))
    }

    /// Validator over already parsed keys
    pub fn from_keys(keys: PublicKeySet, policy: ClaimsPolicy) -> Self {
        Self { keys, policy }
    }

    /// Use `clock` for temporal checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.policy = self.policy.with_clock(clock);
        self
    }

    /// Tolerated clock skew in seconds
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.policy = self.policy.with_leeway(leeway_secs);
        self
    }

    /// Verify signature and registered claims
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

    /// Usable keys
    pub fn keys(&self) -> &PublicKeySet {
        &self.keys
    }
}

#[async_trait]
impl Validator for JwksValidator {
    async fn verify(&self, tks: &str) -> Result<Claims> {
        JwksValidator::verify(self, tks)
    }

    async fn parse(&self, tks: &str) -> Result<Claims> {
        JwksValidator::parse(self, tks)
    }
}

/// Last successfully fetched key set
#[derive(Debug)]
struct Snapshot {
    validator: Arc<JwksValidator>,
    fetched_at: Instant,
}

/// JWKS validator backed by a refreshable remote key set
///
/// ```rust,no_run
/// use turbomcp_tokens::{CachedJwksValidator, JwksConfig};
///
/// # async fn run(tks: &str) -> turbomcp_tokens::Result<()> {
/// let validator = CachedJwksValidator::new(JwksConfig::new(
///     "https://auth.example.com/.well-known/jwks.json",
///     "api",
///     "https://auth.example.com",
/// ))
/// .await?;
///
/// let claims = validator.verify_or_refresh(tks).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CachedJwksValidator {
    endpoint: String,
    http: reqwest::Client,
    policy: ClaimsPolicy,
    state: RwLock<Snapshot>,
    /// Serializes fetches
    refreshing: tokio::sync::Mutex<()>,
    /// Last fetch attempt, successful or not
    last_attempt: Mutex<Instant>,
    refresh_interval: Duration,
    refresh_cooldown: Duration,
}

impl CachedJwksValidator {
    /// Validate `config` and perform the initial fetch
    ///
    /// # Errors
    ///
    /// - [`TokenError::InvalidConfig`] for an invalid or non-HTTPS endpoint
    /// - [`TokenError::Fetch`] if the initial fetch fails
    pub async fn new(config: JwksConfig) -> Result<Self> {
        config.validate()?;
        check_endpoint(&config.endpoint)?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TokenError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        let policy = ClaimsPolicy::new(&config.audience, &config.issuer).with_leeway(config.leeway);

        let refresh_interval = config.refresh_interval();
        let refresh_cooldown = config.refresh_cooldown();

        let keys = fetch_keys(&http, &config.endpoint).await?;
        let now = Instant::now();

        Ok(Self {
            state: RwLock::new(Snapshot {
                validator: Arc::new(JwksValidator::from_keys(keys, policy.clone())),
                fetched_at: now,
            }),
            endpoint: config.endpoint,
            http,
            policy,
            refreshing: tokio::sync::Mutex::new(()),
            last_attempt: Mutex::new(now),
            refresh_interval,
            refresh_cooldown,
        })
    }

    /// Use `clock` for temporal checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.policy = self.policy.with_clock(clock);
        let snapshot = self.state.get_mut();
        snapshot.validator = Arc::new(JwksValidator::from_keys(
            snapshot.validator.keys.clone(),
            self.policy.clone(),
        ));
        self
    }

    /// Key set endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Re-fetch the key set now
    ///
    /// On success the new set replaces the cached one; on failure the cached
    /// set is kept. Bounded by the configured request timeout.
    ///
    /// # Errors
    ///
    /// [`TokenError::Fetch`] if the endpoint can't be reached, answers with a
    /// non-success status or serves no usable key.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refreshing.lock().await;
        self.fetch_and_install().await
    }

    /// Verify signature and registered claims against the cached key set
    ///
    /// # Errors
    ///
    /// Any verification error; see [`TokenError::is_authentication_failure`].
    pub async fn verify(&self, tks: &str) -> Result<Claims> {
        self.verify_as(tks).await
    }

    /// Verify the signature only against the cached key set
    ///
    /// # Errors
    ///
    /// Signature, structure and key-selection errors.
    pub async fn parse(&self, tks: &str) -> Result<Claims> {
        self.parse_as(tks).await
    }

    /// [`verify`](Self::verify) into a custom claims type
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify).
    pub async fn verify_as<C>(&self, tks: &str) -> Result<C>
    where
        C: DeserializeOwned + RegisteredClaims,
    {
        self.current().await.verify_as(tks)
    }

    /// [`parse`](Self::parse) into a custom claims type
    ///
    /// # Errors
    ///
    /// Same as [`parse`](Self::parse).
    pub async fn parse_as<C: DeserializeOwned>(&self, tks: &str) -> Result<C> {
        self.current().await.parse_as(tks)
    }

    /// Verify, refreshing once if the token names an unknown key
    ///
    /// The refresh is skipped when the previous fetch attempt is younger than
    /// the refresh cooldown. A failed refresh is logged and the original
    /// [`TokenError::UnknownSigningKey`] returned.
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify).
    pub async fn verify_or_refresh(&self, tks: &str) -> Result<Claims> {
        match self.verify(tks).await {
            Err(e) if e.is_unknown_key() => {
                if self.since_last_attempt() < self.refresh_cooldown {
                    debug!(endpoint = %self.endpoint, "JWKS refresh cooling down");
                    return Err(e);
                }
                info!(endpoint = %self.endpoint, error = %e, "Unknown signing key, refreshing JWKS");
                if let Err(fetch_error) = self.refresh().await {
                    warn!(endpoint = %self.endpoint, error = %fetch_error, "JWKS refresh failed");
                    return Err(e);
                }
                self.verify(tks).await
            }
            other => other,
        }
    }

    /// Key identifiers in the cached set
    pub fn key_ids(&self) -> Vec<String> {
        self.snapshot().keys.key_ids().map(str::to_string).collect()
    }

    /// Age of the cached set
    pub fn last_fetched(&self) -> Duration {
        self.state.read().fetched_at.elapsed()
    }

    fn snapshot(&self) -> Arc<JwksValidator> {
        Arc::clone(&self.state.read().validator)
    }

    fn since_last_attempt(&self) -> Duration {
        self.last_attempt.lock().elapsed()
    }

    /// Cached validator, lazily re-fetched when older than the refresh interval
    async fn current(&self) -> Arc<JwksValidator> {
        let cached = self.snapshot();
        if self.last_fetched() < self.refresh_interval
            || self.since_last_attempt() < self.refresh_cooldown
        {
            return cached;
        }

        // Concurrent callers keep using the cached set
        let Ok(_guard) = self.refreshing.try_lock() else {
            return cached;
        };
        if self.last_fetched() < self.refresh_interval {
            return self.snapshot();
        }

        match self.fetch_and_install().await {
            Ok(()) => self.snapshot(),
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    age_secs = self.last_fetched().as_secs(),
                    error = %e,
                    "JWKS refresh failed, serving stale key set"
                );
                cached
            }
        }
    }

    /// Fetch and swap in the new set; callers hold `refreshing`
    async fn fetch_and_install(&self) -> Result<()> {
        *self.last_attempt.lock() = Instant::now();
        let keys = fetch_keys(&self.http, &self.endpoint).await?;
        let validator = Arc::new(JwksValidator::from_keys(keys, self.policy.clone()));

        *self.state.write() = Snapshot {
            validator,
            fetched_at: Instant::now(),
        };
        Ok(())
    }
}

#[async_trait]
impl Validator for CachedJwksValidator {
    async fn verify(&self, tks: &str) -> Result<Claims> {
        CachedJwksValidator::verify(self, tks).await
    }

    async fn parse(&self, tks: &str) -> Result<Claims> {
        CachedJwksValidator::parse(self, tks).await
    }
}

/// Require https, except on loopback hosts
fn check_endpoint(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)
        .map_err(|e| TokenError::InvalidConfig(format!("invalid JWKS endpoint '{endpoint}': {e}")))?;

    let loopback = match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };

    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        scheme => Err(TokenError::InvalidConfig(format!(
            "JWKS endpoint must use HTTPS (HTTP only allowed for loopback hosts), got {scheme}://"
        ))),
    }
}

async fn fetch_keys(http: &reqwest::Client, endpoint: &str) -> Result<PublicKeySet> {
    info!(endpoint = %endpoint, "Fetching JWKS from endpoint");

    let response = http.get(endpoint).send().await.map_err(|e| {
        error!(endpoint = %endpoint, error = %e, "Failed to fetch JWKS");
        TokenError::fetch(endpoint, e)
    })?;

    let status = response.status();
    if !status.is_success() {
        error!(endpoint = %endpoint, status = %status, "JWKS endpoint returned error status");
        return Err(TokenError::fetch(endpoint, format!("status {status}")));
    }

    let set: JwkSet = response.json().await.map_err(|e| {
        error!(endpoint = %endpoint, error = %e, "Failed to parse JWKS JSON");
        TokenError::fetch(endpoint, format!("invalid JWKS document: {e}"))
    })?;
    let keys = PublicKeySet::from_jwk_set(&set).map_err(|e| TokenError::fetch(endpoint, e))?;

    info!(
        endpoint = %endpoint,
        key_count = keys.len(),
        "Successfully fetched JWKS"
    );
    Ok(keys)
}
