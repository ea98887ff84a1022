//! Shared verification routine and the validator contract
//!
//! Every verifier in this crate runs the same pipeline:
//!
//! 1. decode the header and ask a [`KeySelector`] for the verification key
//!    (the selector enforces `kid` lookup and the algorithm match),
//! 2. verify the signature,
//! 3. for full verification, check audience, issuer, not-before and expiry.
//!
//! Local keys ([`TokenManager`](crate::TokenManager)) and published keys
//! ([`JwksValidator`](crate::JwksValidator)) differ only in the selector they
//! hand to [`ClaimsPolicy`].

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, Header, Validation, decode, decode_header};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::claims::{Claims, RegisteredClaims};
use crate::clock::{Clock, system_clock};
use crate::error::{Result, TokenError};

/// Key-selection strategy
pub trait KeySelector: Send + Sync {
    /// Verification key for a token with this header
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MissingKeyId`], [`TokenError::UnknownSigningKey`]
    /// or [`TokenError::AlgorithmMismatch`].
    fn select(&self, header: &Header) -> Result<&DecodingKey>;
}

/// Verification contract shared by local and remote validators
#[async_trait]
pub trait Validator: Send + Sync {
    /// Verify signature and all registered-claim checks
    async fn verify(&self, tks: &str) -> Result<Claims>;

    /// Verify the signature only, skipping temporal, audience and issuer checks
    async fn parse(&self, tks: &str) -> Result<Claims>;
}

/// Expected audience, issuer and clock skew for full verification
#[derive(Debug, Clone)]
pub struct ClaimsPolicy {
    audience: String,
    issuer: String,
    leeway: i64,
    clock: Arc<dyn Clock>,
}

impl ClaimsPolicy {
    /// Policy with zero leeway and the system clock
    pub fn new(audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            issuer: issuer.into(),
            leeway: 0,
            clock: system_clock(),
        }
    }

    /// Tolerated clock skew in seconds
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway = i64::try_from(leeway_secs).unwrap_or(i64::MAX);
        self
    }

    /// Time source for not-before and expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Expected audience
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Expected issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Full verification into a concrete claims type
    ///
    /// # Errors
    ///
    /// Any verification error; see [`TokenError::is_authentication_failure`].
    pub fn verify<C>(&self, keys: &dyn KeySelector, tks: &str) -> Result<C>
    where
        C: DeserializeOwned + RegisteredClaims,
    {
        let claims = decode_signed::<C>(keys, tks)?;
        self.check(&claims).inspect_err(|e| {
            warn!(
                error = %e,
                issuer = %self.issuer,
                audience = %self.audience,
                "Token claims rejected"
            );
        })?;
        debug!(issuer = %self.issuer, "Token verified");
        Ok(claims)
    }

    /// Signature-only verification into a concrete claims type
    ///
    /// # Errors
    ///
    /// Signature, structure and key-selection errors.
    pub fn parse<C>(&self, keys: &dyn KeySelector, tks: &str) -> Result<C>
    where
        C: DeserializeOwned,
    {
        decode_signed::<C>(keys, tks)
    }

    /// Registered-claim checks, in audience, issuer, not-before, expiry order
    fn check<C: RegisteredClaims>(&self, claims: &C) -> Result<()> {
        if !claims.audience().iter().any(|aud| *aud == self.audience) {
            return Err(TokenError::InvalidAudience);
        }
        if claims.issuer() != Some(self.issuer.as_str()) {
            return Err(TokenError::InvalidIssuer);
        }

        let now = self.clock.now();
        if let Some(nbf) = claims.not_before()
            && now.saturating_add(self.leeway) < nbf
        {
            return Err(TokenError::NotValidYet);
        }
        let exp = claims.expires_at().ok_or(TokenError::MissingClaim("exp"))?;
        if now >= exp.saturating_add(self.leeway) {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

/// Header decode, key selection and signature check
fn decode_signed<C: DeserializeOwned>(keys: &dyn KeySelector, tks: &str) -> Result<C> {
    let header = decode_header(tks).map_err(|e| {
        debug!(error = %e, "Failed to decode JWT header");
        TokenError::Malformed(e.to_string())
    })?;
    let key = keys.select(&header).inspect_err(|e| {
        warn!(kid = ?header.kid, algorithm = ?header.alg, error = %e, "No usable verification key");
    })?;

    // Temporal and audience checks run in ClaimsPolicy::check against the injected clock
    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<C>(tks, key, &validation)
        .map(|data| data.claims)
        .map_err(map_jwt_error)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => TokenError::Malformed("algorithm not allowed".to_string()),
        _ => TokenError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: i64 = 1_700_000_000;

    fn policy(clock: Arc<ManualClock>) -> ClaimsPolicy {
        ClaimsPolicy::new("api", "issuer").with_clock(clock)
    }

    fn claims() -> Claims {
        Claims {
            aud: vec!["api".into()],
            iss: Some("issuer".into()),
            nbf: Some(NOW),
            exp: Some(NOW + 60),
            ..Claims::for_subject("u1")
        }
    }

    #[test]
    fn test_check_accepts_valid_window() {
        let clock = ManualClock::shared(NOW);
        assert!(policy(clock.clone()).check(&claims()).is_ok());
        clock.set(NOW + 59);
        assert!(policy(clock).check(&claims()).is_ok());
    }

    #[test]
    fn test_check_rejects_expired_at_boundary() {
        let clock = ManualClock::shared(NOW + 60);
        assert!(matches!(
            policy(clock).check(&claims()),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_check_rejects_not_yet_valid() {
        let clock = ManualClock::shared(NOW - 1);
        assert!(matches!(
            policy(clock).check(&claims()),
            Err(TokenError::NotValidYet)
        ));
    }

    #[test]
    fn test_leeway_widens_both_ends() {
        let clock = ManualClock::shared(NOW - 5);
        let lenient = policy(clock.clone()).with_leeway(10);
        assert!(lenient.check(&claims()).is_ok());
        clock.set(NOW + 65);
        assert!(lenient.check(&claims()).is_ok());
        clock.set(NOW + 70);
        assert!(matches!(lenient.check(&claims()), Err(TokenError::Expired)));
    }

    #[test]
    fn test_check_rejects_wrong_audience_and_issuer() {
        let clock = ManualClock::shared(NOW);
        let mut wrong_aud = claims();
        wrong_aud.aud = vec!["other".into()];
        assert!(matches!(
            policy(clock.clone()).check(&wrong_aud),
            Err(TokenError::InvalidAudience)
        ));

        let mut no_aud = claims();
        no_aud.aud.clear();
        assert!(matches!(
            policy(clock.clone()).check(&no_aud),
            Err(TokenError::InvalidAudience)
        ));

        let mut wrong_iss = claims();
        wrong_iss.iss = Some("someone-else".into());
        assert!(matches!(
            policy(clock).check(&wrong_iss),
            Err(TokenError::InvalidIssuer)
        ));
    }

    #[test]
    fn test_check_requires_expiry() {
        let clock = ManualClock::shared(NOW);
        let mut no_exp = claims();
        no_exp.exp = None;
        assert!(matches!(
            policy(clock).check(&no_exp),
            Err(TokenError::MissingClaim("exp"))
        ));
    }

    #[test]
    fn test_multi_audience_token_matches_any() {
        let clock = ManualClock::shared(NOW);
        let mut multi = claims();
        multi.aud = vec!["other".into(), "api".into()];
        assert!(policy(clock).check(&multi).is_ok());
    }
}
