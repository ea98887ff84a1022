//! Error types for token issuance, verification and caching

use jsonwebtoken::Algorithm;

/// Token result type
pub type Result<T> = std::result::Result<T, TokenError>;

/// Errors produced by the token core
///
/// Verification failures are deliberately fine-grained for logging and tests.
/// HTTP layers should collapse every variant for which
/// [`TokenError::is_authentication_failure`] returns `true` into a single
/// "authentication required" response.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TokenError {
    /// Key identifier is not a valid time-sortable identifier
    #[error("invalid key identifier '{kid}': {reason}")]
    InvalidKeyId {
        /// The rejected key identifier
        kid: String,
        /// Why it was rejected
        reason: String,
    },

    /// Key material could not be read or parsed
    #[error("failed to load key material for '{kid}': {reason}")]
    KeyMaterial {
        /// Key identifier the material belongs to
        kid: String,
        /// Underlying failure
        reason: String,
    },

    /// No signing key was supplied at construction
    #[error("no signing key configured")]
    NoSigningKey,

    /// Configuration value out of range or inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Public key set contains no usable key
    #[error("invalid key set: {0}")]
    InvalidKeySet(String),

    /// Signing attempted on a verify-only manager
    #[error("token manager not initialized: no signing key available")]
    NotInitialized,

    /// A claim required for this operation is absent
    #[error("token is missing required claim '{0}'")]
    MissingClaim(&'static str),

    /// Signature creation failed
    #[error("failed to sign token: {0}")]
    Signing(String),

    /// Token is not a well-formed compact JWS
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Token header carries no `kid`
    #[error("token header has no key identifier")]
    MissingKeyId,

    /// Token was signed by a key not present in the registry or key set
    #[error("unknown signing key '{0}'")]
    UnknownSigningKey(String),

    /// Token header algorithm differs from the key's declared algorithm
    #[error("algorithm mismatch for key '{kid}': key declares {expected:?}, token uses {found:?}")]
    AlgorithmMismatch {
        /// Key identifier from the header
        kid: String,
        /// Algorithm declared by the key
        expected: Algorithm,
        /// Algorithm found in the token header
        found: Algorithm,
    },

    /// Signature does not verify
    #[error("invalid token signature")]
    InvalidSignature,

    /// Token is past its expiration time
    #[error("token has expired")]
    Expired,

    /// Token's not-before time is in the future
    #[error("token is not valid yet")]
    NotValidYet,

    /// Token was not issued for this audience
    #[error("token audience does not match")]
    InvalidAudience,

    /// Token was not issued by the expected issuer
    #[error("token issuer does not match")]
    InvalidIssuer,

    /// Access and refresh tokens do not belong to the same pair
    #[error("access and refresh tokens do not belong to the same pair")]
    PairMismatch,

    /// No cache entry for the requested key
    #[error("cache miss")]
    CacheMiss,

    /// Cache entry existed but its token had expired
    #[error("cache expired")]
    CacheExpired,

    /// Remote key set could not be fetched
    #[error("failed to fetch key set from {endpoint}: {reason}")]
    Fetch {
        /// Key set endpoint
        endpoint: String,
        /// Underlying failure
        reason: String,
    },
}

/// Coarse grouping of [`TokenError`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Startup failures; callers should abort
    Construction,
    /// Failures while minting or signing
    Issuance,
    /// Token rejected by a verifier
    Verification,
    /// Session cache lookups
    Cache,
    /// Remote key set retrieval
    Fetch,
}

impl TokenError {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidKeyId { .. }
            | Self::KeyMaterial { .. }
            | Self::NoSigningKey
            | Self::InvalidConfig(_)
            | Self::InvalidKeySet(_) => ErrorCategory::Construction,
            Self::NotInitialized | Self::MissingClaim(_) | Self::Signing(_) => {
                ErrorCategory::Issuance
            }
            Self::Malformed(_)
            | Self::MissingKeyId
            | Self::UnknownSigningKey(_)
            | Self::AlgorithmMismatch { .. }
            | Self::InvalidSignature
            | Self::Expired
            | Self::NotValidYet
            | Self::InvalidAudience
            | Self::InvalidIssuer
            | Self::PairMismatch => ErrorCategory::Verification,
            Self::CacheMiss | Self::CacheExpired => ErrorCategory::Cache,
            Self::Fetch { .. } => ErrorCategory::Fetch,
        }
    }

    /// Whether this error means the presented credential must be rejected
    pub fn is_authentication_failure(&self) -> bool {
        self.category() == ErrorCategory::Verification
    }

    /// Whether a key set refresh may resolve this error
    pub fn is_unknown_key(&self) -> bool {
        matches!(self, Self::UnknownSigningKey(_))
    }

    pub(crate) fn key_material(kid: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::KeyMaterial {
            kid: kid.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn fetch(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_errors_are_authentication_failures() {
        let errors = [
            TokenError::Expired,
            TokenError::NotValidYet,
            TokenError::InvalidSignature,
            TokenError::UnknownSigningKey("k".into()),
            TokenError::InvalidAudience,
            TokenError::InvalidIssuer,
            TokenError::MissingKeyId,
        ];
        for err in errors {
            assert!(err.is_authentication_failure(), "{err} should reject");
        }
    }

    #[test]
    fn test_cache_and_fetch_errors_are_not_authentication_failures() {
        assert_eq!(TokenError::CacheMiss.category(), ErrorCategory::Cache);
        assert_eq!(TokenError::CacheExpired.category(), ErrorCategory::Cache);
        assert!(!TokenError::fetch("https://a", "boom").is_authentication_failure());
        assert_eq!(TokenError::NoSigningKey.category(), ErrorCategory::Construction);
    }

    #[test]
    fn test_fetch_error_carries_endpoint() {
        let err = TokenError::fetch("https://issuer.example.com/jwks", "status 503");
        assert_eq!(
            err.to_string(),
            "failed to fetch key set from https://issuer.example.com/jwks: status 503"
        );
    }
}
