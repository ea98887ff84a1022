//! Configuration for token issuance, JWKS verification and session caching
//!
//! All durations are whole seconds. Every struct has working defaults except
//! for the identity fields (`audience`, `issuer`, `keys`, `endpoint`), which a
//! deployment must supply.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TokenError};

/// Environment prefix used by [`TokensConfig::from_file`]
pub const ENV_PREFIX: &str = "TURBOMCP_TOKENS";

/// Issuer-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenManagerConfig {
    /// Audience stamped into and required on every token
    pub audience: String,
    /// Issuer stamped into and required on every token
    pub issuer: String,
    /// Key identifier (UUIDv7) to PEM private key file
    pub keys: BTreeMap<String, PathBuf>,
    /// Access token lifetime in seconds
    pub access_duration: i64,
    /// Refresh token lifetime in seconds, counted from issuance
    pub refresh_duration: i64,
    /// Offset from access expiry at which the refresh token becomes valid; negative
    /// values open the refresh window before the access token expires
    pub overlap: i64,
    /// Tolerated clock skew in seconds
    pub leeway: u64,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            audience: String::new(),
            issuer: String::new(),
            keys: BTreeMap::new(),
            access_duration: 3600,
            refresh_duration: 7200,
            overlap: -900,
            leeway: 0,
        }
    }
}

impl TokenManagerConfig {
    /// Config with identity set and default lifetimes
    pub fn new(audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            issuer: issuer.into(),
            ..Self::default()
        }
    }

    /// Register a key file
    pub fn with_key(mut self, kid: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.keys.insert(kid.into(), path.into());
        self
    }

    /// Access token lifetime
    pub fn access_duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.access_duration)
    }

    /// Refresh token lifetime
    pub fn refresh_duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.refresh_duration)
    }

    /// Refresh window offset
    pub fn overlap(&self) -> TimeDelta {
        TimeDelta::seconds(self.overlap)
    }

    /// Check lifetimes and identity fields
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidConfig`] for an empty audience or issuer, or
    /// a non-positive lifetime.
    pub fn validate(&self) -> Result<()> {
        if self.audience.is_empty() {
            return Err(TokenError::InvalidConfig("audience must not be empty".into()));
        }
        if self.issuer.is_empty() {
            return Err(TokenError::InvalidConfig("issuer must not be empty".into()));
        }
        if self.access_duration <= 0 {
            return Err(TokenError::InvalidConfig(format!(
                "access_duration must be positive, got {}",
                self.access_duration
            )));
        }
        if self.refresh_duration <= 0 {
            return Err(TokenError::InvalidConfig(format!(
                "refresh_duration must be positive, got {}",
                self.refresh_duration
            )));
        }
        if self.overlap.unsigned_abs() >= self.access_duration.unsigned_abs() {
            warn!(
                overlap = self.overlap,
                access_duration = self.access_duration,
                "Refresh overlap spans the whole access token lifetime"
            );
        }
        Ok(())
    }
}

/// Remote key set settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksConfig {
    /// JWKS endpoint URL (https, or http on a loopback host)
    pub endpoint: String,
    /// Expected audience
    pub audience: String,
    /// Expected issuer
    pub issuer: String,
    /// Age in seconds after which a verification triggers a re-fetch
    pub refresh_interval: u64,
    /// Minimum seconds between fetch attempts triggered by verification
    pub refresh_cooldown: u64,
    /// HTTP request timeout in seconds
    pub request_timeout: u64,
    /// Tolerated clock skew in seconds
    pub leeway: u64,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            audience: String::new(),
            issuer: String::new(),
            refresh_interval: 900,
            refresh_cooldown: 5,
            request_timeout: 10,
            leeway: 0,
        }
    }
}

impl JwksConfig {
    /// Config with endpoint and identity set and default timings
    pub fn new(
        endpoint: impl Into<String>,
        audience: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            audience: audience.into(),
            issuer: issuer.into(),
            ..Self::default()
        }
    }

    /// Refresh interval as a [`Duration`]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    /// Refresh cooldown as a [`Duration`]
    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.refresh_cooldown)
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Check identity fields and timeouts
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidConfig`] for empty identity fields or a zero
    /// request timeout.
    pub fn validate(&self) -> Result<()> {
        if self.audience.is_empty() || self.issuer.is_empty() {
            return Err(TokenError::InvalidConfig(
                "audience and issuer must not be empty".into(),
            ));
        }
        if self.request_timeout == 0 {
            return Err(TokenError::InvalidConfig(
                "request_timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

/// Session cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionCacheConfig {
    /// Maximum number of cached sessions
    pub capacity: usize,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// Issuer settings; absent for verify-only services
    pub manager: Option<TokenManagerConfig>,
    /// Remote key set settings
    pub jwks: Option<JwksConfig>,
    /// Session cache settings
    pub session_cache: SessionCacheConfig,
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),
}

impl TokensConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// Environment variables with the `TURBOMCP_TOKENS` prefix override file
    /// settings, using `__` for nesting: `TURBOMCP_TOKENS__SESSION_CACHE__CAPACITY=64`.
    ///
    /// ```rust,no_run
    /// use turbomcp_tokens::TokensConfig;
    ///
    /// let config = TokensConfig::from_file("tokens.toml").expect("Failed to load config");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, has an unsupported extension,
    /// or contains invalid configuration.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> std::result::Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load configuration from a file with custom environment prefix
    ///
    /// # Errors
    ///
    /// Same as [`TokensConfig::from_file`].
    pub fn from_file_with_prefix(
        path: impl AsRef<std::path::Path>,
        env_prefix: &str,
    ) -> std::result::Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TokenManagerConfig::default();
        assert_eq!(config.access_duration(), TimeDelta::hours(1));
        assert_eq!(config.refresh_duration(), TimeDelta::hours(2));
        assert_eq!(config.overlap(), TimeDelta::minutes(-15));
        assert_eq!(config.leeway, 0);

        let jwks = JwksConfig::default();
        assert_eq!(jwks.refresh_interval(), Duration::from_secs(900));
        assert_eq!(jwks.refresh_cooldown(), Duration::from_secs(5));
        assert_eq!(jwks.request_timeout(), Duration::from_secs(10));

        assert_eq!(SessionCacheConfig::default().capacity, 1024);
    }

    #[test]
    fn test_validate_rejects_bad_lifetimes() {
        let base = TokenManagerConfig::new("api", "issuer");
        assert!(base.validate().is_ok());

        let zero_access = TokenManagerConfig {
            access_duration: 0,
            ..base.clone()
        };
        assert!(matches!(zero_access.validate(), Err(TokenError::InvalidConfig(_))));

        let negative_refresh = TokenManagerConfig {
            refresh_duration: -1,
            ..base.clone()
        };
        assert!(matches!(
            negative_refresh.validate(),
            Err(TokenError::InvalidConfig(_))
        ));

        let no_audience = TokenManagerConfig::new("", "issuer");
        assert!(matches!(no_audience.validate(), Err(TokenError::InvalidConfig(_))));
    }

    #[test]
    fn test_jwks_validate() {
        assert!(JwksConfig::new("https://a/jwks", "api", "iss").validate().is_ok());
        assert!(JwksConfig::new("https://a/jwks", "", "iss").validate().is_err());
        let no_timeout = JwksConfig {
            request_timeout: 0,
            ..JwksConfig::new("https://a/jwks", "api", "iss")
        };
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[manager]
audience = "api"
issuer = "https://auth.example.com"
access_duration = 600

[manager.keys]
"01890a5d-ac96-774b-bcce-b302099a8057" = "/etc/keys/current.pem"

[jwks]
endpoint = "https://auth.example.com/.well-known/jwks.json"
audience = "api"
issuer = "https://auth.example.com"

[session_cache]
capacity = 16
"#
        )
        .unwrap();

        let config = TokensConfig::from_file_with_prefix(file.path(), "TURBOMCP_TOKENS_TEST").unwrap();
        let manager = config.manager.unwrap();
        assert_eq!(manager.audience, "api");
        assert_eq!(manager.access_duration, 600);
        assert_eq!(manager.refresh_duration, 7200);
        assert_eq!(
            manager.keys.get("01890a5d-ac96-774b-bcce-b302099a8057"),
            Some(&PathBuf::from("/etc/keys/current.pem"))
        );
        let jwks = config.jwks.unwrap();
        assert_eq!(jwks.refresh_interval, 900);
        assert_eq!(config.session_cache.capacity, 16);
    }

    #[test]
    fn test_from_file_json_verify_only() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"jwks": {{"endpoint": "https://a/jwks", "audience": "api", "issuer": "iss"}}}}"#
        )
        .unwrap();

        let config = TokensConfig::from_file(file.path()).unwrap();
        assert!(config.manager.is_none());
        assert_eq!(config.jwks.unwrap().endpoint, "https://a/jwks");
        assert_eq!(config.session_cache, SessionCacheConfig::default());
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            TokensConfig::from_file("/nonexistent/tokens.toml"),
            Err(ConfigError::FileNotFound(_))
        ));

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            TokensConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[session_cache]\ncapacity = \"many\"").unwrap();
        let err = TokensConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)), "{err}");
    }
}
