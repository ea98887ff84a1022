//! Common test utilities for integration tests
//!
//! Key material, manager builders and a mock JWKS endpoint.

#![allow(dead_code)]

use std::sync::{Arc, LazyLock};

use turbomcp_tokens::{
    Clock, JwkSet, JwksConfig, KeyId, KeyKind, RandomSource, SigningKey, TokenManager,
    TokenManagerConfig, generate_private_key_pem,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// Fixed issuance time used by clock-driven tests
pub const T0: i64 = 1_700_000_000;

pub const AUDIENCE: &str = "api";
pub const ISSUER: &str = "https://auth.example.com";

/// RSA-2048 private key in PKCS#1 PEM, generated once per test binary
pub static RSA_PEM: LazyLock<String> = LazyLock::new(|| {
    generate_private_key_pem(&RandomSource::seeded(2048), KeyKind::RSA_2048)
        .expect("RSA key generation")
        .as_str()
        .to_owned()
});

pub fn config() -> TokenManagerConfig {
    TokenManagerConfig::new(AUDIENCE, ISSUER)
}

/// Fresh P-256 key whose id encodes `created_millis`
pub fn p256_key(random: &RandomSource, created_millis: u64) -> SigningKey {
    SigningKey::generate(KeyId::generate(random, created_millis), random, KeyKind::P256)
        .expect("P-256 key generation")
}

/// Manager over `keys` with a pinned clock
pub fn manager(keys: Vec<SigningKey>, clock: Arc<dyn Clock>) -> TokenManager {
    TokenManager::with_signing_keys(&config(), keys)
        .expect("manager construction")
        .with_clock(clock)
}

/// Manager over `keys` with the system clock
pub fn live_manager(keys: Vec<SigningKey>) -> TokenManager {
    TokenManager::with_signing_keys(&config(), keys).expect("manager construction")
}

/// JWKS settings for `endpoint` that never refresh on their own
pub fn jwks_config(endpoint: &str) -> JwksConfig {
    JwksConfig {
        refresh_interval: 3600,
        refresh_cooldown: 0,
        ..JwksConfig::new(endpoint, AUDIENCE, ISSUER)
    }
}

/// Mock issuer publishing a JWKS document
pub struct MockJwksServer {
    pub server: MockServer,
    pub endpoint: String,
}

impl MockJwksServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let endpoint = format!("{}/.well-known/jwks.json", server.uri());
        Self { server, endpoint }
    }

    /// Replace whatever is mounted with a successful JWKS response
    pub async fn serve(&self, jwks: &JwkSet) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .mount(&self.server)
            .await;
    }

    /// Replace whatever is mounted with an error status
    pub async fn fail(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve `jwks` after `delay`
    pub async fn serve_slowly(&self, jwks: &JwkSet, delay: std::time::Duration) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks)
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Requests received since the last reset
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}
