//! Configuration for the payment engine.

use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Payment gateway credentials and checkout settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// State storage configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Catalog seed data
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Gateway REST API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Base URL of the hosted card iframe
    #[serde(default = "default_iframe_base_url")]
    pub iframe_base_url: String,

    /// Merchant API key
    #[serde(default = "default_secret")]
    pub api_key: SecretString,

    /// Secret for callback signatures
    #[serde(default = "default_secret")]
    pub hmac_secret: SecretString,

    /// Integration used for card payments
    #[serde(default)]
    pub card_integration_id: i64,

    /// Integration used for mobile-wallet payments
    #[serde(default)]
    pub wallet_integration_id: i64,

    /// Hosted iframe id
    #[serde(default)]
    pub iframe_id: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Per-request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the JSON state file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Enable persistence (if false, state is in-memory only)
    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// JSON file with courses, service prices, users and coupons
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            iframe_base_url: default_iframe_base_url(),
            api_key: default_secret(),
            hmac_secret: default_secret(),
            card_integration_id: 0,
            wallet_integration_id: 0,
            iframe_id: 0,
            currency: default_currency(),
            timeout: default_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            persist: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://accept.paymob.com/api".into()
}

fn default_iframe_base_url() -> String {
    "https://accept.paymob.com/api/acceptance/iframes".into()
}

fn default_secret() -> SecretString {
    SecretString::new(String::new())
}

fn default_currency() -> String {
    "EGP".into()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/data/payments.json")
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8083
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Nested keys use `__`, e.g. `GATEWAY__HMAC_SECRET`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Refuse to run without gateway credentials. An empty HMAC secret
    /// would let anyone sign callbacks.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.api_key.expose_secret().trim().is_empty() {
            bail!("GATEWAY__API_KEY must be set");
        }
        if self.gateway.hmac_secret.expose_secret().trim().is_empty() {
            bail!("GATEWAY__HMAC_SECRET must be set");
        }
        Ok(())
    }
}
