//! Server configuration.
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - `buffett.toml` (or the file named by `BUFFETT_CONFIG_FILE`)
//! - `BUFFETT__`-prefixed environment variables, `__` separating nested keys
//!   (e.g. `BUFFETT__SERVER__PORT`, `BUFFETT__OAUTH__CLIENT_ID`)
//! - the flat names `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`,
//!   `GOOGLE_REDIRECT_URI`, `HOST`, `PORT` and `RUST_LOG`

use anyhow::{Context, Result};
use buffett_identity_oauth2::OAuth2Config;
use buffett_identity_session::{DEFAULT_MAX_PENDING, DEFAULT_SESSION_TTL_SECONDS};
use buffett_paywall::{DEFAULT_SUBSCRIPTION_DAYS, MAX_SUBSCRIPTION_DAYS};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "json", "compact"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuth2Config,
    pub session: SessionConfig,
    pub paywall: PaywallConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8501,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Mark the session cookie `Secure`; enable behind HTTPS.
    pub cookie_secure: bool,
    /// Lifetime of a signed-in session.
    pub ttl_seconds: i64,
    /// Unfinished sign-ins kept at once; the oldest are dropped first.
    pub max_pending_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_secure: false,
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            max_pending_sessions: DEFAULT_MAX_PENDING,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Accounts are lost on restart.
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaywallConfig {
    /// Allow `PUT /account/subscription` to switch plans without payment.
    pub demo_upgrades: bool,
    pub subscription_days: i64,
    pub store: StoreKind,
    /// Used when `store = "sqlite"`.
    pub database_path: PathBuf,
}

impl Default for PaywallConfig {
    fn default() -> Self {
        Self {
            demo_upgrades: false,
            subscription_days: DEFAULT_SUBSCRIPTION_DAYS,
            store: StoreKind::Memory,
            database_path: PathBuf::from("buffett_users.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A level name or a full `EnvFilter` directive string.
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and an optional config file.
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("BUFFETT_CONFIG_FILE").unwrap_or_else(|_| "buffett.toml".to_string());

        let mut builder = ConfigBuilder::builder();
        if Path::new(&config_path).exists() {
            info!("Loading configuration from {}", config_path);
            builder = builder.add_source(File::with_name(&config_path));
        } else {
            debug!("No config file found at {}, using defaults", config_path);
        }

        builder = builder.add_source(
            Environment::with_prefix("BUFFETT")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Config = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.apply_env_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;

        Ok(settings)
    }

    /// Parse a TOML document on top of the defaults, without touching the environment.
    pub fn from_toml(source: &str) -> Result<Self> {
        ConfigBuilder::builder()
            .add_source(File::from_str(source, config::FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Apply the flat variable names used by the hosted deployment.
    pub fn apply_env_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(client_id) = var("GOOGLE_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }
        if let Some(secret) = var("GOOGLE_CLIENT_SECRET") {
            self.oauth.client_secret = Some(secret);
        }
        if let Some(redirect_uri) = var("GOOGLE_REDIRECT_URI") {
            self.oauth.redirect_uri = Some(redirect_uri);
        }
        if let Some(host) = var("HOST") {
            self.server.host = host.trim().parse().context("Invalid HOST value")?;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port.trim().parse().context("Invalid PORT value")?;
        }
        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if !self.is_filter_directive() {
            let level = self.logging.level.to_lowercase();
            if !VALID_LEVELS.contains(&level.as_str()) {
                anyhow::bail!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level,
                    VALID_LEVELS
                );
            }
        }

        let format = self.logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            anyhow::bail!(
                "Invalid log format '{}'. Must be one of: {:?}",
                self.logging.format,
                VALID_FORMATS
            );
        }

        if !(1..=MAX_SUBSCRIPTION_DAYS).contains(&self.paywall.subscription_days) {
            anyhow::bail!(
                "Subscription length must be between 1 and {} days",
                MAX_SUBSCRIPTION_DAYS
            );
        }

        if self.session.ttl_seconds <= 0 {
            anyhow::bail!("Session TTL must be positive");
        }
        if self.session.max_pending_sessions == 0 {
            anyhow::bail!("max_pending_sessions must be at least 1");
        }

        if self.paywall.store == StoreKind::Sqlite
            && self.paywall.database_path.as_os_str().is_empty()
        {
            anyhow::bail!("database_path is required for the sqlite account store");
        }

        self.oauth
            .validate()
            .context("Invalid Google OAuth configuration")?;

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.server.host, self.server.port))
    }

    /// Filter string for `EnvFilter`.
    pub fn log_filter(&self) -> String {
        if self.is_filter_directive() {
            self.logging.level.clone()
        } else {
            let level = self.logging.level.to_lowercase();
            format!(
                "buffett_server={level},buffett_identity_oauth2={level},buffett_identity_session={level},buffett_paywall={level},tower_http={level},{level}"
            )
        }
    }

    fn is_filter_directive(&self) -> bool {
        self.logging.level.contains('=') || self.logging.level.contains(',')
    }
}
