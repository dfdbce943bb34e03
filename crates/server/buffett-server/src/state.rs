use crate::config::{Config, PaywallConfig, SessionConfig, StoreKind};
use anyhow::{Context, Result};
use buffett_identity_oauth2::GoogleAuthenticator;
use buffett_identity_session::{RegistryLimits, SessionRegistry};
use buffett_paywall::{
    AccountStore, FeatureGates, InMemoryAccountStore, QuotaService, SqliteAccountStore,
};
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

/// Shared handles for every request.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: GoogleAuthenticator,
    pub sessions: SessionRegistry,
    pub quotas: QuotaService,
    pub gates: Arc<FeatureGates>,
    pub session_config: SessionConfig,
    pub paywall_config: PaywallConfig,
}

impl AppState {
    pub fn new(
        authenticator: GoogleAuthenticator,
        store: Arc<dyn AccountStore>,
        config: &Config,
    ) -> Self {
        Self {
            authenticator,
            sessions: SessionRegistry::with_limits(registry_limits(config)),
            quotas: QuotaService::new(store),
            gates: Arc::new(FeatureGates::new()),
            session_config: config.session.clone(),
            paywall_config: config.paywall.clone(),
        }
    }

    /// Build with a `reqwest` transport to the configured endpoints and the
    /// configured account store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let authenticator = GoogleAuthenticator::builder(config.oauth.clone())
            .default_transport()?
            .build()
            .context("Failed to set up Google sign-in")?;
        let store = account_store(&config.paywall)?;
        Ok(Self::new(authenticator, store, config))
    }
}

pub fn account_store(config: &PaywallConfig) -> Result<Arc<dyn AccountStore>> {
    match config.store {
        StoreKind::Memory => {
            info!("Using in-memory account store");
            Ok(Arc::new(InMemoryAccountStore::new()))
        }
        StoreKind::Sqlite => {
            let store = SqliteAccountStore::open(&config.database_path).with_context(|| {
                format!(
                    "Failed to open account database {}",
                    config.database_path.display()
                )
            })?;
            Ok(Arc::new(store))
        }
    }
}

/// Pending sign-ins last as long as their state token.
fn registry_limits(config: &Config) -> RegistryLimits {
    let seconds = |s: i64| Duration::try_seconds(s).unwrap_or(Duration::MAX);
    RegistryLimits {
        pending_ttl: seconds(i64::try_from(config.oauth.state_ttl_seconds).unwrap_or(i64::MAX)),
        session_ttl: seconds(config.session.ttl_seconds),
        max_pending: config.session.max_pending_sessions,
    }
}
