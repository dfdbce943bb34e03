//! Account persistence.

use crate::error::PaywallResult;
use crate::subscription::Subscription;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub ticker: String,
    pub analysis_type: String,
    pub buffett_score: f64,
    pub owner_earnings: f64,
    pub created_at: DateTime<Utc>,
}

/// Usage and subscription state for one signed-in user, keyed by email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub display_name: Option<String>,
    pub subscription: Subscription,
    pub analysis_count_weekly: u32,
    pub last_weekly_reset: Option<NaiveDate>,
    pub ai_count_daily: u32,
    pub last_daily_reset: Option<NaiveDate>,
    pub history: Vec<AnalysisRecord>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: impl Into<String>, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            email: email.into(),
            display_name: None,
            subscription: Subscription::default(),
            analysis_count_weekly: 0,
            last_weekly_reset: Some(today),
            ai_count_daily: 0,
            last_daily_reset: Some(today),
            history: Vec::new(),
            created_at: now,
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self, email: &str) -> PaywallResult<Option<Account>>;

    async fn save(&self, account: Account) -> PaywallResult<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn load(&self, email: &str) -> PaywallResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(email).cloned())
    }

    async fn save(&self, account: Account) -> PaywallResult<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.email.clone(), account);
        Ok(())
    }
}
