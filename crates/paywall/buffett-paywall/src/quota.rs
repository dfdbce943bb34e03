//! Weekly analysis and daily AI query quotas.

use crate::error::{PaywallError, PaywallResult};
use crate::store::{Account, AccountStore, AnalysisRecord};
use crate::subscription::{Subscription, SubscriptionStatus, SubscriptionTier};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const RECENT_ANALYSES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub free_weekly_analyses: u32,
    pub free_daily_ai_queries: u32,
    pub premium_daily_ai_queries: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            free_weekly_analyses: 3,
            free_daily_ai_queries: 0,
            premium_daily_ai_queries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum Limit {
    Unlimited,
    Count(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u32,
    pub limit: Limit,
    /// `None` when the limit is unlimited.
    pub remaining: Option<u32>,
}

impl QuotaDecision {
    fn unlimited(used: u32) -> Self {
        Self {
            allowed: true,
            used,
            limit: Limit::Unlimited,
            remaining: None,
        }
    }

    fn counted(used: u32, limit: u32) -> Self {
        Self {
            allowed: used < limit,
            used,
            limit: Limit::Count(limit),
            remaining: Some(limit.saturating_sub(used)),
        }
    }

    /// Usage after one more unit was taken under this decision.
    fn consumed(self, used: u32) -> Self {
        match self.limit {
            Limit::Unlimited => Self::unlimited(used),
            Limit::Count(limit) => Self {
                allowed: true,
                used,
                limit: self.limit,
                remaining: Some(limit.saturating_sub(used)),
            },
        }
    }

    fn denied(limit: u32) -> Self {
        Self {
            allowed: false,
            used: 0,
            limit: Limit::Count(limit),
            remaining: Some(0),
        }
    }
}

/// Weekly counters reset once the last reset predates this week's Monday.
pub fn should_reset_weekly(last_reset: Option<NaiveDate>, today: NaiveDate) -> bool {
    let Some(last) = last_reset else {
        return true;
    };
    let this_monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    last < this_monday
}

pub fn should_reset_daily(last_reset: Option<NaiveDate>, today: NaiveDate) -> bool {
    last_reset.is_none_or(|last| last < today)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentAnalysis {
    pub ticker: String,
    pub score: f64,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub current_week_analyses: u32,
    pub current_day_ai_queries: u32,
    pub total_analyses_ever: usize,
    pub subscription_tier: SubscriptionTier,
    pub recent_analyses: Vec<RecentAnalysis>,
    pub weekly_reset_due: bool,
    pub daily_reset_due: bool,
}

/// Quota checks and usage accounting over an [`AccountStore`].
///
/// Mutations are serialized so concurrent requests for one account cannot
/// lose increments between load and save.
#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn AccountStore>,
    limits: QuotaLimits,
    write_lock: Arc<Mutex<()>>,
}

impl QuotaService {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self::with_limits(store, QuotaLimits::default())
    }

    pub fn with_limits(store: Arc<dyn AccountStore>, limits: QuotaLimits) -> Self {
        Self {
            store,
            limits,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Create the account on first sign-in; later calls refresh the display name.
    pub async fn ensure_account(
        &self,
        email: &str,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> PaywallResult<Account> {
        let email = email.trim();
        if email.is_empty() {
            return Err(PaywallError::InvalidEmail);
        }

        let _guard = self.write_lock.lock().await;
        let mut account = match self.store.load(email).await? {
            Some(account) => account,
            None => {
                info!("Creating paywall account for {}", email);
                Account::new(email, now)
            }
        };
        if display_name.is_some() {
            account.display_name = display_name.map(str::to_string);
        }
        self.store.save(account.clone()).await?;
        Ok(account)
    }

    pub async fn account(&self, email: &str) -> PaywallResult<Account> {
        self.store
            .load(email)
            .await?
            .ok_or_else(|| PaywallError::AccountNotFound(email.to_string()))
    }

    /// Current tier, persisting the downgrade when a paid plan has elapsed.
    pub async fn subscription_status(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> PaywallResult<SubscriptionStatus> {
        let _guard = self.write_lock.lock().await;
        let Some(mut account) = self.store.load(email).await? else {
            return Ok(SubscriptionStatus {
                tier: SubscriptionTier::Free,
                active: false,
                days_remaining: Some(0),
            });
        };

        let status = account.subscription.status_at(now);
        if account.subscription.is_expired_at(now) {
            info!(
                "Subscription for {} expired; downgrading {} to free",
                email, account.subscription.tier
            );
            account.subscription.downgrade();
            self.store.save(account).await?;
        }
        Ok(status)
    }

    pub async fn set_subscription(
        &self,
        email: &str,
        tier: SubscriptionTier,
        subscription_id: Option<String>,
        days: i64,
        now: DateTime<Utc>,
    ) -> PaywallResult<Subscription> {
        let _guard = self.write_lock.lock().await;
        let mut account = self
            .store
            .load(email)
            .await?
            .ok_or_else(|| PaywallError::AccountNotFound(email.to_string()))?;

        account.subscription.upgrade(tier, subscription_id, days, now);
        let subscription = account.subscription.clone();
        self.store.save(account).await?;

        info!("Subscription updated for {}: {}", email, tier);
        Ok(subscription)
    }

    /// Weekly analysis quota, applying a due reset. Free accounts are counted;
    /// paid tiers are unlimited.
    fn evaluate_analysis(
        &self,
        account: &mut Account,
        now: DateTime<Utc>,
    ) -> (QuotaDecision, bool) {
        if account.subscription.status_at(now).tier.is_premium() {
            return (QuotaDecision::unlimited(account.analysis_count_weekly), false);
        }

        let today = now.date_naive();
        let reset = should_reset_weekly(account.last_weekly_reset, today);
        if reset {
            account.analysis_count_weekly = 0;
            account.last_weekly_reset = Some(today);
        }
        let decision =
            QuotaDecision::counted(account.analysis_count_weekly, self.limits.free_weekly_analyses);
        (decision, reset)
    }

    /// Daily AI query quota, applying a due reset.
    fn evaluate_ai(&self, account: &mut Account, now: DateTime<Utc>) -> (QuotaDecision, bool) {
        let tier = account.subscription.status_at(now).tier;
        if tier.is_professional() {
            return (QuotaDecision::unlimited(account.ai_count_daily), false);
        }

        let today = now.date_naive();
        let reset = should_reset_daily(account.last_daily_reset, today);
        if reset {
            account.ai_count_daily = 0;
            account.last_daily_reset = Some(today);
        }
        let limit = if tier.is_premium() {
            self.limits.premium_daily_ai_queries
        } else {
            self.limits.free_daily_ai_queries
        };
        (QuotaDecision::counted(account.ai_count_daily, limit), reset)
    }

    pub async fn check_analysis_quota(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> PaywallResult<QuotaDecision> {
        let _guard = self.write_lock.lock().await;
        let Some(mut account) = self.store.load(email).await? else {
            warn!("Analysis quota requested for unknown account {}", email);
            return Ok(QuotaDecision::denied(self.limits.free_weekly_analyses));
        };

        let (decision, reset) = self.evaluate_analysis(&mut account, now);
        if reset {
            self.store.save(account).await?;
        }
        Ok(decision)
    }

    /// Count one analysis and append it to the history.
    pub async fn record_analysis(
        &self,
        email: &str,
        ticker: &str,
        buffett_score: f64,
        owner_earnings: f64,
        now: DateTime<Utc>,
    ) -> PaywallResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut account = self
            .store
            .load(email)
            .await?
            .ok_or_else(|| PaywallError::AccountNotFound(email.to_string()))?;

        Self::push_analysis(&mut account, ticker, buffett_score, owner_earnings, now);
        self.store.save(account).await?;

        info!("Analysis usage incremented for {}: {}", email, ticker);
        Ok(())
    }

    /// Check the weekly quota and, when it allows, count the analysis in the
    /// same critical section.
    ///
    /// A denied decision leaves the counters untouched. An allowed decision
    /// reports usage after this analysis.
    pub async fn try_consume_analysis(
        &self,
        email: &str,
        ticker: &str,
        buffett_score: f64,
        owner_earnings: f64,
        now: DateTime<Utc>,
    ) -> PaywallResult<QuotaDecision> {
        let _guard = self.write_lock.lock().await;
        let Some(mut account) = self.store.load(email).await? else {
            warn!("Analysis requested for unknown account {}", email);
            return Ok(QuotaDecision::denied(self.limits.free_weekly_analyses));
        };

        let (decision, reset) = self.evaluate_analysis(&mut account, now);
        if !decision.allowed {
            if reset {
                self.store.save(account).await?;
            }
            return Ok(decision);
        }

        Self::push_analysis(&mut account, ticker, buffett_score, owner_earnings, now);
        let used = account.analysis_count_weekly;
        self.store.save(account).await?;

        info!("Analysis usage incremented for {}: {}", email, ticker);
        Ok(decision.consumed(used))
    }

    fn push_analysis(
        account: &mut Account,
        ticker: &str,
        buffett_score: f64,
        owner_earnings: f64,
        now: DateTime<Utc>,
    ) {
        account.analysis_count_weekly += 1;
        account.history.push(AnalysisRecord {
            ticker: ticker.trim().to_ascii_uppercase(),
            analysis_type: "standard".to_string(),
            buffett_score,
            owner_earnings,
            created_at: now,
        });
    }

    pub async fn check_ai_quota(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> PaywallResult<QuotaDecision> {
        let _guard = self.write_lock.lock().await;
        let Some(mut account) = self.store.load(email).await? else {
            warn!("AI quota requested for unknown account {}", email);
            return Ok(QuotaDecision::denied(self.limits.free_daily_ai_queries));
        };

        let (decision, reset) = self.evaluate_ai(&mut account, now);
        if reset {
            self.store.save(account).await?;
        }
        Ok(decision)
    }

    pub async fn record_ai_query(&self, email: &str) -> PaywallResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut account = self
            .store
            .load(email)
            .await?
            .ok_or_else(|| PaywallError::AccountNotFound(email.to_string()))?;

        account.ai_count_daily += 1;
        self.store.save(account).await?;

        info!("AI query usage incremented for {}", email);
        Ok(())
    }

    /// Check the daily AI quota and count the query when allowed, atomically.
    pub async fn try_consume_ai_query(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> PaywallResult<QuotaDecision> {
        let _guard = self.write_lock.lock().await;
        let Some(mut account) = self.store.load(email).await? else {
            warn!("AI query requested for unknown account {}", email);
            return Ok(QuotaDecision::denied(self.limits.free_daily_ai_queries));
        };

        let (decision, reset) = self.evaluate_ai(&mut account, now);
        if !decision.allowed {
            if reset {
                self.store.save(account).await?;
            }
            return Ok(decision);
        }

        account.ai_count_daily += 1;
        let used = account.ai_count_daily;
        self.store.save(account).await?;

        info!("AI query usage incremented for {}", email);
        Ok(decision.consumed(used))
    }

    pub async fn usage_summary(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> PaywallResult<UsageSummary> {
        let account = self.account(email).await?;
        let today = now.date_naive();

        let mut recent: Vec<&AnalysisRecord> = account.history.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(UsageSummary {
            current_week_analyses: account.analysis_count_weekly,
            current_day_ai_queries: account.ai_count_daily,
            total_analyses_ever: account.history.len(),
            subscription_tier: account.subscription.tier,
            recent_analyses: recent
                .into_iter()
                .take(RECENT_ANALYSES)
                .map(|r| RecentAnalysis {
                    ticker: r.ticker.clone(),
                    score: r.buffett_score,
                    date: r.created_at,
                })
                .collect(),
            weekly_reset_due: should_reset_weekly(account.last_weekly_reset, today),
            daily_reset_due: should_reset_daily(account.last_daily_reset, today),
        })
    }

    /// Administrative reset of both counters.
    pub async fn reset_quotas(&self, email: &str, now: DateTime<Utc>) -> PaywallResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut account = self
            .store
            .load(email)
            .await?
            .ok_or_else(|| PaywallError::AccountNotFound(email.to_string()))?;

        let today = now.date_naive();
        account.analysis_count_weekly = 0;
        account.ai_count_daily = 0;
        account.last_weekly_reset = Some(today);
        account.last_daily_reset = Some(today);
        self.store.save(account).await?;

        info!("Quotas reset for {}", email);
        Ok(())
    }
}
