//! Subscription tiers, usage quotas and feature gates.
//!
//! Accounts are keyed by the signed-in user's email and live behind the
//! [`AccountStore`] trait. All checks take an explicit `now` so reset and
//! expiry boundaries are testable.

mod error;
mod gates;
mod quota;
mod sqlite;
mod store;
mod subscription;

pub use error::{PaywallError, PaywallResult};
pub use gates::{FREE_COMPETENCE_LIMIT, Feature, FeatureGates, GateDecision};
pub use quota::{
    Limit, QuotaDecision, QuotaLimits, QuotaService, RecentAnalysis, UsageSummary,
    should_reset_daily, should_reset_weekly,
};
pub use sqlite::SqliteAccountStore;
pub use store::{Account, AccountStore, AnalysisRecord, InMemoryAccountStore};
pub use subscription::{
    DEFAULT_SUBSCRIPTION_DAYS, MAX_SUBSCRIPTION_DAYS, Subscription, SubscriptionStatus,
    SubscriptionTier,
};
