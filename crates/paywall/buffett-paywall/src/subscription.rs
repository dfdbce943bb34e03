//! Subscription tiers and their expiry.

use crate::error::PaywallError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SUBSCRIPTION_DAYS: i64 = 30;

/// Longest plan a single upgrade may grant.
pub const MAX_SUBSCRIPTION_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
    Professional,
}

impl SubscriptionTier {
    /// Premium features are included in every paid tier.
    pub fn is_premium(self) -> bool {
        matches!(self, SubscriptionTier::Premium | SubscriptionTier::Professional)
    }

    pub fn is_professional(self) -> bool {
        self == SubscriptionTier::Professional
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Professional => "professional",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = PaywallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            "professional" => Ok(SubscriptionTier::Professional),
            other => Err(PaywallError::UnknownTier(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub tier: SubscriptionTier,
    pub subscription_id: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub tier: SubscriptionTier,
    pub active: bool,
    /// Whole days left on a paid plan; `None` for free or open-ended plans.
    pub days_remaining: Option<i64>,
}

impl Subscription {
    /// Evaluate the subscription at `now`. An elapsed paid plan reports as an
    /// inactive free plan; callers persist the downgrade.
    pub fn status_at(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        if self.tier == SubscriptionTier::Free {
            return SubscriptionStatus {
                tier: SubscriptionTier::Free,
                active: true,
                days_remaining: None,
            };
        }

        match self.end_date {
            Some(end) if end > now => SubscriptionStatus {
                tier: self.tier,
                active: true,
                days_remaining: Some((end - now).num_days()),
            },
            Some(_) => SubscriptionStatus {
                tier: SubscriptionTier::Free,
                active: false,
                days_remaining: Some(0),
            },
            None => SubscriptionStatus {
                tier: self.tier,
                active: true,
                days_remaining: None,
            },
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.tier != SubscriptionTier::Free && self.end_date.is_some_and(|end| end <= now)
    }

    /// Move to `tier` for `days` from `now`. Choosing the free tier downgrades.
    ///
    /// `days` is clamped to `1..=MAX_SUBSCRIPTION_DAYS`.
    pub fn upgrade(
        &mut self,
        tier: SubscriptionTier,
        subscription_id: Option<String>,
        days: i64,
        now: DateTime<Utc>,
    ) {
        if tier == SubscriptionTier::Free {
            self.downgrade();
            return;
        }
        self.tier = tier;
        self.subscription_id = subscription_id;
        let days = days.clamp(1, MAX_SUBSCRIPTION_DAYS);
        self.end_date = Some(
            now.checked_add_signed(Duration::days(days))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }

    pub fn downgrade(&mut self) {
        *self = Subscription::default();
    }
}
