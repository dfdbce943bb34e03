//! Tier-based feature access.
//!
//! Every check returns a value; presenting an upgrade prompt is the caller's
//! business.

use crate::error::{PaywallError, PaywallResult};
use crate::quota::{QuotaDecision, QuotaService};
use crate::subscription::SubscriptionTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Large-cap tickers open to the free tier.
const FREE_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "AMZN", "GOOGL", "GOOG", "TSLA", "META", "NVDA", "BRK.A", "BRK.B", "UNH",
    "JNJ", "JPM", "V", "PG", "HD", "CVX", "MA", "PFE", "ABBV", "BAC", "KO", "PEP", "COST", "TMO",
    "AVGO", "WMT", "DIS", "ABT", "CRM", "DHR", "VZ", "ADBE", "NEE", "CMCSA", "XOM", "NKE", "LIN",
    "NFLX", "QCOM", "TXN", "RTX", "UPS", "HON", "LOW", "IBM", "SPGI", "CAT", "AXP", "GS", "BKNG",
    "DE", "INTU",
];

pub const FREE_COMPETENCE_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    AdvancedRiskMetrics,
    LookThroughEarnings,
    ContrarianOverlay,
    PdfExport,
    GreenwaldMethod,
    BulkAnalysis,
    ApiAccess,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::AdvancedRiskMetrics,
        Feature::LookThroughEarnings,
        Feature::ContrarianOverlay,
        Feature::PdfExport,
        Feature::GreenwaldMethod,
        Feature::BulkAnalysis,
        Feature::ApiAccess,
    ];

    pub fn required_tier(self) -> SubscriptionTier {
        match self {
            Feature::AdvancedRiskMetrics
            | Feature::LookThroughEarnings
            | Feature::ContrarianOverlay
            | Feature::PdfExport => SubscriptionTier::Premium,
            Feature::GreenwaldMethod | Feature::BulkAnalysis | Feature::ApiAccess => {
                SubscriptionTier::Professional
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::AdvancedRiskMetrics => "advanced-risk-metrics",
            Feature::LookThroughEarnings => "look-through-earnings",
            Feature::ContrarianOverlay => "contrarian-overlay",
            Feature::PdfExport => "pdf-export",
            Feature::GreenwaldMethod => "greenwald-method",
            Feature::BulkAnalysis => "bulk-analysis",
            Feature::ApiAccess => "api-access",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = PaywallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| PaywallError::UnknownFeature(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub required_tier: SubscriptionTier,
}

#[derive(Debug, Clone)]
pub struct FeatureGates {
    free_tickers: HashSet<String>,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureGates {
    pub fn new() -> Self {
        Self {
            free_tickers: FREE_TICKERS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Free users may only analyze the bundled ticker set.
    pub fn check_ticker_access(&self, ticker: &str, tier: SubscriptionTier) -> GateDecision {
        if tier.is_premium() {
            return GateDecision {
                allowed: true,
                required_tier: SubscriptionTier::Free,
            };
        }

        let normalized = ticker.trim().to_ascii_uppercase();
        if self.free_tickers.contains(&normalized) {
            GateDecision {
                allowed: true,
                required_tier: SubscriptionTier::Free,
            }
        } else {
            GateDecision {
                allowed: false,
                required_tier: SubscriptionTier::Premium,
            }
        }
    }

    pub fn check_feature(&self, feature: Feature, tier: SubscriptionTier) -> GateDecision {
        let required_tier = feature.required_tier();
        let allowed = match required_tier {
            SubscriptionTier::Free => true,
            SubscriptionTier::Premium => tier.is_premium(),
            SubscriptionTier::Professional => tier.is_professional(),
        };
        GateDecision {
            allowed,
            required_tier,
        }
    }

    /// The first of `features` that `tier` may not use.
    pub fn first_denied(
        &self,
        features: impl IntoIterator<Item = Feature>,
        tier: SubscriptionTier,
    ) -> Option<(Feature, GateDecision)> {
        features
            .into_iter()
            .map(|feature| (feature, self.check_feature(feature, tier)))
            .find(|(_, decision)| !decision.allowed)
    }

    pub fn check_circle_of_competence(&self, selected: &[String], tier: SubscriptionTier) -> bool {
        tier.is_premium() || selected.len() <= FREE_COMPETENCE_LIMIT
    }

    pub async fn check_analysis_permission(
        &self,
        quotas: &QuotaService,
        email: &str,
        now: DateTime<Utc>,
    ) -> PaywallResult<QuotaDecision> {
        quotas.check_analysis_quota(email, now).await
    }

    pub async fn check_ai_access(
        &self,
        quotas: &QuotaService,
        email: &str,
        now: DateTime<Utc>,
    ) -> PaywallResult<QuotaDecision> {
        quotas.check_ai_quota(email, now).await
    }
}
