//! Circle of competence and contrarian sentiment.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Business models excluded regardless of sector.
pub const EXCLUDED_COMPLEXITY_FLAGS: [&str; 4] =
    ["pre-revenue", "binary-fda", "exploration-only", "crypto-miner"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetenceFilter {
    /// Sectors or industries the investor understands. Empty means any.
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub complexity_flags: Vec<String>,
}

fn normalized(items: &[String]) -> HashSet<String> {
    items.iter().map(|item| item.trim().to_lowercase()).collect()
}

/// Whether a business with `sector` and `industry` sits inside the circle.
/// Matching ignores case and surrounding whitespace.
pub fn circle_of_competence_pass(sector: &str, industry: &str, filter: &CompetenceFilter) -> bool {
    let sector = sector.trim().to_lowercase();
    let industry = industry.trim().to_lowercase();
    let whitelist = normalized(&filter.whitelist);
    let blacklist = normalized(&filter.blacklist);
    let flags = normalized(&filter.complexity_flags);

    if blacklist.contains(&sector) || blacklist.contains(&industry) {
        return false;
    }
    if !whitelist.is_empty() && !whitelist.contains(&sector) && !whitelist.contains(&industry) {
        return false;
    }
    !EXCLUDED_COMPLEXITY_FLAGS
        .iter()
        .any(|flag| flags.contains(*flag))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentInputs {
    /// 0..100, low is fearful.
    pub fear_greed_index: Option<f64>,
    /// Fraction of float sold short.
    pub short_interest_pct_of_float: Option<f64>,
    /// -1..1.
    pub news_sentiment: Option<f64>,
    pub put_call_ratio: Option<f64>,
}

/// Score multiplier in 0.90..=1.15 that rises when the crowd is fearful.
pub fn contrarian_overlay(inputs: &SentimentInputs) -> f64 {
    let mut boost = 1.0;
    if inputs.fear_greed_index.is_some_and(|v| v < 30.0) {
        boost += 0.05;
    }
    if inputs.short_interest_pct_of_float.is_some_and(|v| v >= 0.08) {
        boost += 0.04;
    }
    if inputs.news_sentiment.is_some_and(|v| v <= -0.3) {
        boost += 0.03;
    }
    if inputs.put_call_ratio.is_some_and(|v| v > 1.0) {
        boost += 0.03;
    }
    f64::clamp(boost, 0.90, 1.15)
}
