//! The combined analysis behind the illustrative Buffett score.

use crate::earnings::{
    DEFAULT_RETAINED_TAX_RATE, FinancialRow, Investee, look_through_earnings,
    maintenance_capex_greenwald, maintenance_capex_simple, owner_earnings,
};
use crate::error::{ValuationError, ValuationResult};
use crate::risk::{
    AltmanInputs, AltmanZ, PreservationWeights, TRADING_DAYS, altman_z, annualized_vol,
    capital_preservation_score, max_drawdown, pct_returns,
};
use crate::screen::{
    CompetenceFilter, SentimentInputs, circle_of_competence_pass, contrarian_overlay,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Years the latest row stands in for when Greenwald has no history.
const PROXY_YEARS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceMethod {
    #[default]
    Simple,
    Greenwald,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub working_capital: f64,
    pub retained_earnings: f64,
    pub ebit: f64,
    pub equity_market_value: f64,
    pub total_assets: f64,
    pub total_liabilities: f64,
    #[serde(default)]
    pub manufacturing: bool,
    #[serde(default = "default_public")]
    pub public: bool,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub competence: CompetenceFilter,
    /// Latest fiscal year or TTM.
    pub financials: FinancialRow,
    /// Earlier years, oldest first; only read by the Greenwald method.
    #[serde(default)]
    pub history: Vec<FinancialRow>,
    #[serde(default)]
    pub maintenance_method: MaintenanceMethod,
    pub balance_sheet: BalanceSheet,
    #[serde(default)]
    pub investees: Vec<Investee>,
    /// Daily closes, oldest first.
    #[serde(default)]
    pub prices: Vec<f64>,
    #[serde(default)]
    pub sentiment: Option<SentimentInputs>,
    #[serde(default)]
    pub weights: PreservationWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationReport {
    pub inside_circle: bool,
    pub maintenance_capex: f64,
    pub owner_earnings: f64,
    pub look_through_earnings: f64,
    pub altman: AltmanZ,
    pub max_drawdown: Option<f64>,
    pub volatility: Option<f64>,
    pub capital_preservation: f64,
    pub contrarian_multiplier: f64,
    /// Owner earnings over sales, clamped to -1..1.
    pub owner_earnings_ratio: f64,
    /// 0..100.
    pub buffett_score: f64,
}

/// Run every heuristic over `input` and blend them into the Buffett score:
/// 35% circle of competence, 25% owner earnings ratio, 30% capital
/// preservation and 10% look-through ratio, scaled by the contrarian
/// multiplier and clamped to 0..100.
pub fn analyze(input: &AnalysisInput) -> ValuationResult<ValuationReport> {
    if let Some(index) = input
        .prices
        .iter()
        .position(|price| !price.is_finite() || *price <= 0.0)
    {
        return Err(ValuationError::InvalidPrice(index));
    }

    let row = &input.financials;
    let inside_circle =
        circle_of_competence_pass(&input.sector, &input.industry, &input.competence);

    let maintenance_capex = match input.maintenance_method {
        MaintenanceMethod::Simple => maintenance_capex_simple(row.depreciation_amortization),
        MaintenanceMethod::Greenwald => {
            let series = if input.history.is_empty() {
                vec![row.clone(); PROXY_YEARS]
            } else {
                input.history.iter().chain([row]).cloned().collect()
            };
            maintenance_capex_greenwald(&series)?
        }
    };
    let owner = owner_earnings(row, maintenance_capex);

    let balance = &input.balance_sheet;
    let look_through =
        look_through_earnings(balance.ebit, &input.investees, DEFAULT_RETAINED_TAX_RATE);

    let sales = row.sales.unwrap_or(0.0);
    let altman = altman_z(&AltmanInputs {
        manufacturing: balance.manufacturing,
        public: balance.public,
        working_capital: balance.working_capital,
        retained_earnings: balance.retained_earnings,
        ebit: balance.ebit,
        equity_market_value: balance.equity_market_value,
        total_assets: balance.total_assets,
        sales,
        total_liabilities: balance.total_liabilities,
    });

    let drawdown = max_drawdown(&input.prices);
    let volatility = annualized_vol(&pct_returns(&input.prices), TRADING_DAYS);
    let capital_preservation =
        capital_preservation_score(&altman, drawdown, volatility, input.weights);

    let contrarian_multiplier = input.sentiment.as_ref().map_or(1.0, contrarian_overlay);

    let owner_earnings_ratio = if sales > 0.0 {
        (owner / sales).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let look_through_ratio = (look_through / sales.max(1e-9)).clamp(-1.0, 1.0);

    let circle = if inside_circle { 1.0 } else { 0.0 };
    let base = 0.35 * circle
        + 0.25 * ((owner_earnings_ratio + 1.0) / 2.0)
        + 0.30 * capital_preservation
        + 0.10 * ((look_through_ratio + 1.0) / 2.0);
    let buffett_score = (base * 100.0 * contrarian_multiplier).clamp(0.0, 100.0);

    debug!(
        "Analysis: owner earnings {:.0}, Z {:.2} ({}), score {:.1}",
        owner, altman.score, altman.zone, buffett_score
    );

    Ok(ValuationReport {
        inside_circle,
        maintenance_capex,
        owner_earnings: owner,
        look_through_earnings: look_through,
        altman,
        max_drawdown: drawdown,
        volatility,
        capital_preservation,
        contrarian_multiplier,
        owner_earnings_ratio,
        buffett_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::ZZone;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    /// The KO defaults from the analyzer's input form.
    fn coca_cola() -> AnalysisInput {
        serde_json::from_value(serde_json::json!({
            "sector": "Consumer Staples",
            "industry": "Beverages - Non-Alcoholic",
            "financials": {
                "net_income": 9500.0,
                "depreciation_amortization": 1800.0,
                "capex_total": 1500.0,
                "sales": 44000.0,
                "ppe_net": 10000.0
            },
            "balance_sheet": {
                "working_capital": 6000.0,
                "retained_earnings": 38000.0,
                "ebit": 12000.0,
                "equity_market_value": 260000.0,
                "total_assets": 95000.0,
                "total_liabilities": 52000.0
            },
            "investees": [
                {"name": "BottlerCo", "ownership_pct": 0.25, "net_income": 800, "dividends_received": 300}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_default_inputs() {
        let report = analyze(&coca_cola()).unwrap();

        assert!(report.inside_circle);
        assert_eq!(report.maintenance_capex, 1800.0);
        assert_eq!(report.owner_earnings, 9500.0);
        assert!(close(report.look_through_earnings, 12098.75));
        assert_eq!(report.altman.zone, ZZone::Safe);
        assert_eq!(report.max_drawdown, None);
        assert_eq!(report.volatility, None);
        assert!(close(report.capital_preservation, 0.79));
        assert_eq!(report.contrarian_multiplier, 1.0);
        assert!(close(report.buffett_score, 80.27372159090909));
    }

    #[test]
    fn test_prices_and_sentiment() {
        let mut input = coca_cola();
        input.prices = vec![100.0, 120.0, 90.0, 130.0, 65.0];
        input.sentiment = Some(SentimentInputs {
            fear_greed_index: Some(20.0),
            ..SentimentInputs::default()
        });

        let report = analyze(&input).unwrap();
        assert!(close(report.max_drawdown.unwrap(), 0.5));
        assert!(report.volatility.unwrap() > 0.8);
        assert!(close(report.capital_preservation, 0.69));
        assert!(close(report.contrarian_multiplier, 1.05));
        assert!(close(report.buffett_score, 81.13740767045455));
    }

    #[test]
    fn test_greenwald_without_history_uses_latest_year() {
        let mut input = coca_cola();
        input.maintenance_method = MaintenanceMethod::Greenwald;

        let report = analyze(&input).unwrap();
        assert_eq!(report.maintenance_capex, 1500.0);
        assert_eq!(report.owner_earnings, 9800.0);
    }

    #[test]
    fn test_greenwald_with_history() {
        let mut input = coca_cola();
        input.maintenance_method = MaintenanceMethod::Greenwald;
        input.history = vec![
            FinancialRow::new(9000.0, 1700.0, 1400.0)
                .with_sales(40000.0)
                .with_ppe(9000.0),
        ];

        let report = analyze(&input).unwrap();
        assert!(close(report.maintenance_capex, 595.238095238));
    }

    #[test]
    fn test_outside_circle_costs_a_third() {
        let mut input = coca_cola();
        input.competence.whitelist = vec!["Energy".to_string()];

        let report = analyze(&input).unwrap();
        assert!(!report.inside_circle);
        assert!(close(report.buffett_score, 80.27372159090909 - 35.0));
    }

    #[test]
    fn test_missing_sales() {
        let mut input = coca_cola();
        input.financials.sales = None;

        let report = analyze(&input).unwrap();
        assert_eq!(report.owner_earnings_ratio, 0.0);
        assert!((0.0..=100.0).contains(&report.buffett_score));
    }

    #[test]
    fn test_invalid_prices_are_rejected() {
        let mut input = coca_cola();
        input.prices = vec![10.0, 0.0, 12.0];
        assert_eq!(analyze(&input), Err(ValuationError::InvalidPrice(1)));
    }
}
