//! Owner earnings and look-through earnings.

use crate::error::{ValuationError, ValuationResult};
use serde::{Deserialize, Serialize};

/// Tax assumed on investees' retained earnings.
pub const DEFAULT_RETAINED_TAX_RATE: f64 = 0.21;

const EPS: f64 = 1e-9;

/// One fiscal year (or TTM) of the figures owner earnings needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRow {
    pub net_income: f64,
    pub depreciation_amortization: f64,
    pub capex_total: f64,
    #[serde(default)]
    pub sales: Option<f64>,
    #[serde(default)]
    pub ppe_net: Option<f64>,
    #[serde(default)]
    pub other_non_cash: f64,
    #[serde(default)]
    pub delta_working_capital: f64,
}

impl FinancialRow {
    pub fn new(net_income: f64, depreciation_amortization: f64, capex_total: f64) -> Self {
        Self {
            net_income,
            depreciation_amortization,
            capex_total,
            sales: None,
            ppe_net: None,
            other_non_cash: 0.0,
            delta_working_capital: 0.0,
        }
    }

    pub fn with_sales(mut self, sales: f64) -> Self {
        self.sales = Some(sales);
        self
    }

    pub fn with_ppe(mut self, ppe_net: f64) -> Self {
        self.ppe_net = Some(ppe_net);
        self
    }
}

/// Maintenance capex approximated by depreciation and amortization.
pub fn maintenance_capex_simple(depreciation_amortization: f64) -> f64 {
    depreciation_amortization.max(0.0)
}

/// Greenwald's estimate: total capex less growth capex, where growth capex is
/// the average PP&E/sales ratio times the latest sales increase.
///
/// `history` runs oldest first. With fewer than two years carrying sales and
/// PP&E it falls back to [`maintenance_capex_simple`] on the latest year.
pub fn maintenance_capex_greenwald(history: &[FinancialRow]) -> ValuationResult<f64> {
    let [.., previous, latest] = history else {
        return history
            .last()
            .map(|row| maintenance_capex_simple(row.depreciation_amortization))
            .ok_or(ValuationError::EmptyHistory);
    };

    let sales: Vec<f64> = history.iter().filter_map(|row| row.sales).collect();
    let ppe: Vec<f64> = history.iter().filter_map(|row| row.ppe_net).collect();
    if sales.len() < 2 || ppe.len() < 2 {
        return Ok(maintenance_capex_simple(latest.depreciation_amortization));
    }

    let avg_ratio = ppe.iter().sum::<f64>() / sales.iter().sum::<f64>().max(EPS);
    let sales_growth = latest.sales.unwrap_or(0.0) - previous.sales.unwrap_or(0.0);
    let growth_capex = (avg_ratio * sales_growth.max(0.0)).max(0.0);
    Ok((latest.capex_total - growth_capex).max(0.0))
}

/// Net income + D&A + other non-cash charges - maintenance capex.
pub fn owner_earnings(row: &FinancialRow, maintenance_capex: f64) -> f64 {
    row.net_income + row.depreciation_amortization + row.other_non_cash
        - maintenance_capex.max(0.0)
}

/// A holding whose retained earnings count toward look-through earnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investee {
    pub name: String,
    /// Fraction owned, 0..1.
    pub ownership_pct: f64,
    pub net_income: f64,
    #[serde(default)]
    pub dividends_received: f64,
}

/// Operating earnings plus each investee's share of retained earnings, after
/// the tax that would be due if they were distributed.
pub fn look_through_earnings(
    operating_earnings: f64,
    investees: &[Investee],
    tax_rate_on_retained: f64,
) -> f64 {
    investees.iter().fold(operating_earnings, |total, investee| {
        let retained = (investee.net_income - investee.dividends_received).max(0.0);
        total + investee.ownership_pct * retained * (1.0 - tax_rate_on_retained)
    })
}
