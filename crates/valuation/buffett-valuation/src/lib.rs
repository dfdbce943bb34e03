//! Buffett-style valuation heuristics.
//!
//! Pure computation over caller-supplied fundamentals and prices:
//! - owner earnings (1986 letter) with a simple or Greenwald maintenance
//!   capex estimate, and look-through earnings (1991 letter)
//! - Altman Z / Z'' bankruptcy risk, max drawdown and annualized volatility,
//!   blended into a capital preservation score
//! - a circle-of-competence screen and a contrarian sentiment multiplier
//! - [`analyze`], which combines all of the above into an illustrative
//!   0..100 score
//!
//! Nothing here fetches data or knows about subscription tiers.

mod earnings;
mod error;
mod risk;
mod score;
mod screen;

pub use earnings::{
    DEFAULT_RETAINED_TAX_RATE, FinancialRow, Investee, look_through_earnings,
    maintenance_capex_greenwald, maintenance_capex_simple, owner_earnings,
};
pub use error::{ValuationError, ValuationResult};
pub use risk::{
    AltmanInputs, AltmanZ, PreservationWeights, TRADING_DAYS, ZZone, altman_z,
    annualized_vol, capital_preservation_score, max_drawdown, pct_returns,
};
pub use score::{AnalysisInput, BalanceSheet, MaintenanceMethod, ValuationReport, analyze};
pub use screen::{
    CompetenceFilter, EXCLUDED_COMPLEXITY_FLAGS, SentimentInputs, circle_of_competence_pass,
    contrarian_overlay,
};
