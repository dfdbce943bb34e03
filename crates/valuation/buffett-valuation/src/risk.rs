//! Price risk and balance-sheet distress.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const TRADING_DAYS: u32 = 252;

const EPS: f64 = 1e-9;
const DEFAULT_DRAWDOWN: f64 = 0.5;
const DEFAULT_VOLATILITY: f64 = 0.3;
const RISK_CEILING: f64 = 0.8;

/// Simple period-over-period returns.
pub fn pct_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Sample standard deviation of `returns` scaled to a year. `None` with
/// fewer than two returns.
pub fn annualized_vol(returns: &[f64], trading_days: u32) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() * f64::from(trading_days).sqrt())
}

/// Worst peak-to-trough decline as a positive fraction (0.42 is -42%).
pub fn max_drawdown(prices: &[f64]) -> Option<f64> {
    let mut peak = *prices.first()?;
    let mut worst: f64 = 0.0;
    for &price in prices {
        peak = peak.max(price);
        worst = worst.max((peak - price) / peak);
    }
    Some(worst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZZone {
    Distress,
    Gray,
    Safe,
}

impl ZZone {
    fn preservation_base(self) -> f64 {
        match self {
            ZZone::Distress => 0.2,
            ZZone::Gray => 0.6,
            ZZone::Safe => 0.9,
        }
    }
}

impl fmt::Display for ZZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ZZone::Distress => "Distress",
            ZZone::Gray => "Gray",
            ZZone::Safe => "Safe",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltmanInputs {
    pub manufacturing: bool,
    pub public: bool,
    pub working_capital: f64,
    pub retained_earnings: f64,
    pub ebit: f64,
    /// Market value of equity; book equity for private firms.
    pub equity_market_value: f64,
    pub total_assets: f64,
    pub sales: f64,
    pub total_liabilities: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltmanZ {
    pub score: f64,
    pub zone: ZZone,
}

/// Original Z for public manufacturers, the four-ratio Z'' for everyone else.
pub fn altman_z(inputs: &AltmanInputs) -> AltmanZ {
    let assets = inputs.total_assets.max(EPS);
    let x1 = inputs.working_capital / assets;
    let x2 = inputs.retained_earnings / assets;
    let x3 = inputs.ebit / assets;
    let equity = if inputs.public {
        inputs.equity_market_value
    } else {
        inputs.equity_market_value.max(EPS)
    };
    let x4 = equity / inputs.total_liabilities.max(EPS);
    let x5 = inputs.sales / assets;

    let (score, distress_below, safe_from) = if inputs.manufacturing && inputs.public {
        (1.2 * x1 + 1.4 * x2 + 3.3 * x3 + 0.6 * x4 + 1.0 * x5, 1.81, 2.99)
    } else {
        (6.56 * x1 + 3.26 * x2 + 6.72 * x3 + 1.05 * x4, 1.1, 2.6)
    };

    let zone = if score < distress_below {
        ZZone::Distress
    } else if score < safe_from {
        ZZone::Gray
    } else {
        ZZone::Safe
    };
    AltmanZ { score, zone }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreservationWeights {
    pub z: f64,
    pub drawdown: f64,
    pub volatility: f64,
}

impl Default for PreservationWeights {
    fn default() -> Self {
        Self {
            z: 0.5,
            drawdown: 0.3,
            volatility: 0.2,
        }
    }
}

/// Weighted blend of Z zone, inverse drawdown and inverse volatility in 0..1.
///
/// Missing drawdown or volatility count as 50% and 30%.
pub fn capital_preservation_score(
    altman: &AltmanZ,
    drawdown: Option<f64>,
    volatility: Option<f64>,
    weights: PreservationWeights,
) -> f64 {
    let z_norm =
        (altman.zone.preservation_base() * (1.0 + 0.05 * altman.score.max(0.0))).min(1.0);
    let drawdown = drawdown.filter(|v| v.is_finite()).unwrap_or(DEFAULT_DRAWDOWN);
    let volatility = volatility.filter(|v| v.is_finite()).unwrap_or(DEFAULT_VOLATILITY);
    let drawdown_norm = (1.0 - drawdown.min(RISK_CEILING)).max(0.0);
    let volatility_norm = (1.0 - volatility.min(RISK_CEILING)).max(0.0);

    let score =
        weights.z * z_norm + weights.drawdown * drawdown_norm + weights.volatility * volatility_norm;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn ko(manufacturing: bool) -> AltmanInputs {
        AltmanInputs {
            manufacturing,
            public: true,
            working_capital: 6000.0,
            retained_earnings: 38000.0,
            ebit: 12000.0,
            equity_market_value: 260000.0,
            total_assets: 95000.0,
            sales: 44000.0,
            total_liabilities: 52000.0,
        }
    }

    #[test]
    fn test_returns_and_volatility() {
        let returns = pct_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(returns.len(), 2);
        assert!(close(returns[0], 0.1));
        assert!(close(returns[1], -0.1));

        let vol = annualized_vol(&[0.01, -0.01, 0.01, -0.01], TRADING_DAYS).unwrap();
        assert!(close(vol, 0.18330302779823363));

        assert_eq!(annualized_vol(&[0.01], TRADING_DAYS), None);
        assert_eq!(annualized_vol(&[], TRADING_DAYS), None);
    }

    #[test]
    fn test_max_drawdown() {
        let mdd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 65.0]).unwrap();
        assert!(close(mdd, 0.5));
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), Some(0.0));
        assert_eq!(max_drawdown(&[]), None);
    }

    #[test]
    fn test_altman_z_models() {
        let services = altman_z(&ko(false));
        assert!(close(services.score, 7.817157894736842));
        assert_eq!(services.zone, ZZone::Safe);

        let manufacturer = altman_z(&ko(true));
        assert!(close(manufacturer.score, 4.51578947368421));
        assert_eq!(manufacturer.zone, ZZone::Safe);

        let distressed = altman_z(&AltmanInputs {
            working_capital: -5000.0,
            retained_earnings: -20000.0,
            ebit: -1000.0,
            equity_market_value: 5000.0,
            ..ko(false)
        });
        assert_eq!(distressed.zone, ZZone::Distress);
    }

    #[test]
    fn test_gray_zone_boundaries() {
        let inputs = AltmanInputs {
            manufacturing: false,
            public: true,
            working_capital: 0.0,
            retained_earnings: 0.0,
            ebit: 0.0,
            equity_market_value: 2.0,
            total_assets: 1.0,
            sales: 0.0,
            total_liabilities: 1.0,
        };
        // 1.05 * 2.0
        let z = altman_z(&inputs);
        assert!(close(z.score, 2.1));
        assert_eq!(z.zone, ZZone::Gray);
    }

    #[test]
    fn test_capital_preservation_defaults() {
        let z = altman_z(&ko(false));
        let score = capital_preservation_score(&z, None, None, PreservationWeights::default());
        assert!(close(score, 0.79));

        let nan = capital_preservation_score(
            &z,
            Some(f64::NAN),
            Some(f64::NAN),
            PreservationWeights::default(),
        );
        assert!(close(nan, 0.79));
    }

    #[test]
    fn test_capital_preservation_caps_risk() {
        let z = AltmanZ {
            score: 0.5,
            zone: ZZone::Distress,
        };
        let score =
            capital_preservation_score(&z, Some(0.95), Some(2.0), PreservationWeights::default());
        // 0.5 * 0.2 * 1.025 + 0.3 * 0.2 + 0.2 * 0.2
        assert!(close(score, 0.2025));

        let heavy = PreservationWeights {
            z: 5.0,
            drawdown: 5.0,
            volatility: 5.0,
        };
        assert_eq!(capital_preservation_score(&z, Some(0.0), Some(0.0), heavy), 1.0);
    }
}
