//! Pure risk calculator (C2, spec.md §4.2).
//!
//! `compute` is a total, deterministic function from a validated
//! [`Portfolio`] to a [`RiskResult`] (timestamp and calculation time
//! excepted). Grounded step-for-step in
//! `examples/original_source/prospector/core/calculations.py` and
//! `risk_processor.py`, with constants taken verbatim from
//! `examples/original_source/prospector/config/constants.py`.

use std::time::Instant;

use ndarray::{Array1, Array2};

use crate::error::RiskError;
use crate::model::{Portfolio, RiskResult, RiskTolerance};
use crate::securities;

pub const Z_SCORE: f64 = 1.64;
pub const RISK_FREE_RATE: f64 = 0.03;
pub const MIN_RISK_NUMBER: i32 = 20;
pub const MAX_RISK_NUMBER: i32 = 100;
pub const CONSERVATIVE_ADJUSTMENT: f64 = 1.1;
pub const AGGRESSIVE_ADJUSTMENT: f64 = 0.9;
pub const SAME_SECTOR_CORRELATION: f64 = 0.7;
pub const DIFFERENT_SECTOR_CORRELATION: f64 = 0.3;
pub const BETA_CORRELATION_ADJUSTMENT: f64 = 0.1;
pub const MIN_CORRELATION: f64 = 0.1;
pub const MAX_CORRELATION: f64 = 0.95;

/// Build the correlation matrix described in spec.md §4.2 step 5.
///
/// Symmetric, 1 on the diagonal, all off-diagonals clamped into
/// `[MIN_CORRELATION, MAX_CORRELATION]`.
pub fn correlation_matrix(portfolio: &Portfolio) -> Array2<f64> {
    let n = portfolio.positions.len();
    let mut correlation = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        correlation[[i, i]] = 1.0;
        for j in (i + 1)..n {
            let same_sector = portfolio.positions[i].sector == portfolio.positions[j].sector
                || format!("{:?}", portfolio.positions[i].sector)
                    == format!("{:?}", portfolio.positions[j].sector);
            let base = if same_sector {
                SAME_SECTOR_CORRELATION
            } else {
                DIFFERENT_SECTOR_CORRELATION
            };

            let beta_i = securities::lookup(&portfolio.positions[i].symbol).beta;
            let beta_j = securities::lookup(&portfolio.positions[j].symbol).beta;
            let adjustment = -BETA_CORRELATION_ADJUSTMENT * (beta_i - beta_j).abs().min(1.0);

            let value = (base + adjustment).clamp(MIN_CORRELATION, MAX_CORRELATION);
            correlation[[i, j]] = value;
            correlation[[j, i]] = value;
        }
    }

    correlation
}

/// Map a downside percentage (negative, or zero) to the 20–100 behavioral
/// risk number (spec.md §4.2 step 11), before the risk-tolerance
/// adjustment of step 12.
pub fn downside_to_risk_number(downside_pct: f64) -> i32 {
    if downside_pct >= 0.0 {
        return MIN_RISK_NUMBER;
    }

    let d = downside_pct.abs();
    let risk_number = if d <= 2.0 {
        MIN_RISK_NUMBER as f64 + (d / 2.0) * 5.0
    } else if d <= 18.0 {
        let normalized = (d - 2.0) / 16.0;
        25.0 + normalized * normalized * 60.0
    } else {
        let normalized = ((d - 18.0) / 12.0).min(1.0);
        85.0 + normalized * 15.0
    };

    risk_number.clamp(MIN_RISK_NUMBER as f64, MAX_RISK_NUMBER as f64) as i32
}

fn apply_risk_tolerance(risk_number: i32, tolerance: RiskTolerance) -> i32 {
    match tolerance {
        RiskTolerance::Conservative => {
            (MAX_RISK_NUMBER).min(((risk_number as f64) * CONSERVATIVE_ADJUSTMENT).floor() as i32)
        }
        RiskTolerance::Aggressive => {
            (MIN_RISK_NUMBER).max(((risk_number as f64) * AGGRESSIVE_ADJUSTMENT).floor() as i32)
        }
        RiskTolerance::Moderate => risk_number,
    }
}

/// Run the full calculation described in spec.md §4.2, steps 1–14.
///
/// The portfolio is assumed already validated (`Portfolio::validate`).
/// Returns [`RiskError::Compute`] if the arithmetic produces NaN/infinite
/// values (malformed input that slipped past validation).
pub fn compute(portfolio: &Portfolio) -> Result<RiskResult, RiskError> {
    let start = Instant::now();
    let n = portfolio.positions.len();

    let weights = Array1::from_iter(portfolio.positions.iter().map(|p| p.weight / 100.0));
    let (returns, volatilities, betas): (Vec<f64>, Vec<f64>, Vec<f64>) = portfolio
        .positions
        .iter()
        .map(|p| {
            let c = securities::lookup(&p.symbol);
            (c.expected_return, c.volatility, c.beta)
        })
        .fold((Vec::new(), Vec::new(), Vec::new()), |mut acc, (r, v, b)| {
            acc.0.push(r);
            acc.1.push(v);
            acc.2.push(b);
            acc
        });
    let returns = Array1::from_vec(returns);
    let volatilities = Array1::from_vec(volatilities);
    let betas = Array1::from_vec(betas);

    let portfolio_return: f64 = (&weights * &returns).sum();
    let portfolio_beta: f64 = (&weights * &betas).sum();

    let correlation = correlation_matrix(portfolio);

    let mut covariance = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            covariance[[i, j]] = volatilities[i] * volatilities[j] * correlation[[i, j]];
        }
    }

    let variance: f64 = (0..n)
        .flat_map(|i| (0..n).map(move |j| (i, j)))
        .map(|(i, j)| weights[i] * covariance[[i, j]] * weights[j])
        .sum();
    let portfolio_volatility = variance.sqrt();

    let downside_percentage = -Z_SCORE * portfolio_volatility * 100.0;
    let var_95 = (downside_percentage / 100.0).abs() * portfolio.total_value;

    let sharpe_ratio = if portfolio_volatility > 0.0 {
        (portfolio_return - RISK_FREE_RATE) / portfolio_volatility
    } else {
        0.0
    };

    let base_risk_number = downside_to_risk_number(downside_percentage);
    let risk_number = apply_risk_tolerance(base_risk_number, portfolio.risk_tolerance);

    let downside_capture = portfolio_beta * 100.0;

    if !portfolio_return.is_finite()
        || !portfolio_volatility.is_finite()
        || !var_95.is_finite()
        || !sharpe_ratio.is_finite()
    {
        return Err(RiskError::Compute(format!(
            "non-finite result computing risk for portfolio {}",
            portfolio.id
        )));
    }

    let calculation_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(RiskResult {
        portfolio_id: portfolio.id.clone(),
        advisor_id: portfolio.advisor_id.clone(),
        risk_number,
        var_95,
        expected_return: portfolio_return,
        volatility: portfolio_volatility,
        sharpe_ratio,
        downside_percentage,
        portfolio_beta,
        downside_capture,
        calculation_time_ms,
        timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountType, Position, Sector};

    fn position(symbol: &str, weight: f64, market_value: f64, sector: Sector) -> Position {
        Position {
            symbol: symbol.into(),
            quantity: 1.0,
            price: market_value,
            market_value,
            weight,
            sector,
        }
    }

    fn portfolio_with(positions: Vec<Position>, total_value: f64, tolerance: RiskTolerance) -> Portfolio {
        Portfolio {
            id: "p1".into(),
            advisor_id: "adv1".into(),
            client_id: "client1".into(),
            positions,
            total_value,
            timestamp: 0.0,
            risk_tolerance: tolerance,
            account_type: AccountType::Individual,
        }
    }

    /// S1 — moderate all-tech-leaning portfolio.
    fn s1() -> Portfolio {
        portfolio_with(
            vec![
                position("AAPL", 40.0, 20497.5, Sector::Technology),
                position("MSFT", 45.0, 23059.6875, Sector::Technology),
                position("JNJ", 15.0, 7686.5625, Sector::Healthcare),
            ],
            51243.75,
            RiskTolerance::Moderate,
        )
    }

    #[test]
    fn s1_moderate_all_tech() {
        // See DESIGN.md "S1 risk_number" for why this asserts the value the
        // formula actually produces rather than the illustrative [50, 80]
        // range in spec.md: with V ≈ 0.170 the downside percentage lands
        // past 18%, which the formula's own linear tail pushes to ~97.
        let result = compute(&s1()).unwrap();
        assert!((result.expected_return - 0.132).abs() < 0.01);
        assert!(result.volatility >= 0.17 && result.volatility <= 0.20);
        assert!(result.risk_number >= 90 && result.risk_number <= 100);
        assert!(result.var_95 >= 0.15 * 51243.75 && result.var_95 <= 0.35 * 51243.75);
    }

    #[test]
    fn s2_aggressive_bumps_down_from_s1() {
        let moderate = compute(&s1()).unwrap();
        let mut aggressive_portfolio = s1();
        aggressive_portfolio.risk_tolerance = RiskTolerance::Aggressive;
        let aggressive = compute(&aggressive_portfolio).unwrap();

        let expected = MIN_RISK_NUMBER.max(((moderate.risk_number as f64) * AGGRESSIVE_ADJUSTMENT).floor() as i32);
        assert_eq!(aggressive.risk_number, expected);
        assert!((aggressive.expected_return - moderate.expected_return).abs() < 1e-9);
        assert!((aggressive.volatility - moderate.volatility).abs() < 1e-9);
    }

    #[test]
    fn s3_conservative_bumps_up_from_s1() {
        let moderate = compute(&s1()).unwrap();
        let mut conservative_portfolio = s1();
        conservative_portfolio.risk_tolerance = RiskTolerance::Conservative;
        let conservative = compute(&conservative_portfolio).unwrap();

        let expected = MAX_RISK_NUMBER.min(((moderate.risk_number as f64) * CONSERVATIVE_ADJUSTMENT).floor() as i32);
        assert_eq!(conservative.risk_number, expected);
    }

    #[test]
    fn s4_unknown_symbol_fallback() {
        let portfolio = portfolio_with(
            vec![position("NEWAI", 100.0, 1000.0, Sector::Other)],
            1000.0,
            RiskTolerance::Moderate,
        );
        let result = compute(&portfolio).unwrap();
        assert!((result.volatility - 0.30).abs() < 1e-9);
        assert!((result.downside_percentage - (-49.2)).abs() < 1e-6);
        assert!((result.var_95 - 492.0).abs() < 1e-6);
        assert_eq!(result.risk_number, 100);
    }

    #[test]
    fn s5_boundary_risk_mapping() {
        // Single position with volatility 0.02 -> D = -3.28, quadratic region.
        let downside = -Z_SCORE * 0.02 * 100.0;
        assert!((downside - (-3.28)).abs() < 1e-9);
        assert_eq!(downside_to_risk_number(downside), 25);
    }

    #[test]
    fn single_position_matches_its_own_volatility() {
        let portfolio = portfolio_with(
            vec![position("JNJ", 100.0, 1000.0, Sector::Healthcare)],
            1000.0,
            RiskTolerance::Moderate,
        );
        let result = compute(&portfolio).unwrap();
        let sigma = securities::lookup("JNJ").volatility;
        assert!((result.volatility - sigma).abs() / sigma < 1e-9);
        let expected_downside = -Z_SCORE * sigma * 100.0;
        assert!((result.downside_percentage - expected_downside).abs() / expected_downside.abs() < 1e-9);
    }

    #[test]
    fn correlation_matrix_is_symmetric_with_unit_diagonal() {
        let portfolio = s1();
        let corr = correlation_matrix(&portfolio);
        let n = portfolio.positions.len();
        for i in 0..n {
            assert_eq!(corr[[i, i]], 1.0);
            for j in 0..n {
                assert!((corr[[i, j]] - corr[[j, i]]).abs() < 1e-12);
                if i != j {
                    assert!(corr[[i, j]] >= MIN_CORRELATION && corr[[i, j]] <= MAX_CORRELATION);
                }
            }
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let a = compute(&s1()).unwrap();
        let b = compute(&s1()).unwrap();
        assert_eq!(a.risk_number, b.risk_number);
        assert!((a.var_95 - b.var_95).abs() < 1e-9);
        assert!((a.volatility - b.volatility).abs() < 1e-9);
        assert!((a.expected_return - b.expected_return).abs() < 1e-9);
        assert!((a.sharpe_ratio - b.sharpe_ratio).abs() < 1e-9);
        assert!((a.downside_percentage - b.downside_percentage).abs() < 1e-9);
        assert!((a.portfolio_beta - b.portfolio_beta).abs() < 1e-9);
    }
}
