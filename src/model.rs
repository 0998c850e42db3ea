//! Data model and validation (C7, spec.md §3 and §4.7).
//!
//! Declarative record types with invariants enforced at construction time
//! via `validate()`, rather than free-form dynamic records — closed
//! enumerations stand in for the tagged string fields of the original
//! schema.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::RiskError;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sector {
    Technology,
    Healthcare,
    Finance,
    Consumer,
    Energy,
    #[serde(rename = "Real Estate")]
    RealEstate,
    Retail,
    Telecom,
    Entertainment,
    Automotive,
    Other,
}

impl Default for Sector {
    fn default() -> Self {
        Sector::Other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

impl Default for RiskTolerance {
    fn default() -> Self {
        RiskTolerance::Moderate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Individual,
    Joint,
    #[serde(rename = "IRA")]
    Ira,
    #[serde(rename = "Roth IRA")]
    RothIra,
    #[serde(rename = "401k")]
    FourOhOneK,
    Trust,
}

impl Default for AccountType {
    fn default() -> Self {
        AccountType::Individual
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub market_value: f64,
    pub weight: f64,
    #[serde(default)]
    pub sector: Sector,
}

impl Position {
    pub fn validate(&self) -> Result<(), RiskError> {
        if self.symbol.trim().is_empty() {
            return Err(RiskError::Validation("position symbol must not be empty".into()));
        }
        if !(self.quantity > 0.0) {
            return Err(RiskError::Validation(format!(
                "position {} quantity must be > 0, got {}",
                self.symbol, self.quantity
            )));
        }
        if !(self.price > 0.0) {
            return Err(RiskError::Validation(format!(
                "position {} price must be > 0, got {}",
                self.symbol, self.price
            )));
        }
        if !(self.market_value > 0.0) {
            return Err(RiskError::Validation(format!(
                "position {} market_value must be > 0, got {}",
                self.symbol, self.market_value
            )));
        }
        let expected = self.quantity * self.price;
        if (self.market_value - expected).abs() > 0.01 {
            return Err(RiskError::Validation(format!(
                "position {} market_value {} does not match quantity*price {}",
                self.symbol, self.market_value, expected
            )));
        }
        if !(0.0..=100.0).contains(&self.weight) {
            return Err(RiskError::Validation(format!(
                "position {} weight {} out of [0,100]",
                self.symbol, self.weight
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub advisor_id: String,
    pub client_id: String,
    pub positions: Vec<Position>,
    pub total_value: f64,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
    #[serde(default)]
    pub account_type: AccountType,
}

impl Portfolio {
    pub fn validate(&self) -> Result<(), RiskError> {
        if self.id.trim().is_empty() {
            return Err(RiskError::Validation("portfolio id must not be empty".into()));
        }
        if self.advisor_id.trim().is_empty() {
            return Err(RiskError::Validation("advisor_id must not be empty".into()));
        }
        if self.client_id.trim().is_empty() {
            return Err(RiskError::Validation("client_id must not be empty".into()));
        }
        if self.positions.is_empty() {
            return Err(RiskError::Validation("portfolio must have at least one position".into()));
        }
        for position in &self.positions {
            position.validate()?;
        }
        if !(self.total_value > 0.0) {
            return Err(RiskError::Validation(format!(
                "total_value must be > 0, got {}",
                self.total_value
            )));
        }
        let expected_total: f64 = self.positions.iter().map(|p| p.market_value).sum();
        if (self.total_value - expected_total).abs() > 0.01 {
            return Err(RiskError::Validation(format!(
                "total_value {} does not match sum of positions {}",
                self.total_value, expected_total
            )));
        }
        let total_weight: f64 = self.positions.iter().map(|p| p.weight).sum();
        if (total_weight - 100.0).abs() > 0.1 {
            return Err(RiskError::Validation(format!(
                "position weights sum to {}, expected ~100",
                total_weight
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SecurityCharacteristics {
    pub volatility: f64,
    pub expected_return: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskResult {
    pub portfolio_id: String,
    pub advisor_id: String,
    pub risk_number: i32,
    pub var_95: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub downside_percentage: f64,
    pub portfolio_beta: f64,
    pub downside_capture: f64,
    pub calculation_time_ms: f64,
    pub timestamp: f64,
}

/// Request body for `POST /portfolio/update` — a thin wrapper so the API
/// surface can grow optional flags without touching `Portfolio` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioUpdate {
    pub portfolio: Portfolio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    pub uptime_seconds: f64,
    pub total_calculations: u64,
    pub avg_calculation_time_ms: f64,
    pub cache_connected: bool,
    pub bus_connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub portfolio_id: String,
    pub last_update: f64,
    pub current_risk_number: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_portfolios: usize,
    pub avg_risk_number: f64,
    pub total_value_at_risk: f64,
    pub high_risk_count: usize,
    pub risk_distribution: RiskDistribution,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub low: usize,
    pub moderate: usize,
    pub high: usize,
}
