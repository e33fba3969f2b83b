//! Annual discount curve feeding the commutation recurrences
//!
//! Commutation functions discount by whole policy years: survivors at the
//! start of year `t` use `v^t`, death benefits paid at the end of that year
//! use `v^(t+1)`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountCurve {
    /// Annual valuation interest rate
    pub valuation_rate: f64,

    /// Optional separate rate for death benefits; falls back to
    /// `valuation_rate`
    pub death_benefit_rate: Option<f64>,
}

impl DiscountCurve {
    pub fn single_rate(annual_rate: f64) -> Self {
        Self {
            valuation_rate: annual_rate,
            death_benefit_rate: None,
        }
    }

    pub fn with_death_benefit_rate(valuation_rate: f64, death_benefit_rate: f64) -> Self {
        Self {
            valuation_rate,
            death_benefit_rate: Some(death_benefit_rate),
        }
    }

    /// Annual discount factor `v = 1 / (1 + i)` for survivors and premiums
    pub fn annual_factor(&self) -> f64 {
        1.0 / (1.0 + self.valuation_rate)
    }

    /// Annual discount factor for death benefits
    pub fn death_benefit_factor(&self) -> f64 {
        1.0 / (1.0 + self.death_benefit_rate.unwrap_or(self.valuation_rate))
    }

    /// `v^t`, discounting to the start of policy year `t`
    pub fn v0(&self, t: u32) -> f64 {
        self.annual_factor().powi(t as i32)
    }

    /// `v^(t+1)`, discounting a benefit paid at the end of policy year `t`
    pub fn v1(&self, t: u32) -> f64 {
        self.death_benefit_factor().powi(t as i32 + 1)
    }
}

impl Default for DiscountCurve {
    fn default() -> Self {
        Self::single_rate(0.0475)
    }
}
