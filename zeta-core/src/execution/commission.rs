//! Commission schedules applied by the simulated exchange.

use serde::{Deserialize, Serialize};

/// Commission charged per fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionModel {
    /// Flat amount per fill.
    PerTrade { amount: f64 },
    /// Amount per unit traded.
    PerShare { amount: f64 },
    /// Percent of traded value.
    Percentage { percent: f64 },
    /// Interactive Brokers US fixed-rate tiers.
    InteractiveBrokers,
    #[default]
    None,
}

impl CommissionModel {
    pub fn compute(&self, quantity: f64, price: f64) -> f64 {
        let quantity = quantity.abs();
        match *self {
            Self::PerTrade { amount } => amount,
            Self::PerShare { amount } => amount * quantity,
            Self::Percentage { percent } => (price * quantity).abs() * percent / 100.0,
            Self::InteractiveBrokers => {
                let per_share = if quantity <= 500.0 { 0.013 } else { 0.008 };
                (per_share * quantity).max(1.3)
            }
            Self::None => 0.0,
        }
    }
}
