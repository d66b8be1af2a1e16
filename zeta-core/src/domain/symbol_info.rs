//! SymbolInfo — contract metadata for leveraged instruments.

use serde::{Deserialize, Serialize};

/// Tolerance added before flooring so that `0.3 / 0.1` rounds to 3 lots, not 2.
const LOT_EPSILON: f64 = 1e-9;

/// Round `quantity` down to a whole multiple of `lot`.
///
/// Non-positive or non-finite lots fall back to whole units.
pub fn round_down_to_lot(quantity: f64, lot: f64) -> f64 {
    if !quantity.is_finite() {
        return 0.0;
    }
    let lot = if lot.is_finite() && lot > 0.0 { lot } else { 1.0 };
    let lots = (quantity.abs() / lot + LOT_EPSILON).floor();
    (lots * lot).copysign(quantity)
}

/// Per-symbol contract specification, as published by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Units of the underlying per contract.
    pub contract_size: f64,
    pub tick_size: f64,
    pub tick_value: f64,
    pub leverage: f64,
    /// Smallest tradable volume; volumes are multiples of this.
    pub lot_min: f64,
    /// Quote is denominated as units of base per account currency.
    #[serde(default)]
    pub inverse_quote: bool,
}

impl SymbolInfo {
    /// Returns a description of the first field that makes this unusable.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.contract_size.is_finite() && self.contract_size > 0.0) {
            return Err(format!("contract_size must be positive, got {}", self.contract_size));
        }
        if !(self.leverage.is_finite() && self.leverage > 0.0) {
            return Err(format!("leverage must be positive, got {}", self.leverage));
        }
        if !(self.lot_min.is_finite() && self.lot_min > 0.0) {
            return Err(format!("lot_min must be positive, got {}", self.lot_min));
        }
        if !(self.tick_size.is_finite() && self.tick_size > 0.0) {
            return Err(format!("tick_size must be positive, got {}", self.tick_size));
        }
        Ok(())
    }

    /// Price in account-currency terms.
    pub fn effective_price(&self, price: f64) -> f64 {
        if self.inverse_quote {
            1.0 / price
        } else {
            price
        }
    }

    /// Signed notional of `volume` contracts at `price`.
    pub fn notional(&self, price: f64, volume: f64) -> f64 {
        self.contract_size * self.effective_price(price) * volume
    }

    /// Margin required to hold `volume` contracts at `price`.
    pub fn margin(&self, price: f64, volume: f64) -> f64 {
        (self.notional(price, volume) / self.leverage).abs()
    }

    pub fn round_down(&self, volume: f64) -> f64 {
        round_down_to_lot(volume, self.lot_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> SymbolInfo {
        SymbolInfo {
            contract_size: 100_000.0,
            tick_size: 0.00001,
            tick_value: 1.0,
            leverage: 30.0,
            lot_min: 0.01,
            inverse_quote: false,
        }
    }

    #[test]
    fn round_down_whole_lots() {
        assert_eq!(round_down_to_lot(57.9, 1.0), 57.0);
        assert_eq!(round_down_to_lot(57.9, 10.0), 50.0);
        assert_eq!(round_down_to_lot(-57.9, 10.0), -50.0);
    }

    #[test]
    fn round_down_survives_float_noise() {
        let rounded = round_down_to_lot(0.3, 0.1);
        assert!((rounded - 0.3).abs() < 1e-12);
    }

    #[test]
    fn round_down_bad_lot_falls_back_to_units() {
        assert_eq!(round_down_to_lot(7.6, 0.0), 7.0);
        assert_eq!(round_down_to_lot(f64::NAN, 1.0), 0.0);
    }

    #[test]
    fn margin_uses_contract_size_and_leverage() {
        let info = sample_info();
        let margin = info.margin(1.1, 0.5);
        assert!((margin - 100_000.0 * 1.1 * 0.5 / 30.0).abs() < 1e-9);
        assert!((info.margin(1.1, -0.5) - margin).abs() < 1e-12);
    }

    #[test]
    fn inverse_quote_inverts_price() {
        let info = SymbolInfo { inverse_quote: true, ..sample_info() };
        assert!((info.notional(2.0, 1.0) - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_zero_leverage() {
        let info = SymbolInfo { leverage: 0.0, ..sample_info() };
        assert!(info.validate().is_err());
        assert!(sample_info().validate().is_ok());
    }
}
