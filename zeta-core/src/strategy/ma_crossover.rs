//! Moving average crossover — long while the fast SMA is above the slow SMA.
//!
//! Emits LONG when the fast average closes above the slow one and EXIT when
//! it falls back below. No signal until `slow` bars are available.

use std::collections::BTreeSet;

use super::{Strategy, StrategyError};
use crate::domain::Bar;
use crate::event::{MarketEvent, SignalDirection, SignalEvent};
use crate::price::PriceHandler;
use crate::sizing::SizingPolicy;

#[derive(Debug, Clone)]
pub struct MaCrossover {
    fast: usize,
    slow: usize,
    strength: f64,
    sizing: SizingPolicy,
    invested: BTreeSet<String>,
}

impl MaCrossover {
    pub fn new(fast: usize, slow: usize, strength: f64, sizing: SizingPolicy) -> Result<Self, StrategyError> {
        if fast == 0 || slow <= fast {
            return Err(StrategyError::InvalidParameters(format!(
                "need 0 < fast < slow, got fast={fast} slow={slow}"
            )));
        }
        Ok(Self {
            fast,
            slow,
            strength,
            sizing,
            invested: BTreeSet::new(),
        })
    }

    pub fn periods(&self) -> (usize, usize) {
        (self.fast, self.slow)
    }
}

/// Mean close of the last `n` bars; `None` if any close is missing.
fn sma(bars: &[Bar], n: usize) -> Option<f64> {
    let window = &bars[bars.len().saturating_sub(n)..];
    if window.len() < n || window.iter().any(|b| !b.close.is_finite()) {
        return None;
    }
    Some(window.iter().map(|b| b.close).sum::<f64>() / n as f64)
}

impl Strategy for MaCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn calculate_signals(
        &mut self,
        market: &MarketEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        let mut signals = Vec::new();
        for symbol in prices.symbols() {
            let bars = prices.latest_bars(symbol, self.slow)?;
            let (Some(fast), Some(slow)) = (sma(bars, self.fast), sma(bars, self.slow)) else {
                continue;
            };

            let invested = self.invested.contains(symbol);
            let direction = if fast > slow && !invested {
                self.invested.insert(symbol.clone());
                SignalDirection::Long
            } else if fast < slow && invested {
                self.invested.remove(symbol);
                SignalDirection::Exit
            } else {
                continue;
            };
            signals.push(SignalEvent {
                strategy_id: self.name().to_string(),
                symbol: symbol.clone(),
                datetime: market.datetime,
                direction,
                strength: self.strength,
                sizing: self.sizing,
            });
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventQueue};
    use crate::price::{Frequency, HistoricPriceHandler};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn prices(closes: &[f64]) -> HistoricPriceHandler {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: "AAA".into(),
                datetime: (start + chrono::Duration::days(i as i64)).and_hms_opt(0, 0, 0).unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                adj_close: close,
                volume: 1,
            })
            .collect();
        let mut map = BTreeMap::new();
        map.insert("AAA".to_string(), bars);
        HistoricPriceHandler::from_bars(&["AAA".into()], &map, Frequency::Daily).unwrap()
    }

    fn run(closes: &[f64]) -> Vec<(usize, SignalDirection)> {
        let mut prices = prices(closes);
        let mut strategy = MaCrossover::new(2, 4, 100.0, SizingPolicy::Naive).unwrap();
        let mut queue = EventQueue::new();
        let mut out = Vec::new();
        let mut bar = 0;
        while prices.continue_backtest() {
            prices.update_bars(&mut queue).unwrap();
            while let Some(event) = queue.get() {
                if let Event::Market(market) = event {
                    for signal in strategy.calculate_signals(&market, &prices).unwrap() {
                        out.push((bar, signal.direction));
                    }
                    bar += 1;
                }
            }
        }
        out
    }

    #[test]
    fn rejects_bad_periods() {
        assert!(MaCrossover::new(0, 5, 1.0, SizingPolicy::Naive).is_err());
        assert!(MaCrossover::new(5, 5, 1.0, SizingPolicy::Naive).is_err());
    }

    #[test]
    fn warmup_emits_nothing() {
        assert!(run(&[1.0, 2.0, 3.0]).is_empty());
    }

    #[test]
    fn long_then_exit_on_cross_back() {
        let signals = run(&[10.0, 10.0, 10.0, 10.0, 12.0, 13.0, 9.0, 8.0, 7.0]);
        assert_eq!(signals[0], (4, SignalDirection::Long));
        assert_eq!(signals[1].1, SignalDirection::Exit);
        assert_eq!(signals.len(), 2);
    }

    #[test]
    fn sma_needs_full_window() {
        let bars = prices(&[1.0, 2.0]).latest_bars("AAA", 2).unwrap().to_vec();
        assert!(sma(&bars, 2).is_none());
    }
}
