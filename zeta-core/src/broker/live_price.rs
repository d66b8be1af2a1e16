//! LivePriceHandler — polls the broker for recent bars.
//!
//! A market event is emitted only when a symbol's latest bar is newer than
//! the last one seen, so polling faster than the bar period is harmless.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::debug;

use super::{BrokerClient, Throttle};
use crate::domain::Bar;
use crate::event::{Event, EventQueue, MarketEvent};
use crate::price::{Frequency, PriceError, PriceHandler};

pub struct LivePriceHandler<C: BrokerClient> {
    client: Arc<C>,
    throttle: Throttle,
    symbols: Vec<String>,
    period_minutes: u32,
    lookback: usize,
    bars: BTreeMap<String, Vec<Bar>>,
    last_emitted: Option<NaiveDateTime>,
}

impl<C: BrokerClient> LivePriceHandler<C> {
    /// `lookback` bars are kept per symbol for strategies' windowed lookups.
    pub fn new(client: Arc<C>, symbols: Vec<String>, period_minutes: u32, lookback: usize, throttle: Throttle) -> Self {
        Self {
            client,
            throttle,
            bars: symbols.iter().map(|s| (s.clone(), Vec::new())).collect(),
            symbols,
            period_minutes,
            lookback: lookback.max(1),
            last_emitted: None,
        }
    }

    fn symbol_bars(&self, symbol: &str) -> Result<&[Bar], PriceError> {
        self.bars
            .get(symbol)
            .map(Vec::as_slice)
            .ok_or_else(|| PriceError::UnknownSymbol { symbol: symbol.to_string() })
    }
}

impl<C: BrokerClient> PriceHandler for LivePriceHandler<C> {
    fn name(&self) -> &str {
        "live"
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn frequency(&self) -> Frequency {
        if self.period_minutes >= 1440 {
            Frequency::Daily
        } else {
            Frequency::Intraday
        }
    }

    fn update_bars(&mut self, queue: &mut EventQueue) -> Result<(), PriceError> {
        let mut newest: Option<NaiveDateTime> = None;
        for symbol in &self.symbols {
            let bars = self.client.chart_bars(symbol, self.period_minutes, self.lookback)?;
            self.throttle.pause();
            if let Some(last) = bars.last() {
                newest = newest.max(Some(last.datetime));
            }
            self.bars.insert(symbol.clone(), bars);
        }

        match newest {
            Some(datetime) if self.last_emitted.map_or(true, |seen| datetime > seen) => {
                debug!(%datetime, "new live bar");
                self.last_emitted = Some(datetime);
                queue.put(Event::Market(MarketEvent { datetime }));
            }
            _ => debug!("no new live bar"),
        }
        Ok(())
    }

    fn continue_backtest(&self) -> bool {
        true
    }

    fn latest_bar(&self, symbol: &str) -> Result<&Bar, PriceError> {
        self.symbol_bars(symbol)?
            .last()
            .ok_or_else(|| PriceError::NoBarYet { symbol: symbol.to_string() })
    }

    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar], PriceError> {
        let bars = self.symbol_bars(symbol)?;
        Ok(&bars[bars.len().saturating_sub(n)..])
    }

    fn latest_bar_datetime(&self) -> Result<NaiveDateTime, PriceError> {
        self.last_emitted.ok_or_else(|| PriceError::NoBarYet {
            symbol: self.symbols.first().cloned().unwrap_or_default(),
        })
    }

    fn next_open_price(&self, symbol: &str) -> Result<f64, PriceError> {
        Err(PriceError::NoNextBar { symbol: symbol.to_string() })
    }
}
