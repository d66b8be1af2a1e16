//! HistoricPriceHandler — replays aligned bars one time index at a time.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use super::{align_pad, AlignedBars, Frequency, PriceError, PriceHandler};
use crate::domain::{Bar, CorporateAction};
use crate::event::{Event, EventQueue, MarketEvent};

/// Historic feed over a fixed set of aligned bars.
///
/// Cloning yields an independent cursor over the same data, which is how
/// optimisation runs get isolated feeds.
#[derive(Debug, Clone)]
pub struct HistoricPriceHandler {
    symbols: Vec<String>,
    datetimes: Vec<NaiveDateTime>,
    bars: BTreeMap<String, Vec<Bar>>,
    actions: BTreeMap<String, BTreeMap<NaiveDate, CorporateAction>>,
    frequency: Frequency,
    cursor: Option<usize>,
    exhausted: bool,
}

impl HistoricPriceHandler {
    pub fn new(aligned: AlignedBars, frequency: Frequency) -> Self {
        Self {
            symbols: aligned.symbols,
            datetimes: aligned.datetimes,
            bars: aligned.bars,
            actions: BTreeMap::new(),
            frequency,
            cursor: None,
            exhausted: false,
        }
    }

    /// Align raw per-symbol bars and build a handler over them.
    pub fn from_bars(
        symbols: &[String],
        bars: &BTreeMap<String, Vec<Bar>>,
        frequency: Frequency,
    ) -> Result<Self, PriceError> {
        Ok(Self::new(align_pad(symbols, bars)?, frequency))
    }

    /// Attach corporate actions for `symbol`.
    ///
    /// An action dated on a day without a time index takes effect at the next
    /// one. Actions outside the feed's dates are dropped with a warning.
    pub fn with_corporate_actions(
        mut self,
        symbol: impl Into<String>,
        actions: impl IntoIterator<Item = CorporateAction>,
    ) -> Self {
        let symbol = symbol.into();
        let mut effective = Vec::new();
        for action in actions {
            match self.effective_date(action.date) {
                Some(date) => {
                    if date != action.date {
                        debug!(%symbol, from = %action.date, to = %date, "corporate action moved to next bar");
                    }
                    effective.push(CorporateAction { date, ..action });
                }
                None => warn!(%symbol, date = %action.date, "corporate action outside the feed dropped"),
            }
        }

        let entry = self.actions.entry(symbol).or_default();
        for action in effective {
            entry
                .entry(action.date)
                .and_modify(|merged| {
                    merged.split_ratio *= action.split_ratio;
                    merged.dividend += action.dividend;
                })
                .or_insert(action);
        }
        self
    }

    fn effective_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        let first = self.datetimes.first()?.date();
        if date < first {
            return None;
        }
        let i = self.datetimes.partition_point(|d| d.date() < date);
        self.datetimes.get(i).map(NaiveDateTime::date)
    }

    /// Number of time indices in the feed.
    pub fn len(&self) -> usize {
        self.datetimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datetimes.is_empty()
    }

    /// Rewind to before the first bar.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    fn symbol_bars(&self, symbol: &str) -> Result<&[Bar], PriceError> {
        self.bars
            .get(symbol)
            .map(Vec::as_slice)
            .ok_or_else(|| PriceError::UnknownSymbol { symbol: symbol.to_string() })
    }

    fn current_action(&self, symbol: &str) -> Result<Option<&CorporateAction>, PriceError> {
        self.symbol_bars(symbol)?;
        let Some(cursor) = self.cursor else {
            return Ok(None);
        };
        let date = self.datetimes[cursor].date();
        Ok(self.actions.get(symbol).and_then(|a| a.get(&date)))
    }
}

impl PriceHandler for HistoricPriceHandler {
    fn name(&self) -> &str {
        "historic"
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn frequency(&self) -> Frequency {
        self.frequency
    }

    fn update_bars(&mut self, queue: &mut EventQueue) -> Result<(), PriceError> {
        if self.exhausted {
            return Ok(());
        }
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.datetimes.len() {
            self.exhausted = true;
            return Ok(());
        }
        self.cursor = Some(next);
        queue.put(Event::Market(MarketEvent { datetime: self.datetimes[next] }));
        Ok(())
    }

    fn continue_backtest(&self) -> bool {
        !self.exhausted
    }

    fn latest_bar(&self, symbol: &str) -> Result<&Bar, PriceError> {
        let bars = self.symbol_bars(symbol)?;
        self.cursor
            .map(|c| &bars[c])
            .ok_or_else(|| PriceError::NoBarYet { symbol: symbol.to_string() })
    }

    fn latest_bars(&self, symbol: &str, n: usize) -> Result<&[Bar], PriceError> {
        let bars = self.symbol_bars(symbol)?;
        Ok(match self.cursor {
            Some(c) => &bars[(c + 1).saturating_sub(n)..=c],
            None => &[],
        })
    }

    fn latest_bar_datetime(&self) -> Result<NaiveDateTime, PriceError> {
        let symbol = self.symbols.first().cloned().unwrap_or_default();
        self.cursor
            .map(|c| self.datetimes[c])
            .ok_or(PriceError::NoBarYet { symbol })
    }

    fn next_open_price(&self, symbol: &str) -> Result<f64, PriceError> {
        let bars = self.symbol_bars(symbol)?;
        let next = self.cursor.map_or(0, |c| c + 1);
        match bars.get(next) {
            Some(bar) if bar.open.is_finite() => Ok(bar.open),
            _ => Err(PriceError::NoNextBar { symbol: symbol.to_string() }),
        }
    }

    fn next_bar_datetime(&self) -> Option<NaiveDateTime> {
        self.datetimes.get(self.cursor.map_or(0, |c| c + 1)).copied()
    }

    fn latest_bar_split(&self, symbol: &str) -> Result<f64, PriceError> {
        Ok(self
            .current_action(symbol)?
            .filter(|a| a.has_split())
            .map_or(1.0, |a| a.split_ratio))
    }

    fn latest_bar_dividend(&self, symbol: &str) -> Result<f64, PriceError> {
        Ok(self
            .current_action(symbol)?
            .filter(|a| a.has_dividend())
            .map_or(0.0, |a| a.dividend))
    }
}
