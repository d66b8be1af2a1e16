//! Multi-symbol time alignment with forward padding.
//!
//! Every symbol gets a bar at every datetime in the union of all symbols'
//! datetimes. A gap after a symbol's first bar is padded with a flat bar at
//! the previous close; datetimes before its first bar get a void bar.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;

use super::PriceError;
use crate::domain::Bar;

/// Bars for several symbols on one shared timeline.
#[derive(Debug, Clone)]
pub struct AlignedBars {
    /// Shared datetime axis, strictly increasing.
    pub datetimes: Vec<NaiveDateTime>,
    /// Per symbol, one bar per entry of `datetimes`.
    pub bars: BTreeMap<String, Vec<Bar>>,
    /// Symbols in caller order.
    pub symbols: Vec<String>,
}

impl AlignedBars {
    pub fn len(&self) -> usize {
        self.datetimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datetimes.is_empty()
    }
}

/// Align `symbol_bars` onto the union of their datetimes.
///
/// Input bars must be strictly increasing per symbol.
pub fn align_pad(
    symbols: &[String],
    symbol_bars: &BTreeMap<String, Vec<Bar>>,
) -> Result<AlignedBars, PriceError> {
    let mut axis = BTreeSet::new();
    for symbol in symbols {
        let bars = symbol_bars
            .get(symbol)
            .ok_or_else(|| PriceError::NoData { symbol: symbol.clone() })?;
        for pair in bars.windows(2) {
            if pair[1].datetime <= pair[0].datetime {
                return Err(PriceError::NonMonotonic {
                    symbol: symbol.clone(),
                    datetime: pair[1].datetime,
                });
            }
        }
        axis.extend(bars.iter().map(|b| b.datetime));
    }
    let datetimes: Vec<NaiveDateTime> = axis.into_iter().collect();

    let mut aligned = BTreeMap::new();
    for symbol in symbols {
        let source = &symbol_bars[symbol];
        let mut next = source.iter().peekable();
        let mut out: Vec<Bar> = Vec::with_capacity(datetimes.len());
        for &datetime in &datetimes {
            let bar = match next.next_if(|b| b.datetime == datetime) {
                Some(bar) => bar.clone(),
                None => match out.last() {
                    Some(previous) if !previous.is_void() => Bar::padded_from(previous, datetime),
                    _ => Bar::void(symbol.clone(), datetime),
                },
            };
            out.push(bar);
        }
        aligned.insert(symbol.clone(), out);
    }

    Ok(AlignedBars {
        datetimes,
        bars: aligned,
        symbols: symbols.to_vec(),
    })
}
