//! Bar loading for backtests.
//!
//! Resolution per symbol:
//! 1. `CSV` data → read `{SYMBOL}.csv` (and `{SYMBOL}_actions.csv`)
//! 2. No file and `synthetic_fallback` → seeded random walk (tagged)
//! 3. `SYNTHETIC` data → random walk for every symbol
//! 4. Otherwise → fail with the missing symbol
//!
//! Every source is staged into a [`MemoryPriceStore`] so that alignment and
//! date filtering happen in one place.

use chrono::{Datelike, NaiveDate, Weekday};
use thiserror::Error;
use tracing::{info, warn};

use zeta_core::domain::Bar;
use zeta_core::price::{load_historic, CsvPriceStore, HistoricPriceHandler, MemoryPriceStore, PriceError, PriceStore};

use crate::config::{DataConfig, SessionConfig};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no data for '{symbol}' (set synthetic_fallback = true to generate a random walk)")]
    MissingSymbol { symbol: String },

    #[error("synthetic data is only generated for daily sessions")]
    SyntheticIntraday,

    #[error("price data error: {0}")]
    Price(#[from] PriceError),

    #[error("cannot hash dataset: {0}")]
    Hash(#[from] serde_json::Error),
}

/// Aligned prices plus where they came from.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub prices: HistoricPriceHandler,
    /// Symbols served from the random walk.
    pub synthetic_symbols: Vec<String>,
    /// BLAKE3 over every staged bar, in symbol order.
    pub dataset_hash: String,
}

impl LoadedData {
    pub fn has_synthetic(&self) -> bool {
        !self.synthetic_symbols.is_empty()
    }
}

pub fn load_prices(config: &SessionConfig) -> Result<LoadedData, LoadError> {
    let session = &config.session;
    let mut staged = MemoryPriceStore::new();
    let mut synthetic_symbols = Vec::new();
    let mut hasher = blake3::Hasher::new();

    for symbol in &session.symbols {
        let bars = match &config.data {
            DataConfig::Csv { dir, vendor, synthetic_fallback } => {
                let mut store = CsvPriceStore::new(dir);
                if let Some(vendor) = vendor {
                    store = store.with_vendor(vendor.clone());
                }
                match store.bars(symbol, session.start, session.end) {
                    Ok(bars) if !bars.is_empty() => {
                        let actions = store.corporate_actions(symbol, session.start, session.end)?;
                        if !actions.is_empty() {
                            hasher.update(&serde_json::to_vec(&actions)?);
                            staged.insert_actions(symbol.clone(), actions);
                        }
                        bars
                    }
                    Ok(_) | Err(PriceError::NoData { .. }) if *synthetic_fallback => {
                        warn!(symbol, "no stored bars, generating synthetic data; results are tagged synthetic");
                        synthetic_symbols.push(symbol.clone());
                        synthetic_bars(symbol, session.start, session.end, 0)
                    }
                    Ok(_) | Err(PriceError::NoData { .. }) => {
                        return Err(LoadError::MissingSymbol { symbol: symbol.clone() })
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            DataConfig::Synthetic { seed } => {
                synthetic_symbols.push(symbol.clone());
                synthetic_bars(symbol, session.start, session.end, *seed)
            }
        };
        if bars.is_empty() {
            return Err(LoadError::MissingSymbol { symbol: symbol.clone() });
        }
        hasher.update(&serde_json::to_vec(&bars)?);
        staged.insert_bars(symbol.clone(), bars);
    }

    if !synthetic_symbols.is_empty() && session.frequency != zeta_core::price::Frequency::Daily {
        return Err(LoadError::SyntheticIntraday);
    }

    let prices = load_historic(&staged, &session.symbols, session.start, session.end, session.frequency)?;
    info!(
        symbols = session.symbols.len(),
        bars = prices.len(),
        synthetic = synthetic_symbols.len(),
        "prices loaded"
    );
    Ok(LoadedData {
        prices,
        synthetic_symbols,
        dataset_hash: hasher.finalize().to_hex().to_string(),
    })
}

/// Daily random walk from 100.0 on weekdays in `[start, end]`.
///
/// Deterministic per `(symbol, seed)`.
pub fn synthetic_bars(symbol: &str, start: NaiveDate, end: NaiveDate, seed: u64) -> Vec<Bar> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut hasher = blake3::Hasher::new();
    hasher.update(symbol.as_bytes());
    hasher.update(&seed.to_le_bytes());
    let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());

    let mut bars = Vec::new();
    let mut close = 100.0_f64;
    let mut date = start;
    while date <= end {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let drift: f64 = rng.gen_range(-0.02..0.02);
            let open = close;
            close = (open * (1.0 + drift)).max(0.01);
            let range = open.max(close) * rng.gen_range(0.0..0.01);
            if let Some(datetime) = date.and_hms_opt(0, 0, 0) {
                bars.push(Bar {
                    symbol: symbol.to_string(),
                    datetime,
                    open,
                    high: open.max(close) + range,
                    low: (open.min(close) - range).max(0.005),
                    close,
                    adj_close: close,
                    volume: rng.gen_range(100_000..1_000_000),
                });
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    bars
}
