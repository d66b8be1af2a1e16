//! Price stores — where historic bars and corporate actions come from.
//!
//! The store abstraction keeps the handler independent of storage, so tests
//! and synthetic runs can feed bars from memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::debug;

use super::{Frequency, HistoricPriceHandler, PriceError};
use crate::domain::{Bar, CorporateAction};

/// Storage for historic bars, filtered by date range.
pub trait PriceStore: Send + Sync {
    fn name(&self) -> &str;

    /// Bars with `start <= date <= end`, ascending.
    fn bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>, PriceError>;

    /// Corporate actions with `start <= date <= end`; empty when none are stored.
    fn corporate_actions(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, PriceError>;
}

/// Load every symbol from `store` and build an aligned historic handler.
pub fn load_historic(
    store: &dyn PriceStore,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
) -> Result<HistoricPriceHandler, PriceError> {
    let mut bars = BTreeMap::new();
    for symbol in symbols {
        let symbol_bars = store.bars(symbol, start, end)?;
        if symbol_bars.is_empty() {
            return Err(PriceError::NoData { symbol: symbol.clone() });
        }
        debug!(store = store.name(), symbol, bars = symbol_bars.len(), "loaded bars");
        bars.insert(symbol.clone(), symbol_bars);
    }

    let mut handler = HistoricPriceHandler::from_bars(symbols, &bars, frequency)?;
    if frequency == Frequency::Daily {
        for symbol in symbols {
            let actions = store.corporate_actions(symbol, start, end)?;
            if !actions.is_empty() {
                handler = handler.with_corporate_actions(symbol.clone(), actions);
            }
        }
    }
    Ok(handler)
}

// ─── CSV store ───────────────────────────────────────────────────────

/// One CSV row: `date,open,high,low,close,adj_close,volume`.
#[derive(Debug, Deserialize)]
struct CsvBarRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    adj_close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

/// One CSV row: `date,split_ratio,dividend`.
#[derive(Debug, Deserialize)]
struct CsvActionRow {
    date: String,
    #[serde(default)]
    split_ratio: Option<f64>,
    #[serde(default)]
    dividend: Option<f64>,
}

/// Reads `{dir}[/{vendor}]/{SYMBOL}.csv` and `{SYMBOL}_actions.csv`.
#[derive(Debug, Clone)]
pub struct CsvPriceStore {
    dir: PathBuf,
    vendor: Option<String>,
}

impl CsvPriceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), vendor: None }
    }

    /// Restrict reads to one vendor's subdirectory.
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    fn root(&self) -> PathBuf {
        match &self.vendor {
            Some(vendor) => self.dir.join(vendor),
            None => self.dir.clone(),
        }
    }

    fn bars_path(&self, symbol: &str) -> PathBuf {
        self.root().join(format!("{symbol}.csv"))
    }

    fn actions_path(&self, symbol: &str) -> PathBuf {
        self.root().join(format!("{symbol}_actions.csv"))
    }
}

/// Accepts `YYYY-MM-DD` and `YYYY-MM-DD HH:MM:SS`.
fn parse_datetime(raw: &str, path: &Path) -> Result<NaiveDateTime, PriceError> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| PriceError::Malformed {
            source_name: path.display().to_string(),
            message: format!("unparseable date '{raw}'"),
        })
}

impl PriceStore for CsvPriceStore {
    fn name(&self) -> &str {
        "csv"
    }

    fn bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>, PriceError> {
        let path = self.bars_path(symbol);
        if !path.exists() {
            return Err(PriceError::NoData { symbol: symbol.to_string() });
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut bars = Vec::new();
        for row in reader.deserialize::<CsvBarRow>() {
            let row = row?;
            let datetime = parse_datetime(&row.date, &path)?;
            if datetime.date() < start || datetime.date() > end {
                continue;
            }
            bars.push(Bar {
                symbol: symbol.to_string(),
                datetime,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                adj_close: row.adj_close.unwrap_or(row.close),
                volume: row.volume.map_or(0, |v| v.max(0.0) as u64),
            });
        }
        bars.sort_by_key(|b| b.datetime);
        bars.dedup_by_key(|b| b.datetime);
        Ok(bars)
    }

    fn corporate_actions(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, PriceError> {
        let path = self.actions_path(symbol);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut actions = Vec::new();
        for row in reader.deserialize::<CsvActionRow>() {
            let row = row?;
            let date = parse_datetime(&row.date, &path)?.date();
            if date < start || date > end {
                continue;
            }
            actions.push(CorporateAction {
                date,
                split_ratio: row.split_ratio.unwrap_or(1.0),
                dividend: row.dividend.unwrap_or(0.0),
            });
        }
        Ok(actions)
    }
}

// ─── In-memory store ─────────────────────────────────────────────────

/// Bars held in memory; used for synthetic data and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryPriceStore {
    bars: BTreeMap<String, Vec<Bar>>,
    actions: BTreeMap<String, Vec<CorporateAction>>,
}

impl MemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bars(&mut self, symbol: impl Into<String>, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.datetime);
        self.bars.insert(symbol.into(), bars);
    }

    pub fn insert_actions(&mut self, symbol: impl Into<String>, actions: Vec<CorporateAction>) {
        self.actions.insert(symbol.into(), actions);
    }
}

impl PriceStore for MemoryPriceStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>, PriceError> {
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| PriceError::NoData { symbol: symbol.to_string() })?;
        Ok(bars
            .iter()
            .filter(|b| b.date() >= start && b.date() <= end)
            .cloned()
            .collect())
    }

    fn corporate_actions(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, PriceError> {
        Ok(self
            .actions
            .get(symbol)
            .map(|actions| {
                actions
                    .iter()
                    .filter(|a| a.date >= start && a.date <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::PriceHandler;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn bar(symbol: &str, day: u32, close: f64) -> Bar {
        Bar {
            symbol: symbol.into(),
            datetime: date(day).and_hms_opt(0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 10,
        }
    }

    #[test]
    fn memory_store_filters_by_range() {
        let mut store = MemoryPriceStore::new();
        store.insert_bars("AAA", vec![bar("AAA", 2, 1.0), bar("AAA", 3, 2.0), bar("AAA", 4, 3.0)]);
        let bars = store.bars("AAA", date(3), date(4)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 2.0);
        assert!(store.corporate_actions("AAA", date(1), date(9)).unwrap().is_empty());
    }

    #[test]
    fn load_historic_rejects_empty_range() {
        let mut store = MemoryPriceStore::new();
        store.insert_bars("AAA", vec![bar("AAA", 2, 1.0)]);
        let err = load_historic(&store, &["AAA".to_string()], date(5), date(9), Frequency::Daily)
            .unwrap_err();
        assert!(matches!(err, PriceError::NoData { .. }));
    }

    #[test]
    fn load_historic_attaches_actions() {
        let mut store = MemoryPriceStore::new();
        store.insert_bars("AAA", vec![bar("AAA", 2, 1.0), bar("AAA", 3, 2.0)]);
        store.insert_actions(
            "AAA",
            vec![CorporateAction { date: date(2), split_ratio: 3.0, dividend: 0.0 }],
        );
        let mut handler =
            load_historic(&store, &["AAA".to_string()], date(1), date(9), Frequency::Daily).unwrap();
        let mut queue = crate::event::EventQueue::new();
        handler.update_bars(&mut queue).unwrap();
        assert_eq!(handler.latest_bar_split("AAA").unwrap(), 3.0);
    }

    #[test]
    fn parse_datetime_accepts_both_forms() {
        let path = Path::new("x.csv");
        assert!(parse_datetime("2024-01-02", path).is_ok());
        assert!(parse_datetime("2024-01-02 15:30:00", path).is_ok());
        assert!(parse_datetime("02/01/2024", path).is_err());
    }
}
