//! Session configuration — TOML files parsed into typed sections.
//!
//! A session file looks like:
//!
//! ```toml
//! [session]
//! name = "spy-crossover"
//! start = "2015-01-02"
//! end = "2020-12-31"
//! symbols = ["SPY"]
//! initial_capital = 100000.0
//!
//! [data]
//! type = "CSV"
//! dir = "data"
//!
//! [execution]
//! fill_timing = "NEXT_OPEN"
//! commission = { type = "INTERACTIVE_BROKERS" }
//!
//! [book]
//! type = "EQUITY"
//!
//! [strategy]
//! type = "MA_CROSSOVER"
//! fast = 10
//! slow = 50
//! strength = 0.5
//! sizing = { method = "percent_equity" }
//! ```
//!
//! Broker credentials are never stored in the file; `[live]` names the
//! environment variables that hold them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zeta_core::book::DividendTreatment;
use zeta_core::domain::SymbolInfo;
use zeta_core::event::{MarketEvent, SignalEvent};
use zeta_core::execution::{CommissionModel, FillTiming};
use zeta_core::price::{Frequency, PriceHandler};
use zeta_core::sizing::SizingPolicy;
use zeta_core::strategy::{BuyAndHold, MaCrossover, Strategy, StrategyError};

/// Content hash of the parts of a config that determine a run's outcome.
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("session lists no symbols")]
    NoSymbols,

    #[error("symbol {0} is listed more than once")]
    DuplicateSymbol(String),

    #[error("initial capital must be positive, got {0}")]
    InvalidCapital(f64),

    #[error("lot size must be positive, got {0}")]
    InvalidLotSize(f64),

    #[error("margin book has no symbol info for {0}")]
    MissingSymbolInfo(String),

    #[error("strategy {strategy} has no parameter '{name}'")]
    UnknownParameter { strategy: String, name: String },

    #[error("parameter '{name}' needs a whole number of at least 1, got {value}")]
    InvalidParameterValue { name: String, value: f64 },

    #[error("optimisation parameter '{0}' has no values")]
    EmptyParameter(String),

    #[error("config has no [{0}] section")]
    MissingSection(&'static str),

    #[error("environment variable {0} is not set")]
    MissingCredential(String),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session: SessionSection,
    pub data: DataConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub book: BookConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<OptimizeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,
    /// Rounding unit for sized orders when the book has no symbol info.
    #[serde(default = "default_lot_size")]
    pub lot_size: f64,
    /// Bar length of intraday data, used to annualise metrics.
    #[serde(default = "default_bar_minutes")]
    pub bar_minutes: u32,
}

fn default_frequency() -> Frequency {
    Frequency::Daily
}

fn default_lot_size() -> f64 {
    1.0
}

fn default_bar_minutes() -> u32 {
    60
}

/// Where historic bars come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataConfig {
    /// `{dir}[/{vendor}]/{SYMBOL}.csv`, with optional `{SYMBOL}_actions.csv`.
    Csv {
        dir: PathBuf,
        #[serde(default)]
        vendor: Option<String>,
        /// Generate a random walk for symbols with no file.
        #[serde(default)]
        synthetic_fallback: bool,
    },
    /// Seeded random walk for every symbol.
    Synthetic {
        #[serde(default)]
        seed: u64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub fill_timing: FillTiming,
    #[serde(default)]
    pub commission: CommissionModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookConfig {
    /// Unlevered shares.
    Equity {
        #[serde(default)]
        dividends: DividendTreatment,
    },
    /// Leveraged contracts; every session symbol needs an entry.
    Margin { symbols: BTreeMap<String, SymbolInfo> },
}

impl Default for BookConfig {
    fn default() -> Self {
        Self::Equity { dividends: DividendTreatment::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyConfig {
    BuyAndHold {
        strength: f64,
        #[serde(default)]
        sizing: SizingPolicy,
    },
    MaCrossover {
        fast: usize,
        slow: usize,
        strength: f64,
        #[serde(default)]
        sizing: SizingPolicy,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: default_output_dir() }
    }
}

/// Live broker session. Credentials come from the named environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    pub base_url: String,
    #[serde(default = "default_user_env")]
    pub user_env: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Candle length polled from the broker.
    #[serde(default = "default_period_minutes")]
    pub period_minutes: u32,
    /// Candles kept per symbol for strategy lookbacks.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Wall-clock length of the session.
    pub duration_minutes: u64,
    /// Pause between broker calls.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

fn default_user_env() -> String {
    "XTB_USER_ID".into()
}

fn default_password_env() -> String {
    "XTB_PASSWORD".into()
}

fn default_period_minutes() -> u32 {
    1
}

fn default_lookback() -> usize {
    200
}

fn default_heartbeat_secs() -> u64 {
    60
}

fn default_throttle_ms() -> u64 {
    250
}

impl LiveConfig {
    /// `(user_id, password)` read from the environment.
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let read = |var: &str| std::env::var(var).map_err(|_| ConfigError::MissingCredential(var.to_string()));
        Ok((read(&self.user_env)?, read(&self.password_env)?))
    }
}

/// Cartesian grid over strategy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeConfig {
    pub params: BTreeMap<String, Vec<f64>>,
}

// ─── Loading and validation ──────────────────────────────────────────

impl SessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        if s.start > s.end {
            return Err(ConfigError::InvalidDateRange { start: s.start, end: s.end });
        }
        if s.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        for (i, symbol) in s.symbols.iter().enumerate() {
            if s.symbols[..i].contains(symbol) {
                return Err(ConfigError::DuplicateSymbol(symbol.clone()));
            }
        }
        if !(s.initial_capital.is_finite() && s.initial_capital > 0.0) {
            return Err(ConfigError::InvalidCapital(s.initial_capital));
        }
        if !(s.lot_size.is_finite() && s.lot_size > 0.0) {
            return Err(ConfigError::InvalidLotSize(s.lot_size));
        }
        if let BookConfig::Margin { symbols } = &self.book {
            if let Some(missing) = s.symbols.iter().find(|sym| !symbols.contains_key(*sym)) {
                return Err(ConfigError::MissingSymbolInfo(missing.clone()));
            }
        }
        self.strategy.build()?;
        if let Some(optimize) = &self.optimize {
            for (name, values) in &optimize.params {
                if values.is_empty() {
                    return Err(ConfigError::EmptyParameter(name.clone()));
                }
                for &value in values {
                    self.strategy.with_param(name, value)?;
                }
            }
        }
        Ok(())
    }

    /// Deterministic id over session, data, execution, book and strategy.
    ///
    /// Output location, live settings and the optimisation grid do not
    /// change what a single run computes and are left out.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        #[derive(Serialize)]
        struct Identity<'a> {
            session: &'a SessionSection,
            data: &'a DataConfig,
            execution: &'a ExecutionConfig,
            book: &'a BookConfig,
            strategy: &'a StrategyConfig,
        }
        let json = serde_json::to_string(&Identity {
            session: &self.session,
            data: &self.data,
            execution: &self.execution,
            book: &self.book,
            strategy: &self.strategy,
        })?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn live(&self) -> Result<&LiveConfig, ConfigError> {
        self.live.as_ref().ok_or(ConfigError::MissingSection("live"))
    }

    pub fn optimize(&self) -> Result<&OptimizeConfig, ConfigError> {
        self.optimize.as_ref().ok_or(ConfigError::MissingSection("optimize"))
    }
}

// ─── Strategy construction ───────────────────────────────────────────

impl StrategyConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BuyAndHold { .. } => "BUY_AND_HOLD",
            Self::MaCrossover { .. } => "MA_CROSSOVER",
        }
    }

    /// Tunable numeric parameters and their current values.
    pub fn params(&self) -> BTreeMap<String, f64> {
        let mut params = BTreeMap::new();
        match *self {
            Self::BuyAndHold { strength, .. } => {
                params.insert("strength".to_string(), strength);
            }
            Self::MaCrossover { fast, slow, strength, .. } => {
                params.insert("fast".to_string(), fast as f64);
                params.insert("slow".to_string(), slow as f64);
                params.insert("strength".to_string(), strength);
            }
        }
        params
    }

    /// A copy with one parameter replaced. Window lengths must be whole numbers.
    pub fn with_param(&self, name: &str, value: f64) -> Result<Self, ConfigError> {
        let window = |value: f64| -> Result<usize, ConfigError> {
            if value.is_finite() && value >= 1.0 && value.fract() == 0.0 {
                Ok(value as usize)
            } else {
                Err(ConfigError::InvalidParameterValue { name: name.to_string(), value })
            }
        };
        let mut next = self.clone();
        match (&mut next, name) {
            (Self::BuyAndHold { strength, .. }, "strength")
            | (Self::MaCrossover { strength, .. }, "strength") => *strength = value,
            (Self::MaCrossover { fast, .. }, "fast") => *fast = window(value)?,
            (Self::MaCrossover { slow, .. }, "slow") => *slow = window(value)?,
            _ => {
                return Err(ConfigError::UnknownParameter {
                    strategy: self.kind().to_string(),
                    name: name.to_string(),
                })
            }
        }
        Ok(next)
    }

    pub fn build(&self) -> Result<ConfiguredStrategy, StrategyError> {
        Ok(match *self {
            Self::BuyAndHold { strength, sizing } => ConfiguredStrategy::BuyAndHold(BuyAndHold::new(strength, sizing)),
            Self::MaCrossover { fast, slow, strength, sizing } => {
                ConfiguredStrategy::MaCrossover(MaCrossover::new(fast, slow, strength, sizing)?)
            }
        })
    }
}

/// The strategies a config file can select.
#[derive(Debug, Clone)]
pub enum ConfiguredStrategy {
    BuyAndHold(BuyAndHold),
    MaCrossover(MaCrossover),
}

impl Strategy for ConfiguredStrategy {
    fn name(&self) -> &str {
        match self {
            Self::BuyAndHold(s) => s.name(),
            Self::MaCrossover(s) => s.name(),
        }
    }

    fn calculate_signals(
        &mut self,
        market: &MarketEvent,
        prices: &dyn PriceHandler,
    ) -> Result<Vec<SignalEvent>, StrategyError> {
        match self {
            Self::BuyAndHold(s) => s.calculate_signals(market, prices),
            Self::MaCrossover(s) => s.calculate_signals(market, prices),
        }
    }
}
