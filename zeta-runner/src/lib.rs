//! Zeta Runner — session orchestration on top of `zeta-core`.
//!
//! This crate provides:
//! - TOML session configs with validation and content-hashed run ids
//! - Price loading from CSV with a seeded synthetic fallback
//! - Single backtests returning metrics, equity curve and the session report
//! - Grid optimisation over strategy parameters, run in parallel
//! - Live sessions against an XTB account until a deadline
//! - JSON, CSV and Markdown artifacts per run

pub mod config;
pub mod data_loader;
pub mod export;
pub mod live;
pub mod metrics;
pub mod optimize;
pub mod runner;

pub use config::{ConfigError, RunId, SessionConfig, StrategyConfig};
pub use data_loader::{load_prices, LoadError, LoadedData};
pub use export::{save_artifacts, ArtifactSink};
pub use live::{run_live, run_live_with_client};
pub use metrics::{EquityPoint, PerformanceMetrics};
pub use optimize::{optimize, OptimizationRow};
pub use runner::{run_backtest, run_backtest_from_data, BacktestResult, RunError, SessionHooks};
