//! Performance metrics — pure functions over the holdings log.
//!
//! The equity curve follows the holdings snapshots one to one: `returns` is
//! the percent change of `total` between consecutive snapshots and
//! `equity_curve` is the cumulative product of `1 + returns`, starting at 1.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use zeta_core::domain::{HoldingsSnapshot, TradeRecord};
use zeta_core::price::Frequency;
use zeta_core::SessionReport;

/// Trading days per year used to annualise daily series.
pub const TRADING_DAYS: f64 = 252.0;

/// One row of the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub datetime: Option<NaiveDateTime>,
    pub total: f64,
    pub returns: f64,
    pub equity_curve: f64,
    /// Fractional distance below the running peak, `<= 0`.
    pub drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub final_equity: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    /// Longest run of snapshots spent below a previous peak.
    pub max_drawdown_duration: usize,
    pub trade_count: usize,
    pub total_commission: f64,
}

impl PerformanceMetrics {
    pub fn from_report(report: &SessionReport, periods_per_year: f64) -> Self {
        let totals: Vec<f64> = report.holdings.iter().map(|h| h.total).collect();
        Self::compute(&totals, &report.trades, periods_per_year)
    }

    pub fn compute(totals: &[f64], trades: &[TradeRecord], periods_per_year: f64) -> Self {
        let (max_drawdown, max_drawdown_duration) = max_drawdown(totals);
        Self {
            final_equity: totals.last().copied().unwrap_or(0.0),
            total_return: total_return(totals),
            cagr: cagr(totals, periods_per_year),
            sharpe: sharpe_ratio(&returns(totals), periods_per_year),
            max_drawdown,
            max_drawdown_duration,
            trade_count: trades.len(),
            total_commission: trades.iter().map(|t| t.commission).sum(),
        }
    }
}

/// Bars per year for annualisation. Intraday sessions pass their bar length.
pub fn periods_per_year(frequency: Frequency, bar_minutes: u32) -> f64 {
    match frequency {
        Frequency::Daily => TRADING_DAYS,
        Frequency::Intraday => TRADING_DAYS * (390.0 / f64::from(bar_minutes.max(1))),
    }
}

pub fn equity_points(holdings: &[HoldingsSnapshot]) -> Vec<EquityPoint> {
    let mut points = Vec::with_capacity(holdings.len());
    let mut curve = 1.0;
    let mut peak = f64::MIN;
    let mut previous: Option<f64> = None;
    for snapshot in holdings {
        let r = previous.map_or(0.0, |p| pct_change(p, snapshot.total));
        curve *= 1.0 + r;
        peak = peak.max(snapshot.total);
        points.push(EquityPoint {
            datetime: snapshot.datetime,
            total: snapshot.total,
            returns: r,
            equity_curve: curve,
            drawdown: if peak > 0.0 { (snapshot.total - peak) / peak } else { 0.0 },
        });
        previous = Some(snapshot.total);
    }
    points
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from.abs() < 1e-12 {
        0.0
    } else {
        to / from - 1.0
    }
}

/// Per-period returns; one shorter than `totals`.
pub fn returns(totals: &[f64]) -> Vec<f64> {
    totals.windows(2).map(|w| pct_change(w[0], w[1])).collect()
}

pub fn total_return(totals: &[f64]) -> f64 {
    match (totals.first(), totals.last()) {
        (Some(&first), Some(&last)) if totals.len() >= 2 && first > 0.0 => last / first - 1.0,
        _ => 0.0,
    }
}

/// Compound annual growth over `totals.len() - 1` periods.
pub fn cagr(totals: &[f64], periods_per_year: f64) -> f64 {
    let (Some(&first), Some(&last)) = (totals.first(), totals.last()) else {
        return 0.0;
    };
    if totals.len() < 2 || first <= 0.0 || last <= 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let years = (totals.len() - 1) as f64 / periods_per_year;
    (last / first).powf(1.0 / years) - 1.0
}

/// Annualised Sharpe with a zero risk-free rate; 0.0 for a flat series.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std < 1e-15 {
        return 0.0;
    }
    mean / std * periods_per_year.sqrt()
}

/// `(max drawdown as a negative fraction, longest underwater stretch)`.
pub fn max_drawdown(totals: &[f64]) -> (f64, usize) {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    let mut duration = 0;
    let mut longest = 0;
    for &total in totals {
        if total >= peak {
            peak = total;
            duration = 0;
        } else {
            duration += 1;
            longest = longest.max(duration);
            if peak > 0.0 {
                worst = worst.min((total - peak) / peak);
            }
        }
    }
    (worst, longest)
}
