//! Property tests for performance metrics.
//!
//! Uses proptest to verify:
//! 1. The cumulative equity curve ends at `last / first`
//! 2. Max drawdown lies in `[-1, 0]` and matches the worst point drawdown
//! 3. Total return and CAGR agree in sign

use proptest::prelude::*;
use zeta_core::domain::HoldingsSnapshot;
use zeta_runner::metrics::{cagr, equity_points, max_drawdown, total_return, TRADING_DAYS};

fn arb_totals() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..1_000_000.0_f64, 2..200)
}

fn snapshots(totals: &[f64]) -> Vec<HoldingsSnapshot> {
    totals
        .iter()
        .map(|&total| {
            let mut s = HoldingsSnapshot::opening(&[], total);
            s.total = total;
            s
        })
        .collect()
}

// ── 1. Equity curve ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn equity_curve_compounds_to_total_ratio(totals in arb_totals()) {
        let points = equity_points(&snapshots(&totals));
        let last = points.last().unwrap();
        let expected = totals[totals.len() - 1] / totals[0];
        prop_assert!((last.equity_curve - expected).abs() < 1e-6 * expected.max(1.0));
    }
}

// ── 2. Drawdown bounds ───────────────────────────────────────────────

proptest! {
    #[test]
    fn drawdown_is_bounded_and_consistent(totals in arb_totals()) {
        let (dd, _) = max_drawdown(&totals);
        prop_assert!((-1.0..=0.0).contains(&dd));
        let worst = equity_points(&snapshots(&totals))
            .iter()
            .map(|p| p.drawdown)
            .fold(0.0_f64, f64::min);
        prop_assert!((dd - worst).abs() < 1e-12);
    }
}

// ── 3. Return signs ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn total_return_and_cagr_share_sign(totals in arb_totals()) {
        let tr = total_return(&totals);
        let g = cagr(&totals, TRADING_DAYS);
        prop_assert!(tr == 0.0 || g == 0.0 || tr.signum() == g.signum());
    }
}
