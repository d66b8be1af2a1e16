//! Live session — the same loop against a broker until a wall-clock deadline.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use zeta_core::broker::{BrokerClient, LiveBook, LiveExecution, LivePriceHandler, Throttle, XtbClient, XtbConfig};
use zeta_core::event::EventQueue;
use zeta_core::session::SessionMode;
use zeta_core::{Portfolio, ReportSink, SessionReport, TradingSession};

use crate::config::{LiveConfig, SessionConfig};
use crate::runner::RunError;

/// Log in to XTB with credentials from the environment and run until the deadline.
pub fn run_live(
    config: &SessionConfig,
    stop: Arc<AtomicBool>,
    sink: Option<Box<dyn ReportSink>>,
) -> Result<SessionReport, RunError> {
    let live = config.live()?;
    let (user_id, password) = live.credentials()?;
    let client = XtbClient::connect(XtbConfig {
        base_url: live.base_url.clone(),
        user_id,
        password,
        app_name: config.session.name.clone(),
        max_retries: 3,
        timeout_secs: 30,
    })?;
    run_live_with_client(config, Arc::new(client), stop, sink)
}

/// Run a live session over any broker client.
pub fn run_live_with_client<C: BrokerClient + 'static>(
    config: &SessionConfig,
    client: Arc<C>,
    stop: Arc<AtomicBool>,
    sink: Option<Box<dyn ReportSink>>,
) -> Result<SessionReport, RunError> {
    let live: &LiveConfig = config.live()?;
    let symbols = config.session.symbols.clone();
    let throttle = Throttle::new(Duration::from_millis(live.throttle_ms));

    let book = LiveBook::connect(Arc::clone(&client), symbols.clone(), throttle)?;
    let prices = LivePriceHandler::new(
        Arc::clone(&client),
        symbols,
        live.period_minutes,
        live.lookback,
        throttle,
    );
    let execution = LiveExecution::new(client, throttle);

    let minutes = i64::try_from(live.duration_minutes).unwrap_or(i64::MAX).min(i64::MAX / 120_000);
    let deadline = Utc::now()
        .checked_add_signed(chrono::Duration::minutes(minutes))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    info!(%deadline, heartbeat_secs = live.heartbeat_secs, "live session starting");

    let mut session = TradingSession::new(
        prices,
        config.strategy.build()?,
        Portfolio::new(book, config.session.lot_size),
        execution,
        EventQueue::new(),
    )
    .with_mode(SessionMode::Live { deadline })
    .with_heartbeat(Duration::from_secs(live.heartbeat_secs))
    .with_stop_flag(stop);
    if let Some(sink) = sink {
        session = session.with_sink(sink);
    }
    Ok(session.run()?)
}
