//! XTB client — xAPI commands over an HTTP JSON gateway.
//!
//! Every request is `{"command": ..., "arguments": {...}}` and every reply is
//! `{"status": bool, "returnData": ..., "errorCode": ..., "errorDescr": ...}`.
//! Connection failures and timeouts are retried with exponential backoff.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    AccountInfo, BrokerClient, BrokerError, BrokerSymbol, OpenTrade, RequestStatus, TradeTransaction,
    TransactionStatus,
};
use crate::domain::Bar;
use crate::event::OrderSide;

/// Connection settings. Credentials are resolved by the caller, usually
/// from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XtbConfig {
    pub base_url: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_app_name() -> String {
    "zeta".into()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize)]
struct Command<'a> {
    command: &'a str,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: bool,
    #[serde(default)]
    return_data: Value,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_descr: Option<String>,
    #[serde(default)]
    stream_session_id: Option<String>,
}

// ─── Wire formats ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MarginLevelWire {
    balance: f64,
    equity: f64,
    margin: f64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct TradeWire {
    symbol: String,
    position: u64,
    cmd: u8,
    volume: f64,
    open_price: f64,
    /// Milliseconds since the epoch.
    open_time: i64,
    #[serde(default)]
    profit: Option<f64>,
    close_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolWire {
    symbol: String,
    contract_size: f64,
    tick_size: f64,
    tick_value: f64,
    leverage: f64,
    lot_min: f64,
    ask: f64,
    bid: f64,
    currency_profit: String,
}

#[derive(Debug, Deserialize)]
struct MarginTradeWire {
    margin: f64,
}

#[derive(Debug, Deserialize)]
struct OrderWire {
    order: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusWire {
    order: u64,
    request_status: u8,
    #[serde(default)]
    ask: f64,
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartWire {
    digits: i32,
    rate_infos: Vec<RateWire>,
}

/// `open` is absolute; `high`, `low` and `close` are offsets from it, all in
/// points of `10^-digits`.
#[derive(Debug, Deserialize)]
struct RateWire {
    ctm: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    vol: f64,
}

fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

fn trade_side(cmd: u8) -> Option<OrderSide> {
    match cmd {
        0 => Some(OrderSide::Buy),
        1 => Some(OrderSide::Sell),
        _ => None,
    }
}

fn side_cmd(side: OrderSide) -> u8 {
    match side {
        OrderSide::Buy => 0,
        OrderSide::Sell => 1,
    }
}

fn into_open_trade(wire: TradeWire) -> Option<OpenTrade> {
    Some(OpenTrade {
        lot_id: wire.position,
        side: trade_side(wire.cmd)?,
        opened_at: from_millis(wire.open_time)?,
        symbol: wire.symbol,
        volume: wire.volume,
        open_price: wire.open_price,
        profit: wire.profit.unwrap_or(0.0),
        close_price: wire.close_price,
    })
}

fn into_bars(symbol: &str, chart: ChartWire) -> Vec<Bar> {
    let scale = 10f64.powi(-chart.digits);
    chart
        .rate_infos
        .into_iter()
        .filter_map(|rate| {
            let datetime = from_millis(rate.ctm)?;
            let open = rate.open * scale;
            let close = (rate.open + rate.close) * scale;
            Some(Bar {
                symbol: symbol.to_string(),
                datetime,
                open,
                high: (rate.open + rate.high) * scale,
                low: (rate.open + rate.low) * scale,
                close,
                adj_close: close,
                volume: rate.vol.max(0.0) as u64,
            })
        })
        .collect()
}

fn transaction_arguments(transaction: &TradeTransaction) -> Value {
    json!({
        "tradeTransInfo": {
            "cmd": side_cmd(transaction.side),
            "customComment": transaction.comment,
            "expiration": 0,
            "offset": 0,
            "order": transaction.lot_id,
            // Market orders ignore the price, but it must be non-zero.
            "price": 1.0,
            "sl": 0.0,
            "symbol": transaction.symbol,
            "tp": 0.0,
            "type": transaction.kind.code(),
            "volume": transaction.volume,
        }
    })
}

// ─── Client ──────────────────────────────────────────────────────────

pub struct XtbClient {
    http: reqwest::blocking::Client,
    config: XtbConfig,
    session: Mutex<Option<String>>,
    base_delay: Duration,
}

impl XtbClient {
    /// Build the HTTP client and log in.
    pub fn connect(config: XtbConfig) -> Result<Self, BrokerError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrokerError::NetworkUnreachable(e.to_string()))?;
        let client = Self {
            http,
            config,
            session: Mutex::new(None),
            base_delay: Duration::from_millis(500),
        };
        client.login()?;
        Ok(client)
    }

    fn login(&self) -> Result<(), BrokerError> {
        let arguments = json!({
            "userId": self.config.user_id,
            "password": self.config.password,
            "appName": self.config.app_name,
        });
        let envelope = self.send("login", arguments).map_err(|e| match e {
            BrokerError::Api { code, description, .. } => {
                BrokerError::Login(format!("{code} {description}"))
            }
            other => other,
        })?;
        let session = envelope.stream_session_id;
        if let Ok(mut guard) = self.session.lock() {
            *guard = session;
        }
        info!(user = %self.config.user_id, "logged in to XTB");
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.session.lock().ok().and_then(|guard| guard.clone())
    }

    /// One command with retry on connection failures.
    fn send(&self, command: &str, arguments: Value) -> Result<Envelope, BrokerError> {
        let body = Command { command, arguments };
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                std::thread::sleep(delay);
            }

            let mut request = self.http.post(&self.config.base_url).json(&body);
            if let Some(session) = self.session_id() {
                request = request.header("Authorization", session);
            }

            match request.send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        warn!(command, %status, attempt, "XTB server error");
                        last_error = Some(BrokerError::NetworkUnreachable(format!("HTTP {status}")));
                        continue;
                    }
                    let envelope: Envelope = resp.json().map_err(|e| BrokerError::ResponseFormat {
                        command: command.to_string(),
                        message: e.to_string(),
                    })?;
                    if !envelope.status {
                        return Err(BrokerError::Api {
                            command: command.to_string(),
                            code: envelope.error_code.unwrap_or_default(),
                            description: envelope.error_descr.unwrap_or_default(),
                        });
                    }
                    debug!(command, "XTB command ok");
                    return Ok(envelope);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(command, attempt, error = %e, "XTB request failed");
                    last_error = Some(BrokerError::NetworkUnreachable(e.to_string()));
                }
                Err(e) => return Err(BrokerError::NetworkUnreachable(e.to_string())),
            }
        }

        Err(last_error.unwrap_or_else(|| BrokerError::NetworkUnreachable("max retries exceeded".into())))
    }

    fn command<T: DeserializeOwned>(&self, command: &str, arguments: Value) -> Result<T, BrokerError> {
        let envelope = self.send(command, arguments)?;
        serde_json::from_value(envelope.return_data).map_err(|e| BrokerError::ResponseFormat {
            command: command.to_string(),
            message: e.to_string(),
        })
    }
}

impl BrokerClient for XtbClient {
    fn name(&self) -> &str {
        "xtb"
    }

    fn account_info(&self) -> Result<AccountInfo, BrokerError> {
        let wire: MarginLevelWire = self.command("getMarginLevel", Value::Null)?;
        Ok(AccountInfo {
            balance: wire.balance,
            equity: wire.equity,
            margin: wire.margin,
            currency: wire.currency,
        })
    }

    fn open_trades(&self) -> Result<Vec<OpenTrade>, BrokerError> {
        let wire: Vec<TradeWire> = self.command("getTrades", json!({ "openedOnly": true }))?;
        Ok(wire.into_iter().filter_map(into_open_trade).collect())
    }

    fn symbol(&self, symbol: &str) -> Result<BrokerSymbol, BrokerError> {
        let wire: SymbolWire = self
            .command("getSymbol", json!({ "symbol": symbol }))
            .map_err(|e| match e {
                BrokerError::Api { .. } => BrokerError::SymbolNotFound { symbol: symbol.to_string() },
                other => other,
            })?;
        Ok(BrokerSymbol {
            symbol: wire.symbol,
            contract_size: wire.contract_size,
            tick_size: wire.tick_size,
            tick_value: wire.tick_value,
            leverage: wire.leverage,
            lot_min: wire.lot_min,
            ask: wire.ask,
            bid: wire.bid,
            currency_profit: wire.currency_profit,
        })
    }

    fn margin_requirement(&self, symbol: &str, volume: f64) -> Result<f64, BrokerError> {
        let wire: MarginTradeWire =
            self.command("getMarginTrade", json!({ "symbol": symbol, "volume": volume }))?;
        Ok(wire.margin)
    }

    fn submit(&self, transaction: &TradeTransaction) -> Result<u64, BrokerError> {
        let wire: OrderWire = self.command("tradeTransaction", transaction_arguments(transaction))?;
        Ok(wire.order)
    }

    fn transaction_status(&self, order: u64) -> Result<TransactionStatus, BrokerError> {
        let wire: StatusWire = self.command("tradeTransactionStatus", json!({ "order": order }))?;
        let status = RequestStatus::from_code(wire.request_status).ok_or_else(|| {
            BrokerError::ResponseFormat {
                command: "tradeTransactionStatus".into(),
                message: format!("unknown request status {}", wire.request_status),
            }
        })?;
        Ok(TransactionStatus {
            order: wire.order,
            status,
            ask: wire.ask,
            bid: wire.bid,
            message: wire.message,
        })
    }

    fn chart_bars(&self, symbol: &str, period_minutes: u32, count: usize) -> Result<Vec<Bar>, BrokerError> {
        let ticks = -(i64::try_from(count).unwrap_or(i64::MAX));
        let arguments = json!({
            "info": {
                "period": period_minutes,
                "start": Utc::now().timestamp_millis(),
                "symbol": symbol,
                "ticks": ticks,
            }
        });
        let chart: ChartWire = self.command("getChartRangeRequest", arguments)?;
        let mut bars = into_bars(symbol, chart);
        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::TransactionKind;

    #[test]
    fn envelope_parses_error_reply() {
        let raw = r#"{"status": false, "errorCode": "BE005", "errorDescr": "userPasswordCheck: Invalid login or password"}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert!(!envelope.status);
        assert_eq!(envelope.error_code.as_deref(), Some("BE005"));
        assert!(envelope.return_data.is_null());
    }

    #[test]
    fn trades_keep_side_and_millis() {
        let raw = r#"{"symbol": "GOLD", "position": 7, "cmd": 1, "volume": 0.05,
                      "open_price": 1900.5, "open_time": 1704186000000,
                      "profit": -3.2, "close_price": 1901.0}"#;
        let trade = into_open_trade(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(trade.side, OrderSide::Sell);
        assert_eq!(trade.lot_id, 7);
        assert_eq!(trade.opened_at.to_string(), "2024-01-02 09:00:00");
    }

    #[test]
    fn unknown_cmd_is_skipped() {
        let raw = r#"{"symbol": "GOLD", "position": 7, "cmd": 4, "volume": 0.05,
                      "open_price": 1900.5, "open_time": 0, "close_price": 0.0}"#;
        assert!(into_open_trade(serde_json::from_str(raw).unwrap()).is_none());
    }

    #[test]
    fn rates_are_offsets_from_open() {
        let raw = r#"{"digits": 2, "rateInfos": [
            {"ctm": 1704186000000, "open": 190050.0, "high": 120.0, "low": -30.0, "close": 50.0, "vol": 12.0}
        ]}"#;
        let bars = into_bars("GOLD", serde_json::from_str(raw).unwrap());
        assert_eq!(bars.len(), 1);
        assert!((bars[0].open - 1900.5).abs() < 1e-9);
        assert!((bars[0].high - 1901.7).abs() < 1e-9);
        assert!((bars[0].low - 1900.2).abs() < 1e-9);
        assert!((bars[0].close - 1901.0).abs() < 1e-9);
        assert_eq!(bars[0].volume, 12);
    }

    #[test]
    fn transaction_arguments_use_codes() {
        let args = transaction_arguments(&TradeTransaction {
            kind: TransactionKind::Close,
            side: OrderSide::Buy,
            symbol: "GOLD".into(),
            volume: 0.02,
            lot_id: 99,
            comment: "exit".into(),
        });
        let info = &args["tradeTransInfo"];
        assert_eq!(info["type"], 2);
        assert_eq!(info["cmd"], 0);
        assert_eq!(info["order"], 99);
    }
}
