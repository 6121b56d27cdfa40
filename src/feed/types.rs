use crate::error::AppError;
use crate::feed::backoff::BackoffPolicy;
use crate::feed::binance::{trade_stream_endpoint, DEFAULT_TRADE_STREAM_URL};
use chrono::{DateTime, Utc};
use config::{Config, Environment};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const HISTORY_CAPACITY: usize = 50;
pub const PRICE_DECIMALS: u32 = 2;
pub const QUANTITY_DECIMALS: u32 = 4;

pub const NORMAL_CLOSURE_CODE: u16 = 1000;
pub const ABNORMAL_CLOSURE_CODE: u16 = 1006;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEARTBEAT_KEY: &str = "ping";
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 300_000;
pub const MIN_BACKOFF_BASE_MS: u64 = 100;
pub const MAX_BACKOFF_BASE_MS: u64 = 60_000;
pub const MAX_BACKOFF_CAP_MS: u64 = 600_000;

pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_ERROR: &str = "Connection error";
pub const STATUS_DISCONNECTED: &str = "Disconnected";

pub const ENV_PREFIX: &str = "TRADE_FEED";
pub const ENV_URL: &str = "TRADE_FEED_URL";
pub const ENV_SYMBOL: &str = "TRADE_FEED_SYMBOL";
pub const ENV_HEARTBEAT_MS: &str = "TRADE_FEED_HEARTBEAT_MS";
pub const ENV_HEARTBEAT_KEY: &str = "TRADE_FEED_HEARTBEAT_KEY";
pub const ENV_BACKOFF_BASE_MS: &str = "TRADE_FEED_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_CAP_MS: &str = "TRADE_FEED_BACKOFF_CAP_MS";
pub const ENV_LOG_JSON: &str = "TRADE_FEED_LOG_JSON";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[serde(rename_all = "camelCase")]
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    Errored,
    Closed,
}

impl ConnectionState {
    pub fn status_label(&self) -> String {
        match self {
            Self::Connecting => STATUS_CONNECTING.to_string(),
            Self::Connected => STATUS_CONNECTED.to_string(),
            Self::Errored => STATUS_ERROR.to_string(),
            Self::Reconnecting { delay_ms, .. } => format!(
                "{STATUS_DISCONNECTED} - Reconnecting in {}s...",
                format_delay_secs(*delay_ms)
            ),
            Self::Closed => STATUS_DISCONNECTED.to_string(),
        }
    }
}

fn format_delay_secs(delay_ms: u64) -> String {
    if delay_ms % 1_000 == 0 {
        (delay_ms / 1_000).to_string()
    } else {
        format!("{:.1}", delay_ms as f64 / 1_000.0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    price: Decimal,
    quantity: Decimal,
    display_text: String,
    observed_at: DateTime<Utc>,
}

impl TradeEvent {
    pub fn new(price: Decimal, quantity: Decimal, observed_at: DateTime<Utc>) -> Self {
        let price = round_fixed(price, PRICE_DECIMALS);
        let quantity = round_fixed(quantity, QUANTITY_DECIMALS);
        Self {
            display_text: format!("Price: ${price}, Quantity: {quantity}"),
            price,
            quantity,
            observed_at,
        }
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn price_label(&self) -> String {
        format!("Price: ${}", self.price)
    }

    pub fn quantity_label(&self) -> String {
        format!("Quantity: {}", self.quantity)
    }
}

pub fn round_fixed(value: Decimal, decimals: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(decimals);
    rounded
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeedSnapshot {
    pub state: ConnectionState,
    pub status: String,
    pub url: String,
    pub reconnect_attempts: u32,
    pub reason: Option<String>,
    pub trades: Vec<TradeEvent>,
}

impl TradeFeedSnapshot {
    pub fn stopped(url: String, reason: Option<String>) -> Self {
        Self {
            state: ConnectionState::Closed,
            status: ConnectionState::Closed.status_label(),
            url,
            reconnect_attempts: 0,
            reason,
            trades: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    pub fn can_clear(&self) -> bool {
        !self.trades.is_empty()
    }

    pub fn last_trade_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.trades
            .first()
            .map(|latest| now.signed_duration_since(latest.observed_at()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartTradeFeedArgs {
    pub url: Option<String>,
    pub symbol: Option<String>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_key: Option<String>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeFeedConfig {
    pub url: String,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_key: String,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl TradeFeedConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }
}

impl StartTradeFeedArgs {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(TradeFeedEnv::load()?.into_args())
    }

    pub fn normalize(self) -> Result<TradeFeedConfig, AppError> {
        let url = match (self.url, self.symbol) {
            (Some(url), _) => {
                let url = url.trim().to_string();
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    return Err(AppError::InvalidArgument(
                        "url must use the ws:// or wss:// scheme".to_string(),
                    ));
                }
                url
            }
            (None, Some(symbol)) => {
                let symbol = symbol.trim().to_string();
                if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                    return Err(AppError::InvalidArgument(
                        "symbol must be non-empty alphanumeric ASCII".to_string(),
                    ));
                }
                trade_stream_endpoint(&symbol)
            }
            (None, None) => DEFAULT_TRADE_STREAM_URL.to_string(),
        };

        let heartbeat_interval_ms = self
            .heartbeat_interval_ms
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&heartbeat_interval_ms)
        {
            return Err(AppError::InvalidArgument(format!(
                "heartbeatIntervalMs must be between {MIN_HEARTBEAT_INTERVAL_MS} and {MAX_HEARTBEAT_INTERVAL_MS}"
            )));
        }

        let heartbeat_key = self
            .heartbeat_key
            .unwrap_or_else(|| DEFAULT_HEARTBEAT_KEY.to_string())
            .trim()
            .to_string();
        if heartbeat_key.is_empty() {
            return Err(AppError::InvalidArgument(
                "heartbeatKey must not be empty".to_string(),
            ));
        }

        let backoff_base_ms = self.backoff_base_ms.unwrap_or(DEFAULT_BACKOFF_BASE_MS);
        if !(MIN_BACKOFF_BASE_MS..=MAX_BACKOFF_BASE_MS).contains(&backoff_base_ms) {
            return Err(AppError::InvalidArgument(format!(
                "backoffBaseMs must be between {MIN_BACKOFF_BASE_MS} and {MAX_BACKOFF_BASE_MS}"
            )));
        }

        let backoff_cap_ms = self.backoff_cap_ms.unwrap_or(DEFAULT_BACKOFF_CAP_MS);
        if !(backoff_base_ms..=MAX_BACKOFF_CAP_MS).contains(&backoff_cap_ms) {
            return Err(AppError::InvalidArgument(format!(
                "backoffCapMs must be between backoffBaseMs ({backoff_base_ms}) and {MAX_BACKOFF_CAP_MS}"
            )));
        }

        Ok(TradeFeedConfig {
            url,
            heartbeat_interval_ms,
            heartbeat_key,
            backoff_base_ms,
            backoff_cap_ms,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TradeFeedEnv {
    pub url: Option<String>,
    pub symbol: Option<String>,
    pub heartbeat_ms: Option<u64>,
    pub heartbeat_key: Option<String>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub log_json: Option<bool>,
}

impl TradeFeedEnv {
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(None)
    }

    // `source` replaces the process environment when given.
    pub fn load_from(source: Option<config::Map<String, String>>) -> Result<Self, AppError> {
        Config::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true)
                    .ignore_empty(true)
                    .source(source),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|error| {
                AppError::InvalidArgument(format!("invalid {ENV_PREFIX}_* environment: {error}"))
            })
    }

    pub fn json_logs(&self) -> bool {
        self.log_json.unwrap_or(false)
    }

    pub fn into_args(self) -> StartTradeFeedArgs {
        StartTradeFeedArgs {
            url: self.url,
            symbol: self.symbol,
            heartbeat_interval_ms: self.heartbeat_ms,
            heartbeat_key: self.heartbeat_key,
            backoff_base_ms: self.backoff_base_ms,
            backoff_cap_ms: self.backoff_cap_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeedSession {
    pub running: bool,
    pub url: String,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_key: String,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub history_capacity: usize,
}

impl TradeFeedSession {
    pub fn from_config(config: &TradeFeedConfig) -> Self {
        Self {
            running: true,
            url: config.url.clone(),
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            heartbeat_key: config.heartbeat_key.clone(),
            backoff_base_ms: config.backoff_base_ms,
            backoff_cap_ms: config.backoff_cap_ms,
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFeedStopResult {
    pub stopped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn decimal(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("decimal literal should parse")
    }

    #[test]
    fn status_labels_match_consumer_contract() {
        assert_eq!(ConnectionState::Connecting.status_label(), "Connecting...");
        assert_eq!(ConnectionState::Connected.status_label(), "Connected");
        assert_eq!(ConnectionState::Errored.status_label(), "Connection error");
        assert_eq!(
            ConnectionState::Reconnecting {
                attempt: 1,
                delay_ms: 5_000
            }
            .status_label(),
            "Disconnected - Reconnecting in 5s..."
        );
        assert_eq!(ConnectionState::Closed.status_label(), "Disconnected");
    }

    #[test]
    fn reconnect_label_keeps_fractional_seconds() {
        let state = ConnectionState::Reconnecting {
            attempt: 1,
            delay_ms: 2_500,
        };
        assert_eq!(state.status_label(), "Disconnected - Reconnecting in 2.5s...");
    }

    #[test]
    fn trade_event_rounds_to_display_precision() {
        let event = TradeEvent::new(decimal("600.12345"), decimal("1.23456"), Utc::now());

        assert_eq!(event.price().to_string(), "600.12");
        assert_eq!(event.quantity().to_string(), "1.2346");
        assert_eq!(event.display_text(), "Price: $600.12, Quantity: 1.2346");
        assert_eq!(event.price_label(), "Price: $600.12");
        assert_eq!(event.quantity_label(), "Quantity: 1.2346");
    }

    #[test]
    fn trade_event_pads_and_rounds_half_away_from_zero() {
        let event = TradeEvent::new(decimal("600.125"), decimal("2"), Utc::now());

        assert_eq!(event.price().to_string(), "600.13");
        assert_eq!(event.quantity().to_string(), "2.0000");
    }

    #[test]
    fn snapshot_helpers_reflect_history() {
        let mut snapshot = TradeFeedSnapshot::stopped("wss://example".to_string(), None);
        assert!(!snapshot.can_clear());
        assert!(!snapshot.is_connected());
        assert!(snapshot.last_trade_age(Utc::now()).is_none());

        let observed_at = Utc::now();
        snapshot
            .trades
            .push(TradeEvent::new(decimal("1"), decimal("1"), observed_at));
        snapshot.state = ConnectionState::Connected;

        assert!(snapshot.can_clear());
        assert!(snapshot.is_connected());
        assert_eq!(snapshot.trade_count(), 1);
        let age = snapshot
            .last_trade_age(observed_at + chrono::Duration::seconds(3))
            .expect("age should exist with a trade present");
        assert_eq!(age.num_seconds(), 3);
    }

    #[test]
    fn snapshot_serializes_with_camel_case_keys() {
        let snapshot = TradeFeedSnapshot::stopped("wss://example".to_string(), None);
        let json = simd_json::serde::to_string(&snapshot).expect("snapshot should serialize");

        assert!(json.contains("\"reconnectAttempts\":0"));
        assert!(json.contains("\"kind\":\"closed\""));
        assert!(json.contains("\"status\":\"Disconnected\""));
    }

    #[test]
    fn normalizes_start_args_defaults() {
        let config = StartTradeFeedArgs::default()
            .normalize()
            .expect("defaults should be valid");

        assert_eq!(config.url, DEFAULT_TRADE_STREAM_URL);
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert_eq!(config.heartbeat_key, DEFAULT_HEARTBEAT_KEY);
        assert_eq!(config.backoff_base_ms, DEFAULT_BACKOFF_BASE_MS);
        assert_eq!(config.backoff_cap_ms, DEFAULT_BACKOFF_CAP_MS);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn builds_url_from_symbol() {
        let config = StartTradeFeedArgs {
            symbol: Some("BTCUSDT".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("symbol should be valid");

        assert!(config.url.ends_with("/btcusdt@trade"));
    }

    #[test]
    fn rejects_non_websocket_url() {
        let result = StartTradeFeedArgs {
            url: Some("https://stream.binance.com".to_string()),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_symbol() {
        let result = StartTradeFeedArgs {
            symbol: Some("btc/usdt".to_string()),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_heartbeat_interval_range() {
        let result = StartTradeFeedArgs {
            heartbeat_interval_ms: Some(10),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_cap_below_base() {
        let result = StartTradeFeedArgs {
            backoff_base_ms: Some(10_000),
            backoff_cap_ms: Some(5_000),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    fn env(vars: &[(&str, &str)]) -> Result<TradeFeedEnv, AppError> {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        TradeFeedEnv::load_from(Some(source))
    }

    #[test]
    fn reads_args_from_prefixed_environment() {
        let args = env(&[
            (ENV_SYMBOL, "ethusdt"),
            (ENV_HEARTBEAT_MS, "15000"),
            (ENV_BACKOFF_BASE_MS, "1000"),
            (ENV_HEARTBEAT_KEY, ""),
            ("UNRELATED_URL", "wss://elsewhere"),
        ])
        .expect("environment values should parse")
        .into_args();

        assert_eq!(args.symbol.as_deref(), Some("ethusdt"));
        assert_eq!(args.heartbeat_interval_ms, Some(15_000));
        assert_eq!(args.backoff_base_ms, Some(1_000));
        assert_eq!(args.heartbeat_key, None);
        assert_eq!(args.url, None);
        assert_eq!(args.backoff_cap_ms, None);
    }

    #[test]
    fn environment_url_and_cap_reach_normalized_config() {
        let config = env(&[
            (ENV_URL, "ws://127.0.0.1:9001/feed"),
            (ENV_BACKOFF_CAP_MS, "45000"),
        ])
        .expect("environment values should parse")
        .into_args()
        .normalize()
        .expect("environment config should be valid");

        assert_eq!(config.url, "ws://127.0.0.1:9001/feed");
        assert_eq!(config.backoff_cap_ms, 45_000);
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let loaded = env(&[]).expect("empty environment should load");
        assert_eq!(loaded, TradeFeedEnv::default());
        assert!(!loaded.json_logs());
    }

    #[test]
    fn rejects_unparseable_env_number() {
        let result = env(&[(ENV_BACKOFF_CAP_MS, "soon")]);
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn json_log_flag_accepts_truthy_values() {
        assert!(env(&[(ENV_LOG_JSON, "1")]).expect("flag should parse").json_logs());
        assert!(env(&[(ENV_LOG_JSON, "true")]).expect("flag should parse").json_logs());
        assert!(!env(&[(ENV_LOG_JSON, "false")]).expect("flag should parse").json_logs());
    }
}
