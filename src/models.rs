use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ===== Direction =====
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

// ===== Open position =====
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub price_open: f64,
    pub price_current: f64,
    /// 0.0 = no stop loss set.
    pub stop_loss: f64,
    /// 0.0 = no take profit set.
    pub take_profit: f64,
    pub profit: f64,
    pub swap: f64,
    pub time: DateTime<Utc>,
    pub time_update: DateTime<Utc>,
    pub magic_number: i64,
    pub comment: String,
}

// ===== Events detected by the watcher =====
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "MODIFIED_SL")]
    ModifiedSl,
    #[serde(rename = "MODIFIED_TP")]
    ModifiedTp,
    #[serde(rename = "PARTIAL_CLOSE")]
    PartialClose,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::New => "NEW",
            EventKind::Closed => "CLOSED",
            EventKind::ModifiedSl => "MODIFIED_SL",
            EventKind::ModifiedTp => "MODIFIED_TP",
            EventKind::PartialClose => "PARTIAL_CLOSE",
        };
        write!(f, "{s}")
    }
}

/// A structural difference between two consecutive master snapshots.
///
/// NEW carries only `position`; CLOSED carries only `previous_position`;
/// modifications and partial closes carry both.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub kind: EventKind,
    pub master_ticket: i64,
    pub position: Option<Position>,
    pub previous_position: Option<Position>,
    pub detected_at: DateTime<Utc>,
}

impl TradeEvent {
    pub fn new(
        kind: EventKind,
        master_ticket: i64,
        position: Option<Position>,
        previous_position: Option<Position>,
    ) -> Self {
        Self {
            kind,
            master_ticket,
            position,
            previous_position,
            detected_at: Utc::now(),
        }
    }
}

// ===== Order operations =====
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrderRequest<'a> {
    pub symbol: &'a str,
    pub direction: Direction,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub slippage: i32,
    pub magic_number: i64,
    pub comment: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub ticket: Option<i64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl OrderResult {
    pub fn reason(&self) -> String {
        match (&self.error_code, &self.error_message) {
            (Some(code), Some(msg)) => format!("code {code}: {msg}"),
            (Some(code), None) => format!("code {code}"),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "no reason given".to_string(),
        }
    }
}

// ===== Symbol trading info =====
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub volume_step: f64,
    #[serde(default)]
    pub volume_min: f64,
    #[serde(default)]
    pub volume_max: f64,
    #[serde(default)]
    pub tick_value: f64,
    #[serde(default)]
    pub tick_size: f64,
}

// ===== Master → slave position mapping =====
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionMapping {
    pub master_ticket: i64,
    pub slave_ticket: i64,
    pub symbol: String,
    pub direction: Direction,
    pub master_volume: f64,
    pub slave_volume: f64,
    pub master_open_price: f64,
    pub slave_open_price: f64,
    #[serde(default)]
    pub master_sl: f64,
    #[serde(default)]
    pub master_tp: f64,
    #[serde(default)]
    pub slave_sl: f64,
    #[serde(default)]
    pub slave_tp: f64,
    #[serde(default)]
    pub opened_at: String,
    /// Retained for store-format compatibility; always 0.0 under 1:1 copying.
    #[serde(default)]
    pub risk_percent: f64,
}
