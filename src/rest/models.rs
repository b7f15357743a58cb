//! REST API request and response models
//!
//! Numeric money fields arrive as JSON numbers or strings depending on the
//! endpoint, so the flexible decimal deserializer is used throughout.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Standard response wrapper: `{success, data, message}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of a successful oauth2 login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub access_token: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Trader account snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub balance: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub equity: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub margin: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub margin_free: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub leverage: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub status: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub id: i64,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub symbol_id: Option<i64>,
    #[serde(default)]
    pub symbol: Option<Value>,
    #[serde(default)]
    pub side: Option<i32>,
    #[serde(rename = "type", default)]
    pub order_type: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume_initial: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume_current: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price_order: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price_sl: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price_tp: Option<Decimal>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub time_setup: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Position {
    pub id: i64,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub symbol_id: Option<i64>,
    #[serde(default)]
    pub symbol: Option<Value>,
    #[serde(default)]
    pub side: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume_initial: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume_current: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price_open: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price_current: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price_sl: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price_tp: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub status: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub id: i64,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub digits: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub last_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub last_ask: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume_min: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume_max: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deal {
    pub id: i64,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub symbol_id: Option<i64>,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub position_id: Option<i64>,
    #[serde(default)]
    pub side: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// One bar of symbol tick history
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTick {
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub open: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub high: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub low: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub close: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub bid: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub ask: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub account_id: i64,
    pub user_id: i64,
    pub symbol_id: i64,
    pub volume: Decimal,
    pub order_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<i32>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub order_type: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_sl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_tp: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_expiration: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOrderRequest {
    pub id: i64,
    pub account_id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_sl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_tp: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOrderRequest {
    pub id: i64,
    pub account_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApproveOrderRequest {
    pub id: i64,
    pub account_id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePositionRequest {
    pub id: i64,
    pub account_id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_sl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_tp: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosePositionRequest {
    pub id: i64,
    pub account_id: i64,
    pub user_id: i64,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAccountRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
}

/// Query parameters for tick history. `from`/`to` are unix timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct TicksHistoryQuery {
    pub from: i64,
    pub to: i64,
    pub resolution: String,
    pub count_back: i64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub tick_type: Option<String>,
}

/// Query parameters for deal listing
#[derive(Debug, Clone, Default, Serialize)]
pub struct DealsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Accept decimals encoded as JSON numbers or strings; treat null and the
/// empty string as absent
fn deserialize_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Value::Number(n)) => n
            .to_string()
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid decimal value: {other}"
        ))),
    }
}
