//! Event models for the OMTrader WebSocket stream

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Outbound heartbeat ping, sent as a raw text frame
pub const HEARTBEAT_PING: &str = "9";
/// Inbound heartbeat acknowledgment, swallowed as a no-op
pub const HEARTBEAT_PONG: &str = "10";
/// Inbound profit-update shorthand frames start with this prefix
pub const PROFIT_UPDATE_PREFIX: &str = "s,";

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}

/// Stable event-type identifiers. The string form is both the subscription
/// key and the literal value transmitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // System
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    // Session
    #[serde(rename = "session_logout")]
    SessionLogout,
    // Market data subscription control
    #[serde(rename = "market_subscribe_symbol")]
    MarketSubscribeSymbol,
    #[serde(rename = "market_unsubscribe_symbol")]
    MarketUnsubscribeSymbol,
    // Account control
    #[serde(rename = "start_account_all")]
    StartAccountAll,
    #[serde(rename = "stop_account_all")]
    StopAccountAll,
    // Order lifecycle
    #[serde(rename = "orders_place")]
    OrdersPlace,
    #[serde(rename = "orders_update")]
    OrdersUpdate,
    #[serde(rename = "orders_cancel")]
    OrdersCancel,
    #[serde(rename = "orders_expired")]
    OrdersExpired,
    #[serde(rename = "orders_rejected")]
    OrdersRejected,
    #[serde(rename = "dealing_order_requote")]
    OrdersRequoted,
    // Position lifecycle
    #[serde(rename = "positions_open")]
    PositionsOpen,
    #[serde(rename = "positions_update")]
    PositionsUpdate,
    #[serde(rename = "positions_close")]
    PositionsClose,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Info => "info",
            EventType::Error => "error",
            EventType::Ping => "ping",
            EventType::Pong => "pong",
            EventType::SessionLogout => "session_logout",
            EventType::MarketSubscribeSymbol => "market_subscribe_symbol",
            EventType::MarketUnsubscribeSymbol => "market_unsubscribe_symbol",
            EventType::StartAccountAll => "start_account_all",
            EventType::StopAccountAll => "stop_account_all",
            EventType::OrdersPlace => "orders_place",
            EventType::OrdersUpdate => "orders_update",
            EventType::OrdersCancel => "orders_cancel",
            EventType::OrdersExpired => "orders_expired",
            EventType::OrdersRejected => "orders_rejected",
            EventType::OrdersRequoted => "dealing_order_requote",
            EventType::PositionsOpen => "positions_open",
            EventType::PositionsUpdate => "positions_update",
            EventType::PositionsClose => "positions_close",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope for all JSON-based events.
///
/// Only `type` and `data` travel on the wire; the timestamp records the
/// moment of construction.
#[derive(Debug, Clone, Serialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Option<Value>,
    #[serde(skip_serializing)]
    pub timestamp: DateTime<Utc>,
}

impl WsMessage {
    pub fn new(event_type: EventType, data: Option<Value>) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Classified inbound frame. Tags stay as raw strings here so that unknown
/// event types flow through dispatch as a no-op instead of a decode failure.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Literal `"10"` heartbeat acknowledgment
    HeartbeatAck,
    /// `"s,"`-prefixed profit-update shorthand; carries the raw payload
    /// after the prefix
    ProfitUpdate(String),
    /// JSON envelope `{type, data}`
    Event { event_type: String, data: Option<Value> },
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Classify a raw inbound text frame per the wire format.
///
/// Malformed JSON is an error for the caller to log and drop; it is never
/// fatal and never reaches subscribers.
pub fn classify_frame(text: &str) -> Result<InboundFrame, EventError> {
    if text == HEARTBEAT_PONG {
        return Ok(InboundFrame::HeartbeatAck);
    }
    if let Some(payload) = text.strip_prefix(PROFIT_UPDATE_PREFIX) {
        return Ok(InboundFrame::ProfitUpdate(payload.to_string()));
    }
    let envelope: InboundEnvelope =
        serde_json::from_str(text).map_err(|e| EventError::InvalidFormat(e.to_string()))?;
    Ok(InboundFrame::Event {
        event_type: envelope.event_type,
        data: envelope.data,
    })
}

/// Decode an envelope `data` payload into a typed struct
pub fn decode_data<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, EventError> {
    serde_json::from_value(data.clone()).map_err(|e| EventError::InvalidFormat(e.to_string()))
}

// ============================================================================
// Typed payloads, keyed by the envelope's event type
// ============================================================================

/// Payload of `orders_*` lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub price: Option<Decimal>,
}

/// Payload of `positions_*` lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    #[serde(default)]
    pub position_id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub volume: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub current_price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub profit: Option<Decimal>,
}

/// Payload of market data ticks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub bid: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal_opt")]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload of `error` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

/// Deserialize an optional decimal from either string or number
fn deserialize_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("Invalid decimal string: {}", s))),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(Decimal::from(i)))
            } else if let Some(f) = n.as_f64() {
                Decimal::try_from(f)
                    .map(Some)
                    .map_err(|_| D::Error::custom(format!("Invalid decimal number: {}", f)))
            } else {
                Err(D::Error::custom(format!("Invalid decimal number: {}", n)))
            }
        }
        Some(other) => Err(D::Error::custom(format!(
            "expected decimal, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_values_round_trip() {
        for (event_type, wire) in [
            (EventType::OrdersUpdate, "orders_update"),
            (EventType::OrdersRequoted, "dealing_order_requote"),
            (EventType::PositionsClose, "positions_close"),
            (EventType::MarketSubscribeSymbol, "market_subscribe_symbol"),
        ] {
            assert_eq!(event_type.as_str(), wire);
            let encoded = serde_json::to_string(&event_type).unwrap();
            assert_eq!(encoded, format!("\"{}\"", wire));
            let decoded: EventType = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, event_type);
        }
    }

    #[test]
    fn test_envelope_serialization_omits_timestamp() {
        let msg = WsMessage::new(EventType::MarketSubscribeSymbol, Some(json!(1)));
        let encoded = serde_json::to_string(&msg).unwrap();
        assert_eq!(encoded, r#"{"type":"market_subscribe_symbol","data":1}"#);
    }

    #[test]
    fn test_classify_heartbeat_ack() {
        assert!(matches!(classify_frame("10"), Ok(InboundFrame::HeartbeatAck)));
    }

    #[test]
    fn test_classify_profit_update() {
        match classify_frame("s,7,12.5").unwrap() {
            InboundFrame::ProfitUpdate(payload) => assert_eq!(payload, "7,12.5"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_classify_json_envelope() {
        match classify_frame(r#"{"type":"orders_update","data":{"id":42}}"#).unwrap() {
            InboundFrame::Event { event_type, data } => {
                assert_eq!(event_type, "orders_update");
                assert_eq!(data, Some(json!({"id": 42})));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_classify_unknown_tag_still_parses() {
        // New tags must not break decoding; dispatch just finds no subscribers
        match classify_frame(r#"{"type":"totally_new_event"}"#).unwrap() {
            InboundFrame::Event { event_type, data } => {
                assert_eq!(event_type, "totally_new_event");
                assert!(data.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_classify_malformed_json() {
        assert!(classify_frame("{not json").is_err());
    }

    #[test]
    fn test_decode_order_update_flexible_numbers() {
        let data = json!({
            "order_id": "42",
            "symbol": "EURUSD",
            "volume": "0.01",
            "price": 1.2
        });
        let update: OrderUpdate = decode_data(&data).unwrap();
        assert_eq!(update.order_id.as_deref(), Some("42"));
        assert_eq!(update.volume, Some(dec!(0.01)));
        assert_eq!(update.price, Some(dec!(1.2)));
        assert!(update.status.is_none());
    }

    #[test]
    fn test_decode_position_update() {
        let data = json!({"position_id": "7", "profit": -3.25});
        let update: PositionUpdate = decode_data(&data).unwrap();
        assert_eq!(update.position_id.as_deref(), Some("7"));
        assert_eq!(update.profit, Some(dec!(-3.25)));
    }
}
