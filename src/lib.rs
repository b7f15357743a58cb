//! OMTrader client SDK: REST API access plus a WebSocket client for
//! real-time account, order, position, and market events.

pub mod config;
pub mod logging;
pub mod rest;
pub mod ws;

pub use config::{ConfigError, Credentials, RestConfig};
pub use rest::{RestClient, RestError};
pub use ws::{ConnectionState, EventType, WsClient, WsConfig, WsError};
