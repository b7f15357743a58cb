//! WebSocket streaming module for OMTrader real-time data
//!
//! This module provides:
//! - WebSocket client with a command-channel connection task
//! - Typed event envelopes and payload models
//! - Subscription registry dispatching events to callbacks
//! - Auto-reconnection, outbound queueing, and heartbeat functionality

pub mod client;
pub mod events;
pub mod queue;
pub mod registry;
pub mod state;
pub mod transport;

pub use client::{ProfitHandler, WsClient, WsConfig, WsError};
pub use events::{EventType, InboundFrame, WsMessage};
pub use registry::{EventCallback, SubscriptionRegistry};
pub use state::{ConnectionInfo, ConnectionState};
pub use transport::{Connector, Transport, TransportError};
