//! # ws-event-manager
//!
//! Client-side manager for a single real-time, named-event connection.
//!
//! ## Features
//!
//! - **Subscription registry** that survives reconnects and is replayed onto
//!   every new connection
//! - **Auto-reconnection** with linear backoff and a bounded number of attempts
//! - **Best-effort sends** that are dropped, not queued, while disconnected
//! - **Group helpers** for server-side join/leave
//! - **WebSocket transport** with JSON event framing and ping/pong keepalive
//! - **Metrics** and a watchable lifecycle state for observability
//!
//! ## Example
//!
//! ```ignore
//! use ws_event_manager::{event_handler, ConnectionManager, ManagerConfig, TransportConfig, WsTransport};
//!
//! let transport = WsTransport::new(TransportConfig::builder("wss://feed.example.com/ws").build()?);
//! let manager = ConnectionManager::new(ManagerConfig::default(), transport);
//!
//! manager.subscribe("price", event_handler(|payload| println!("price: {payload}")))?;
//! manager.connect()?;
//! manager.join_group("btc-usd")?;
//! ```

mod config;
mod connection;
mod error;
mod handler;
mod health;
mod manager;
mod metrics;
mod registry;
mod state;
mod transport;

pub use config::{
    ConfigError, HealthConfig, ManagerConfig, ManagerConfigBuilder, ReconnectConfig,
    TransportConfig, TransportConfigBuilder, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS,
};
pub use connection::{DisconnectReason, WsConnection, WsTransport};
pub use error::{Error, ErrorKind};
pub use handler::{
    event_handler, group, lifecycle, validate_event_name, EventHandler, MAX_EVENT_NAME_LEN,
};
pub use manager::ConnectionManager;
pub use metrics::{LinkMetrics, Metrics, MetricsSnapshot};
pub use registry::SubscriptionRegistry;
pub use state::ConnectionState;
pub use transport::{Connection, Transport};

// Re-export http types for handshake headers
pub use http::{HeaderName, HeaderValue};

/// Result alias for this crate
pub type Result<T> = std::result::Result<T, Error>;
