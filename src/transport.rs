use crate::error::Error;
use crate::handler::EventHandler;
use serde_json::Value;

/// Factory for connections to a single remote endpoint.
///
/// The manager calls [`Transport::create`] once per connection attempt and
/// owns the returned handle exclusively.
pub trait Transport: Send + Sync + 'static {
    /// Connection type produced by this transport
    type Connection: Connection;

    /// Create a connection that is not yet open.
    fn create(&self) -> Self::Connection;
}

/// A bidirectional named-event channel.
///
/// Implementations report their own lifecycle through handlers bound to the
/// names in [`lifecycle`](crate::handler::lifecycle): `connect` once open,
/// `error` on transport failures and `disconnect` exactly once at the end,
/// also when the connection never opened.
///
/// Handlers must be invoked asynchronously, never from inside one of these
/// methods.
pub trait Connection: Send + Sync + 'static {
    /// Start connecting. Returns immediately.
    fn open(&self);

    /// Bind `handler` to `event`, replacing any handler already bound.
    fn on(&self, event: &str, handler: EventHandler);

    /// Unbind the handler for `event`, if any.
    fn off(&self, event: &str);

    /// Transmit an event to the remote endpoint.
    fn emit(&self, event: &str, payload: Value) -> Result<(), Error>;

    /// Whether the channel is currently established.
    fn is_connected(&self) -> bool;

    /// Close the channel. `disconnect` is still reported afterwards, also
    /// when the connection was never opened.
    fn close(&self);
}
