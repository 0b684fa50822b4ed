use crate::error::Error;
use serde_json::Value;
use std::sync::Arc;

/// A callback invoked with the payload of one inbound event.
///
/// Handlers run on the transport's task and must not block. They may call
/// back into the [`ConnectionManager`](crate::ConnectionManager).
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync + 'static>;

/// Wrap a closure as an [`EventHandler`].
///
/// ```ignore
/// manager.subscribe("price", event_handler(|payload| {
///     println!("price update: {payload}");
/// }))?;
/// ```
pub fn event_handler<F>(f: F) -> EventHandler
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Event names raised by a connection about itself.
pub mod lifecycle {
    /// Connection established
    pub const CONNECT: &str = "connect";
    /// Connection closed or failed to open
    pub const DISCONNECT: &str = "disconnect";
    /// Transport-level error, usually followed by `DISCONNECT`
    pub const ERROR: &str = "error";

    /// Names owned by the manager's lifecycle observers
    pub const RESERVED: [&str; 3] = [CONNECT, DISCONNECT, ERROR];

    /// Returns `true` for lifecycle event names
    pub fn is_reserved(name: &str) -> bool {
        RESERVED.contains(&name)
    }
}

/// Outbound event names used by the group helpers.
pub mod group {
    /// Join a broadcast group
    pub const JOIN: &str = "join";
    /// Leave a broadcast group
    pub const LEAVE: &str = "leave";
}

/// Longest event name accepted, in bytes
pub const MAX_EVENT_NAME_LEN: usize = 128;

/// Check that `name` is usable as an application event name.
///
/// Names must be non-empty, at most [`MAX_EVENT_NAME_LEN`] bytes, free of
/// whitespace and control characters, and not one of the lifecycle names.
pub fn validate_event_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::invalid_event(name, "must not be empty"));
    }
    if name.len() > MAX_EVENT_NAME_LEN {
        return Err(Error::invalid_event(name, "longer than 128 bytes"));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::invalid_event(
            name,
            "contains whitespace or control characters",
        ));
    }
    if lifecycle::is_reserved(name) {
        return Err(Error::invalid_event(name, "reserved for lifecycle events"));
    }
    Ok(())
}
