use thiserror::Error;

/// Categorizes errors for caller decision-making.
///
/// A lightweight, copyable view of [`Error`] that can be matched on without
/// borrowing the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// WebSocket protocol error
    WebSocket,
    /// Connection could not be established
    ConnectionFailed,
    /// Event name rejected at the call boundary
    InvalidEventName,
    /// Payload could not be encoded or decoded
    Codec,
    /// Outbound command could not be queued
    ChannelSend,
    /// Manager was disposed
    Disposed,
}

/// Errors that can occur in ws-event-manager
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Event name is empty, malformed or reserved
    #[error("Invalid event name {name:?}: {reason}")]
    InvalidEventName { name: String, reason: &'static str },

    /// Payload serialization error
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Manager has been disposed
    #[error("Connection manager has been disposed")]
    Disposed,
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WebSocket(_) => ErrorKind::WebSocket,
            Error::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Error::InvalidEventName { .. } => ErrorKind::InvalidEventName,
            Error::Codec(_) => ErrorKind::Codec,
            Error::ChannelSend(_) => ErrorKind::ChannelSend,
            Error::Disposed => ErrorKind::Disposed,
        }
    }

    pub(crate) fn invalid_event(name: &str, reason: &'static str) -> Self {
        Error::InvalidEventName {
            name: name.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Disposed.kind(), ErrorKind::Disposed);
        assert_eq!(
            Error::invalid_event("", "empty").kind(),
            ErrorKind::InvalidEventName
        );
        assert_eq!(
            Error::ConnectionFailed("timeout".to_string()).kind(),
            ErrorKind::ConnectionFailed
        );
    }

    #[test]
    fn test_invalid_event_display() {
        let err = Error::invalid_event("connect", "reserved for lifecycle events");
        assert_eq!(
            err.to_string(),
            "Invalid event name \"connect\": reserved for lifecycle events"
        );
    }
}
