use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for observability
///
/// Counters and gauges describing the manager's connection history.
/// Use `snapshot()` to get a point-in-time view of all metrics, or use
/// individual getter methods for specific values.
///
/// # Example
/// ```ignore
/// let metrics = manager.metrics();
///
/// println!("Connections: {}", metrics.connections());
/// println!("Dropped sends: {}", metrics.messages_dropped());
///
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    // Counter fields - private, exposed via getters
    connection_attempts_total: AtomicU64,
    connections_total: AtomicU64,
    disconnects_total: AtomicU64,
    retries_scheduled_total: AtomicU64,
    give_ups_total: AtomicU64,
    transport_errors_total: AtomicU64,
    messages_sent_total: AtomicU64,
    messages_dropped_total: AtomicU64,

    link: RwLock<LinkMetrics>,
}

/// Uptime tracking for the live connection
#[derive(Debug, Clone, Default)]
pub struct LinkMetrics {
    /// Whether a connection is currently established
    pub is_connected: bool,
    /// Duration since the last successful connection (None if never connected)
    pub time_since_connected: Option<Duration>,
    /// Total time spent connected, excluding the current connection
    pub total_uptime: Duration,
    #[doc(hidden)]
    pub(crate) last_connected_at: Option<Instant>,
}

impl LinkMetrics {
    fn snapshot(&self) -> LinkMetrics {
        LinkMetrics {
            time_since_connected: self.last_connected_at.map(|t| t.elapsed()),
            ..self.clone()
        }
    }
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    /// Get total connection attempts (manual and automatic)
    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts_total.load(Ordering::Relaxed)
    }

    /// Get total connections established
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total disconnects, including failed attempts
    pub fn disconnects(&self) -> u64 {
        self.disconnects_total.load(Ordering::Relaxed)
    }

    /// Get total retry timers scheduled
    pub fn retries_scheduled(&self) -> u64 {
        self.retries_scheduled_total.load(Ordering::Relaxed)
    }

    /// Get how often automatic reconnection gave up
    pub fn give_ups(&self) -> u64 {
        self.give_ups_total.load(Ordering::Relaxed)
    }

    /// Get total transport errors observed
    pub fn transport_errors(&self) -> u64 {
        self.transport_errors_total.load(Ordering::Relaxed)
    }

    /// Get total messages handed to the transport
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent_total.load(Ordering::Relaxed)
    }

    /// Get total sends dropped because no connection was available
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_total.load(Ordering::Relaxed)
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_connection_attempt(&self) {
        self.connection_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connected(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        let mut link = self.link.write();
        if link.is_connected {
            return;
        }
        link.is_connected = true;
        link.last_connected_at = Some(Instant::now());
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects_total.fetch_add(1, Ordering::Relaxed);
        let mut link = self.link.write();
        if link.is_connected {
            link.is_connected = false;
            if let Some(connected_at) = link.last_connected_at {
                link.total_uptime += connected_at.elapsed();
            }
        }
    }

    pub(crate) fn record_retry_scheduled(&self) {
        self.retries_scheduled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_give_up(&self) {
        self.give_ups_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_error(&self) {
        self.transport_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_sent(&self) {
        self.messages_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_dropped(&self) {
        self.messages_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the live connection's uptime view
    pub fn link(&self) -> LinkMetrics {
        self.link.read().snapshot()
    }

    /// Get a point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connection_attempts_total: self.connection_attempts_total.load(Ordering::Acquire),
            connections_total: self.connections_total.load(Ordering::Acquire),
            disconnects_total: self.disconnects_total.load(Ordering::Acquire),
            retries_scheduled_total: self.retries_scheduled_total.load(Ordering::Acquire),
            give_ups_total: self.give_ups_total.load(Ordering::Acquire),
            transport_errors_total: self.transport_errors_total.load(Ordering::Acquire),
            messages_sent_total: self.messages_sent_total.load(Ordering::Acquire),
            messages_dropped_total: self.messages_dropped_total.load(Ordering::Acquire),
            link: self.link(),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connection_attempts_total: u64,
    pub connections_total: u64,
    pub disconnects_total: u64,
    pub retries_scheduled_total: u64,
    pub give_ups_total: u64,
    pub transport_errors_total: u64,
    pub messages_sent_total: u64,
    pub messages_dropped_total: u64,
    pub link: LinkMetrics,
}
