use crate::config::HealthConfig;
use tokio::time::{Duration, Instant};

/// Keepalive bookkeeping for the driver of one [`WsConnection`](crate::WsConnection).
///
/// At most one ping is outstanding. A ping that goes unanswered for
/// `pong_timeout` counts as a miss; after `failure_threshold` misses in a row
/// the driver closes the connection with reason `"ping timeout"`. Any pong
/// clears the count.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    /// When the most recent ping went out
    last_ping: Option<Instant>,
    /// The most recent ping has neither been answered nor timed out
    awaiting_pong: bool,
    missed_pongs: u32,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            last_ping: None,
            awaiting_pong: false,
            missed_pongs: 0,
        }
    }

    pub fn record_ping_sent(&mut self) {
        self.last_ping = Some(Instant::now());
        self.awaiting_pong = true;
    }

    /// Any pong answers the outstanding ping and clears earlier misses
    pub fn record_pong_received(&mut self) {
        self.awaiting_pong = false;
        self.missed_pongs = 0;
    }

    /// A ping is due: none outstanding and `ping_interval` since the last one
    pub fn should_send_ping(&self) -> bool {
        !self.awaiting_pong
            && self
                .last_ping
                .map_or(true, |sent| sent.elapsed() >= self.config.ping_interval)
    }

    /// Count the outstanding ping as missed once `pong_timeout` has passed.
    ///
    /// Returns `true` only on the call that records the miss, after which a new
    /// ping may be sent.
    pub fn check_and_record_pong_timeout(&mut self) -> bool {
        let overdue = self.awaiting_pong
            && self
                .last_ping
                .is_some_and(|sent| sent.elapsed() >= self.config.pong_timeout);
        if overdue {
            self.awaiting_pong = false;
            self.missed_pongs += 1;
        }
        overdue
    }

    /// Misses reached `failure_threshold`; the connection should be closed
    pub fn is_unhealthy(&self) -> bool {
        self.missed_pongs >= self.config.failure_threshold
    }

    /// How long the driver may sleep before the next ping or timeout check
    pub fn time_until_next_check(&self) -> Duration {
        let Some(sent) = self.last_ping else {
            return Duration::ZERO;
        };
        let window = if self.awaiting_pong {
            self.config.pong_timeout
        } else {
            self.config.ping_interval
        };
        window.saturating_sub(sent.elapsed())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.missed_pongs
    }
}
