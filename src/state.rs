use crate::config::ReconnectConfig;
use std::fmt;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Lifecycle state of a [`ConnectionManager`](crate::ConnectionManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no retry pending
    Disconnected,
    /// Connection opened, waiting for the transport to report success
    Connecting,
    /// Connection established
    Connected,
    /// Connection lost, a delayed retry is pending
    ReconnectScheduled,
    /// Automatic retries exhausted; only a manual `connect()` can recover
    GivenUp,
    /// Manager disposed; terminal
    Disposed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectScheduled => "reconnect-scheduled",
            ConnectionState::GivenUp => "given-up",
            ConnectionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// What to do after a connection closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Schedule retry number `attempt` after `delay`
    Schedule { attempt: u32, delay: Duration },
    /// Attempts exhausted
    GiveUp { attempts: u32 },
}

/// A scheduled retry timer
#[derive(Debug)]
pub(crate) struct PendingRetry {
    /// Identifies the timer task that owns this slot
    pub ticket: u64,
    pub attempt: u32,
    pub delay: Duration,
    pub handle: AbortHandle,
}

/// Reconnection bookkeeping: attempt counter plus at most one pending timer
#[derive(Debug)]
pub(crate) struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    pending: Option<PendingRetry>,
    next_ticket: u64,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Connection established
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Connection closed; count it and decide whether to retry.
    ///
    /// The close that brings `attempts` to `max_attempts` gives up, so at most
    /// `max_attempts - 1` timers are scheduled between two successful opens.
    /// A close after giving up (failed manual connect) does not count again.
    pub fn on_disconnect(&mut self) -> RetryDecision {
        if self.attempts < self.config.max_attempts {
            self.attempts += 1;
        }

        if self.attempts >= self.config.max_attempts {
            RetryDecision::GiveUp {
                attempts: self.attempts,
            }
        } else {
            RetryDecision::Schedule {
                attempt: self.attempts,
                delay: self.config.delay_for_attempt(self.attempts),
            }
        }
    }

    /// Store a new timer; any previous one is aborted so timers never stack
    pub fn set_pending(&mut self, retry: PendingRetry) {
        self.cancel_pending();
        self.pending = Some(retry);
    }

    /// Allocate an identifier for a new timer; never reused
    pub fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Clear and return the pending timer if it is the one holding `ticket`.
    ///
    /// Called by the timer task itself when it fires. Attempt numbers repeat
    /// after a reset, so only the ticket identifies a timer.
    pub fn take_pending(&mut self, ticket: u64) -> Option<PendingRetry> {
        if self.pending.as_ref()?.ticket != ticket {
            return None;
        }
        self.pending.take()
    }

    /// Abort and forget the pending timer
    pub fn cancel_pending(&mut self) {
        if let Some(retry) = self.pending.take() {
            retry.handle.abort();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|retry| !retry.handle.is_finished())
    }

    #[cfg(test)]
    pub fn pending_ticket(&self) -> Option<u64> {
        self.pending.as_ref().map(|retry| retry.ticket)
    }

    pub fn pending_delay(&self) -> Option<Duration> {
        self.pending.as_ref().map(|retry| retry.delay)
    }
}
