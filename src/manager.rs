use crate::config::ManagerConfig;
use crate::error::Error;
use crate::handler::{event_handler, group, lifecycle, validate_event_name, EventHandler};
use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;
use crate::state::{ConnectionState, PendingRetry, ReconnectState, RetryDecision};
use crate::transport::{Connection, Transport};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

/// Owns one logical real-time connection, the subscriptions bound to it and
/// the reconnection state machine.
///
/// Cloning is cheap and every clone drives the same connection. No method
/// blocks or awaits; connection progress is reported through lifecycle
/// events from the transport and can be observed with [`watch_state`].
///
/// Closing a connection schedules the retry timer with `tokio::spawn`, so the
/// transport must report lifecycle events from within a tokio runtime.
///
/// # Thread Safety
///
/// `ConnectionManager` is `Send + Sync`. Internal state sits behind a single
/// `parking_lot::Mutex` that is never held while a handler runs.
///
/// [`watch_state`]: ConnectionManager::watch_state
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    metrics: Arc<Metrics>,
    state: Mutex<ManagerState<T::Connection>>,
    state_tx: watch::Sender<ConnectionState>,
}

/// The connection currently owned by the manager
struct LiveConnection<C> {
    /// Lifecycle events carrying another generation are stale
    generation: u64,
    connection: C,
}

struct ManagerState<C> {
    status: ConnectionState,
    connection: Option<LiveConnection<C>>,
    generation: u64,
    registry: SubscriptionRegistry,
    reconnect: ReconnectState,
}

impl<C> ManagerState<C> {
    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|live| live.generation == generation)
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a disconnected manager. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: ManagerConfig, transport: T) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                metrics: Arc::new(Metrics::new()),
                state: Mutex::new(ManagerState {
                    status: ConnectionState::Disconnected,
                    connection: None,
                    generation: 0,
                    registry: SubscriptionRegistry::new(),
                    reconnect: ReconnectState::new(config.reconnect),
                }),
                state_tx,
            }),
        }
    }

    /// Open a connection unless one is already live.
    ///
    /// Returns as soon as the connection has been asked to open; success or
    /// failure arrives later through lifecycle events. Calling this while a
    /// connection is connecting or connected does nothing and leaves the
    /// attempt counter untouched. Allowed from `GivenUp`.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`dispose`](Self::dispose).
    pub fn connect(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        self.inner.connect_locked(&mut state)
    }

    /// Register `handler` for `event`, replacing any earlier handler.
    ///
    /// The subscription is attached to the live connection right away and
    /// replayed onto every connection opened later.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEventName`] for empty, malformed or lifecycle names;
    /// [`Error::Disposed`] after disposal.
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> Result<(), Error> {
        validate_event_name(event)?;

        let mut state = self.inner.state.lock();
        if state.status == ConnectionState::Disposed {
            return Err(Error::Disposed);
        }

        let replaced = state.registry.insert(event, handler.clone()).is_some();
        if let Some(live) = &state.connection {
            live.connection.on(event, handler);
        }

        debug!(
            "Subscribed to '{}' (replaced: {}, subscriptions: {})",
            event,
            replaced,
            state.registry.len()
        );
        Ok(())
    }

    /// Remove the subscription for `event` and detach it from the live
    /// connection. Returns `false` if nothing was subscribed.
    pub fn unsubscribe(&self, event: &str) -> bool {
        let mut state = self.inner.state.lock();
        if state.registry.remove(event).is_none() {
            trace!("Unsubscribe from '{}' ignored, not subscribed", event);
            return false;
        }

        if let Some(live) = &state.connection {
            live.connection.off(event);
        }
        debug!("Unsubscribed from '{}'", event);
        true
    }

    /// Send an event if, and only if, a connection is established.
    ///
    /// Best effort: while disconnected the event is dropped without error and
    /// without queueing, as are events the transport refuses.
    ///
    /// # Errors
    ///
    /// Only for misuse: an invalid event name, a payload that cannot be
    /// serialized to JSON, or use after disposal.
    pub fn send<P: Serialize>(&self, event: &str, payload: P) -> Result<(), Error> {
        validate_event_name(event)?;
        let payload = serde_json::to_value(payload)?;

        let state = self.inner.state.lock();
        match (&state.connection, state.status) {
            (_, ConnectionState::Disposed) => return Err(Error::Disposed),
            (Some(live), _) if live.connection.is_connected() => {
                match live.connection.emit(event, payload) {
                    Ok(()) => {
                        self.inner.metrics.record_message_sent();
                        trace!("Sent '{}'", event);
                    }
                    Err(e) => {
                        self.inner.metrics.record_message_dropped();
                        debug!("Dropped '{}': {}", event, e);
                    }
                }
            }
            (_, status) => {
                self.inner.metrics.record_message_dropped();
                trace!("Dropped '{}' while {}", event, status);
            }
        }
        Ok(())
    }

    /// Ask the server to add this connection to `group_id`.
    pub fn join_group(&self, group_id: &str) -> Result<(), Error> {
        self.send(group::JOIN, json!({ "group": group_id }))
    }

    /// Ask the server to remove this connection from `group_id`.
    pub fn leave_group(&self, group_id: &str) -> Result<(), Error> {
        self.send(group::LEAVE, json!({ "group": group_id }))
    }

    /// Tear the manager down: cancel any pending retry, close the live
    /// connection and drop all subscriptions. Idempotent.
    pub fn dispose(&self) {
        let live = {
            let mut state = self.inner.state.lock();
            if state.status == ConnectionState::Disposed {
                return;
            }
            state.reconnect.cancel_pending();
            state.registry.clear();
            let live = state.connection.take();
            self.inner.set_status(&mut state, ConnectionState::Disposed);
            live
        };

        match live {
            Some(live) => {
                info!("Disposed, closing connection generation {}", live.generation);
                live.connection.close();
            }
            None => info!("Disposed"),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    /// Receiver notified on every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Consecutive closes since the last successful open
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().reconnect.attempts()
    }

    /// Configured attempt ceiling
    pub fn max_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect.max_attempts()
    }

    /// Whether a connection is established right now
    pub fn is_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .connection
            .as_ref()
            .is_some_and(|live| live.connection.is_connected())
    }

    /// Whether a retry timer is waiting to fire
    pub fn has_pending_retry(&self) -> bool {
        self.inner.state.lock().reconnect.has_pending()
    }

    /// Delay the pending retry timer was scheduled with
    pub fn pending_retry_delay(&self) -> Option<Duration> {
        self.inner.state.lock().reconnect.pending_delay()
    }

    /// Subscribed event names, sorted
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.state.lock().registry.names()
    }

    /// Check whether `event` has a subscription
    pub fn is_subscribed(&self, event: &str) -> bool {
        self.inner.state.lock().registry.contains(event)
    }

    /// Get the metrics for this manager
    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.clone()
    }

    /// Get a reference to the transport
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T: Transport> Inner<T> {
    fn set_status(&self, state: &mut ManagerState<T::Connection>, status: ConnectionState) {
        if state.status != status {
            trace!("State {} -> {}", state.status, status);
        }
        state.status = status;
        self.state_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn connect_locked(
        self: &Arc<Self>,
        state: &mut ManagerState<T::Connection>,
    ) -> Result<(), Error> {
        if state.status == ConnectionState::Disposed {
            return Err(Error::Disposed);
        }

        if let Some(live) = &state.connection {
            trace!(
                "connect() ignored, generation {} is {}",
                live.generation,
                state.status
            );
            return Ok(());
        }

        state.generation += 1;
        let generation = state.generation;

        let connection = self.transport.create();
        self.bind_lifecycle(&connection, generation);
        for (event, handler) in state.registry.iter() {
            connection.on(event, handler.clone());
        }
        connection.open();

        debug!(
            "Opening connection generation {} ({} subscriptions, attempts {})",
            generation,
            state.registry.len(),
            state.reconnect.attempts()
        );

        state.connection = Some(LiveConnection {
            generation,
            connection,
        });
        self.metrics.record_connection_attempt();
        self.set_status(state, ConnectionState::Connecting);
        Ok(())
    }

    /// Attach the open/close/error observers for one generation.
    ///
    /// Observers hold a `Weak` so a connection never keeps the manager alive.
    fn bind_lifecycle(self: &Arc<Self>, connection: &T::Connection, generation: u64) {
        let weak = Arc::downgrade(self);
        connection.on(
            lifecycle::CONNECT,
            event_handler(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_open(generation);
                }
            }),
        );

        let weak = Arc::downgrade(self);
        connection.on(
            lifecycle::DISCONNECT,
            event_handler(move |reason| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_close(generation, reason);
                }
            }),
        );

        let weak = Arc::downgrade(self);
        connection.on(
            lifecycle::ERROR,
            event_handler(move |error| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_error(generation, error);
                }
            }),
        );
    }

    fn handle_open(&self, generation: u64) {
        let mut state = self.state.lock();
        if !state.is_current(generation) {
            debug!("Ignoring open from stale generation {}", generation);
            return;
        }

        state.reconnect.reset();
        state.reconnect.cancel_pending();
        self.metrics.record_connected();
        info!("Connected (generation {})", generation);
        self.set_status(&mut state, ConnectionState::Connected);
    }

    fn handle_close(self: &Arc<Self>, generation: u64, reason: Value) {
        let mut state = self.state.lock();
        if !state.is_current(generation) {
            debug!("Ignoring close from stale generation {}", generation);
            return;
        }

        state.connection = None;
        self.metrics.record_disconnect();
        info!(
            "Disconnected (generation {}, reason: {})",
            generation,
            reason.as_str().unwrap_or("unknown")
        );

        match state.reconnect.on_disconnect() {
            RetryDecision::Schedule { attempt, delay } => {
                let ticket = state.reconnect.next_ticket();
                let handle = self.schedule_retry(ticket, delay);
                state.reconnect.set_pending(PendingRetry {
                    ticket,
                    attempt,
                    delay,
                    handle,
                });
                self.metrics.record_retry_scheduled();
                info!(
                    "Reconnect attempt {}/{} in {:?}",
                    attempt,
                    state.reconnect.max_attempts(),
                    delay
                );
                self.set_status(&mut state, ConnectionState::ReconnectScheduled);
            }
            RetryDecision::GiveUp { attempts } => {
                state.reconnect.cancel_pending();
                self.metrics.record_give_up();
                warn!(
                    "Giving up after {} consecutive failed connections",
                    attempts
                );
                self.set_status(&mut state, ConnectionState::GivenUp);
            }
        }
    }

    fn handle_error(&self, generation: u64, error: Value) {
        if !self.state.lock().is_current(generation) {
            trace!("Ignoring error from stale generation {}", generation);
            return;
        }

        self.metrics.record_transport_error();
        match error.as_str() {
            Some(message) => warn!("Transport error (generation {}): {}", generation, message),
            None => warn!("Transport error (generation {}): {}", generation, error),
        }
    }

    fn schedule_retry(self: &Arc<Self>, ticket: u64, delay: Duration) -> AbortHandle {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_retry(ticket);
            }
        });
        task.abort_handle()
    }

    /// Timer callback. A timer that woke after being replaced or cancelled
    /// no longer owns the pending slot and does nothing.
    fn fire_retry(self: &Arc<Self>, ticket: u64) {
        let mut state = self.state.lock();
        let Some(retry) = state.reconnect.take_pending(ticket) else {
            trace!("Stale retry timer {}", ticket);
            return;
        };

        info!("Reconnect attempt {}", retry.attempt);
        if let Err(e) = self.connect_locked(&mut state) {
            debug!("Reconnect attempt {} skipped: {}", retry.attempt, e);
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.reconnect.cancel_pending();
        if let Some(live) = state.connection.take() {
            live.connection.close();
        }
    }
}
