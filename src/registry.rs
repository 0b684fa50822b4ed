use crate::handler::EventHandler;
use std::collections::HashMap;
use std::fmt;

/// Event name to handler mapping that outlives individual connections.
///
/// Exactly one handler per name; a later insert for the same name replaces
/// the earlier one.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: HashMap<String, EventHandler>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, returning the handler it replaced
    pub fn insert(&mut self, event: impl Into<String>, handler: EventHandler) -> Option<EventHandler> {
        self.handlers.insert(event.into(), handler)
    }

    /// Remove the handler for `event`
    pub fn remove(&mut self, event: &str) -> Option<EventHandler> {
        self.handlers.remove(event)
    }

    /// Get the handler for `event`
    pub fn get(&self, event: &str) -> Option<&EventHandler> {
        self.handlers.get(event)
    }

    /// Check whether `event` has a handler
    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Number of registered events
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Iterate over `(event, handler)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventHandler)> {
        self.handlers.iter().map(|(name, handler)| (name.as_str(), handler))
    }

    /// Registered event names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove every subscription
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("events", &self.names())
            .finish()
    }
}
