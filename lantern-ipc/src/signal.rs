//! Revocable signal subscriptions
//!
//! A framer emits two signals. Whoever currently owns the connection
//! connects a subscriber token to each one and keeps the returned
//! [`HandlerId`]s so it can disconnect exactly its own handlers later.

use std::fmt;

/// Signals emitted by a [`Framer`](crate::framer::Framer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramerSignal {
    MessageParsed,
    Closed,
}

/// Handle returned by [`Signals::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Handler table keyed by signal, in connection order
#[derive(Debug)]
pub struct Signals<S> {
    next_id: u64,
    handlers: Vec<(HandlerId, FramerSignal, S)>,
}

impl<S> Default for Signals<S> {
    fn default() -> Self {
        Self {
            next_id: 1,
            handlers: Vec::new(),
        }
    }
}

impl<S: Clone> Signals<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `subscriber` to `signal`
    pub fn connect(&mut self, signal: FramerSignal, subscriber: S) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, signal, subscriber));
        id
    }

    /// Disconnect a handler; returns false if it was not connected
    pub fn disconnect(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler, _, _)| *handler != id);
        self.handlers.len() != before
    }

    /// Subscribers of `signal` in the order they connected
    pub fn subscribers(&self, signal: FramerSignal) -> Vec<S> {
        self.handlers
            .iter()
            .filter(|(_, s, _)| *s == signal)
            .map(|(_, _, subscriber)| subscriber.clone())
            .collect()
    }

    pub fn is_connected(&self, id: HandlerId) -> bool {
        self.handlers.iter().any(|(handler, _, _)| *handler == id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_disconnect() {
        let mut signals = Signals::new();
        let a = signals.connect(FramerSignal::MessageParsed, "server");
        let b = signals.connect(FramerSignal::Closed, "server");
        let c = signals.connect(FramerSignal::MessageParsed, "controller");

        assert_eq!(
            signals.subscribers(FramerSignal::MessageParsed),
            vec!["server", "controller"]
        );
        assert!(signals.disconnect(a));
        assert!(!signals.disconnect(a));
        assert!(signals.is_connected(b));
        assert!(signals.is_connected(c));
        assert_eq!(signals.subscribers(FramerSignal::MessageParsed), vec!["controller"]);
        assert_eq!(signals.subscribers(FramerSignal::Closed), vec!["server"]);
    }

    #[test]
    fn test_handler_ids_are_not_reused() {
        let mut signals = Signals::new();
        let a = signals.connect(FramerSignal::Closed, 1);
        signals.disconnect(a);
        let b = signals.connect(FramerSignal::Closed, 2);
        assert_ne!(a, b);
        assert_eq!(signals.len(), 1);
    }
}
