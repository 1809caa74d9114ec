//! In-memory bus for tests/dev.

use std::sync::{Arc, Mutex, MutexGuard, mpsc};

use crate::bus::{BusConnection, BusError, BusMessage, DEFAULT_SUBSCRIPTION_CAPACITY, MessageBus, Subscription};
use crate::topic::{TopicPattern, validate_topic};

#[derive(Debug)]
struct Subscriber {
    id: u64,
    connection: u64,
    pattern: TopicPattern,
    tx: mpsc::SyncSender<BusMessage>,
}

#[derive(Debug)]
struct Inner {
    subscribers: Vec<Subscriber>,
    published: Vec<BusMessage>,
    next_id: u64,
    open_connections: usize,
    subscription_capacity: usize,
    unreachable: bool,
    reject_publishes: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            published: Vec::new(),
            next_id: 0,
            open_connections: 0,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            unreachable: false,
            reject_publishes: false,
        }
    }
}

/// In-process pub/sub bus.
///
/// - No IO
/// - Fan-out to every matching subscription; a full subscription makes the
///   publisher wait
/// - Keeps a log of everything published so tests can assert on it
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer size of subscriptions opened from now on.
    pub fn with_subscription_capacity(self, capacity: usize) -> Self {
        self.lock().subscription_capacity = capacity.max(1);
        self
    }

    /// A bus whose `connect` always fails.
    pub fn unreachable() -> Self {
        let bus = Self::new();
        bus.lock().unreachable = true;
        bus
    }

    /// Make every subsequent publish fail (connections stay open).
    pub fn reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<BusMessage> {
        self.lock().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<BusMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of connections acquired and not yet released.
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    /// Number of live subscriptions across all connections.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Tests must keep observing the bus even after a panicking publisher.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageBus for InMemoryBus {
    type Connection = InMemoryConnection;

    fn connect(&self) -> Result<Self::Connection, BusError> {
        let mut inner = self.lock();
        if inner.unreachable {
            return Err(BusError::Connect("in-memory bus is unreachable".to_string()));
        }
        inner.next_id += 1;
        inner.open_connections += 1;
        Ok(InMemoryConnection {
            id: inner.next_id,
            bus: self.inner.clone(),
            open: true,
        })
    }
}

/// Connection handed out by [`InMemoryBus`].
#[derive(Debug)]
pub struct InMemoryConnection {
    id: u64,
    bus: Arc<Mutex<Inner>>,
    open: bool,
}

impl InMemoryConnection {
    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Ok(mut inner) = self.bus.lock() {
            inner.subscribers.retain(|s| s.connection != self.id);
            inner.open_connections = inner.open_connections.saturating_sub(1);
        }
    }
}

impl BusConnection for InMemoryConnection {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        validate_topic(topic)?;

        let message = BusMessage::new(topic, payload);
        let targets: Vec<(u64, mpsc::SyncSender<BusMessage>)> = {
            let mut inner = self.bus.lock().map_err(|_| BusError::Poisoned)?;
            if inner.reject_publishes {
                return Err(BusError::Publish {
                    topic: topic.to_string(),
                    reason: "publishing disabled".to_string(),
                });
            }
            inner.published.push(message.clone());
            inner
                .subscribers
                .iter()
                .filter(|s| s.pattern.matches(topic))
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };

        // Deliver without holding the lock; a full subscription blocks only this publisher.
        let dead: Vec<u64> = targets
            .into_iter()
            .filter_map(|(id, tx)| tx.send(message.clone()).err().map(|_| id))
            .collect();

        if !dead.is_empty() {
            let mut inner = self.bus.lock().map_err(|_| BusError::Poisoned)?;
            inner.subscribers.retain(|s| !dead.contains(&s.id));
        }
        Ok(())
    }

    fn subscribe(&mut self, pattern: &str) -> Result<Subscription<BusMessage>, BusError> {
        let pattern = TopicPattern::parse(pattern)?;

        let mut inner = self.bus.lock().map_err(|_| BusError::Poisoned)?;
        let (tx, rx) = mpsc::sync_channel(inner.subscription_capacity);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber {
            id,
            connection: self.id,
            pattern,
            tx,
        });

        Ok(Subscription::new(rx))
    }

    fn close(mut self) -> Result<(), BusError> {
        self.release();
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}
