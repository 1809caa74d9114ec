//! Message bus abstraction (mechanics only).
//!
//! The pipeline talks to its transport through two small traits:
//!
//! - [`MessageBus`]: a factory that opens connections
//! - [`BusConnection`]: one scoped connection owned by exactly one component
//!
//! Each component acquires its connection when it is built and releases it when
//! it stops. Publishing and subscribing are synchronous calls made on the owning
//! component's thread.
//!
//! ## Delivery
//!
//! - **At-most-once**: the bus may drop messages (e.g. no subscriber online)
//! - **Per-publisher ordering**: messages from one connection arrive in send order
//! - **No persistence**: nothing is stored or replayed
//! - **Bounded buffering**: each subscription buffers at most its capacity;
//!   once full, delivery waits for the subscriber to catch up

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Messages a subscription buffers before delivery blocks.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1024;

/// A raw message received from (or sent to) the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unreachable: {0}")]
    Connect(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {pattern} failed: {reason}")]
    Subscribe { pattern: String, reason: String },

    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),

    #[error("closing connection failed: {0}")]
    Close(String),

    /// Internal lock poisoning (in-process transports).
    #[error("bus state poisoned")]
    Poisoned,
}

/// A subscription to messages matching a topic pattern.
///
/// ## Usage Pattern
///
/// ```ignore
/// let sub = conn.subscribe("region.*.processed")?;
///
/// loop {
///     match sub.recv_timeout(Duration::from_millis(250)) {
///         Ok(msg) => handle(msg),
///         Err(RecvTimeoutError::Timeout) => continue,      // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,    // connection closed
///     }
/// }
/// ```
///
/// Subscriptions are consumed by a single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// One scoped connection to the bus.
pub trait BusConnection: Send + 'static {
    /// Publish `payload` on a concrete (wildcard-free) topic.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Subscribe to every topic matching `pattern`.
    ///
    /// The subscription ends (disconnects) when the connection is closed.
    fn subscribe(&mut self, pattern: &str) -> Result<Subscription<BusMessage>, BusError>;

    /// Release the connection.
    fn close(self) -> Result<(), BusError>;
}

/// Factory for bus connections.
pub trait MessageBus: Send + Sync {
    type Connection: BusConnection;

    fn connect(&self) -> Result<Self::Connection, BusError>;
}

impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    type Connection = B::Connection;

    fn connect(&self) -> Result<Self::Connection, BusError> {
        (**self).connect()
    }
}
