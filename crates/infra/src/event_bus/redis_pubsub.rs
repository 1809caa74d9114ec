//! Redis pub/sub-backed message bus (optional).
//!
//! Note: Redis pub/sub is not durable (messages are dropped if no subscriber is
//! online), which matches the pipeline's at-most-once contract.
//!
//! Subjects map one-to-one onto Redis channels. Wildcard subscriptions use
//! `PSUBSCRIBE` with a glob (`*` for both `*` and `>`); since a Redis `*` also
//! spans dots, every received channel is re-checked against the parsed pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use redis::Commands;
use tracing::{debug, warn};

use firewatch_events::{
    validate_topic, BusConnection, BusError, BusMessage, MessageBus, Subscription, TopicPattern,
    DEFAULT_SUBSCRIPTION_CAPACITY,
};

const READ_TIMEOUT: Duration = Duration::from_millis(250);
const FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Redis pub/sub bus.
#[derive(Debug, Clone)]
pub struct RedisBus {
    client: redis::Client,
    subscription_capacity: usize,
}

impl RedisBus {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| BusError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        })
    }

    /// Messages buffered per subscription before the reader stops pulling from Redis.
    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }
}

impl MessageBus for RedisBus {
    type Connection = RedisConnection;

    fn connect(&self) -> Result<Self::Connection, BusError> {
        let conn = self
            .client
            .get_connection()
            .map_err(|e| BusError::Connect(e.to_string()))?;
        Ok(RedisConnection {
            client: self.client.clone(),
            subscription_capacity: self.subscription_capacity,
            conn: Some(conn),
            stop: Arc::new(AtomicBool::new(false)),
            readers: Vec::new(),
        })
    }
}

/// One Redis connection for publishing plus one reader thread per subscription.
pub struct RedisConnection {
    client: redis::Client,
    subscription_capacity: usize,
    conn: Option<redis::Connection>,
    stop: Arc<AtomicBool>,
    readers: Vec<thread::JoinHandle<()>>,
}

impl RedisConnection {
    fn release(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        self.conn = None;
    }
}

impl BusConnection for RedisConnection {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        validate_topic(topic)?;
        let conn = self.conn.as_mut().ok_or_else(|| BusError::Publish {
            topic: topic.to_string(),
            reason: "connection released".to_string(),
        })?;

        let _: i64 = conn.publish(topic, payload).map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn subscribe(&mut self, pattern: &str) -> Result<Subscription<BusMessage>, BusError> {
        let parsed = TopicPattern::parse(pattern)?;
        let glob = pattern.replace('>', "*");
        let subscribe_err = |reason: String| BusError::Subscribe {
            pattern: pattern.to_string(),
            reason,
        };

        let (tx, rx) = mpsc::sync_channel(self.subscription_capacity);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let client = self.client.clone();
        let stop = self.stop.clone();

        // Background thread that receives pub/sub messages and forwards them.
        let reader = thread::Builder::new()
            .name(format!("redis-sub:{pattern}"))
            .spawn(move || {
                let mut conn = match client.get_connection() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                let mut pubsub = conn.as_pubsub();
                if let Err(e) = pubsub.set_read_timeout(Some(READ_TIMEOUT)) {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                if let Err(e) = pubsub.psubscribe(&glob) {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !stop.load(Ordering::SeqCst) {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(e) if e.is_timeout() => continue,
                        Err(e) => {
                            warn!(pattern = %glob, error = %e, "redis subscription lost");
                            return;
                        }
                    };

                    let channel = msg.get_channel_name();
                    if !parsed.matches(channel) {
                        debug!(channel, "ignoring channel outside subscription pattern");
                        continue;
                    }

                    let message = BusMessage::new(channel, msg.get_payload_bytes());
                    if !deliver(&tx, message, &stop) {
                        return;
                    }
                }
            })
            .map_err(|e| subscribe_err(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.readers.push(reader);
                Ok(Subscription::new(rx))
            }
            Ok(Err(reason)) => {
                let _ = reader.join();
                Err(subscribe_err(reason))
            }
            Err(_) => {
                let _ = reader.join();
                Err(subscribe_err("subscription thread exited".to_string()))
            }
        }
    }

    fn close(mut self) -> Result<(), BusError> {
        self.release();
        Ok(())
    }
}

/// Hand `message` to the subscriber, waiting while its buffer is full.
///
/// Returns `false` when the subscriber is gone or the connection is closing.
fn deliver(tx: &mpsc::SyncSender<BusMessage>, mut message: BusMessage, stop: &AtomicBool) -> bool {
    loop {
        match tx.try_send(message) {
            Ok(()) => return true,
            Err(mpsc::TrySendError::Disconnected(_)) => return false,
            Err(mpsc::TrySendError::Full(back)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                message = back;
                thread::sleep(FULL_BACKOFF);
            }
        }
    }
}

impl Drop for RedisConnection {
    fn drop(&mut self) {
        self.release();
    }
}
