//! Single-consumer mailboxes and the actor loop that drains them.
//!
//! Every pipeline component owns one bounded mailbox and processes its messages
//! one at a time on a dedicated thread, so component state never needs a lock.
//! Components talk to each other only through [`Addr`] sends.
//!
//! Work that must not stall the loop (e.g. a network call) runs elsewhere and
//! sends its result back through [`Context::myself`], re-entering the mailbox as
//! an ordinary message.

use core::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// What a sender does when the receiving mailbox is full.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for space (backpressure toward the producer).
    #[default]
    Block,
    /// Drop the message being sent.
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "drop-newest" | "drop_newest" => Ok(Self::DropNewest),
            other => Err(format!("unknown overflow policy {other:?} (expected block | drop-newest)")),
        }
    }
}

/// Mailbox sizing and overflow behaviour.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MailboxConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl MailboxConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("mailbox {0} is closed")]
    Closed(&'static str),

    #[error("mailbox {0} is full; message dropped")]
    Full(&'static str),
}

enum Envelope<M> {
    Message(M),
    Stop,
}

/// Sending side of a mailbox.
pub struct Addr<M> {
    name: &'static str,
    overflow: OverflowPolicy,
    tx: mpsc::Sender<Envelope<M>>,
}

impl<M> Clone for Addr<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            overflow: self.overflow,
            tx: self.tx.clone(),
        }
    }
}

impl<M> core::fmt::Debug for Addr<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Addr")
            .field("name", &self.name)
            .field("overflow", &self.overflow)
            .finish()
    }
}

impl<M: Send + 'static> Addr<M> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Send from a plain (non-async) thread.
    ///
    /// Must not be called from inside an async runtime worker; use [`Addr::send`] there.
    pub fn tell(&self, msg: M) -> Result<(), SendError> {
        match self.overflow {
            OverflowPolicy::Block => self
                .tx
                .blocking_send(Envelope::Message(msg))
                .map_err(|_| SendError::Closed(self.name)),
            OverflowPolicy::DropNewest => self.try_tell(msg),
        }
    }

    /// Send from an async task.
    pub async fn send(&self, msg: M) -> Result<(), SendError> {
        match self.overflow {
            OverflowPolicy::Block => self
                .tx
                .send(Envelope::Message(msg))
                .await
                .map_err(|_| SendError::Closed(self.name)),
            OverflowPolicy::DropNewest => self.try_tell(msg),
        }
    }

    fn try_tell(&self, msg: M) -> Result<(), SendError> {
        self.tx.try_send(Envelope::Message(msg)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full(self.name),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(self.name),
        })
    }
}

/// Per-actor context handed to every `handle` call.
pub struct Context<M> {
    name: &'static str,
    overflow: OverflowPolicy,
    myself: mpsc::WeakSender<Envelope<M>>,
}

impl<M> Context<M> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Address of the running actor, for self-messages.
    ///
    /// Returns `None` once the actor is shutting down and no other address is alive.
    pub fn myself(&self) -> Option<Addr<M>> {
        self.myself.upgrade().map(|tx| Addr {
            name: self.name,
            overflow: self.overflow,
            tx,
        })
    }
}

/// A sequential message processor.
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    fn handle(&mut self, msg: Self::Msg, ctx: &Context<Self::Msg>);

    /// Called once on the actor thread after the last message; release resources here.
    fn stopped(&mut self) {}
}

/// Handle to stop and join a running actor.
pub struct ActorHandle<M> {
    name: &'static str,
    tx: mpsc::Sender<Envelope<M>>,
    join: Option<thread::JoinHandle<()>>,
}

impl<M> core::fmt::Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActorHandle").field("name", &self.name).finish()
    }
}

impl<M: Send + 'static> ActorHandle<M> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a stop marker behind pending messages and wait for the actor to exit.
    pub fn shutdown(mut self) {
        let _ = self.tx.blocking_send(Envelope::Stop);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawn `actor` on its own named thread.
pub fn spawn<A: Actor>(
    name: &'static str,
    actor: A,
    config: MailboxConfig,
) -> std::io::Result<(Addr<A::Msg>, ActorHandle<A::Msg>)> {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let ctx = Context {
        name,
        overflow: config.overflow,
        myself: tx.downgrade(),
    };

    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || actor_loop(actor, rx, ctx))?;

    let addr = Addr {
        name,
        overflow: config.overflow,
        tx: tx.clone(),
    };
    let handle = ActorHandle {
        name,
        tx,
        join: Some(join),
    };
    Ok((addr, handle))
}

fn actor_loop<A: Actor>(mut actor: A, mut rx: mpsc::Receiver<Envelope<A::Msg>>, ctx: Context<A::Msg>) {
    debug!(actor = ctx.name, "actor started");

    while let Some(envelope) = rx.blocking_recv() {
        match envelope {
            Envelope::Message(msg) => actor.handle(msg, &ctx),
            Envelope::Stop => break,
        }
    }

    // Late senders (e.g. in-flight async work) now observe a closed mailbox.
    rx.close();
    actor.stopped();
    debug!(actor = ctx.name, "actor stopped");
}

/// A mailbox whose messages are collected instead of handled; for tests and taps.
pub struct Probe<M> {
    rx: mpsc::Receiver<Envelope<M>>,
}

/// Create a detached mailbox and its receiving [`Probe`].
pub fn probe<M: Send + 'static>(name: &'static str, config: MailboxConfig) -> (Addr<M>, Probe<M>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let addr = Addr {
        name,
        overflow: config.overflow,
        tx,
    };
    (addr, Probe { rx })
}

impl<M> Probe<M> {
    pub fn try_recv(&mut self) -> Option<M> {
        loop {
            match self.rx.try_recv() {
                Ok(Envelope::Message(m)) => return Some(m),
                Ok(Envelope::Stop) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Poll until a message arrives or `timeout` elapses.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<M> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(m) = self.try_recv() {
                return Some(m);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Everything currently queued.
    pub fn drain(&mut self) -> Vec<M> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
