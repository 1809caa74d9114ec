//! Messaging mechanics: bus transports, topics and actor mailboxes.
//!
//! - [`bus`]: transport abstraction (connections, subscriptions)
//! - [`topic`]: dot-separated subjects with wildcards
//! - [`in_memory_bus`]: in-process transport for tests/dev
//! - [`mailbox`]: bounded mailboxes and the sequential actor loop

pub mod bus;
pub mod in_memory_bus;
pub mod mailbox;
pub mod topic;

pub use bus::{BusConnection, BusError, BusMessage, DEFAULT_SUBSCRIPTION_CAPACITY, MessageBus, Subscription};
pub use in_memory_bus::{InMemoryBus, InMemoryConnection};
pub use mailbox::{
    Actor, ActorHandle, Addr, Context, MailboxConfig, OverflowPolicy, Probe, SendError, probe, spawn,
};
pub use topic::{TopicPattern, validate_topic};
