//! Event bus
//!
//! Carries signals, order lifecycle events, risk events, and alarms between
//! the trading-core workers. Guarantees the core depends on:
//! - per-topic ordered delivery to each subscriber
//! - at-least-once delivery (consumers handle events idempotently)
//!
//! Two transports implement the same [`EventBus`] trait:
//! - [`ChannelBus`]: in-process tokio broadcast channels, no persistence.
//!   A lagged subscriber is surfaced as a warning with the gap size.
//! - [`DurableBus`]: SQLite-backed queue with acked per-consumer offsets.
//!   Unacked events are re-delivered after a restart; the transport for
//!   slow consumers and deliveries that must survive the process.

pub mod channel;
pub mod durable;
pub mod events;

pub use channel::ChannelBus;
pub use durable::DurableBus;
pub use events::{Alarm, AlarmKind, BusEvent, Topic};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    ChannelClosed,

    #[error("queue database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Publisher/subscriber transport for [`BusEvent`]s.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to its topic
    async fn publish(&self, event: BusEvent) -> Result<()>;

    /// Subscribe a named consumer to a topic.
    ///
    /// The name keys the durable transport's ack offsets; the channel
    /// transport ignores it.
    fn subscribe(&self, topic: Topic, consumer: &str) -> Result<Box<dyn Subscription>>;
}

/// One consumer's view of a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next event
    async fn next(&mut self) -> Result<BusEvent>;

    /// Receive without blocking (None if nothing is queued)
    fn try_next(&mut self) -> Result<Option<BusEvent>>;

    /// Acknowledge everything delivered so far.
    ///
    /// Durable subscriptions persist the offset; unacked events are
    /// re-delivered on restart. No-op for the channel transport.
    fn ack(&mut self) -> Result<()>;
}
