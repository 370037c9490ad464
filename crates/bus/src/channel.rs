//! Tokio channel-based transport for single-process mode.
//!
//! One broadcast channel per topic; messages are passed directly with no
//! serialization. Delivery order per topic follows publish order. A slow
//! subscriber that overruns the channel capacity loses the oldest events;
//! the gap is logged and counted, and deployments that cannot tolerate a
//! gap should run the durable transport instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::warn;
use tokio::sync::broadcast;

use crate::events::{BusEvent, Topic};
use crate::{BusError, EventBus, Result, Subscription};

pub struct ChannelBus {
    senders: HashMap<Topic, broadcast::Sender<BusEvent>>,
    published: AtomicU64,
}

impl ChannelBus {
    /// Create a bus with the given per-topic channel capacity
    pub fn new(capacity: usize) -> Self {
        let mut senders = HashMap::new();
        for topic in Topic::ALL {
            let (tx, _rx) = broadcast::channel(capacity);
            senders.insert(topic, tx);
        }
        Self {
            senders,
            published: AtomicU64::new(0),
        }
    }

    /// Events published since creation
    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for ChannelBus {
    async fn publish(&self, event: BusEvent) -> Result<()> {
        let topic = event.topic();
        let tx = &self.senders[&topic];
        self.published.fetch_add(1, Ordering::Relaxed);
        // A send error only means no subscriber is currently listening;
        // publishing into the void is not a failure for broadcast topics.
        let _ = tx.send(event);
        Ok(())
    }

    fn subscribe(&self, topic: Topic, _consumer: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(ChannelSubscription {
            topic,
            rx: self.senders[&topic].subscribe(),
            lagged: 0,
        }))
    }
}

pub struct ChannelSubscription {
    topic: Topic,
    rx: broadcast::Receiver<BusEvent>,
    lagged: u64,
}

impl ChannelSubscription {
    /// Events this subscriber missed by lagging behind
    pub fn lagged_events(&self) -> u64 {
        self.lagged
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next(&mut self) -> Result<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.lagged += n;
                    warn!(
                        "[BUS] subscriber lagged on topic '{}', {} events lost",
                        self.topic.as_str(),
                        n
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::ChannelClosed),
            }
        }
    }

    fn try_next(&mut self) -> Result<Option<BusEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                self.lagged += n;
                warn!(
                    "[BUS] subscriber lagged on topic '{}', {} events lost",
                    self.topic.as_str(),
                    n
                );
                Ok(None)
            }
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::ChannelClosed),
        }
    }

    fn ack(&mut self) -> Result<()> {
        // Nothing to persist for the in-process transport
        Ok(())
    }
}
