//! Durable queue transport.
//!
//! Events are appended to a SQLite table with a monotonic sequence per
//! publish; each named consumer tracks the last sequence it acknowledged.
//! Delivery polls the table and parks on a `Notify` between publishes, so
//! subscribers see events in append order. Events delivered but not acked
//! are delivered again after a restart - the at-least-once path a slow or
//! crash-prone consumer needs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Notify;

use crate::events::{BusEvent, Topic};
use crate::{EventBus, Result, Subscription};

struct Inner {
    conn: Mutex<Connection>,
    notify: Notify,
}

pub struct DurableBus {
    inner: Arc<Inner>,
}

impl DurableBus {
    /// Open (or create) the queue database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory queue, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_topic_seq ON events(topic, seq);

            CREATE TABLE IF NOT EXISTS consumer_offsets (
                consumer TEXT NOT NULL,
                topic TEXT NOT NULL,
                acked_seq INTEGER NOT NULL,
                PRIMARY KEY (consumer, topic)
            );
            "#,
        )?;
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                notify: Notify::new(),
            }),
        })
    }

    /// Events stored for a topic (all of history, acked or not)
    pub fn queue_depth(&self, topic: Topic) -> Result<u64> {
        let conn = self.inner.conn.lock().unwrap();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE topic = ?1",
            params![topic.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[async_trait]
impl EventBus for DurableBus {
    async fn publish(&self, event: BusEvent) -> Result<()> {
        let topic = event.topic();
        let payload = serde_json::to_string(&event)?;
        {
            let conn = self.inner.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO events (topic, payload) VALUES (?1, ?2)",
                params![topic.as_str(), payload],
            )?;
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    fn subscribe(&self, topic: Topic, consumer: &str) -> Result<Box<dyn Subscription>> {
        let acked: Option<i64> = {
            let conn = self.inner.conn.lock().unwrap();
            conn.query_row(
                "SELECT acked_seq FROM consumer_offsets WHERE consumer = ?1 AND topic = ?2",
                params![consumer, topic.as_str()],
                |row| row.get(0),
            )
            .optional()?
        };
        let start = acked.unwrap_or(0);
        debug!(
            "[BUS] durable consumer '{}' resumes topic '{}' from seq {}",
            consumer,
            topic.as_str(),
            start
        );
        Ok(Box::new(DurableSubscription {
            inner: self.inner.clone(),
            topic,
            consumer: consumer.to_string(),
            cursor: start,
            delivered: start,
        }))
    }
}

pub struct DurableSubscription {
    inner: Arc<Inner>,
    topic: Topic,
    consumer: String,
    /// Sequence of the last event handed to the caller
    cursor: i64,
    /// High-water mark covered by the next ack
    delivered: i64,
}

impl DurableSubscription {
    fn fetch_after(&self, seq: i64) -> Result<Option<(i64, BusEvent)>> {
        let conn = self.inner.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, payload FROM events
                 WHERE topic = ?1 AND seq > ?2
                 ORDER BY seq ASC LIMIT 1",
                params![self.topic.as_str(), seq],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((seq, payload)) => Ok(Some((seq, serde_json::from_str(&payload)?))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Subscription for DurableSubscription {
    async fn next(&mut self) -> Result<BusEvent> {
        loop {
            // Register interest before checking, so a publish landing
            // between the check and the await still wakes us.
            let notified = self.inner.notify.notified();
            if let Some((seq, event)) = self.fetch_after(self.cursor)? {
                self.cursor = seq;
                self.delivered = seq;
                return Ok(event);
            }
            notified.await;
        }
    }

    fn try_next(&mut self) -> Result<Option<BusEvent>> {
        match self.fetch_after(self.cursor)? {
            Some((seq, event)) => {
                self.cursor = seq;
                self.delivered = seq;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    fn ack(&mut self) -> Result<()> {
        let conn = self.inner.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO consumer_offsets (consumer, topic, acked_seq)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(consumer, topic) DO UPDATE SET acked_seq = excluded.acked_seq
            "#,
            params![self.consumer, self.topic.as_str(), self.delivered],
        )?;
        Ok(())
    }
}
