//! Durable persistence for the Aegis trading core.
//!
//! The order ledger, fill journal, and per-account risk state must survive a
//! process restart so idempotency and reconciliation stay correct. Two
//! implementations of the same repository traits are provided:
//! - [`SqliteStore`]: JSON payload columns inside SQLite, one writer handle
//! - [`MemoryStore`]: map-backed, for tests and pure backtests

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use aegis_core::{AccountId, Fill, IdempotencyKey, Order, RiskState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent order ledger keyed by idempotency key.
pub trait OrderStore: Send + Sync {
    /// Insert or replace the record for this order's key
    fn upsert_order(&self, order: &Order) -> Result<()>;

    /// Fetch one order by key
    fn get_order(&self, key: &IdempotencyKey) -> Result<Option<Order>>;

    /// All orders currently in a non-terminal state
    fn open_orders(&self) -> Result<Vec<Order>>;

    /// Every order in the ledger
    fn all_orders(&self) -> Result<Vec<Order>>;
}

/// Append-only fill journal.
pub trait FillStore: Send + Sync {
    fn append_fill(&self, fill: &Fill) -> Result<()>;

    /// Fills for one symbol in append order
    fn fills_for_symbol(&self, symbol: &str) -> Result<Vec<Fill>>;
}

/// Per-account risk state snapshots.
pub trait RiskStateStore: Send + Sync {
    fn save_risk_state(&self, account: &AccountId, state: &RiskState) -> Result<()>;

    fn load_risk_state(&self, account: &AccountId) -> Result<Option<RiskState>>;
}

/// Everything the runner needs from a backing store.
pub trait Store: OrderStore + FillStore + RiskStateStore {}

impl<T: OrderStore + FillStore + RiskStateStore> Store for T {}
