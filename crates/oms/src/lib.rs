//! Aegis Order Manager (OMS)
//!
//! Owns the order lifecycle: the per-order state machine, idempotent
//! submission with per-key in-flight locks, bounded retry with backoff and
//! jitter, and periodic reconciliation of the ledger against the broker's
//! reported state. Orders are the OMS's exclusive property - the risk
//! manager and execution adapters only read them or report events.

pub mod ledger;
pub mod manager;
pub mod reconcile;
pub mod retry;

pub use ledger::OrderLedger;
pub use manager::{OmsConfig, OrderManager};
pub use reconcile::{Reconciler, ReconcilerConfig, ReconciliationReport};
pub use retry::RetryPolicy;

use aegis_core::{IdempotencyKey, OrderState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid transition for {key}: {from:?} -> {to:?}")]
    InvalidTransition {
        key: IdempotencyKey,
        from: OrderState,
        to: OrderState,
    },

    #[error("unknown order: {0}")]
    UnknownOrder(IdempotencyKey),

    #[error("kill switch active, submission refused")]
    KillSwitchActive,

    #[error(transparent)]
    Store(#[from] aegis_store::StoreError),

    #[error(transparent)]
    Execution(#[from] aegis_execution::ExecutionError),

    #[error(transparent)]
    Bus(#[from] aegis_bus::BusError),
}

pub type Result<T> = std::result::Result<T, Error>;
