//! Execution adapters
//!
//! One contract, implemented three ways: live broker connectors (integration
//! points outside this workspace), the paper-trading broker, and the
//! backtest broker. The risk manager and order manager never know which one
//! they are driving.

pub mod error;
pub mod fill_engine;
pub mod sim;

pub use error::{ExecutionError, Result};
pub use fill_engine::{CommissionModel, FillConfig, FillEngine, Quote, SlippageModel};
pub use sim::{BacktestBroker, PaperBroker};

use aegis_core::{BrokerOrderId, Fill, IdempotencyKey, OrderIntent, Side, Symbol};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broker-side order status as reported by `open_orders`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderStatus {
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl BrokerOrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            BrokerOrderStatus::Accepted | BrokerOrderStatus::PartiallyFilled
        )
    }
}

/// The broker's view of one order, used by reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub broker_order_id: BrokerOrderId,
    /// Client key echoed back by the broker; absent for orders placed
    /// outside this system (the reconciler raises those as alarms)
    pub client_key: Option<IdempotencyKey>,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub status: BrokerOrderStatus,
}

/// The universal execution interface.
///
/// All four operations block on external I/O and are the only suspension
/// points in the core; callers wrap each invocation in a timeout and treat
/// the timeout as a transient failure.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Adapter name for logging (e.g. "paper", "backtest", "mt5")
    fn name(&self) -> &'static str;

    /// Submit an order, returning the broker-assigned order id
    async fn submit(&self, intent: &OrderIntent) -> Result<BrokerOrderId>;

    /// Cancel a working order by broker id
    async fn cancel(&self, broker_order_id: &BrokerOrderId) -> Result<()>;

    /// The broker's current set of open (working) orders
    async fn open_orders(&self) -> Result<Vec<BrokerOrder>>;

    /// Fills reported at or after `since`, in execution order
    async fn fills_since(&self, since: DateTime<Utc>) -> Result<Vec<Fill>>;
}
