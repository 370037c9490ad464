use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Side;
use crate::identifiers::{BrokerOrderId, IdempotencyKey, Symbol};

/// Where a fill came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillSource {
    Live,
    Paper,
    Backtest,
}

impl FillSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillSource::Live => "live",
            FillSource::Paper => "paper",
            FillSource::Backtest => "backtest",
        }
    }
}

/// A confirmed (partial or full) execution. Immutable, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: Uuid,
    /// Ledger order this fill belongs to
    pub order_key: IdempotencyKey,
    pub broker_order_id: Option<BrokerOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    /// Price paid relative to the reference price at submission time
    pub slippage: Decimal,
    pub timestamp: DateTime<Utc>,
    pub source: FillSource,
}

impl Fill {
    pub fn new(
        order_key: IdempotencyKey,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        source: FillSource,
    ) -> Self {
        Self {
            fill_id: Uuid::new_v4(),
            order_key,
            broker_order_id: None,
            symbol,
            side,
            quantity,
            price,
            commission: Decimal::ZERO,
            slippage: Decimal::ZERO,
            timestamp: Utc::now(),
            source,
        }
    }

    /// Builder: attach the broker order id
    pub fn with_broker_order_id(mut self, id: BrokerOrderId) -> Self {
        self.broker_order_id = Some(id);
        self
    }

    /// Builder: set commission and slippage costs
    pub fn with_costs(mut self, commission: Decimal, slippage: Decimal) -> Self {
        self.commission = commission;
        self.slippage = slippage;
        self
    }

    /// Builder: set an explicit timestamp (backtests)
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    /// Quantity signed by side (+buy, -sell)
    pub fn signed_quantity(&self) -> Decimal {
        self.side.sign() * self.quantity
    }
}
