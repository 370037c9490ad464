//! Event types carried on the bus.

use aegis_core::{Fill, IdempotencyKey, Order, Signal, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bus topic; ordering is guaranteed per topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Signals,
    Orders,
    Risk,
    Alarms,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::Signals, Topic::Orders, Topic::Risk, Topic::Alarms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Signals => "signals",
            Topic::Orders => "orders",
            Topic::Risk => "risk",
            Topic::Alarms => "alarms",
        }
    }
}

/// Reconciliation discrepancy classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmKind {
    /// Broker reports an order the ledger does not know
    UnknownBrokerOrder,
    /// Ledger holds a non-terminal order the broker does not know
    LostOrder,
    /// Lost order while a retry for the same key is still pending;
    /// requires operator resolution, never auto-merged
    LostOrderPendingRetry,
    /// Filled quantity/price differ beyond tolerance
    FillMismatch,
}

/// Operator-facing alarm raised by reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub kind: AlarmKind,
    pub order_key: Option<IdempotencyKey>,
    pub symbol: Option<Symbol>,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl Alarm {
    pub fn new(kind: AlarmKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            order_key: None,
            symbol: None,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_order(mut self, key: IdempotencyKey, symbol: Symbol) -> Self {
        self.order_key = Some(key);
        self.symbol = Some(symbol);
        self
    }
}

/// Every event the trading core publishes or consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusEvent {
    /// Upstream signal entering the pipeline
    SignalReceived(Signal),

    // Order lifecycle, published by the order manager
    OrderCreated(Order),
    OrderSubmitted(Order),
    OrderAcknowledged(Order),
    OrderPartiallyFilled { order: Order, fill: Fill },
    OrderFilled { order: Order, fill: Fill },
    OrderRejected { order: Order, reason: String },
    OrderCancelled(Order),

    /// Risk manager turned a signal away
    RiskRejection {
        signal: Signal,
        limit: String,
        threshold: Decimal,
        actual: Decimal,
    },

    /// Reconciliation found a ledger/broker discrepancy
    ReconciliationAlarm(Alarm),

    /// The kill switch latched; first reason wins
    KillSwitchTripped {
        reason: String,
        tripped_at: DateTime<Utc>,
    },
}

impl BusEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::SignalReceived(_) => Topic::Signals,
            BusEvent::OrderCreated(_)
            | BusEvent::OrderSubmitted(_)
            | BusEvent::OrderAcknowledged(_)
            | BusEvent::OrderPartiallyFilled { .. }
            | BusEvent::OrderFilled { .. }
            | BusEvent::OrderRejected { .. }
            | BusEvent::OrderCancelled(_) => Topic::Orders,
            BusEvent::RiskRejection { .. } => Topic::Risk,
            BusEvent::ReconciliationAlarm(_) | BusEvent::KillSwitchTripped { .. } => Topic::Alarms,
        }
    }
}
