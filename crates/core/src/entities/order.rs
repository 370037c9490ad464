use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Fill, OrderState, Side, Signal};
use crate::identifiers::{BrokerOrderId, IdempotencyKey, Symbol};

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// A sized, risk-checked candidate order produced by the risk manager.
///
/// Not yet submitted; submission and lifecycle tracking belong to the order
/// manager. The idempotency key is derived from the originating signal, so
/// re-evaluating a duplicate signal yields the same intent key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub idempotency_key: IdempotencyKey,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Required for limit orders
    pub limit_price: Option<Decimal>,
    /// Price distance to the protective stop used in sizing
    pub stop_distance: Decimal,
    pub strategy_id: String,
    pub broker_id: String,
    /// Set by the risk manager once the intent passed all limit checks
    pub risk_checked: bool,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    /// Build an intent from a signal plus sizing output.
    pub fn from_signal(signal: &Signal, side: Side, quantity: Decimal, stop_distance: Decimal) -> Self {
        Self {
            idempotency_key: IdempotencyKey::derive(
                &signal.symbol,
                &signal.strategy_id,
                signal.timestamp,
                &signal.broker_id,
            ),
            symbol: signal.symbol.clone(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_distance,
            strategy_id: signal.strategy_id.clone(),
            broker_id: signal.broker_id.clone(),
            risk_checked: false,
            created_at: Utc::now(),
        }
    }

    /// Builder: make this a limit order at `price`
    pub fn with_limit_price(mut self, price: Decimal) -> Self {
        self.order_type = OrderType::Limit;
        self.limit_price = Some(price);
        self
    }

    /// Basic intent validation, independent of any risk state
    pub fn validate(&self) -> bool {
        let price_ok = match self.order_type {
            OrderType::Market => true,
            OrderType::Limit | OrderType::Stop => self.limit_price.is_some(),
        };
        price_ok && self.quantity > Decimal::ZERO
    }
}

/// Persistent order record, owned exclusively by the order manager.
///
/// The risk manager and execution adapters only read it or request
/// transitions; they never mutate it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique per logical intent; the ledger's primary key
    pub idempotency_key: IdempotencyKey,
    /// Unknown until the broker acknowledges the submission
    pub broker_order_id: Option<BrokerOrderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub state: OrderState,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub strategy_id: String,
    pub broker_id: String,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    /// Submission attempts that failed transiently before this order settled
    pub retry_count: u32,
    /// Last error observed for this order, kept through terminal states
    pub last_error: Option<String>,
}

impl Order {
    /// Create a fresh ledger record from an accepted intent
    pub fn from_intent(intent: &OrderIntent) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: intent.idempotency_key.clone(),
            broker_order_id: None,
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            state: OrderState::Created,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
            strategy_id: intent.strategy_id.clone(),
            broker_id: intent.broker_id.clone(),
            created_at: now,
            last_transition_at: now,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Remaining quantity to be filled
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Returns true if the order is completely filled
    pub fn is_filled(&self) -> bool {
        self.filled_quantity >= self.quantity
    }

    /// Fold a fill into the record: cumulative quantity and volume-weighted
    /// average price. Returns the state the order should transition to.
    pub fn absorb_fill(&mut self, fill: &Fill) -> OrderState {
        let prev_qty = self.filled_quantity;
        let total_qty = prev_qty + fill.quantity;
        let prev_avg = self.average_fill_price.unwrap_or(Decimal::ZERO);
        if total_qty > Decimal::ZERO {
            self.average_fill_price =
                Some((prev_avg * prev_qty + fill.price * fill.quantity) / total_qty);
        }
        self.filled_quantity = total_qty;
        if self.is_filled() {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{FillSource, SignalDirection};
    use rust_decimal_macros::dec;

    fn sample_intent() -> OrderIntent {
        let signal = Signal::new("EURUSD", SignalDirection::Buy, "trend-1", "paper");
        OrderIntent::from_signal(&signal, Side::Buy, dec!(2), dec!(0.0050))
    }

    fn fill_for(order: &Order, quantity: Decimal, price: Decimal) -> Fill {
        Fill::new(
            order.idempotency_key.clone(),
            order.symbol.clone(),
            order.side,
            quantity,
            price,
            FillSource::Paper,
        )
    }

    #[test]
    fn test_intent_validation() {
        let intent = sample_intent();
        assert!(intent.validate());

        let mut zero_qty = sample_intent();
        zero_qty.quantity = Decimal::ZERO;
        assert!(!zero_qty.validate());

        let mut limit_no_price = sample_intent();
        limit_no_price.order_type = OrderType::Limit;
        assert!(!limit_no_price.validate());

        assert!(sample_intent().with_limit_price(dec!(1.10)).validate());
    }

    #[test]
    fn test_absorb_partial_then_full_fill() {
        let intent = sample_intent();
        let mut order = Order::from_intent(&intent);

        let next = order.absorb_fill(&fill_for(&order, dec!(0.5), dec!(1.1000)));
        assert_eq!(next, OrderState::PartiallyFilled);
        assert_eq!(order.filled_quantity, dec!(0.5));
        assert_eq!(order.average_fill_price, Some(dec!(1.1000)));

        let next = order.absorb_fill(&fill_for(&order, dec!(1.5), dec!(1.1040)));
        assert_eq!(next, OrderState::Filled);
        assert_eq!(order.filled_quantity, dec!(2));
        // VWAP: (0.5 * 1.1000 + 1.5 * 1.1040) / 2 = 1.1030
        assert_eq!(order.average_fill_price, Some(dec!(1.1030)));
    }

    #[test]
    fn test_duplicate_signal_same_key() {
        let signal = Signal::new("EURUSD", SignalDirection::Buy, "trend-1", "paper");
        let a = OrderIntent::from_signal(&signal, Side::Buy, dec!(1), dec!(0.001));
        let b = OrderIntent::from_signal(&signal, Side::Buy, dec!(3), dec!(0.001));
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }
}
