//! The order ledger.
//!
//! A write-through cache over the durable order store, enforcing the order
//! state machine on every transition. On startup the in-memory index is
//! rehydrated from the store so idempotency keys issued before a restart
//! still coalesce.

use std::sync::Arc;

use aegis_core::{BrokerOrderId, Fill, IdempotencyKey, Order, OrderState};
use aegis_store::{FillStore, OrderStore};
use chrono::Utc;
use dashmap::DashMap;
use log::info;

use crate::{Error, Result};

pub struct OrderLedger {
    orders: Arc<dyn OrderStore>,
    fills: Arc<dyn FillStore>,
    index: DashMap<IdempotencyKey, Order>,
}

impl OrderLedger {
    /// Build the ledger, rehydrating the index from the store.
    pub fn new(orders: Arc<dyn OrderStore>, fills: Arc<dyn FillStore>) -> Result<Self> {
        let index = DashMap::new();
        let existing = orders.all_orders()?;
        if !existing.is_empty() {
            info!("[OMS] rehydrated {} orders from store", existing.len());
        }
        for order in existing {
            index.insert(order.idempotency_key.clone(), order);
        }
        Ok(Self {
            orders,
            fills,
            index,
        })
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<Order> {
        self.index.get(key).map(|entry| entry.clone())
    }

    /// Look an order up by the broker's identifier
    pub fn get_by_broker_id(&self, broker_order_id: &BrokerOrderId) -> Option<Order> {
        self.index
            .iter()
            .find(|entry| entry.broker_order_id.as_ref() == Some(broker_order_id))
            .map(|entry| entry.clone())
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.index
            .iter()
            .filter(|entry| entry.state.is_active())
            .map(|entry| entry.clone())
            .collect()
    }

    /// Insert a freshly created order record
    pub fn insert(&self, order: Order) -> Result<()> {
        self.orders.upsert_order(&order)?;
        self.index.insert(order.idempotency_key.clone(), order);
        Ok(())
    }

    /// Adopt a broker-truth record during reconciliation, bypassing the
    /// transition table (the broker is the source of truth for execution
    /// state).
    pub fn adopt(&self, order: Order) -> Result<()> {
        self.orders.upsert_order(&order)?;
        self.index.insert(order.idempotency_key.clone(), order);
        Ok(())
    }

    /// Mutate an order without changing its state (retry counters, broker
    /// id assignment, error notes).
    pub fn update(
        &self,
        key: &IdempotencyKey,
        mutate: impl FnOnce(&mut Order),
    ) -> Result<Order> {
        let mut entry = self
            .index
            .get_mut(key)
            .ok_or_else(|| Error::UnknownOrder(key.clone()))?;
        mutate(&mut entry);
        self.orders.upsert_order(&entry)?;
        Ok(entry.clone())
    }

    /// Transition an order to `to`, enforcing the state machine. The
    /// mutation closure runs only when the transition is legal.
    pub fn transition(
        &self,
        key: &IdempotencyKey,
        to: OrderState,
        mutate: impl FnOnce(&mut Order),
    ) -> Result<Order> {
        let mut entry = self
            .index
            .get_mut(key)
            .ok_or_else(|| Error::UnknownOrder(key.clone()))?;
        if !entry.state.can_transition(to) {
            return Err(Error::InvalidTransition {
                key: key.clone(),
                from: entry.state,
                to,
            });
        }
        mutate(&mut entry);
        entry.state = to;
        entry.last_transition_at = Utc::now();
        self.orders.upsert_order(&entry)?;
        Ok(entry.clone())
    }

    /// Append a fill to the durable journal
    pub fn record_fill(&self, fill: &Fill) -> Result<()> {
        self.fills.append_fill(fill)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{OrderIntent, Side, Signal, SignalDirection};
    use aegis_store::MemoryStore;
    use rust_decimal_macros::dec;

    fn ledger_with_store() -> (OrderLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = OrderLedger::new(store.clone(), store.clone()).unwrap();
        (ledger, store)
    }

    fn sample_order(strategy: &str) -> Order {
        let signal = Signal::new("EURUSD", SignalDirection::Buy, strategy, "paper");
        let intent = OrderIntent::from_signal(&signal, Side::Buy, dec!(1), dec!(0.005));
        Order::from_intent(&intent)
    }

    #[test]
    fn test_transition_enforces_state_machine() {
        let (ledger, _) = ledger_with_store();
        let order = sample_order("trend-1");
        let key = order.idempotency_key.clone();
        ledger.insert(order).unwrap();

        ledger
            .transition(&key, OrderState::Submitted, |_| {})
            .unwrap();

        // Created is not reachable from Submitted
        let err = ledger
            .transition(&key, OrderState::Created, |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let order = ledger
            .transition(&key, OrderState::Acknowledged, |o| {
                o.broker_order_id = Some(BrokerOrderId::new("b-1"))
            })
            .unwrap();
        assert_eq!(order.state, OrderState::Acknowledged);
    }

    #[test]
    fn test_mutation_skipped_on_illegal_transition() {
        let (ledger, _) = ledger_with_store();
        let mut order = sample_order("trend-1");
        order.state = OrderState::Filled;
        let key = order.idempotency_key.clone();
        ledger.adopt(order).unwrap();

        let result = ledger.transition(&key, OrderState::Cancelled, |o| {
            o.last_error = Some("should not happen".into())
        });
        assert!(result.is_err());
        assert!(ledger.get(&key).unwrap().last_error.is_none());
    }

    #[test]
    fn test_rehydration_restores_index() {
        let store = Arc::new(MemoryStore::new());
        let order = sample_order("trend-1");
        let key = order.idempotency_key.clone();
        {
            let ledger = OrderLedger::new(store.clone(), store.clone()).unwrap();
            ledger.insert(order).unwrap();
            ledger
                .transition(&key, OrderState::Submitted, |o| {
                    o.broker_order_id = Some(BrokerOrderId::new("b-7"))
                })
                .unwrap();
        }

        // New ledger over the same store sees the order
        let ledger = OrderLedger::new(store.clone(), store).unwrap();
        let restored = ledger.get(&key).unwrap();
        assert_eq!(restored.state, OrderState::Submitted);
        assert_eq!(
            ledger.get_by_broker_id(&BrokerOrderId::new("b-7")).unwrap().idempotency_key,
            key
        );
        assert_eq!(ledger.open_orders().len(), 1);
    }
}
