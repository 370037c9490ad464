//! Map-backed store for tests and pure backtests.

use std::sync::Mutex;

use aegis_core::{AccountId, Fill, IdempotencyKey, Order, RiskState};
use dashmap::DashMap;

use crate::{FillStore, OrderStore, Result, RiskStateStore};

#[derive(Default)]
pub struct MemoryStore {
    orders: DashMap<IdempotencyKey, Order>,
    fills: Mutex<Vec<Fill>>,
    risk_states: DashMap<AccountId, RiskState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryStore {
    fn upsert_order(&self, order: &Order) -> Result<()> {
        self.orders
            .insert(order.idempotency_key.clone(), order.clone());
        Ok(())
    }

    fn get_order(&self, key: &IdempotencyKey) -> Result<Option<Order>> {
        Ok(self.orders.get(key).map(|entry| entry.clone()))
    }

    fn open_orders(&self) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| entry.state.is_active())
            .map(|entry| entry.clone())
            .collect())
    }

    fn all_orders(&self) -> Result<Vec<Order>> {
        Ok(self.orders.iter().map(|entry| entry.clone()).collect())
    }
}

impl FillStore for MemoryStore {
    fn append_fill(&self, fill: &Fill) -> Result<()> {
        let mut fills = self.fills.lock().unwrap();
        if !fills.iter().any(|f| f.fill_id == fill.fill_id) {
            fills.push(fill.clone());
        }
        Ok(())
    }

    fn fills_for_symbol(&self, symbol: &str) -> Result<Vec<Fill>> {
        Ok(self
            .fills
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.symbol.as_str() == symbol)
            .cloned()
            .collect())
    }
}

impl RiskStateStore for MemoryStore {
    fn save_risk_state(&self, account: &AccountId, state: &RiskState) -> Result<()> {
        self.risk_states.insert(account.clone(), state.clone());
        Ok(())
    }

    fn load_risk_state(&self, account: &AccountId) -> Result<Option<RiskState>> {
        Ok(self.risk_states.get(account).map(|entry| entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{OrderIntent, OrderState, Side, Signal, SignalDirection};
    use rust_decimal_macros::dec;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let signal = Signal::new("EURUSD", SignalDirection::Buy, "trend-1", "paper");
        let intent = OrderIntent::from_signal(&signal, Side::Buy, dec!(1), dec!(0.005));
        let mut order = Order::from_intent(&intent);

        store.upsert_order(&order).unwrap();
        assert_eq!(store.open_orders().unwrap().len(), 1);

        order.state = OrderState::Filled;
        store.upsert_order(&order).unwrap();
        assert!(store.open_orders().unwrap().is_empty());
        assert_eq!(store.all_orders().unwrap().len(), 1);
    }
}
