//! SQLite-backed store.
//!
//! Entities are serialized to JSON payload columns; the only structured
//! columns are the lookup keys and the order state (for the open-order
//! scan). A single connection behind a mutex is plenty for the write rates
//! the order path produces.

use std::path::Path;
use std::sync::Mutex;

use aegis_core::{AccountId, Fill, IdempotencyKey, Order, RiskState};
use rusqlite::{Connection, params};

use crate::{FillStore, OrderStore, Result, RiskStateStore};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at the given database path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                idempotency_key TEXT PRIMARY KEY,
                broker_order_id TEXT,
                state TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fills (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                fill_id TEXT NOT NULL UNIQUE,
                order_key TEXT NOT NULL,
                symbol TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fills_symbol ON fills(symbol);

            CREATE TABLE IF NOT EXISTS risk_state (
                account_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl OrderStore for SqliteStore {
    fn upsert_order(&self, order: &Order) -> Result<()> {
        let payload = serde_json::to_string(order)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO orders (idempotency_key, broker_order_id, state, payload)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(idempotency_key) DO UPDATE SET
                broker_order_id = excluded.broker_order_id,
                state = excluded.state,
                payload = excluded.payload
            "#,
            params![
                order.idempotency_key.as_str(),
                order.broker_order_id.as_ref().map(|id| id.as_str()),
                order.state.as_str(),
                payload
            ],
        )?;
        Ok(())
    }

    fn get_order(&self, key: &IdempotencyKey) -> Result<Option<Order>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT payload FROM orders WHERE idempotency_key = ?1")?;
        let mut rows = stmt.query(params![key.as_str()])?;
        match rows.next()? {
            Some(row) => {
                let payload: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    fn open_orders(&self) -> Result<Vec<Order>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM orders
             WHERE state NOT IN ('filled', 'rejected', 'cancelled', 'expired')",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut orders = Vec::new();
        for payload in rows {
            orders.push(serde_json::from_str(&payload?)?);
        }
        Ok(orders)
    }

    fn all_orders(&self) -> Result<Vec<Order>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT payload FROM orders")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut orders = Vec::new();
        for payload in rows {
            orders.push(serde_json::from_str(&payload?)?);
        }
        Ok(orders)
    }
}

impl FillStore for SqliteStore {
    fn append_fill(&self, fill: &Fill) -> Result<()> {
        let payload = serde_json::to_string(fill)?;
        let conn = self.conn.lock().unwrap();
        // ON CONFLICT DO NOTHING keeps replayed fills (at-least-once
        // delivery) from double-counting in the journal.
        conn.execute(
            r#"
            INSERT INTO fills (fill_id, order_key, symbol, payload)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(fill_id) DO NOTHING
            "#,
            params![
                fill.fill_id.to_string(),
                fill.order_key.as_str(),
                fill.symbol.as_str(),
                payload
            ],
        )?;
        Ok(())
    }

    fn fills_for_symbol(&self, symbol: &str) -> Result<Vec<Fill>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT payload FROM fills WHERE symbol = ?1 ORDER BY seq ASC")?;
        let rows = stmt.query_map(params![symbol], |row| row.get::<_, String>(0))?;
        let mut fills = Vec::new();
        for payload in rows {
            fills.push(serde_json::from_str(&payload?)?);
        }
        Ok(fills)
    }
}

impl RiskStateStore for SqliteStore {
    fn save_risk_state(&self, account: &AccountId, state: &RiskState) -> Result<()> {
        let payload = serde_json::to_string(state)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO risk_state (account_id, payload)
            VALUES (?1, ?2)
            ON CONFLICT(account_id) DO UPDATE SET payload = excluded.payload
            "#,
            params![account.as_str(), payload],
        )?;
        Ok(())
    }

    fn load_risk_state(&self, account: &AccountId) -> Result<Option<RiskState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT payload FROM risk_state WHERE account_id = ?1")?;
        let mut rows = stmt.query(params![account.as_str()])?;
        match rows.next()? {
            Some(row) => {
                let payload: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{FillSource, OrderIntent, OrderState, Side, Signal, SignalDirection, Symbol};
    use rust_decimal_macros::dec;

    fn sample_order(strategy: &str) -> Order {
        let signal = Signal::new("EURUSD", SignalDirection::Buy, strategy, "paper");
        let intent = OrderIntent::from_signal(&signal, Side::Buy, dec!(1), dec!(0.005));
        Order::from_intent(&intent)
    }

    #[test]
    fn test_order_roundtrip_and_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut order = sample_order("trend-1");

        store.upsert_order(&order).unwrap();
        let loaded = store.get_order(&order.idempotency_key).unwrap().unwrap();
        assert_eq!(loaded.state, OrderState::Created);

        order.state = OrderState::Submitted;
        order.retry_count = 2;
        store.upsert_order(&order).unwrap();
        let loaded = store.get_order(&order.idempotency_key).unwrap().unwrap();
        assert_eq!(loaded.state, OrderState::Submitted);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(store.all_orders().unwrap().len(), 1);
    }

    #[test]
    fn test_open_orders_excludes_terminal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let open = sample_order("trend-1");
        let mut done = sample_order("trend-2");
        done.state = OrderState::Filled;

        store.upsert_order(&open).unwrap();
        store.upsert_order(&done).unwrap();

        let open_orders = store.open_orders().unwrap();
        assert_eq!(open_orders.len(), 1);
        assert_eq!(open_orders[0].idempotency_key, open.idempotency_key);
    }

    #[test]
    fn test_fill_journal_dedupes_replays() {
        let store = SqliteStore::open_in_memory().unwrap();
        let order = sample_order("trend-1");
        let fill = Fill::new(
            order.idempotency_key.clone(),
            Symbol::from("EURUSD"),
            Side::Buy,
            dec!(1),
            dec!(1.1),
            FillSource::Paper,
        );

        store.append_fill(&fill).unwrap();
        store.append_fill(&fill).unwrap();
        assert_eq!(store.fills_for_symbol("EURUSD").unwrap().len(), 1);
        assert!(store.fills_for_symbol("GBPUSD").unwrap().is_empty());
    }

    #[test]
    fn test_risk_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.sqlite");
        let account = AccountId::new("acct-1");

        {
            let store = SqliteStore::open(&path).unwrap();
            let mut state = RiskState::new(dec!(10_000));
            state.apply_realized_pnl(dec!(-250));
            store.save_risk_state(&account, &state).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let state = store.load_risk_state(&account).unwrap().unwrap();
        assert_eq!(state.equity, dec!(9_750));
        assert_eq!(state.consecutive_loss_count, 1);
    }
}
