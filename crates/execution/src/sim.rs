//! Paper and backtest brokers.
//!
//! Both wrap the same simulated book: orders rest until a quote makes them
//! marketable, fills are priced by the [`FillEngine`], and quantity beyond
//! the per-quote volume cap rests as a partial. The paper broker is fed
//! live quotes as they arrive; the backtest broker is stepped through
//! historical quotes carrying their own timestamps.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use aegis_core::{
    BrokerOrderId, Fill, FillSource, IdempotencyKey, OrderIntent, OrderType, Side, Symbol,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;

use crate::fill_engine::{FillConfig, FillEngine, Quote};
use crate::{BrokerOrder, BrokerOrderStatus, ExecutionAdapter, ExecutionError, Result};

struct BookOrder {
    broker_order_id: BrokerOrderId,
    client_key: IdempotencyKey,
    symbol: Symbol,
    side: Side,
    order_type: OrderType,
    limit_price: Option<Decimal>,
    quantity: Decimal,
    filled_quantity: Decimal,
    notional_filled: Decimal,
    status: BrokerOrderStatus,
}

impl BookOrder {
    fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    fn average_fill_price(&self) -> Option<Decimal> {
        if self.filled_quantity.is_zero() {
            None
        } else {
            Some(self.notional_filled / self.filled_quantity)
        }
    }

    /// Can this order execute against the quote?
    fn is_marketable(&self, quote: &Quote) -> bool {
        match (self.order_type, self.limit_price) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Some(limit)) => match self.side {
                Side::Buy => limit >= quote.ask,
                Side::Sell => limit <= quote.bid,
            },
            (OrderType::Stop, Some(stop)) => match self.side {
                Side::Buy => quote.ask >= stop,
                Side::Sell => quote.bid <= stop,
            },
            _ => false,
        }
    }

    fn view(&self) -> BrokerOrder {
        BrokerOrder {
            broker_order_id: self.broker_order_id.clone(),
            client_key: Some(self.client_key.clone()),
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            filled_quantity: self.filled_quantity,
            average_fill_price: self.average_fill_price(),
            status: self.status,
        }
    }
}

/// Shared simulated book behind both simulator brokers
struct SimBook {
    source: FillSource,
    engine: FillEngine,
    quotes: Mutex<HashMap<Symbol, Quote>>,
    orders: Mutex<HashMap<BrokerOrderId, BookOrder>>,
    fills: Mutex<Vec<Fill>>,
    next_id: AtomicU64,
}

impl SimBook {
    fn new(source: FillSource, config: FillConfig) -> Self {
        Self {
            source,
            engine: FillEngine::new(config),
            quotes: Mutex::new(HashMap::new()),
            orders: Mutex::new(HashMap::new()),
            fills: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn submit(&self, intent: &OrderIntent) -> Result<BrokerOrderId> {
        if !intent.validate() {
            return Err(ExecutionError::InvalidOrder(format!(
                "intent {} failed validation",
                intent.idempotency_key
            )));
        }

        let id = BrokerOrderId::new(format!(
            "{}-{}",
            self.source.as_str(),
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        let order = BookOrder {
            broker_order_id: id.clone(),
            client_key: intent.idempotency_key.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
            quantity: intent.quantity,
            filled_quantity: Decimal::ZERO,
            notional_filled: Decimal::ZERO,
            status: BrokerOrderStatus::Accepted,
        };
        self.orders.lock().unwrap().insert(id.clone(), order);

        // Try to execute immediately against the current quote; otherwise
        // the order rests until the next quote arrives.
        let quote = self.quotes.lock().unwrap().get(&intent.symbol).cloned();
        if let Some(quote) = quote {
            self.match_order(&id, &quote);
        }
        Ok(id)
    }

    fn cancel(&self, broker_order_id: &BrokerOrderId) -> Result<()> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(broker_order_id)
            .ok_or_else(|| ExecutionError::UnknownOrder(broker_order_id.to_string()))?;
        if !order.status.is_open() {
            return Err(ExecutionError::Rejected(format!(
                "order {broker_order_id} is not open"
            )));
        }
        order.status = BrokerOrderStatus::Cancelled;
        Ok(())
    }

    fn on_quote(&self, quote: Quote) {
        let ids: Vec<BrokerOrderId> = {
            let orders = self.orders.lock().unwrap();
            orders
                .values()
                .filter(|o| o.status.is_open() && o.symbol == quote.symbol)
                .map(|o| o.broker_order_id.clone())
                .collect()
        };
        self.quotes
            .lock()
            .unwrap()
            .insert(quote.symbol.clone(), quote.clone());
        for id in ids {
            self.match_order(&id, &quote);
        }
    }

    fn match_order(&self, id: &BrokerOrderId, quote: &Quote) {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(id) else {
            return;
        };
        if !order.status.is_open() || !order.is_marketable(quote) {
            return;
        }

        let quantity = self.engine.fill_quantity(order.remaining(), quote);
        if quantity <= Decimal::ZERO {
            return;
        }
        let (price, slippage) = self.engine.fill_price(order.side, quantity, quote);
        let commission = self.engine.commission(quantity, price);

        order.filled_quantity += quantity;
        order.notional_filled += quantity * price;
        order.status = if order.remaining() <= Decimal::ZERO {
            BrokerOrderStatus::Filled
        } else {
            BrokerOrderStatus::PartiallyFilled
        };

        let fill = Fill::new(
            order.client_key.clone(),
            order.symbol.clone(),
            order.side,
            quantity,
            price,
            self.source,
        )
        .with_broker_order_id(order.broker_order_id.clone())
        .with_costs(commission, slippage)
        .with_timestamp(quote.timestamp);

        debug!(
            "[SIM] {} fill {} {} {} @ {} ({:?})",
            self.source.as_str(),
            order.broker_order_id,
            order.side.as_str(),
            quantity,
            price,
            order.status
        );
        self.fills.lock().unwrap().push(fill);
    }

    fn open_orders(&self) -> Vec<BrokerOrder> {
        self.orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.status.is_open())
            .map(BookOrder::view)
            .collect()
    }

    fn fills_since(&self, since: DateTime<Utc>) -> Vec<Fill> {
        self.fills
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.timestamp >= since)
            .cloned()
            .collect()
    }
}

/// Paper-trading broker driven by pushed live quotes
pub struct PaperBroker {
    book: SimBook,
}

impl PaperBroker {
    pub fn new(config: FillConfig) -> Self {
        Self {
            book: SimBook::new(FillSource::Paper, config),
        }
    }

    /// Feed a market quote; resting orders are matched against it
    pub fn push_quote(&self, quote: Quote) {
        self.book.on_quote(quote);
    }
}

#[async_trait]
impl ExecutionAdapter for PaperBroker {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn submit(&self, intent: &OrderIntent) -> Result<BrokerOrderId> {
        self.book.submit(intent)
    }

    async fn cancel(&self, broker_order_id: &BrokerOrderId) -> Result<()> {
        self.book.cancel(broker_order_id)
    }

    async fn open_orders(&self) -> Result<Vec<BrokerOrder>> {
        Ok(self.book.open_orders())
    }

    async fn fills_since(&self, since: DateTime<Utc>) -> Result<Vec<Fill>> {
        Ok(self.book.fills_since(since))
    }
}

/// Backtest broker stepped through historical quotes
pub struct BacktestBroker {
    book: SimBook,
}

impl BacktestBroker {
    pub fn new(config: FillConfig) -> Self {
        Self {
            book: SimBook::new(FillSource::Backtest, config),
        }
    }

    /// Advance the simulation by one historical quote
    pub fn step(&self, quote: Quote) {
        self.book.on_quote(quote);
    }

    /// Replay a quote series in order
    pub fn run(&self, quotes: impl IntoIterator<Item = Quote>) {
        for quote in quotes {
            self.step(quote);
        }
    }
}

#[async_trait]
impl ExecutionAdapter for BacktestBroker {
    fn name(&self) -> &'static str {
        "backtest"
    }

    async fn submit(&self, intent: &OrderIntent) -> Result<BrokerOrderId> {
        self.book.submit(intent)
    }

    async fn cancel(&self, broker_order_id: &BrokerOrderId) -> Result<()> {
        self.book.cancel(broker_order_id)
    }

    async fn open_orders(&self) -> Result<Vec<BrokerOrder>> {
        Ok(self.book.open_orders())
    }

    async fn fills_since(&self, since: DateTime<Utc>) -> Result<Vec<Fill>> {
        Ok(self.book.fills_since(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fill_engine::{CommissionModel, SlippageModel};
    use aegis_core::{Signal, SignalDirection};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn no_cost_config() -> FillConfig {
        FillConfig {
            slippage: SlippageModel::Fixed(Decimal::ZERO),
            commission: CommissionModel::PerTrade(Decimal::ZERO),
            max_fill_volume: None,
            noise_bps: 0,
            seed: 7,
        }
    }

    fn intent(quantity: Decimal) -> OrderIntent {
        let signal = Signal::new("EURUSD", SignalDirection::Buy, "trend-1", "paper");
        OrderIntent::from_signal(&signal, Side::Buy, quantity, dec!(0.005))
    }

    fn quote_at(bid: Decimal, ask: Decimal, secs: u32) -> Quote {
        Quote::new("EURUSD", bid, ask)
            .with_timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, secs).unwrap())
    }

    #[tokio::test]
    async fn test_market_order_fills_on_current_quote() {
        let broker = PaperBroker::new(no_cost_config());
        broker.push_quote(quote_at(dec!(1.1000), dec!(1.1002), 0));

        broker.submit(&intent(dec!(2))).await.unwrap();

        let fills = broker.fills_since(DateTime::<Utc>::MIN_UTC).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, dec!(2));
        assert_eq!(fills[0].price, dec!(1.1002));
        assert_eq!(fills[0].source, FillSource::Paper);
        assert!(broker.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_market_order_rests_until_first_quote() {
        let broker = PaperBroker::new(no_cost_config());
        broker.submit(&intent(dec!(1))).await.unwrap();
        assert_eq!(broker.open_orders().await.unwrap().len(), 1);

        broker.push_quote(quote_at(dec!(1.1000), dec!(1.1002), 1));
        assert!(broker.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_limit_order_waits_for_marketable_price() {
        let broker = PaperBroker::new(no_cost_config());
        broker.push_quote(quote_at(dec!(1.1000), dec!(1.1002), 0));

        let limit_intent = intent(dec!(1)).with_limit_price(dec!(1.0990));
        broker.submit(&limit_intent).await.unwrap();
        assert_eq!(broker.open_orders().await.unwrap().len(), 1);

        // Price drops through the limit
        broker.push_quote(quote_at(dec!(1.0985), dec!(1.0988), 1));
        let fills = broker.fills_since(DateTime::<Utc>::MIN_UTC).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(1.0988));
    }

    #[tokio::test]
    async fn test_volume_cap_produces_partial_then_completion() {
        let config = FillConfig {
            max_fill_volume: Some(dec!(3)),
            ..no_cost_config()
        };
        let broker = BacktestBroker::new(config);
        broker.step(quote_at(dec!(1.1000), dec!(1.1002), 0));

        broker.submit(&intent(dec!(5))).await.unwrap();

        let open = broker.open_orders().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].filled_quantity, dec!(3));
        assert_eq!(open[0].status, BrokerOrderStatus::PartiallyFilled);

        broker.step(quote_at(dec!(1.1001), dec!(1.1003), 1));
        assert!(broker.open_orders().await.unwrap().is_empty());

        let fills = broker.fills_since(DateTime::<Utc>::MIN_UTC).await.unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].quantity + fills[1].quantity, dec!(5));
        assert!(fills.iter().all(|f| f.source == FillSource::Backtest));
    }

    #[tokio::test]
    async fn test_cancel_open_order() {
        let broker = PaperBroker::new(no_cost_config());
        let limit_intent = intent(dec!(1)).with_limit_price(dec!(1.0000));
        broker.push_quote(quote_at(dec!(1.1000), dec!(1.1002), 0));
        let id = broker.submit(&limit_intent).await.unwrap();

        broker.cancel(&id).await.unwrap();
        assert!(broker.open_orders().await.unwrap().is_empty());

        // Cancelling twice is a business rejection
        assert!(matches!(
            broker.cancel(&id).await,
            Err(ExecutionError::Rejected(_))
        ));
        assert!(matches!(
            broker.cancel(&BrokerOrderId::new("nope")).await,
            Err(ExecutionError::UnknownOrder(_))
        ));
    }

    #[tokio::test]
    async fn test_backtest_fill_sequence_is_deterministic() {
        let run = |seed: u64| async move {
            let config = FillConfig {
                noise_bps: 8,
                seed,
                ..no_cost_config()
            };
            let broker = BacktestBroker::new(config);
            broker.step(quote_at(dec!(1.1000), dec!(1.1002), 0));
            broker.submit(&intent(dec!(1))).await.unwrap();
            broker.step(quote_at(dec!(1.1004), dec!(1.1006), 1));
            broker.submit(&intent(dec!(2))).await.unwrap();
            broker
                .fills_since(DateTime::<Utc>::MIN_UTC)
                .await
                .unwrap()
                .iter()
                .map(|f| (f.quantity, f.price))
                .collect::<Vec<_>>()
        };

        let a = run(42).await;
        let b = run(42).await;
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_intent_is_permanent_error() {
        let broker = PaperBroker::new(no_cost_config());
        let err = broker.submit(&intent(Decimal::ZERO)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOrder(_)));
        assert!(!err.is_transient());
    }
}
