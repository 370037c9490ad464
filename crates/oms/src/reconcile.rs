//! Ledger/broker reconciliation.
//!
//! On a fixed interval the broker's view of open orders is compared against
//! the ledger. Three discrepancy classes come out of the comparison:
//! 1. broker-only orders: the ledger adopts the broker's record (the broker
//!    is the source of truth for execution state) and an alarm is raised
//! 2. ledger-ahead orders: a non-terminal local order the broker does not
//!    know is a lost-order alarm, never auto-resolved; when the same key
//!    still has a submission retry pending the alarm is a distinct kind
//!    requiring operator resolution
//! 3. fill mismatches: filled quantity or price differing beyond tolerance
//!
//! Alarms are published on the alarms topic and can be configured to trip
//! the kill switch.

use std::sync::Arc;
use std::time::Duration;

use aegis_bus::{Alarm, AlarmKind, BusEvent, EventBus};
use aegis_core::{Order, OrderState};
use aegis_execution::{BrokerOrder, BrokerOrderStatus, ExecutionAdapter};
use aegis_risk::{KillReason, KillSwitch};
use chrono::Utc;
use log::{error, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::time::interval;

use crate::ledger::OrderLedger;
use crate::Result;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Relative tolerance for filled-price comparison (fraction)
    pub price_tolerance: Decimal,
    /// Absolute tolerance for filled-quantity comparison
    pub quantity_tolerance: Decimal,
    /// Ignore ledger orders younger than this; a submission may simply
    /// still be in flight
    pub lost_order_grace: chrono::Duration,
    /// Trip the kill switch on any alarm
    pub trip_on_alarm: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            price_tolerance: dec!(0.01),
            quantity_tolerance: dec!(0.0001),
            lost_order_grace: chrono::Duration::seconds(30),
            trip_on_alarm: false,
        }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    /// Broker-only orders adopted into the ledger
    pub adopted: Vec<Order>,
    /// Orders promoted Submitted -> Acknowledged from the broker view
    pub acknowledged: usize,
    pub alarms: Vec<Alarm>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.alarms.is_empty()
    }
}

pub struct Reconciler {
    ledger: Arc<OrderLedger>,
    adapter: Arc<dyn ExecutionAdapter>,
    bus: Arc<dyn EventBus>,
    kill_switch: Arc<KillSwitch>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<OrderLedger>,
        adapter: Arc<dyn ExecutionAdapter>,
        bus: Arc<dyn EventBus>,
        kill_switch: Arc<KillSwitch>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            adapter,
            bus,
            kill_switch,
            config,
        }
    }

    /// Periodic reconciliation loop; exits when `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.reconcile_once().await {
                        error!("[RECON] reconciliation pass failed: {err}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("[RECON] shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One reconciliation pass.
    pub async fn reconcile_once(&self) -> Result<ReconciliationReport> {
        let broker_orders = self.adapter.open_orders().await?;
        let mut report = ReconciliationReport::default();

        for broker_order in &broker_orders {
            let known = broker_order
                .client_key
                .as_ref()
                .and_then(|key| self.ledger.get(key))
                .or_else(|| self.ledger.get_by_broker_id(&broker_order.broker_order_id));

            match known {
                Some(local) => {
                    if let Some(promoted) = self.check_known(&local, broker_order, &mut report)? {
                        self.bus
                            .publish(BusEvent::OrderAcknowledged(promoted))
                            .await?;
                    }
                }
                None => self.adopt_unknown(broker_order, &mut report)?,
            }
        }

        self.find_lost_orders(&broker_orders, &mut report);

        for alarm in &report.alarms {
            warn!("[RECON] {:?}: {}", alarm.kind, alarm.detail);
            self.bus
                .publish(BusEvent::ReconciliationAlarm(alarm.clone()))
                .await?;
            if self.config.trip_on_alarm {
                self.kill_switch.trip(KillReason::ReconciliationDiscrepancy);
            }
        }
        Ok(report)
    }

    /// The broker knows this order; promote acknowledgement and verify the
    /// fill view agrees with ours. Returns the order when it was promoted.
    fn check_known(
        &self,
        local: &Order,
        broker_order: &BrokerOrder,
        report: &mut ReconciliationReport,
    ) -> Result<Option<Order>> {
        let mut promoted = None;
        if local.state == OrderState::Submitted {
            let order = self
                .ledger
                .transition(&local.idempotency_key, OrderState::Acknowledged, |o| {
                    if o.broker_order_id.is_none() {
                        o.broker_order_id = Some(broker_order.broker_order_id.clone());
                    }
                })?;
            report.acknowledged += 1;
            promoted = Some(order);
        }

        let quantity_gap = (local.filled_quantity - broker_order.filled_quantity).abs();
        if quantity_gap > self.config.quantity_tolerance {
            report.alarms.push(
                Alarm::new(
                    AlarmKind::FillMismatch,
                    format!(
                        "filled quantity differs for {}: ledger {} vs broker {}",
                        local.idempotency_key, local.filled_quantity, broker_order.filled_quantity
                    ),
                )
                .for_order(local.idempotency_key.clone(), local.symbol.clone()),
            );
            return Ok(promoted);
        }

        if let (Some(local_price), Some(broker_price)) =
            (local.average_fill_price, broker_order.average_fill_price)
            && broker_price > Decimal::ZERO
        {
            let deviation = (local_price - broker_price).abs() / broker_price;
            if deviation > self.config.price_tolerance {
                report.alarms.push(
                    Alarm::new(
                        AlarmKind::FillMismatch,
                        format!(
                            "average fill price differs for {}: ledger {} vs broker {}",
                            local.idempotency_key, local_price, broker_price
                        ),
                    )
                    .for_order(local.idempotency_key.clone(), local.symbol.clone()),
                );
            }
        }
        Ok(promoted)
    }

    /// Broker-only order: the ledger is updated to match the broker view,
    /// and the adoption itself is alarmed.
    fn adopt_unknown(
        &self,
        broker_order: &BrokerOrder,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let key = broker_order.client_key.clone().unwrap_or_else(|| {
            aegis_core::IdempotencyKey(format!("recovered-{}", broker_order.broker_order_id))
        });
        let now = Utc::now();
        let state = match broker_order.status {
            BrokerOrderStatus::Accepted => OrderState::Acknowledged,
            BrokerOrderStatus::PartiallyFilled => OrderState::PartiallyFilled,
            BrokerOrderStatus::Filled => OrderState::Filled,
            BrokerOrderStatus::Cancelled => OrderState::Cancelled,
        };
        let order = Order {
            idempotency_key: key.clone(),
            broker_order_id: Some(broker_order.broker_order_id.clone()),
            symbol: broker_order.symbol.clone(),
            side: broker_order.side,
            quantity: broker_order.quantity,
            filled_quantity: broker_order.filled_quantity,
            average_fill_price: broker_order.average_fill_price,
            state,
            order_type: aegis_core::OrderType::Market,
            limit_price: None,
            strategy_id: "unattributed".to_string(),
            broker_id: self.adapter.name().to_string(),
            created_at: now,
            last_transition_at: now,
            retry_count: 0,
            last_error: None,
        };
        self.ledger.adopt(order.clone())?;

        report.alarms.push(
            Alarm::new(
                AlarmKind::UnknownBrokerOrder,
                format!(
                    "broker order {} unknown to ledger; adopted as {}",
                    broker_order.broker_order_id, key
                ),
            )
            .for_order(key, broker_order.symbol.clone()),
        );
        report.adopted.push(order);
        Ok(())
    }

    /// Ledger-ahead orders: non-terminal locally, absent from the broker's
    /// open set. Flagged, never auto-resolved.
    fn find_lost_orders(&self, broker_orders: &[BrokerOrder], report: &mut ReconciliationReport) {
        let now = Utc::now();
        for local in self.ledger.open_orders() {
            // Created orders have not reached the broker yet
            if local.state == OrderState::Created {
                continue;
            }
            if now - local.last_transition_at < self.config.lost_order_grace {
                continue;
            }
            let broker_knows = local.broker_order_id.as_ref().is_some_and(|id| {
                broker_orders.iter().any(|bo| &bo.broker_order_id == id)
            });
            if broker_knows {
                continue;
            }

            // No broker id means the submit outcome is still unknown: the
            // retry loop may yet settle it, so this is the operator-facing
            // collision case, not a plain lost order.
            let kind = if local.broker_order_id.is_none() {
                AlarmKind::LostOrderPendingRetry
            } else {
                AlarmKind::LostOrder
            };
            report.alarms.push(
                Alarm::new(
                    kind,
                    format!(
                        "ledger order {} ({}) not reported by broker",
                        local.idempotency_key,
                        local.state.as_str()
                    ),
                )
                .for_order(local.idempotency_key.clone(), local.symbol.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_bus::{ChannelBus, Subscription, Topic};
    use aegis_core::{
        BrokerOrderId, Fill, IdempotencyKey, OrderIntent, Side, Signal, SignalDirection, Symbol,
    };
    use aegis_store::MemoryStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct StaticAdapter {
        orders: StdMutex<Vec<BrokerOrder>>,
    }

    impl StaticAdapter {
        fn new(orders: Vec<BrokerOrder>) -> Self {
            Self {
                orders: StdMutex::new(orders),
            }
        }
    }

    #[async_trait]
    impl ExecutionAdapter for StaticAdapter {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn submit(
            &self,
            _intent: &OrderIntent,
        ) -> aegis_execution::Result<BrokerOrderId> {
            Ok(BrokerOrderId::new("static-1"))
        }

        async fn cancel(&self, _broker_order_id: &BrokerOrderId) -> aegis_execution::Result<()> {
            Ok(())
        }

        async fn open_orders(&self) -> aegis_execution::Result<Vec<BrokerOrder>> {
            Ok(self.orders.lock().unwrap().clone())
        }

        async fn fills_since(
            &self,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> aegis_execution::Result<Vec<Fill>> {
            Ok(Vec::new())
        }
    }

    fn ledger() -> Arc<OrderLedger> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(OrderLedger::new(store.clone(), store).unwrap())
    }

    fn local_order(strategy: &str, state: OrderState, broker_id: Option<&str>) -> Order {
        let signal = Signal::new("EURUSD", SignalDirection::Buy, strategy, "paper");
        let intent = OrderIntent::from_signal(&signal, Side::Buy, dec!(2), dec!(0.005));
        let mut order = Order::from_intent(&intent);
        order.state = state;
        order.broker_order_id = broker_id.map(BrokerOrderId::new);
        // Old enough to clear the lost-order grace window
        order.last_transition_at = Utc::now() - chrono::Duration::minutes(5);
        order
    }

    fn broker_view(id: &str, key: Option<&IdempotencyKey>) -> BrokerOrder {
        BrokerOrder {
            broker_order_id: BrokerOrderId::new(id),
            client_key: key.cloned(),
            symbol: Symbol::from("EURUSD"),
            side: Side::Buy,
            quantity: dec!(2),
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            status: BrokerOrderStatus::Accepted,
        }
    }

    fn reconciler(
        ledger: Arc<OrderLedger>,
        adapter: Arc<dyn ExecutionAdapter>,
        config: ReconcilerConfig,
    ) -> (Reconciler, Box<dyn Subscription>, Arc<KillSwitch>) {
        let bus = Arc::new(ChannelBus::default());
        let alarms = bus.subscribe(Topic::Alarms, "test").unwrap();
        let kill_switch = Arc::new(KillSwitch::new());
        (
            Reconciler::new(ledger, adapter, bus, kill_switch.clone(), config),
            alarms,
            kill_switch,
        )
    }

    #[tokio::test]
    async fn test_unknown_broker_order_adopted_with_alarm() {
        let ledger = ledger();
        let adapter = Arc::new(StaticAdapter::new(vec![broker_view("b-99", None)]));
        let (reconciler, mut alarms, _) =
            reconciler(ledger.clone(), adapter, ReconcilerConfig::default());

        let report = reconciler.reconcile_once().await.unwrap();

        // Ledger adopted the broker's order
        assert_eq!(report.adopted.len(), 1);
        let adopted = &report.adopted[0];
        assert_eq!(adopted.state, OrderState::Acknowledged);
        assert!(ledger.get(&adopted.idempotency_key).is_some());

        // And the adoption is alarmed either way
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].kind, AlarmKind::UnknownBrokerOrder);
        assert!(matches!(
            alarms.next().await.unwrap(),
            BusEvent::ReconciliationAlarm(_)
        ));
    }

    #[tokio::test]
    async fn test_lost_order_flagged_not_resolved() {
        let ledger = ledger();
        let order = local_order("trend-1", OrderState::Acknowledged, Some("b-1"));
        let key = order.idempotency_key.clone();
        ledger.adopt(order).unwrap();

        // Broker reports nothing
        let adapter = Arc::new(StaticAdapter::new(vec![]));
        let (reconciler, _, _) = reconciler(ledger.clone(), adapter, ReconcilerConfig::default());

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].kind, AlarmKind::LostOrder);
        // Never auto-resolved: the order stays as the ledger had it
        assert_eq!(ledger.get(&key).unwrap().state, OrderState::Acknowledged);
    }

    #[tokio::test]
    async fn test_lost_order_with_pending_retry_is_distinct() {
        let ledger = ledger();
        let mut order = local_order("trend-1", OrderState::Submitted, None);
        order.retry_count = 1;
        ledger.adopt(order).unwrap();

        let adapter = Arc::new(StaticAdapter::new(vec![]));
        let (reconciler, _, _) = reconciler(ledger, adapter, ReconcilerConfig::default());

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].kind, AlarmKind::LostOrderPendingRetry);
    }

    #[tokio::test]
    async fn test_fresh_submission_not_flagged() {
        let ledger = ledger();
        let mut order = local_order("trend-1", OrderState::Submitted, Some("b-1"));
        order.last_transition_at = Utc::now();
        ledger.adopt(order).unwrap();

        let adapter = Arc::new(StaticAdapter::new(vec![]));
        let (reconciler, _, _) = reconciler(ledger, adapter, ReconcilerConfig::default());

        let report = reconciler.reconcile_once().await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_submitted_promoted_to_acknowledged() {
        let ledger = ledger();
        let order = local_order("trend-1", OrderState::Submitted, Some("b-1"));
        let key = order.idempotency_key.clone();
        ledger.adopt(order).unwrap();

        let adapter = Arc::new(StaticAdapter::new(vec![broker_view("b-1", Some(&key))]));
        let (reconciler, _, _) = reconciler(ledger.clone(), adapter, ReconcilerConfig::default());

        let report = reconciler.reconcile_once().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.acknowledged, 1);
        assert_eq!(ledger.get(&key).unwrap().state, OrderState::Acknowledged);
    }

    #[tokio::test]
    async fn test_fill_mismatch_alarm_can_trip_kill_switch() {
        let ledger = ledger();
        let mut order = local_order("trend-1", OrderState::PartiallyFilled, Some("b-1"));
        order.filled_quantity = dec!(1);
        order.average_fill_price = Some(dec!(1.1000));
        let key = order.idempotency_key.clone();
        ledger.adopt(order).unwrap();

        let mut view = broker_view("b-1", Some(&key));
        view.status = BrokerOrderStatus::PartiallyFilled;
        view.filled_quantity = dec!(1.5); // broker saw more filled
        view.average_fill_price = Some(dec!(1.1000));

        let adapter = Arc::new(StaticAdapter::new(vec![view]));
        let config = ReconcilerConfig {
            trip_on_alarm: true,
            ..ReconcilerConfig::default()
        };
        let (reconciler, _, kill_switch) = reconciler(ledger, adapter, config);

        let report = reconciler.reconcile_once().await.unwrap();
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].kind, AlarmKind::FillMismatch);
        assert!(kill_switch.is_tripped());
    }
}
