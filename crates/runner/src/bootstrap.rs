//! Trading-core assembly and worker orchestration.
//!
//! `TradingCore::build` wires the components; `start` spawns the worker
//! tasks:
//! - signal worker: signals topic -> overtrading guard -> risk manager ->
//!   order manager
//! - order-event worker: order lifecycle events -> risk bookkeeping,
//!   guard outcomes, risk-state persistence
//! - fill poller: adapter fills -> order manager
//! - reconciliation loop
//! - kill-switch evaluator: broker health breaches and trip-event
//!   publication
//!
//! All tasks stop through one watch channel.

use std::sync::Arc;
use std::time::Duration;

use aegis_bus::{BusEvent, EventBus, Subscription, Topic};
use aegis_core::{AccountId, AccountSnapshot, Order, Signal};
use aegis_execution::ExecutionAdapter;
use aegis_oms::{OmsConfig, OrderLedger, OrderManager, Reconciler, ReconcilerConfig};
use aegis_risk::{
    BrokerHealthConfig, BrokerHealthWindow, KillSwitch, KillSwitchState, OvertradingConfig,
    OvertradingGuard, RiskConfig, RiskManager,
};
use aegis_store::Store;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::Result;
use crate::market::MarketDataSource;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub account_id: String,
    pub initial_equity: Decimal,
    pub risk: RiskConfig,
    pub oms: OmsConfig,
    pub reconciler: ReconcilerConfig,
    pub overtrading: OvertradingConfig,
    pub broker_health: BrokerHealthConfig,
    pub fill_poll_interval: Duration,
    pub kill_switch_poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            account_id: "primary".to_string(),
            initial_equity: dec!(10_000),
            risk: RiskConfig::default(),
            oms: OmsConfig::default(),
            reconciler: ReconcilerConfig::default(),
            overtrading: OvertradingConfig::default(),
            broker_health: BrokerHealthConfig::default(),
            fill_poll_interval: Duration::from_millis(500),
            kill_switch_poll_interval: Duration::from_secs(1),
        }
    }
}

/// The assembled trading core
pub struct TradingCore {
    account_id: AccountId,
    config: CoreConfig,
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    adapter: Arc<dyn ExecutionAdapter>,
    market: Arc<dyn MarketDataSource>,
    pub risk: Arc<RiskManager>,
    pub oms: Arc<OrderManager>,
    pub guard: Arc<OvertradingGuard>,
    pub kill_switch: Arc<KillSwitch>,
    health: Arc<BrokerHealthWindow>,
    ledger: Arc<OrderLedger>,
    shutdown: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TradingCore {
    /// Wire the core together, rehydrating the ledger and risk state from
    /// the store.
    pub fn build<S: Store + 'static>(
        config: CoreConfig,
        store: Arc<S>,
        adapter: Arc<dyn ExecutionAdapter>,
        bus: Arc<dyn EventBus>,
        market: Arc<dyn MarketDataSource>,
    ) -> Result<Arc<Self>> {
        let account_id = AccountId::new(config.account_id.clone());
        let kill_switch = Arc::new(KillSwitch::new());
        let health = Arc::new(BrokerHealthWindow::new(config.broker_health.clone()));

        let risk = Arc::new(RiskManager::new(config.risk.clone(), kill_switch.clone()));
        if let Some(state) = store.load_risk_state(&account_id)? {
            info!(
                "[CORE] restored risk state for {} (equity {})",
                account_id, state.equity
            );
            risk.restore_account(&account_id, state);
        }

        let ledger = Arc::new(OrderLedger::new(store.clone(), store.clone())?);
        let oms = Arc::new(OrderManager::new(
            ledger.clone(),
            adapter.clone(),
            bus.clone(),
            kill_switch.clone(),
            health.clone(),
            config.oms.clone(),
        ));
        let guard = Arc::new(OvertradingGuard::new(config.overtrading.clone()));
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            account_id,
            config,
            store,
            bus,
            adapter,
            market,
            risk,
            oms,
            guard,
            kill_switch,
            health,
            ledger,
            shutdown,
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    /// Account view for risk evaluation, from internally tracked equity
    pub async fn account_snapshot(&self) -> AccountSnapshot {
        let equity = self
            .risk
            .snapshot(&self.account_id)
            .await
            .map(|state| state.equity)
            .unwrap_or(self.config.initial_equity);
        AccountSnapshot::new(self.account_id.as_str(), equity)
    }

    /// Drive one signal through guard -> risk -> order manager.
    ///
    /// Returns the ledger order when the signal survived the full pipeline
    /// (the order itself may still be terminal, e.g. rejected by retries).
    pub async fn handle_signal(&self, signal: &Signal) -> Result<Option<Order>> {
        if let Err(block) =
            self.guard
                .allow(&signal.strategy_id, signal.symbol.as_str(), signal.timestamp)
        {
            info!(
                "[CORE] {}/{} blocked before risk: {}",
                signal.strategy_id,
                signal.symbol,
                block.as_str()
            );
            return Ok(None);
        }

        let Some(ctx) = self.market.context_for(&signal.symbol) else {
            warn!("[CORE] no market context for {}, dropping signal", signal.symbol);
            return Ok(None);
        };

        let snapshot = self.account_snapshot().await;
        let intent = match self.risk.evaluate(signal, &snapshot, &ctx).await {
            Ok(intent) => intent,
            Err(rejection) => {
                info!("[CORE] risk rejected {}: {}", signal.symbol, rejection);
                self.bus
                    .publish(BusEvent::RiskRejection {
                        signal: signal.clone(),
                        limit: rejection.limit.as_str().to_string(),
                        threshold: rejection.threshold,
                        actual: rejection.actual,
                    })
                    .await?;
                return Ok(None);
            }
        };

        self.guard
            .record_accepted(&signal.strategy_id, signal.symbol.as_str(), signal.timestamp);

        match self.oms.submit(&intent).await {
            Ok(order) => Ok(Some(order)),
            Err(aegis_oms::Error::KillSwitchActive) => {
                // Latched between evaluation and submission; hand the
                // reserved exposure back
                self.risk
                    .release_intent(&self.account_id, &intent.idempotency_key)
                    .await;
                warn!(
                    "[CORE] kill switch latched before submit of {}",
                    intent.idempotency_key
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Spawn the worker tasks.
    pub fn start(core: &Arc<Self>) -> Result<()> {
        let mut tasks = core.tasks.lock().unwrap();

        // Signal worker
        let signals = core.bus.subscribe(Topic::Signals, "signal-worker")?;
        tasks.push(tokio::spawn(
            core.clone().signal_worker(signals, core.shutdown.subscribe()),
        ));

        // Order-event worker (risk bookkeeping + persistence)
        let orders = core.bus.subscribe(Topic::Orders, "risk-sync")?;
        tasks.push(tokio::spawn(
            core.clone().order_event_worker(orders, core.shutdown.subscribe()),
        ));

        // Fill poller
        tasks.push(tokio::spawn(
            core.clone().fill_poller(core.shutdown.subscribe()),
        ));

        // Reconciliation loop
        let reconciler = Reconciler::new(
            core.ledger.clone(),
            core.adapter.clone(),
            core.bus.clone(),
            core.kill_switch.clone(),
            core.config.reconciler.clone(),
        );
        let shutdown_rx = core.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            reconciler.run(shutdown_rx).await;
        }));

        // Kill-switch evaluator
        tasks.push(tokio::spawn(
            core.clone().kill_switch_worker(core.shutdown.subscribe()),
        ));

        info!("[CORE] started {} workers", tasks.len());
        Ok(())
    }

    /// Stop all workers and wait for them.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
        info!("[CORE] stopped");
    }

    async fn signal_worker(
        self: Arc<Self>,
        mut sub: Box<dyn Subscription>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = sub.next() => match event {
                    Ok(BusEvent::SignalReceived(signal)) => {
                        if let Err(err) = self.handle_signal(&signal).await {
                            error!("[CORE] signal pipeline error: {err}");
                        }
                        if let Err(err) = sub.ack() {
                            warn!("[CORE] signal ack failed: {err}");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!("[CORE] signal subscription failed: {err}");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn order_event_worker(
        self: Arc<Self>,
        mut sub: Box<dyn Subscription>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = sub.next() => match event {
                    Ok(event) => {
                        self.apply_order_event(&event).await;
                        if let Err(err) = sub.ack() {
                            warn!("[CORE] order ack failed: {err}");
                        }
                    }
                    Err(err) => {
                        error!("[CORE] order subscription failed: {err}");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Fold one order lifecycle event into risk state and the guard.
    async fn apply_order_event(&self, event: &BusEvent) {
        match event {
            BusEvent::OrderPartiallyFilled { order, fill }
            | BusEvent::OrderFilled { order, fill } => {
                if let Some(realized) = self.risk.on_fill(&self.account_id, fill).await {
                    self.guard.record_outcome(
                        &order.strategy_id,
                        order.symbol.as_str(),
                        realized >= Decimal::ZERO,
                        fill.timestamp,
                    );
                }
                if order.state.is_terminal() {
                    self.risk.on_order_terminal(&self.account_id, order).await;
                }
                self.persist_risk_state().await;
            }
            BusEvent::OrderRejected { order, .. } | BusEvent::OrderCancelled(order) => {
                self.risk.on_order_terminal(&self.account_id, order).await;
                self.persist_risk_state().await;
            }
            _ => {}
        }
    }

    async fn persist_risk_state(&self) {
        if let Some(state) = self.risk.snapshot(&self.account_id).await
            && let Err(err) = self.store.save_risk_state(&self.account_id, &state)
        {
            error!("[CORE] failed to persist risk state: {err}");
        }
    }

    async fn fill_poller(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.fill_poll_interval);
        // Start from the beginning of history; fill-id dedup makes the
        // overlap harmless and a restart re-applies nothing
        let mut since: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.oms.poll_fills(since).await {
                        Ok(applied) => {
                            if let Some(latest) = applied.iter().map(|f| f.timestamp).max() {
                                since = latest;
                            }
                        }
                        Err(err) => warn!("[CORE] fill poll failed: {err}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn kill_switch_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.kill_switch_poll_interval);
        let mut was_tripped = self.kill_switch.is_tripped();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(reason) = self.health.breach() {
                        self.kill_switch.trip(reason);
                    }
                    // Publish the trip exactly once per latch, whichever
                    // component tripped it
                    if let KillSwitchState::Tripped { reason, tripped_at } = self.kill_switch.state() {
                        if !was_tripped {
                            was_tripped = true;
                            let event = BusEvent::KillSwitchTripped {
                                reason: reason.as_str().to_string(),
                                tripped_at,
                            };
                            if let Err(err) = self.bus.publish(event).await {
                                error!("[CORE] failed to publish kill-switch trip: {err}");
                            }
                        }
                    } else {
                        was_tripped = false;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_bus::ChannelBus;
    use aegis_execution::{FillConfig, PaperBroker};
    use aegis_risk::MarketContext;
    use aegis_store::MemoryStore;
    use crate::market::StaticMarketData;

    fn core() -> Arc<TradingCore> {
        let market = StaticMarketData::new();
        market.set("EURUSD", MarketContext::new(dec!(1.1000), dec!(0.0050)));
        TradingCore::build(
            CoreConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(PaperBroker::new(FillConfig::default())),
            Arc::new(ChannelBus::default()),
            Arc::new(market),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_and_snapshot() {
        let core = core();
        let snapshot = core.account_snapshot().await;
        assert_eq!(snapshot.equity, dec!(10_000));
        assert_eq!(snapshot.account_id.as_str(), "primary");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let core = core();
        TradingCore::start(&core).unwrap();
        core.stop().await;
    }
}
