//! Order submission and lifecycle management.
//!
//! Submission pipeline per intent: kill-switch gate, per-key in-flight
//! lock, idempotency lookup (duplicates coalesce into the existing order),
//! then the adapter call under a timeout with bounded retry. Fills arrive
//! separately (poller or reconciliation) and drive the
//! Acknowledged/PartiallyFilled/Filled transitions.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aegis_bus::{BusEvent, EventBus};
use aegis_core::{Fill, IdempotencyKey, Order, OrderIntent, OrderState};
use aegis_execution::{ExecutionAdapter, ExecutionError};
use aegis_risk::{BrokerHealthWindow, KillReason, KillSwitch};
use dashmap::DashMap;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::ledger::OrderLedger;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct OmsConfig {
    /// Deadline for every execution-adapter call
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    /// Whether cancellations stay allowed while the kill switch is tripped
    pub allow_cancel_while_tripped: bool,
    /// Fill slippage beyond this fraction of the fill price trips the
    /// kill switch; None disables the check
    pub max_fill_deviation: Option<Decimal>,
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            allow_cancel_while_tripped: true,
            max_fill_deviation: Some(dec!(0.02)),
        }
    }
}

pub struct OrderManager {
    ledger: Arc<OrderLedger>,
    adapter: Arc<dyn ExecutionAdapter>,
    bus: Arc<dyn EventBus>,
    kill_switch: Arc<KillSwitch>,
    health: Arc<BrokerHealthWindow>,
    config: OmsConfig,
    /// Per-idempotency-key submission locks: at most one in-flight call
    /// per key, concurrent submission across keys
    inflight: DashMap<IdempotencyKey, Arc<Mutex<()>>>,
    /// Fill ids already applied (at-least-once delivery upstream)
    seen_fills: StdMutex<HashSet<Uuid>>,
}

impl OrderManager {
    pub fn new(
        ledger: Arc<OrderLedger>,
        adapter: Arc<dyn ExecutionAdapter>,
        bus: Arc<dyn EventBus>,
        kill_switch: Arc<KillSwitch>,
        health: Arc<BrokerHealthWindow>,
        config: OmsConfig,
    ) -> Self {
        Self {
            ledger,
            adapter,
            bus,
            kill_switch,
            health,
            config,
            inflight: DashMap::new(),
            seen_fills: StdMutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> Arc<OrderLedger> {
        self.ledger.clone()
    }

    fn key_lock(&self, key: &IdempotencyKey) -> Arc<Mutex<()>> {
        let entry = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(&entry)
    }

    /// Run one adapter call under the configured timeout, feeding the
    /// broker health window either way.
    async fn call_adapter<T>(
        &self,
        call: impl Future<Output = aegis_execution::Result<T>>,
    ) -> aegis_execution::Result<T> {
        let started = Instant::now();
        let outcome = match timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout {
                elapsed_ms: self.config.call_timeout.as_millis() as u64,
            }),
        };
        self.health
            .record(outcome.is_ok(), started.elapsed().as_millis() as u64);
        outcome
    }

    /// Submit an order intent.
    ///
    /// Returns the ledger record, which may already be terminal: exhausted
    /// retries and permanent broker errors settle the order as `Rejected`
    /// rather than erroring out of the call.
    pub async fn submit(&self, intent: &OrderIntent) -> Result<Order> {
        if self.kill_switch.is_tripped() {
            return Err(Error::KillSwitchActive);
        }

        let key = intent.idempotency_key.clone();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        // Idempotency: any existing order for this key absorbs the request
        if let Some(existing) = self.ledger.get(&key) {
            info!(
                "[OMS] coalesced duplicate submit for {} ({})",
                key,
                existing.state.as_str()
            );
            return Ok(existing);
        }

        let order = Order::from_intent(intent);
        self.ledger.insert(order.clone())?;
        self.bus.publish(BusEvent::OrderCreated(order)).await?;
        self.ledger
            .transition(&key, OrderState::Submitted, |_| {})?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.call_adapter(self.adapter.submit(intent)).await {
                Ok(broker_id) => {
                    let order = self.ledger.update(&key, |o| {
                        o.broker_order_id = Some(broker_id.clone());
                    })?;
                    info!(
                        "[OMS] submitted {} as {} on attempt {}",
                        key, broker_id, attempt
                    );
                    self.bus
                        .publish(BusEvent::OrderSubmitted(order.clone()))
                        .await?;
                    return Ok(order);
                }
                Err(err) if err.is_transient() && !self.config.retry.exhausted(attempt) => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        "[OMS] transient submit failure for {} on attempt {}: {}; retrying in {:?}",
                        key, attempt, err, delay
                    );
                    self.ledger.update(&key, |o| {
                        o.retry_count = attempt;
                        o.last_error = Some(err.to_string());
                    })?;
                    sleep(delay).await;
                }
                Err(err) => {
                    let reason = err.to_string();
                    let transient = err.is_transient();
                    let order = self.ledger.transition(&key, OrderState::Rejected, |o| {
                        if transient {
                            o.retry_count = attempt;
                        }
                        o.last_error = Some(reason.clone());
                    })?;
                    warn!(
                        "[OMS] submit for {} rejected after {} attempt(s): {}",
                        key, attempt, reason
                    );
                    self.bus
                        .publish(BusEvent::OrderRejected {
                            order: order.clone(),
                            reason,
                        })
                        .await?;
                    return Ok(order);
                }
            }
        }
    }

    /// Cancel a working order. Allowed from any non-terminal state; a
    /// filled order can no longer be cancelled.
    pub async fn cancel(&self, key: &IdempotencyKey) -> Result<Order> {
        if self.kill_switch.is_tripped() && !self.config.allow_cancel_while_tripped {
            return Err(Error::KillSwitchActive);
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let order = self
            .ledger
            .get(key)
            .ok_or_else(|| Error::UnknownOrder(key.clone()))?;
        if !order.state.can_transition(OrderState::Cancelled) {
            return Err(Error::InvalidTransition {
                key: key.clone(),
                from: order.state,
                to: OrderState::Cancelled,
            });
        }

        if let Some(broker_id) = &order.broker_order_id {
            self.call_adapter(self.adapter.cancel(broker_id)).await?;
        }

        let order = self.ledger.transition(key, OrderState::Cancelled, |_| {})?;
        info!("[OMS] cancelled {}", key);
        self.bus
            .publish(BusEvent::OrderCancelled(order.clone()))
            .await?;
        Ok(order)
    }

    /// Apply a broker-reported fill to the ledger.
    ///
    /// Replayed fills (same fill id) are ignored; fills for unknown orders
    /// are logged and left for reconciliation to raise.
    pub async fn process_fill(&self, fill: &Fill) -> Result<Option<Order>> {
        if !self.seen_fills.lock().unwrap().insert(fill.fill_id) {
            debug!("[OMS] ignoring replayed fill {}", fill.fill_id);
            return Ok(None);
        }

        let lock = self.key_lock(&fill.order_key);
        let _guard = lock.lock().await;

        let Some(order) = self.ledger.get(&fill.order_key) else {
            warn!(
                "[OMS] fill {} references unknown order {}",
                fill.fill_id, fill.order_key
            );
            return Ok(None);
        };
        if order.state.is_terminal() {
            warn!(
                "[OMS] fill {} arrived for settled order {} ({})",
                fill.fill_id,
                fill.order_key,
                order.state.as_str()
            );
            return Ok(None);
        }

        self.ledger.record_fill(fill)?;

        // Fill-price deviation beyond the configured threshold is a
        // kill-switch trigger, not just a bad print
        if let Some(threshold) = self.config.max_fill_deviation
            && fill.price > Decimal::ZERO
            && fill.slippage.abs() / fill.price > threshold
        {
            warn!(
                "[OMS] fill {} deviates {} from reference on price {}",
                fill.fill_id, fill.slippage, fill.price
            );
            self.kill_switch.trip(KillReason::FillDeviation);
        }

        let mut absorbed = order.clone();
        let target = absorbed.absorb_fill(fill);
        let updated = self.ledger.transition(&fill.order_key, target, |o| {
            o.filled_quantity = absorbed.filled_quantity;
            o.average_fill_price = absorbed.average_fill_price;
            if o.broker_order_id.is_none() {
                o.broker_order_id = fill.broker_order_id.clone();
            }
        })?;

        let event = match target {
            OrderState::Filled => BusEvent::OrderFilled {
                order: updated.clone(),
                fill: fill.clone(),
            },
            _ => BusEvent::OrderPartiallyFilled {
                order: updated.clone(),
                fill: fill.clone(),
            },
        };
        self.bus.publish(event).await?;
        Ok(Some(updated))
    }

    /// Poll the adapter for fills at or after `since` and fold them in.
    /// Returns the applied fills.
    pub async fn poll_fills(&self, since: chrono::DateTime<chrono::Utc>) -> Result<Vec<Fill>> {
        let fills = self.call_adapter(self.adapter.fills_since(since)).await?;
        let mut applied = Vec::new();
        for fill in fills {
            if self.process_fill(&fill).await?.is_some() {
                applied.push(fill);
            }
        }
        Ok(applied)
    }
}
