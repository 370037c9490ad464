//! Process-wide kill switch.
//!
//! A safety latch any authorized component may trip: the risk manager on
//! severe drawdown/equity/loss-streak breaches, the kill-switch evaluator
//! on broker health or fill-price deviation, the reconciler on configured
//! alarms, or an operator manually. While tripped, the order manager
//! refuses new submissions. Tripping is idempotent (the first reason is
//! kept); re-arming is always an explicit operator action, never automatic,
//! to avoid flapping.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};

/// Why the switch tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillReason {
    DailyDrawdown,
    WeeklyDrawdown,
    EquityFloor,
    ConsecutiveLosses,
    BrokerErrorRate,
    BrokerLatency,
    FillDeviation,
    ReconciliationDiscrepancy,
    Manual,
}

impl KillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillReason::DailyDrawdown => "daily_drawdown",
            KillReason::WeeklyDrawdown => "weekly_drawdown",
            KillReason::EquityFloor => "equity_floor",
            KillReason::ConsecutiveLosses => "consecutive_losses",
            KillReason::BrokerErrorRate => "broker_error_rate",
            KillReason::BrokerLatency => "broker_latency",
            KillReason::FillDeviation => "fill_deviation",
            KillReason::ReconciliationDiscrepancy => "reconciliation_discrepancy",
            KillReason::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillSwitchState {
    Armed,
    Tripped {
        reason: KillReason,
        tripped_at: DateTime<Utc>,
    },
}

/// The latch itself. Cheap to share (`Arc<KillSwitch>`), read often on the
/// submit path, written rarely.
#[derive(Debug)]
pub struct KillSwitch {
    state: RwLock<KillSwitchState>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(KillSwitchState::Armed),
        }
    }

    pub fn is_tripped(&self) -> bool {
        matches!(*self.state.read().unwrap(), KillSwitchState::Tripped { .. })
    }

    pub fn state(&self) -> KillSwitchState {
        self.state.read().unwrap().clone()
    }

    /// Trip the switch. Returns true only for the transition that latched;
    /// tripping an already-tripped switch is a no-op and the first reason
    /// is preserved.
    pub fn trip(&self, reason: KillReason) -> bool {
        let mut state = self.state.write().unwrap();
        match *state {
            KillSwitchState::Tripped { .. } => false,
            KillSwitchState::Armed => {
                error!("[RISK] kill switch tripped: {}", reason.as_str());
                *state = KillSwitchState::Tripped {
                    reason,
                    tripped_at: Utc::now(),
                };
                true
            }
        }
    }

    /// Re-arm after operator review. Returns false if already armed.
    pub fn reset(&self, operator: &str, note: &str) -> bool {
        let mut state = self.state.write().unwrap();
        match *state {
            KillSwitchState::Armed => false,
            KillSwitchState::Tripped { reason, .. } => {
                info!(
                    "[RISK] kill switch reset by '{}' ({}); was tripped for {}",
                    operator,
                    note,
                    reason.as_str()
                );
                *state = KillSwitchState::Armed;
                true
            }
        }
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// Thresholds for the broker-health triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerHealthConfig {
    /// Rolling sample count
    pub window: usize,
    /// Error fraction above which the switch trips
    pub max_error_rate: Decimal,
    /// Mean call latency (ms) above which the switch trips
    pub max_mean_latency_ms: Decimal,
    /// Minimum samples before the window is meaningful
    pub min_samples: usize,
}

impl Default for BrokerHealthConfig {
    fn default() -> Self {
        Self {
            window: 100,
            max_error_rate: dec!(0.25),
            max_mean_latency_ms: dec!(2000),
            min_samples: 10,
        }
    }
}

struct CallSample {
    ok: bool,
    latency_ms: u64,
}

/// Rolling window of execution-adapter call outcomes feeding the
/// error-rate and latency kill-switch triggers.
pub struct BrokerHealthWindow {
    config: BrokerHealthConfig,
    samples: Mutex<VecDeque<CallSample>>,
}

impl BrokerHealthWindow {
    pub fn new(config: BrokerHealthConfig) -> Self {
        Self {
            config,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one adapter call outcome
    pub fn record(&self, ok: bool, latency_ms: u64) {
        let mut samples = self.samples.lock().unwrap();
        samples.push_back(CallSample { ok, latency_ms });
        while samples.len() > self.config.window {
            samples.pop_front();
        }
    }

    pub fn error_rate(&self) -> Decimal {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return Decimal::ZERO;
        }
        let errors = samples.iter().filter(|s| !s.ok).count();
        Decimal::from(errors) / Decimal::from(samples.len())
    }

    pub fn mean_latency_ms(&self) -> Decimal {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return Decimal::ZERO;
        }
        let total: u64 = samples.iter().map(|s| s.latency_ms).sum();
        Decimal::from(total) / Decimal::from(samples.len())
    }

    /// Threshold breach, if any. Error rate is checked first.
    pub fn breach(&self) -> Option<KillReason> {
        let count = self.samples.lock().unwrap().len();
        if count < self.config.min_samples {
            return None;
        }
        let error_rate = self.error_rate();
        if error_rate >= self.config.max_error_rate {
            warn!(
                "[RISK] broker error rate {:.3} over threshold {:.3}",
                error_rate, self.config.max_error_rate
            );
            return Some(KillReason::BrokerErrorRate);
        }
        let latency = self.mean_latency_ms();
        if latency >= self.config.max_mean_latency_ms {
            warn!(
                "[RISK] broker mean latency {}ms over threshold {}ms",
                latency, self.config.max_mean_latency_ms
            );
            return Some(KillReason::BrokerLatency);
        }
        None
    }
}
