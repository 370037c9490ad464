//! Anti-overtrading guard.
//!
//! A stateless-per-key gate evaluated before risk sizing. Keys are
//! (strategy, symbol); each key tracks the last accepted order, a rolling
//! window of recent orders, and the outcome loss streak. Outcome state is
//! updated on terminal order results (filled/rejected/cancelled), never on
//! intent creation.

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct OvertradingConfig {
    pub enabled: bool,
    /// Minimum time between orders for the same key
    pub cooldown: Duration,
    /// Rolling window for the frequency cap
    pub window: Duration,
    /// Maximum orders per key inside the window
    pub max_orders_per_window: usize,
    /// Consecutive losing outcomes that trigger a pause
    pub pause_after_losses: u32,
    /// How long a loss-streak pause lasts
    pub pause_duration: Duration,
}

impl Default for OvertradingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::minutes(5),
            window: Duration::hours(1),
            max_orders_per_window: 6,
            pause_after_losses: 3,
            pause_duration: Duration::hours(4),
        }
    }
}

/// Which rule blocked the candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OvertradeBlock {
    Cooldown,
    FrequencyCap,
    LossStreakPause,
}

impl OvertradeBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            OvertradeBlock::Cooldown => "cooldown",
            OvertradeBlock::FrequencyCap => "frequency_cap",
            OvertradeBlock::LossStreakPause => "loss_streak_pause",
        }
    }
}

#[derive(Debug, Default)]
struct KeyState {
    last_accepted: Option<DateTime<Utc>>,
    recent: VecDeque<DateTime<Utc>>,
    paused_until: Option<DateTime<Utc>>,
    loss_streak: u32,
}

/// Per-(strategy, symbol) guard against signal churn
pub struct OvertradingGuard {
    config: OvertradingConfig,
    state: Mutex<HashMap<(String, String), KeyState>>,
}

impl OvertradingGuard {
    pub fn new(config: OvertradingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// May an order for this key go forward at `now`?
    pub fn allow(&self, strategy_id: &str, symbol: &str, now: DateTime<Utc>) -> Result<(), OvertradeBlock> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        let key_state = state
            .entry((strategy_id.to_string(), symbol.to_string()))
            .or_default();

        if let Some(paused_until) = key_state.paused_until {
            if now < paused_until {
                return Err(OvertradeBlock::LossStreakPause);
            }
            key_state.paused_until = None;
        }

        if let Some(last) = key_state.last_accepted
            && now - last < self.config.cooldown
        {
            return Err(OvertradeBlock::Cooldown);
        }

        let window_start = now - self.config.window;
        while key_state
            .recent
            .front()
            .is_some_and(|ts| *ts < window_start)
        {
            key_state.recent.pop_front();
        }
        if key_state.recent.len() >= self.config.max_orders_per_window {
            return Err(OvertradeBlock::FrequencyCap);
        }

        Ok(())
    }

    /// Record that an order for this key was accepted into the pipeline
    pub fn record_accepted(&self, strategy_id: &str, symbol: &str, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let key_state = state
            .entry((strategy_id.to_string(), symbol.to_string()))
            .or_default();
        key_state.last_accepted = Some(now);
        key_state.recent.push_back(now);
    }

    /// Record a terminal trade outcome for the key. A win clears the loss
    /// streak; the Nth consecutive loss starts the pause.
    pub fn record_outcome(&self, strategy_id: &str, symbol: &str, won: bool, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let key_state = state
            .entry((strategy_id.to_string(), symbol.to_string()))
            .or_default();

        if won {
            key_state.loss_streak = 0;
            return;
        }
        key_state.loss_streak += 1;
        if key_state.loss_streak >= self.config.pause_after_losses {
            key_state.paused_until = Some(now + self.config.pause_duration);
            key_state.loss_streak = 0;
            info!(
                "[RISK] {}/{} paused for {} after loss streak",
                strategy_id, symbol, self.config.pause_duration
            );
        }
    }
}
