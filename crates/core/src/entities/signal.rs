//! Signal - what the upstream strategy ensemble emits
//!
//! A signal is a directional recommendation, not an order. It carries no
//! quantity; sizing happens in the risk layer. Signals are immutable once
//! emitted.

use crate::identifiers::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction recommended by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Buy,
    Sell,
    /// Close any open exposure, take no new position
    Flat,
}

impl SignalDirection {
    /// Does this direction ask for a new position?
    pub fn is_actionable(&self) -> bool {
        matches!(self, SignalDirection::Buy | SignalDirection::Sell)
    }
}

/// Holding-period class the strategy expects for this signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Horizon {
    Intraday,
    #[default]
    Swing,
    Position,
}

/// Directional trading recommendation for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Instrument to trade
    pub symbol: Symbol,
    /// Recommended direction
    pub direction: SignalDirection,
    /// Strategy that produced the signal
    pub strategy_id: String,
    /// Confidence in the signal (0.0 - 1.0, clamped on construction)
    pub confidence: Decimal,
    /// Expected holding-period class
    pub horizon: Horizon,
    /// Broker/venue the signal targets
    pub broker_id: String,
    /// When the signal was generated
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Create a new signal with current system time
    pub fn new(
        symbol: impl Into<Symbol>,
        direction: SignalDirection,
        strategy_id: impl Into<String>,
        broker_id: impl Into<String>,
    ) -> Self {
        Self::new_with_time(symbol, direction, strategy_id, broker_id, Utc::now())
    }

    /// Create a new signal with an explicit timestamp (backtests)
    pub fn new_with_time(
        symbol: impl Into<Symbol>,
        direction: SignalDirection,
        strategy_id: impl Into<String>,
        broker_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            strategy_id: strategy_id.into(),
            confidence: Decimal::ONE,
            horizon: Horizon::default(),
            broker_id: broker_id.into(),
            timestamp,
        }
    }

    /// Builder: set confidence (clamped to [0, 1])
    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);
        self
    }

    /// Builder: set horizon class
    pub fn with_horizon(mut self, horizon: Horizon) -> Self {
        self.horizon = horizon;
        self
    }
}
