//! Aegis Risk Manager
//!
//! Turns upstream signals into sized, limit-checked order intents and owns
//! all account-level risk bookkeeping:
//! - **Position sizing**: a closed set of sizing methods behind one
//!   dispatch function
//! - **Limit checks**: open positions, per-symbol and correlated-group
//!   exposure, daily/weekly drawdown, evaluated in a fixed order
//! - **Kill switch**: process-wide safety latch with severe-threshold
//!   triggers and explicit operator reset
//! - **Anti-overtrading**: per (strategy, symbol) cooldown, frequency cap,
//!   and loss-streak pause, evaluated before sizing
//!
//! Positions and `RiskState` are mutated only here, serialized per account.

pub mod drawdown;
pub mod kill_switch;
pub mod limits;
pub mod manager;
pub mod overtrading;
pub mod sizing;

pub use drawdown::{DrawdownTracker, Rollover};
pub use kill_switch::{
    BrokerHealthConfig, BrokerHealthWindow, KillReason, KillSwitch, KillSwitchState,
};
pub use limits::{CorrelationGroups, HaltLimits, LimitName, Rejection, RiskLimits};
pub use manager::{MarketContext, RiskConfig, RiskManager};
pub use overtrading::{OvertradeBlock, OvertradingConfig, OvertradingGuard};
pub use sizing::{PositionSize, SizingCaps, SizingError, SizingInputs, SizingMethod};
