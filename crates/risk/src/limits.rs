//! Risk limits and rejection types.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Soft trading limits, checked in this fixed order on every intent.
/// The first failing check rejects the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_open_positions: u32,
    /// Per-symbol exposure as a fraction of equity
    pub max_symbol_exposure_pct: Decimal,
    /// Correlated-group exposure as a fraction of equity
    pub max_group_exposure_pct: Decimal,
    /// Daily drawdown fraction that blocks new trades
    pub max_daily_drawdown_pct: Decimal,
    /// Weekly drawdown fraction that blocks new trades
    pub max_weekly_drawdown_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        // Leveraged FX notionals routinely exceed account equity, so the
        // exposure defaults are multiples of equity, not slices of it.
        Self {
            max_open_positions: 5,
            max_symbol_exposure_pct: dec!(3),
            max_group_exposure_pct: dec!(5),
            max_daily_drawdown_pct: dec!(0.03),
            max_weekly_drawdown_pct: dec!(0.06),
        }
    }
}

/// Severe thresholds. Breaching one of these does not just reject the
/// signal - it trips the kill switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltLimits {
    pub halt_daily_drawdown_pct: Decimal,
    pub halt_weekly_drawdown_pct: Decimal,
    /// Absolute equity below which trading halts
    pub equity_floor: Decimal,
    pub max_consecutive_losses: u32,
}

impl Default for HaltLimits {
    fn default() -> Self {
        Self {
            halt_daily_drawdown_pct: dec!(0.05),
            halt_weekly_drawdown_pct: dec!(0.10),
            equity_floor: Decimal::ZERO,
            max_consecutive_losses: 8,
        }
    }
}

/// Symbol -> correlated-group mapping used for group exposure limits.
/// Unmapped symbols form their own singleton group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroups {
    groups: HashMap<String, String>,
}

impl CorrelationGroups {
    pub fn empty() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }

    pub fn with_group(mut self, symbol: impl Into<String>, group: impl Into<String>) -> Self {
        self.groups.insert(symbol.into(), group.into());
        self
    }

    pub fn group_of<'a>(&'a self, symbol: &'a str) -> &'a str {
        self.groups.get(symbol).map(String::as_str).unwrap_or(symbol)
    }
}

impl Default for CorrelationGroups {
    fn default() -> Self {
        let mut groups = HashMap::new();
        for symbol in [
            "EURUSD", "GBPUSD", "AUDUSD", "NZDUSD", "USDCAD", "USDCHF", "USDJPY",
        ] {
            groups.insert(symbol.to_string(), "usd_fx".to_string());
        }
        for symbol in ["BTCUSD", "BTC-USD", "ETHUSD", "ETH-USD"] {
            groups.insert(symbol.to_string(), "usd_crypto".to_string());
        }
        for symbol in ["SPY", "QQQ"] {
            groups.insert(symbol.to_string(), "us_equity".to_string());
        }
        Self { groups }
    }
}

/// The specific check a rejection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitName {
    KillSwitchActive,
    NotActionable,
    InvalidEntryPrice,
    MaxOpenPositions,
    MaxSymbolExposure,
    MaxGroupExposure,
    MaxDailyDrawdown,
    MaxWeeklyDrawdown,
    EquityFloor,
    ConsecutiveLosses,
    SizingFailed,
    ZeroPositionSize,
}

impl LimitName {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitName::KillSwitchActive => "kill_switch_active",
            LimitName::NotActionable => "not_actionable",
            LimitName::InvalidEntryPrice => "invalid_entry_price",
            LimitName::MaxOpenPositions => "max_open_positions",
            LimitName::MaxSymbolExposure => "max_symbol_exposure",
            LimitName::MaxGroupExposure => "max_group_exposure",
            LimitName::MaxDailyDrawdown => "max_daily_drawdown",
            LimitName::MaxWeeklyDrawdown => "max_weekly_drawdown",
            LimitName::EquityFloor => "equity_floor",
            LimitName::ConsecutiveLosses => "consecutive_losses",
            LimitName::SizingFailed => "sizing_failed",
            LimitName::ZeroPositionSize => "zero_position_size",
        }
    }
}

/// A risk rejection, carrying the failed limit and both sides of the
/// comparison that failed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub limit: LimitName,
    pub threshold: Decimal,
    pub actual: Decimal,
}

impl Rejection {
    pub fn new(limit: LimitName, threshold: Decimal, actual: Decimal) -> Self {
        Self {
            limit,
            threshold,
            actual,
        }
    }

    /// Rejections where the threshold/actual pair carries no information
    pub fn flag(limit: LimitName) -> Self {
        Self::new(limit, Decimal::ZERO, Decimal::ZERO)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (threshold {}, actual {})",
            self.limit.as_str(),
            self.threshold,
            self.actual
        )
    }
}
