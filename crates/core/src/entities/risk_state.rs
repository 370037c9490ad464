use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rolling per-account risk bookkeeping.
///
/// Mutated only by the risk manager, under one logical lock per account.
/// Serialized to the durable store so limits and drawdown windows survive a
/// process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: Decimal,
    pub weekly_pnl: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub open_position_count: u32,
    /// Reserved + committed notional per symbol
    pub symbol_exposure: HashMap<String, Decimal>,
    /// Reserved + committed notional per correlated group
    pub group_exposure: HashMap<String, Decimal>,
    pub consecutive_loss_count: u32,
}

impl RiskState {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            equity: initial_equity,
            peak_equity: initial_equity,
            open_position_count: 0,
            symbol_exposure: HashMap::new(),
            group_exposure: HashMap::new(),
            consecutive_loss_count: 0,
        }
    }

    /// Current exposure for a symbol, zero when untracked
    pub fn exposure_for(&self, symbol: &str) -> Decimal {
        self.symbol_exposure
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Current exposure for a correlated group, zero when untracked
    pub fn group_exposure_for(&self, group: &str) -> Decimal {
        self.group_exposure
            .get(group)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Apply realized PnL to equity and the rolling windows
    pub fn apply_realized_pnl(&mut self, pnl: Decimal) {
        self.equity += pnl;
        self.daily_pnl += pnl;
        self.weekly_pnl += pnl;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
        if pnl < Decimal::ZERO {
            self.consecutive_loss_count += 1;
        } else {
            self.consecutive_loss_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pnl_updates_windows_and_streak() {
        let mut state = RiskState::new(dec!(10_000));

        state.apply_realized_pnl(dec!(250));
        assert_eq!(state.equity, dec!(10_250));
        assert_eq!(state.peak_equity, dec!(10_250));
        assert_eq!(state.consecutive_loss_count, 0);

        state.apply_realized_pnl(dec!(-100));
        state.apply_realized_pnl(dec!(-50));
        assert_eq!(state.consecutive_loss_count, 2);
        assert_eq!(state.daily_pnl, dec!(100));
        // Peak never falls
        assert_eq!(state.peak_equity, dec!(10_250));

        state.apply_realized_pnl(dec!(10));
        assert_eq!(state.consecutive_loss_count, 0);
    }
}
