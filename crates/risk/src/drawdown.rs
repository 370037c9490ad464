//! Drawdown tracking over daily, weekly, and session windows.
//!
//! Peaks roll over at UTC date boundaries (daily) and ISO-week boundaries
//! (weekly). Drawdown is the fractional drop from the window's peak equity.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Window boundaries crossed by the latest update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollover {
    pub new_day: bool,
    pub new_week: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawdownTracker {
    peak_session: Option<Decimal>,
    peak_daily: Option<Decimal>,
    peak_weekly: Option<Decimal>,
    last_equity: Option<Decimal>,
    last_timestamp: Option<DateTime<Utc>>,
    max_drawdown_pct: Decimal,
}

impl DrawdownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in an equity observation. Returns which windows rolled over so
    /// the caller can reset its own per-window bookkeeping (daily/weekly
    /// PnL counters).
    pub fn update(&mut self, equity: Decimal, timestamp: DateTime<Utc>) -> Rollover {
        let mut rollover = Rollover::default();
        if let Some(last) = self.last_timestamp {
            if last.date_naive() != timestamp.date_naive() {
                self.peak_daily = Some(equity);
                rollover.new_day = true;
            }
            let last_week = (last.iso_week().year(), last.iso_week().week());
            let this_week = (timestamp.iso_week().year(), timestamp.iso_week().week());
            if last_week != this_week {
                self.peak_weekly = Some(equity);
                rollover.new_week = true;
            }
        }
        self.last_timestamp = Some(timestamp);
        self.last_equity = Some(equity);

        self.peak_session = Some(self.peak_session.unwrap_or(equity).max(equity));
        self.peak_daily = Some(self.peak_daily.unwrap_or(equity).max(equity));
        self.peak_weekly = Some(self.peak_weekly.unwrap_or(equity).max(equity));

        let session_dd = self.session_drawdown_pct();
        if session_dd > self.max_drawdown_pct {
            self.max_drawdown_pct = session_dd;
        }
        rollover
    }

    pub fn daily_drawdown_pct(&self) -> Decimal {
        self.window_drawdown(self.peak_daily)
    }

    pub fn weekly_drawdown_pct(&self) -> Decimal {
        self.window_drawdown(self.peak_weekly)
    }

    pub fn session_drawdown_pct(&self) -> Decimal {
        self.window_drawdown(self.peak_session)
    }

    /// Largest session drawdown seen so far
    pub fn max_drawdown_pct(&self) -> Decimal {
        self.max_drawdown_pct
    }

    fn window_drawdown(&self, peak: Option<Decimal>) -> Decimal {
        match (peak, self.last_equity) {
            (Some(peak), Some(current)) if peak > Decimal::ZERO => {
                ((peak - current) / peak).max(Decimal::ZERO)
            }
            _ => Decimal::ZERO,
        }
    }
}
