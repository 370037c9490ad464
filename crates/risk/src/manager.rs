//! Risk Manager
//!
//! `evaluate` turns a signal into a sized, limit-checked order intent or a
//! structured rejection. Acceptance reserves exposure optimistically; the
//! order manager reports fills and terminal outcomes back so reservations
//! become committed exposure or are released. All mutations for one account
//! run under that account's lock; accounts never contend with each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use aegis_core::{
    AccountId, AccountSnapshot, Fill, IdempotencyKey, Order, OrderIntent, OrderState, Position,
    RiskState, Side, Signal, SignalDirection, Symbol,
};
use dashmap::DashMap;
use log::{info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

use crate::drawdown::DrawdownTracker;
use crate::kill_switch::{KillReason, KillSwitch};
use crate::limits::{CorrelationGroups, HaltLimits, LimitName, Rejection, RiskLimits};
use crate::sizing::{SizingCaps, SizingInputs, SizingMethod, size_position};

/// Market inputs the risk evaluation needs alongside the signal
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub entry_price: Decimal,
    /// Price distance to the protective stop
    pub stop_distance: Decimal,
    /// Account-currency value of one price unit per unit of quantity
    pub point_value: Decimal,
    pub atr: Option<Decimal>,
    pub win_rate: Option<Decimal>,
    pub payoff_ratio: Option<Decimal>,
}

impl MarketContext {
    pub fn new(entry_price: Decimal, stop_distance: Decimal) -> Self {
        Self {
            entry_price,
            stop_distance,
            point_value: Decimal::ONE,
            atr: None,
            win_rate: None,
            payoff_ratio: None,
        }
    }

    pub fn with_atr(mut self, atr: Decimal) -> Self {
        self.atr = Some(atr);
        self
    }
}

/// Risk manager configuration
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub limits: RiskLimits,
    pub halt: HaltLimits,
    pub sizing: SizingMethod,
    pub caps: SizingCaps,
    pub groups: CorrelationGroups,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            limits: RiskLimits::default(),
            halt: HaltLimits::default(),
            sizing: SizingMethod::PercentRisk {
                risk_fraction: dec!(0.01),
            },
            caps: SizingCaps::default(),
            groups: CorrelationGroups::default(),
        }
    }
}

/// Exposure reserved for an accepted intent that has not fully filled
#[derive(Debug, Clone)]
struct Reservation {
    symbol: Symbol,
    /// Quantity not yet filled
    quantity: Decimal,
    /// Price the reservation was sized at
    price: Decimal,
}

impl Reservation {
    fn notional(&self) -> Decimal {
        self.quantity.max(Decimal::ZERO) * self.price
    }
}

/// All mutable risk state for one account
struct AccountBook {
    state: RiskState,
    positions: HashMap<Symbol, Position>,
    reservations: HashMap<IdempotencyKey, Reservation>,
    drawdown: DrawdownTracker,
}

impl AccountBook {
    fn new(state: RiskState) -> Self {
        Self {
            state,
            positions: HashMap::new(),
            reservations: HashMap::new(),
            drawdown: DrawdownTracker::new(),
        }
    }

    /// Distinct symbols carrying either an open position or a reservation
    fn open_position_count(&self) -> u32 {
        let mut symbols: HashSet<&str> = self
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| p.symbol.as_str())
            .collect();
        symbols.extend(self.reservations.values().map(|r| r.symbol.as_str()));
        symbols.len() as u32
    }

    /// Rebuild the exposure maps from positions plus live reservations.
    /// Rebuilding keeps reserve/commit/release arithmetic self-correcting.
    fn recompute_exposure(&mut self, groups: &CorrelationGroups) {
        let mut by_symbol: HashMap<String, Decimal> = HashMap::new();
        for position in self.positions.values() {
            if !position.is_flat() {
                *by_symbol
                    .entry(position.symbol.as_str().to_string())
                    .or_default() +=
                    position.net_quantity.abs() * position.average_entry_price;
            }
        }
        for reservation in self.reservations.values() {
            *by_symbol
                .entry(reservation.symbol.as_str().to_string())
                .or_default() += reservation.notional();
        }

        let mut by_group: HashMap<String, Decimal> = HashMap::new();
        for (symbol, notional) in &by_symbol {
            *by_group.entry(groups.group_of(symbol).to_string()).or_default() += *notional;
        }

        self.state.symbol_exposure = by_symbol;
        self.state.group_exposure = by_group;
        self.state.open_position_count = self.open_position_count();
    }
}

/// Converts signals into sized, limit-checked order intents and owns all
/// account-level risk bookkeeping.
pub struct RiskManager {
    config: RiskConfig,
    kill_switch: Arc<KillSwitch>,
    books: DashMap<AccountId, Arc<Mutex<AccountBook>>>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, kill_switch: Arc<KillSwitch>) -> Self {
        Self {
            config,
            kill_switch,
            books: DashMap::new(),
        }
    }

    pub fn kill_switch(&self) -> Arc<KillSwitch> {
        self.kill_switch.clone()
    }

    /// Restore an account book from persisted state (startup rehydration)
    pub fn restore_account(&self, account: &AccountId, state: RiskState) {
        self.books
            .insert(account.clone(), Arc::new(Mutex::new(AccountBook::new(state))));
    }

    fn book(&self, account: &AccountId, equity: Decimal) -> Arc<Mutex<AccountBook>> {
        let entry = self
            .books
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AccountBook::new(RiskState::new(equity)))));
        Arc::clone(&entry)
    }

    /// Evaluate a signal into an order intent or a rejection.
    pub async fn evaluate(
        &self,
        signal: &Signal,
        snapshot: &AccountSnapshot,
        ctx: &MarketContext,
    ) -> Result<OrderIntent, Rejection> {
        let book_ref = self.book(&snapshot.account_id, snapshot.equity);
        let mut book = book_ref.lock().await;

        // Broker equity is the truth; fold it into the windows first
        book.state.equity = snapshot.equity;
        if snapshot.equity > book.state.peak_equity {
            book.state.peak_equity = snapshot.equity;
        }
        let rollover = book.drawdown.update(snapshot.equity, signal.timestamp);
        if rollover.new_day {
            book.state.daily_pnl = Decimal::ZERO;
        }
        if rollover.new_week {
            book.state.weekly_pnl = Decimal::ZERO;
        }

        if self.kill_switch.is_tripped() {
            return Err(Rejection::flag(LimitName::KillSwitchActive));
        }
        self.check_halt(&book)?;

        if !signal.direction.is_actionable() {
            return Err(Rejection::flag(LimitName::NotActionable));
        }
        if ctx.entry_price <= Decimal::ZERO {
            return Err(Rejection::new(
                LimitName::InvalidEntryPrice,
                Decimal::ZERO,
                ctx.entry_price,
            ));
        }

        // Soft limits, fixed order; the first failure rejects.
        let open_positions = book.open_position_count();
        if open_positions >= self.config.limits.max_open_positions {
            return Err(Rejection::new(
                LimitName::MaxOpenPositions,
                Decimal::from(self.config.limits.max_open_positions),
                Decimal::from(open_positions),
            ));
        }

        let inputs = SizingInputs {
            equity: snapshot.equity,
            entry_price: ctx.entry_price,
            stop_distance: ctx.stop_distance,
            point_value: ctx.point_value,
            atr: ctx.atr,
            win_rate: ctx.win_rate,
            payoff_ratio: ctx.payoff_ratio,
        };
        let size = size_position(self.config.sizing, &inputs, &self.config.caps).map_err(|err| {
            warn!("[RISK] sizing failed for {}: {err}", signal.symbol);
            Rejection::flag(LimitName::SizingFailed)
        })?;
        if size.quantity <= Decimal::ZERO {
            return Err(Rejection::flag(LimitName::ZeroPositionSize));
        }
        if let Some(reason) = size.cap_reason {
            info!(
                "[RISK] size for {} capped by {} to {}",
                signal.symbol, reason, size.quantity
            );
        }

        let symbol_threshold = snapshot.equity * self.config.limits.max_symbol_exposure_pct;
        let new_symbol_exposure = book.state.exposure_for(signal.symbol.as_str()) + size.notional;
        if new_symbol_exposure > symbol_threshold {
            return Err(Rejection::new(
                LimitName::MaxSymbolExposure,
                symbol_threshold,
                new_symbol_exposure,
            ));
        }

        let group = self.config.groups.group_of(signal.symbol.as_str());
        let group_threshold = snapshot.equity * self.config.limits.max_group_exposure_pct;
        let new_group_exposure = book.state.group_exposure_for(group) + size.notional;
        if new_group_exposure > group_threshold {
            return Err(Rejection::new(
                LimitName::MaxGroupExposure,
                group_threshold,
                new_group_exposure,
            ));
        }

        let daily_dd = book.drawdown.daily_drawdown_pct();
        if daily_dd >= self.config.limits.max_daily_drawdown_pct {
            return Err(Rejection::new(
                LimitName::MaxDailyDrawdown,
                self.config.limits.max_daily_drawdown_pct,
                daily_dd,
            ));
        }
        let weekly_dd = book.drawdown.weekly_drawdown_pct();
        if weekly_dd >= self.config.limits.max_weekly_drawdown_pct {
            return Err(Rejection::new(
                LimitName::MaxWeeklyDrawdown,
                self.config.limits.max_weekly_drawdown_pct,
                weekly_dd,
            ));
        }

        // Accept: build the intent and reserve its exposure optimistically
        let side = match signal.direction {
            SignalDirection::Buy => Side::Buy,
            SignalDirection::Sell => Side::Sell,
            SignalDirection::Flat => unreachable!("flat rejected above"),
        };
        let mut intent = OrderIntent::from_signal(signal, side, size.quantity, size.stop_distance);
        intent.risk_checked = true;

        book.reservations.insert(
            intent.idempotency_key.clone(),
            Reservation {
                symbol: intent.symbol.clone(),
                quantity: intent.quantity,
                price: ctx.entry_price,
            },
        );
        book.recompute_exposure(&self.config.groups);
        Ok(intent)
    }

    /// Synchronous re-check of an existing intent against current limits.
    /// Does not reserve anything.
    pub async fn decision_for_order(
        &self,
        snapshot: &AccountSnapshot,
        intent: &OrderIntent,
        entry_price: Decimal,
    ) -> Result<(), Rejection> {
        let book_ref = self.book(&snapshot.account_id, snapshot.equity);
        let book = book_ref.lock().await;

        if self.kill_switch.is_tripped() {
            return Err(Rejection::flag(LimitName::KillSwitchActive));
        }

        let open_positions = book.open_position_count();
        if open_positions >= self.config.limits.max_open_positions {
            return Err(Rejection::new(
                LimitName::MaxOpenPositions,
                Decimal::from(self.config.limits.max_open_positions),
                Decimal::from(open_positions),
            ));
        }

        let notional = intent.quantity * entry_price;
        let already_reserved = book
            .reservations
            .get(&intent.idempotency_key)
            .map(Reservation::notional)
            .unwrap_or(Decimal::ZERO);
        let symbol_threshold = snapshot.equity * self.config.limits.max_symbol_exposure_pct;
        let new_symbol_exposure =
            book.state.exposure_for(intent.symbol.as_str()) - already_reserved + notional;
        if new_symbol_exposure > symbol_threshold {
            return Err(Rejection::new(
                LimitName::MaxSymbolExposure,
                symbol_threshold,
                new_symbol_exposure,
            ));
        }
        Ok(())
    }

    /// Commit a confirmed fill: update the position, realized PnL, loss
    /// streak, and the reserved-vs-committed exposure split.
    ///
    /// Returns `Some(realized_pnl)` when the fill reduced or closed an
    /// existing position - a trade outcome callers feed into the
    /// anti-overtrading tracking - and `None` for opening fills.
    pub async fn on_fill(&self, account: &AccountId, fill: &Fill) -> Option<Decimal> {
        let book_ref = self.book(account, Decimal::ZERO);
        let mut book = book_ref.lock().await;

        let position = book
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::flat(fill.symbol.clone()));
        let prior_quantity = position.net_quantity;
        let signed = fill.signed_quantity();
        let was_reducing = (prior_quantity > Decimal::ZERO && signed < Decimal::ZERO)
            || (prior_quantity < Decimal::ZERO && signed > Decimal::ZERO);
        let realized = position.apply_fill(fill);
        position.mark(fill.price);

        if was_reducing {
            if !realized.is_zero() {
                book.state.apply_realized_pnl(realized);
            }
        } else if !realized.is_zero() {
            // Commission on an opening fill hits equity and the PnL
            // windows but is not a trade outcome for the loss streak
            book.state.equity += realized;
            book.state.daily_pnl += realized;
            book.state.weekly_pnl += realized;
        }

        let reservation_drained = match book.reservations.get_mut(&fill.order_key) {
            Some(reservation) => {
                reservation.quantity -= fill.quantity;
                reservation.quantity <= Decimal::ZERO
            }
            None => false,
        };
        if reservation_drained {
            book.reservations.remove(&fill.order_key);
        }
        book.recompute_exposure(&self.config.groups);

        let equity = book.state.equity;
        let rollover = book.drawdown.update(equity, fill.timestamp);
        if rollover.new_day {
            book.state.daily_pnl = Decimal::ZERO;
        }
        if rollover.new_week {
            book.state.weekly_pnl = Decimal::ZERO;
        }

        // Severe thresholds are re-evaluated on every fill
        if let Err(rejection) = self.check_halt(&book) {
            warn!("[RISK] post-fill halt condition: {rejection}");
        }
        was_reducing.then_some(realized)
    }

    /// Release the reservation held for an intent that never became a
    /// ledger order (e.g. the kill switch latched between evaluation and
    /// submission).
    pub async fn release_intent(&self, account: &AccountId, key: &IdempotencyKey) {
        let book_ref = self.book(account, Decimal::ZERO);
        let mut book = book_ref.lock().await;
        if book.reservations.remove(key).is_some() {
            book.recompute_exposure(&self.config.groups);
        }
    }

    /// An order reached a terminal state. Rejected/cancelled/expired orders
    /// release whatever exposure is still reserved for them; filled orders
    /// only drop the bookkeeping entry (their exposure lives in the
    /// position now).
    pub async fn on_order_terminal(&self, account: &AccountId, order: &Order) {
        debug_assert!(order.state.is_terminal());
        let book_ref = self.book(account, Decimal::ZERO);
        let mut book = book_ref.lock().await;

        if book.reservations.remove(&order.idempotency_key).is_some() {
            if matches!(
                order.state,
                OrderState::Rejected | OrderState::Cancelled | OrderState::Expired
            ) {
                info!(
                    "[RISK] released reservation for {} ({})",
                    order.idempotency_key,
                    order.state.as_str()
                );
            }
            book.recompute_exposure(&self.config.groups);
        }
    }

    /// Current risk state snapshot for persistence/reporting
    pub async fn snapshot(&self, account: &AccountId) -> Option<RiskState> {
        let book_ref = Arc::clone(&*self.books.get(account)?);
        let book = book_ref.lock().await;
        Some(book.state.clone())
    }

    /// Current position for a symbol
    pub async fn position(&self, account: &AccountId, symbol: &Symbol) -> Option<Position> {
        let book_ref = Arc::clone(&*self.books.get(account)?);
        let book = book_ref.lock().await;
        book.positions.get(symbol).cloned()
    }

    /// Mark a position against the latest price, refreshing unrealized PnL
    pub async fn mark_position(&self, account: &AccountId, symbol: &Symbol, price: Decimal) {
        let Some(book_ref) = self.books.get(account).map(|entry| Arc::clone(&entry)) else {
            return;
        };
        let mut book = book_ref.lock().await;
        if let Some(position) = book.positions.get_mut(symbol) {
            position.mark(price);
        }
    }

    /// Severe-threshold checks; a breach trips the kill switch and rejects.
    fn check_halt(&self, book: &AccountBook) -> Result<(), Rejection> {
        let halt = &self.config.halt;

        let daily_dd = book.drawdown.daily_drawdown_pct();
        if daily_dd >= halt.halt_daily_drawdown_pct {
            self.kill_switch.trip(KillReason::DailyDrawdown);
            return Err(Rejection::new(
                LimitName::MaxDailyDrawdown,
                halt.halt_daily_drawdown_pct,
                daily_dd,
            ));
        }

        let weekly_dd = book.drawdown.weekly_drawdown_pct();
        if weekly_dd >= halt.halt_weekly_drawdown_pct {
            self.kill_switch.trip(KillReason::WeeklyDrawdown);
            return Err(Rejection::new(
                LimitName::MaxWeeklyDrawdown,
                halt.halt_weekly_drawdown_pct,
                weekly_dd,
            ));
        }

        if halt.equity_floor > Decimal::ZERO && book.state.equity <= halt.equity_floor {
            self.kill_switch.trip(KillReason::EquityFloor);
            return Err(Rejection::new(
                LimitName::EquityFloor,
                halt.equity_floor,
                book.state.equity,
            ));
        }

        if book.state.consecutive_loss_count >= halt.max_consecutive_losses {
            self.kill_switch.trip(KillReason::ConsecutiveLosses);
            return Err(Rejection::new(
                LimitName::ConsecutiveLosses,
                Decimal::from(halt.max_consecutive_losses),
                Decimal::from(book.state.consecutive_loss_count),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::FillSource;
    use chrono::{TimeZone, Utc};

    fn manager(config: RiskConfig) -> RiskManager {
        RiskManager::new(config, Arc::new(KillSwitch::new()))
    }

    fn snapshot(equity: Decimal) -> AccountSnapshot {
        AccountSnapshot::new("acct-1", equity)
    }

    fn signal_at(symbol: &str, strategy: &str, hms: (u32, u32, u32)) -> Signal {
        Signal::new_with_time(
            symbol,
            SignalDirection::Buy,
            strategy,
            "paper",
            Utc.with_ymd_and_hms(2024, 3, 1, hms.0, hms.1, hms.2).unwrap(),
        )
    }

    fn fx_ctx() -> MarketContext {
        MarketContext::new(dec!(1.1000), dec!(0.0050))
    }

    #[tokio::test]
    async fn test_percent_risk_scenario() {
        // equity 10_000, risk 1%, stop 50 pips -> 20_000 units
        let manager = manager(RiskConfig::default());
        let signal = signal_at("EURUSD", "trend-1", (12, 0, 0));

        let intent = manager
            .evaluate(&signal, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap();
        assert_eq!(intent.quantity, dec!(20_000));
        assert!(intent.risk_checked);
        assert_eq!(intent.side, Side::Buy);
    }

    #[tokio::test]
    async fn test_max_open_positions_rejects() {
        let config = RiskConfig {
            limits: RiskLimits {
                max_open_positions: 1,
                // Exposure limits loose enough not to interfere
                max_symbol_exposure_pct: dec!(10),
                max_group_exposure_pct: dec!(10),
                ..RiskLimits::default()
            },
            ..RiskConfig::default()
        };
        let manager = manager(config);

        let first = signal_at("EURUSD", "trend-1", (12, 0, 0));
        manager
            .evaluate(&first, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap();

        let second = signal_at("GBPUSD", "trend-1", (12, 5, 0));
        let rejection = manager
            .evaluate(&second, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::MaxOpenPositions);
        assert_eq!(rejection.threshold, dec!(1));
        assert_eq!(rejection.actual, dec!(1));
    }

    #[tokio::test]
    async fn test_symbol_exposure_limit() {
        let config = RiskConfig {
            limits: RiskLimits {
                max_symbol_exposure_pct: dec!(0.10),
                max_group_exposure_pct: dec!(10),
                ..RiskLimits::default()
            },
            // percent_risk 1% at 50 pip stop gives notional 22_000 > 1_000
            ..RiskConfig::default()
        };
        let manager = manager(config);
        let signal = signal_at("EURUSD", "trend-1", (12, 0, 0));

        let rejection = manager
            .evaluate(&signal, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::MaxSymbolExposure);
        assert_eq!(rejection.threshold, dec!(1_000));
    }

    #[tokio::test]
    async fn test_group_exposure_limit_spans_symbols() {
        let config = RiskConfig {
            limits: RiskLimits {
                max_open_positions: 10,
                max_symbol_exposure_pct: dec!(3),
                max_group_exposure_pct: dec!(4),
                ..RiskLimits::default()
            },
            sizing: SizingMethod::FixedUnits {
                units: dec!(20_000),
            },
            caps: SizingCaps {
                max_risk_per_trade: Decimal::ONE,
                max_units: None,
            },
            ..RiskConfig::default()
        };
        let manager = manager(config);

        // Both symbols map to the usd_fx group; each leg is 22_000 notional
        // against a 40_000 group cap.
        let first = signal_at("EURUSD", "trend-1", (12, 0, 0));
        manager
            .evaluate(&first, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap();

        let second = signal_at("GBPUSD", "trend-1", (12, 5, 0));
        let rejection = manager
            .evaluate(&second, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::MaxGroupExposure);
    }

    #[tokio::test]
    async fn test_severe_daily_drawdown_trips_kill_switch() {
        let manager = manager(RiskConfig::default());
        let kill_switch = manager.kill_switch();

        // Establish a peak, then drop 6% (halt threshold is 5%)
        let peak = signal_at("EURUSD", "trend-1", (9, 0, 0));
        let _ = manager
            .evaluate(&peak, &snapshot(dec!(10_000)), &fx_ctx())
            .await;

        let drop = signal_at("EURUSD", "trend-1", (10, 0, 0));
        let rejection = manager
            .evaluate(&drop, &snapshot(dec!(9_400)), &fx_ctx())
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::MaxDailyDrawdown);
        assert!(kill_switch.is_tripped());

        // Scenario 4 second half: next valid signal rejected with
        // kill_switch_active, not re-evaluated
        let next = signal_at("GBPUSD", "trend-2", (10, 30, 0));
        let rejection = manager
            .evaluate(&next, &snapshot(dec!(9_400)), &fx_ctx())
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::KillSwitchActive);
    }

    #[tokio::test]
    async fn test_soft_drawdown_rejects_without_tripping() {
        let config = RiskConfig {
            limits: RiskLimits {
                max_daily_drawdown_pct: dec!(0.03),
                ..RiskLimits::default()
            },
            halt: HaltLimits {
                halt_daily_drawdown_pct: dec!(0.50),
                ..HaltLimits::default()
            },
            ..RiskConfig::default()
        };
        let manager = manager(config);

        let peak = signal_at("EURUSD", "trend-1", (9, 0, 0));
        let _ = manager
            .evaluate(&peak, &snapshot(dec!(10_000)), &fx_ctx())
            .await;

        // 4% down: soft limit rejects, switch stays armed
        let drop = signal_at("GBPUSD", "trend-1", (10, 0, 0));
        let rejection = manager
            .evaluate(&drop, &snapshot(dec!(9_600)), &fx_ctx())
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::MaxDailyDrawdown);
        assert!(!manager.kill_switch().is_tripped());
    }

    #[tokio::test]
    async fn test_rejected_order_releases_reservation() {
        let config = RiskConfig {
            limits: RiskLimits {
                max_open_positions: 1,
                max_symbol_exposure_pct: dec!(10),
                max_group_exposure_pct: dec!(10),
                ..RiskLimits::default()
            },
            ..RiskConfig::default()
        };
        let manager = manager(config);
        let account = AccountId::new("acct-1");

        let first = signal_at("EURUSD", "trend-1", (12, 0, 0));
        let intent = manager
            .evaluate(&first, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap();

        // While reserved, a second symbol is blocked by max_open_positions
        let blocked = signal_at("GBPUSD", "trend-1", (12, 5, 0));
        assert!(
            manager
                .evaluate(&blocked, &snapshot(dec!(10_000)), &fx_ctx())
                .await
                .is_err()
        );

        // The order dies broker-side; reservation must be released
        let mut order = Order::from_intent(&intent);
        order.state = OrderState::Rejected;
        manager.on_order_terminal(&account, &order).await;

        let retry = signal_at("GBPUSD", "trend-1", (12, 15, 0));
        assert!(
            manager
                .evaluate(&retry, &snapshot(dec!(10_000)), &fx_ctx())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_fill_commits_exposure_and_tracks_pnl() {
        let manager = manager(RiskConfig::default());
        let account = AccountId::new("acct-1");
        let signal = signal_at("EURUSD", "trend-1", (12, 0, 0));
        let intent = manager
            .evaluate(&signal, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap();

        let buy = Fill::new(
            intent.idempotency_key.clone(),
            intent.symbol.clone(),
            Side::Buy,
            intent.quantity,
            dec!(1.1000),
            FillSource::Paper,
        );
        manager.on_fill(&account, &buy).await;

        let position = manager
            .position(&account, &Symbol::from("EURUSD"))
            .await
            .unwrap();
        assert_eq!(position.net_quantity, dec!(20_000));

        // Close at a loss: realized PnL and the loss streak move
        let sell = Fill::new(
            intent.idempotency_key.clone(),
            intent.symbol.clone(),
            Side::Sell,
            intent.quantity,
            dec!(1.0990),
            FillSource::Paper,
        );
        manager.on_fill(&account, &sell).await;

        let state = manager.snapshot(&account).await.unwrap();
        assert_eq!(state.daily_pnl, dec!(-20));
        assert_eq!(state.consecutive_loss_count, 1);
        let position = manager
            .position(&account, &Symbol::from("EURUSD"))
            .await
            .unwrap();
        assert!(position.is_flat());
    }

    #[tokio::test]
    async fn test_flat_signal_not_actionable() {
        let manager = manager(RiskConfig::default());
        let mut signal = signal_at("EURUSD", "trend-1", (12, 0, 0));
        signal.direction = SignalDirection::Flat;

        let rejection = manager
            .evaluate(&signal, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::NotActionable);
    }

    #[tokio::test]
    async fn test_decision_for_order_recheck() {
        let manager = manager(RiskConfig::default());
        let signal = signal_at("EURUSD", "trend-1", (12, 0, 0));
        let intent = manager
            .evaluate(&signal, &snapshot(dec!(10_000)), &fx_ctx())
            .await
            .unwrap();

        // Re-checking the same intent passes (its own reservation is
        // excluded from the exposure it would add)
        assert!(
            manager
                .decision_for_order(&snapshot(dec!(10_000)), &intent, dec!(1.1000))
                .await
                .is_ok()
        );

        manager.kill_switch().trip(KillReason::Manual);
        let rejection = manager
            .decision_for_order(&snapshot(dec!(10_000)), &intent, dec!(1.1000))
            .await
            .unwrap_err();
        assert_eq!(rejection.limit, LimitName::KillSwitchActive);
    }
}
