//! Risk manager
//!
//! The gatekeeper. Every proposed trade passes the ordered checks here
//! before any capital-affecting action; all account mutation funnels
//! through one serialization point per operation. Drawdown response is
//! tiered: soft scaling first, then a lockout requiring manual reset,
//! then the circuit breaker event that halts the submission path.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::events::{RiskEvent, Topic};
use crate::core::types::{AccountState, ClosedTrade, Position, TradeSetup};
use crate::error::TradingError;
use crate::risk::exits::{self, BarView, ExitConfig, ExitStep};
use crate::risk::sizer::KellyStats;
use crate::risk::RiskLimits;
use crate::universe;

/// Why a setup was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskReason {
    DailyLossLimitReached,
    MaxPositionsReached,
    DuplicatePosition,
    SectorExposureExceeded,
    DrawdownLockout,
    TradingHalted,
    SizeClampedToZero,
}

impl std::fmt::Display for RiskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskReason::DailyLossLimitReached => "daily loss limit reached",
            RiskReason::MaxPositionsReached => "max concurrent positions reached",
            RiskReason::DuplicatePosition => "position already open in symbol",
            RiskReason::SectorExposureExceeded => "sector exposure limit exceeded",
            RiskReason::DrawdownLockout => "drawdown lockout active",
            RiskReason::TradingHalted => "trading halted",
            RiskReason::SizeClampedToZero => "size clamped to zero",
        };
        write!(f, "{}", s)
    }
}

/// Authorization outcome. Approval carries the (possibly clamped) size.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approved { shares: Decimal, risk_amount: Decimal },
    Rejected { reason: RiskReason },
}

/// The account-side effect of applying one exit step
#[derive(Debug, Clone)]
pub struct AppliedExit {
    pub shares_closed: Decimal,
    pub price: Decimal,
    pub reason: crate::core::types::ExitReason,
    pub direction: crate::core::types::Direction,
    /// P&L realized by this step alone
    pub pnl: Decimal,
    /// Present only on a full close
    pub trade: Option<ClosedTrade>,
}

#[derive(Debug, Default)]
struct RiskState {
    daily_halted: bool,
    locked_out: bool,
    breaker_tripped: bool,
    soft_tier_warned: bool,
    wins: u32,
    losses: u32,
    gross_win: Decimal,
    gross_loss: Decimal,
}

pub struct RiskManager {
    limits: RiskLimits,
    account: RwLock<AccountState>,
    state: Mutex<RiskState>,
    risk_events: Topic<RiskEvent>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, starting_cash: Decimal, risk_events: Topic<RiskEvent>) -> Self {
        info!("RiskManager initialized: ${} starting equity", starting_cash);
        Self {
            limits,
            account: RwLock::new(AccountState::new(starting_cash)),
            state: Mutex::new(RiskState::default()),
            risk_events,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn equity(&self) -> Decimal {
        self.account.read().map(|a| a.equity).unwrap_or(Decimal::ZERO)
    }

    pub fn drawdown_pct(&self) -> Decimal {
        self.account.read().map(|a| a.drawdown_pct()).unwrap_or(Decimal::ZERO)
    }

    pub fn open_position_count(&self) -> usize {
        self.account.read().map(|a| a.open_position_count()).unwrap_or(0)
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.account
            .read()
            .map(|a| a.positions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.account.read().ok()?.positions.get(symbol).cloned()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.account
            .read()
            .map(|a| a.positions.contains_key(symbol))
            .unwrap_or(false)
    }

    /// Snapshot of the account for reporting
    pub fn account_snapshot(&self) -> Option<AccountState> {
        self.account.read().ok().map(|a| a.clone())
    }

    /// Validate a setup against all limits, in order, short-circuiting on
    /// the first hard failure. Per-trade risk and notional overruns clamp
    /// the size down instead of rejecting.
    pub fn authorize(&self, setup: &TradeSetup, now: DateTime<Utc>) -> Decision {
        // Fail closed on a poisoned lock
        let (Ok(mut account), Ok(mut state)) = (self.account.write(), self.state.lock()) else {
            warn!("risk lock poisoned, failing closed");
            return Decision::Rejected { reason: RiskReason::TradingHalted };
        };

        Self::roll_day(&mut account, &mut state, now);

        if state.locked_out {
            return Decision::Rejected { reason: RiskReason::DrawdownLockout };
        }

        let equity = account.equity;

        // Drawdown tiers: warn and scale, lock out, trip the breaker
        let drawdown = account.drawdown_pct();
        if drawdown >= self.limits.drawdown_breaker_pct {
            state.locked_out = true;
            if !state.breaker_tripped {
                state.breaker_tripped = true;
                warn!("CIRCUIT BREAKER: drawdown {:.2}% from peak", drawdown * Decimal::from(100u64));
                self.risk_events.publish(RiskEvent::CircuitBreakerTripped {
                    drawdown_pct: drawdown,
                    at: now,
                });
            }
            return Decision::Rejected { reason: RiskReason::DrawdownLockout };
        }
        if drawdown >= self.limits.drawdown_lockout_pct {
            state.locked_out = true;
            warn!("drawdown lockout: {:.2}% from peak", drawdown * Decimal::from(100u64));
            return Decision::Rejected { reason: RiskReason::DrawdownLockout };
        }
        let soft_scale = if drawdown >= self.limits.drawdown_soft_pct {
            if !state.soft_tier_warned {
                state.soft_tier_warned = true;
                self.risk_events
                    .publish(RiskEvent::DrawdownWarning { drawdown_pct: drawdown, at: now });
            }
            self.limits.drawdown_soft_scale
        } else {
            state.soft_tier_warned = false;
            Decimal::ONE
        };

        // Daily loss: realized losses today plus risk still open
        let daily_loss = (-account.realized_pnl_today).max(Decimal::ZERO) + account.open_risk();
        if state.daily_halted || daily_loss >= self.limits.max_daily_loss * equity {
            if !state.daily_halted {
                state.daily_halted = true;
                warn!("daily loss limit hit: ${} at risk", daily_loss);
                self.risk_events
                    .publish(RiskEvent::DailyLimitReached { daily_loss, at: now });
            }
            return Decision::Rejected { reason: RiskReason::DailyLossLimitReached };
        }

        // Position count
        if account.open_position_count() >= self.limits.max_positions {
            return Decision::Rejected { reason: RiskReason::MaxPositionsReached };
        }
        if account.positions.contains_key(setup.symbol()) {
            return Decision::Rejected { reason: RiskReason::DuplicatePosition };
        }

        // Per-trade risk: clamp rather than reject when the setup was not
        // pre-capped
        let per_share_risk = (setup.entry_price - setup.stop_price).abs();
        if per_share_risk.is_zero() || setup.entry_price <= Decimal::ZERO {
            return Decision::Rejected { reason: RiskReason::SizeClampedToZero };
        }
        let mut shares = setup.shares;
        let max_risk = equity * self.limits.max_risk_per_trade;
        let risk_capped = (max_risk / per_share_risk).floor();
        if shares > risk_capped {
            debug!("{}: clamping {} -> {} shares (per-trade risk)", setup.symbol(), shares, risk_capped);
            shares = risk_capped;
        }

        // Notional cap
        let max_shares = (equity * self.limits.max_position_size / setup.entry_price).floor();
        if shares > max_shares {
            debug!("{}: clamping {} -> {} shares (notional)", setup.symbol(), shares, max_shares);
            shares = max_shares;
        }

        // Optional sector exposure gate
        if let Some(cap) = self.limits.max_sector_exposure {
            let sector = universe::sector_of(setup.symbol());
            let sector_notional: Decimal = account
                .positions
                .values()
                .filter(|p| universe::sector_of(&p.symbol) == sector)
                .map(|p| p.reserved_notional())
                .sum();
            if sector_notional + shares * setup.entry_price > cap * equity {
                return Decision::Rejected { reason: RiskReason::SectorExposureExceeded };
            }
        }

        // Soft drawdown tier halves whatever survived the clamps
        shares = (shares * soft_scale).floor();

        if shares <= Decimal::ZERO {
            return Decision::Rejected { reason: RiskReason::SizeClampedToZero };
        }

        Decision::Approved { shares, risk_amount: shares * per_share_risk }
    }

    /// Register a filled position. Reserves the entry notional from cash.
    pub fn open_position(&self, position: Position) -> Result<(), TradingError> {
        let Ok(mut account) = self.account.write() else {
            return Err(TradingError::Invariant("account lock poisoned".to_string()));
        };

        let required = position.reserved_notional();
        if required > account.cash {
            return Err(TradingError::Risk(format!(
                "insufficient cash: need ${}, have ${}",
                required, account.cash
            )));
        }

        account.cash -= required;
        account.positions.insert(position.symbol.clone(), position);
        account.recompute_equity();
        Ok(())
    }

    /// Update a position's mark and the account equity
    pub fn mark_price(&self, symbol: &str, price: Decimal) {
        if let Ok(mut account) = self.account.write() {
            if let Some(pos) = account.positions.get_mut(symbol) {
                pos.current_price = price;
            }
            account.recompute_equity();
        }
    }

    /// Run the exit rules for one position against one bar. Management
    /// state (flags, stop ratchet) mutates under the account lock.
    pub fn run_exit_checks(
        &self,
        symbol: &str,
        bar: &BarView,
        now: DateTime<Utc>,
        cfg: &ExitConfig,
    ) -> Vec<ExitStep> {
        let Ok(mut account) = self.account.write() else {
            return Vec::new();
        };
        match account.positions.get_mut(symbol) {
            Some(position) => exits::evaluate(cfg, position, bar, now),
            None => Vec::new(),
        }
    }

    /// Apply one exit step: adjust cash, realized P&L and the position.
    /// Returns what was actually closed, with the ledger entry on a full
    /// close, so callers can mirror the fill at the broker.
    pub fn apply_exit_step(
        &self,
        symbol: &str,
        step: &ExitStep,
        at: DateTime<Utc>,
    ) -> Option<AppliedExit> {
        let Ok(mut account) = self.account.write() else {
            return None;
        };

        match step {
            ExitStep::ScaleOut { fraction, price, reason } => {
                let position = account.positions.get_mut(symbol)?;
                let mut to_close = (position.remaining_shares * fraction).floor();
                if to_close.is_zero() {
                    to_close = Decimal::ONE;
                }
                if to_close >= position.remaining_shares {
                    return None;
                }

                let pnl = position.profit_per_share(*price) * to_close;
                let released = position.entry_price * to_close + pnl;
                position.remaining_shares -= to_close;
                position.realized_pnl += pnl;
                let direction = position.direction;
                debug!("{}: scaled out {} shares at {} (P&L ${})", symbol, to_close, price, pnl);

                account.cash += released;
                account.realized_pnl_today += pnl;
                account.recompute_equity();

                Some(AppliedExit {
                    shares_closed: to_close,
                    price: *price,
                    reason: *reason,
                    direction,
                    pnl,
                    trade: None,
                })
            }
            ExitStep::Close { price, reason } => {
                let position = account.positions.remove(symbol)?;
                let shares_closed = position.remaining_shares;
                let remaining_pnl = position.profit_per_share(*price) * shares_closed;
                let total_pnl = position.realized_pnl + remaining_pnl;

                account.cash += position.entry_price * shares_closed + remaining_pnl;
                account.realized_pnl_today += remaining_pnl;
                account.recompute_equity();

                self.record_outcome(total_pnl);

                let cost_basis = position.entry_price * position.shares;
                let pnl_pct = if cost_basis.is_zero() {
                    Decimal::ZERO
                } else {
                    total_pnl / cost_basis * Decimal::from(100u64)
                };

                let trade = ClosedTrade {
                    symbol: position.symbol.clone(),
                    direction: position.direction,
                    entry_time: position.entry_time,
                    exit_time: at,
                    entry_price: position.entry_price,
                    exit_price: *price,
                    shares: position.shares,
                    pnl: total_pnl,
                    pnl_pct,
                    reason: *reason,
                    holding_days: (at.date_naive() - position.entry_time.date_naive()).num_days(),
                    mfe: position.max_favorable_excursion,
                    mae: position.max_adverse_excursion,
                    trailed: position.stop_price != position.original_stop,
                };

                Some(AppliedExit {
                    shares_closed,
                    price: *price,
                    reason: *reason,
                    direction: position.direction,
                    pnl: remaining_pnl,
                    trade: Some(trade),
                })
            }
        }
    }

    fn record_outcome(&self, pnl: Decimal) {
        if let Ok(mut state) = self.state.lock() {
            if pnl > Decimal::ZERO {
                state.wins += 1;
                state.gross_win += pnl;
            } else {
                state.losses += 1;
                state.gross_loss += pnl.abs();
            }
        }
    }

    /// Trailing Kelly inputs from closed trades. None until enough
    /// history exists on both sides.
    pub fn kelly_stats(&self, min_trades: u32) -> Option<KellyStats> {
        let state = self.state.lock().ok()?;
        let total = state.wins + state.losses;
        if total < min_trades || state.wins == 0 || state.losses == 0 {
            return None;
        }

        let avg_win = state.gross_win / Decimal::from(state.wins);
        let avg_loss = state.gross_loss / Decimal::from(state.losses);
        if avg_loss.is_zero() {
            return None;
        }

        Some(KellyStats {
            win_rate: state.wins as f64 / total as f64,
            win_loss_ratio: (avg_win / avg_loss).to_f64()?,
        })
    }

    /// Manual reset after a drawdown lockout or circuit-breaker trip
    pub fn reset_circuit_breaker(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.locked_out = false;
            state.breaker_tripped = false;
            info!("circuit breaker reset, trading re-enabled");
        }
    }

    pub fn is_locked_out(&self) -> bool {
        self.state.lock().map(|s| s.locked_out).unwrap_or(true)
    }

    pub fn status(&self) -> String {
        let (equity, drawdown, positions, realized) = self
            .account
            .read()
            .map(|a| (a.equity, a.drawdown_pct(), a.open_position_count(), a.realized_pnl_today))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO, 0, Decimal::ZERO));
        let locked = self.is_locked_out();
        format!(
            "Equity: ${:.2} | Drawdown: {:.2}% | Positions: {} | Today: ${:.2} | Trading: {}",
            equity,
            drawdown * Decimal::from(100u64),
            positions,
            realized,
            if locked { "LOCKED" } else { "enabled" },
        )
    }

    fn roll_day(account: &mut AccountState, state: &mut RiskState, now: DateTime<Utc>) {
        let today = now.date_naive();
        if account.day != Some(today) {
            account.day = Some(today);
            account.realized_pnl_today = Decimal::ZERO;
            state.daily_halted = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Direction, ExitReason, Signal, StructureSnapshot};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn setup_for(symbol: &str, entry: Decimal, stop: Decimal, shares: Decimal) -> TradeSetup {
        TradeSetup {
            signal: Signal {
                symbol: symbol.to_string(),
                time: Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
                rrs: 2.45,
                direction: if stop < entry { Direction::Long } else { Direction::Short },
                price: entry,
                atr: (entry - stop).abs(),
                structure: StructureSnapshot {
                    strength_score: 4,
                    weakness_score: 0,
                    ema3: entry,
                    ema8: entry,
                    ema21: entry,
                },
            },
            entry_price: entry,
            stop_price: stop,
            target_price: entry + (entry - stop) * dec!(2),
            shares,
            risk_amount: (entry - stop).abs() * shares,
            notional: entry * shares,
        }
    }

    fn manager(cash: Decimal) -> RiskManager {
        RiskManager::new(RiskLimits::default(), cash, Topic::new(16))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap()
    }

    #[test]
    fn test_authorize_reference_trade() {
        let rm = manager(dec!(25000));
        let setup = setup_for("NVDA", dec!(485.50), dec!(478.00), dec!(33));

        match rm.authorize(&setup, now()) {
            Decision::Approved { shares, risk_amount } => {
                assert_eq!(shares, dec!(33));
                assert_eq!(risk_amount, dec!(247.50));
                assert!(risk_amount <= dec!(25000) * dec!(0.01));
            }
            other => panic!("expected approval, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_setup_is_clamped_not_rejected() {
        let rm = manager(dec!(25000));
        // 100 shares would risk $750, budget is $250
        let setup = setup_for("NVDA", dec!(485.50), dec!(478.00), dec!(100));

        match rm.authorize(&setup, now()) {
            Decision::Approved { shares, .. } => assert_eq!(shares, dec!(33)),
            other => panic!("expected clamped approval, got {:?}", other),
        }
    }

    #[test]
    fn test_max_positions_rejection() {
        let rm = manager(dec!(100000));
        for (i, sym) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            let setup = setup_for(sym, dec!(50), dec!(48), dec!(10));
            let pos = Position::from_setup(&setup, dec!(10), dec!(50), now());
            rm.open_position(pos).unwrap();
            assert_eq!(rm.open_position_count(), i + 1);
        }

        let setup = setup_for("F", dec!(50), dec!(48), dec!(10));
        assert_eq!(
            rm.authorize(&setup, now()),
            Decision::Rejected { reason: RiskReason::MaxPositionsReached }
        );
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let rm = manager(dec!(100000));
        let setup = setup_for("AAPL", dec!(50), dec!(48), dec!(10));
        rm.open_position(Position::from_setup(&setup, dec!(10), dec!(50), now())).unwrap();

        assert_eq!(
            rm.authorize(&setup, now()),
            Decision::Rejected { reason: RiskReason::DuplicatePosition }
        );
    }

    #[test]
    fn test_daily_loss_locks_until_next_day() {
        let rm = manager(dec!(25000));

        // Book a realized loss beyond 3% of equity
        let setup = setup_for("AAPL", dec!(100), dec!(90), dec!(100));
        rm.open_position(Position::from_setup(&setup, dec!(100), dec!(100), now())).unwrap();
        let step = ExitStep::Close { price: dec!(90), reason: ExitReason::StopLoss };
        let trade = rm.apply_exit_step("AAPL", &step, now()).unwrap();
        assert_eq!(trade.pnl, dec!(-1000));

        let retry = setup_for("MSFT", dec!(100), dec!(98), dec!(10));
        assert_eq!(
            rm.authorize(&retry, now()),
            Decision::Rejected { reason: RiskReason::DailyLossLimitReached }
        );

        // Next day the daily budget resets (drawdown from the loss stays
        // under the 5% soft tier)
        let tomorrow = now() + chrono::Duration::days(1);
        assert!(matches!(rm.authorize(&retry, tomorrow), Decision::Approved { .. }));
    }

    #[test]
    fn test_drawdown_tiers() {
        let rm = manager(dec!(100000));

        // Soft tier: 6% drawdown halves sizes
        {
            let mut account = rm.account.write().unwrap();
            account.cash = dec!(94000);
            account.recompute_equity();
        }
        let setup = setup_for("AAPL", dec!(100), dec!(98), dec!(400));
        match rm.authorize(&setup, now()) {
            Decision::Approved { shares, .. } => {
                // Notional cap allows 94 shares; the soft tier halves that
                assert_eq!(shares, dec!(47));
            }
            other => panic!("expected scaled approval, got {:?}", other),
        }

        // Lockout tier: 16% drawdown rejects everything
        {
            let mut account = rm.account.write().unwrap();
            account.cash = dec!(84000);
            account.recompute_equity();
        }
        assert_eq!(
            rm.authorize(&setup, now()),
            Decision::Rejected { reason: RiskReason::DrawdownLockout }
        );

        // Still rejected after recovery until manually reset
        {
            let mut account = rm.account.write().unwrap();
            account.cash = dec!(99000);
            account.recompute_equity();
        }
        assert_eq!(
            rm.authorize(&setup, now()),
            Decision::Rejected { reason: RiskReason::DrawdownLockout }
        );

        rm.reset_circuit_breaker();
        assert!(matches!(rm.authorize(&setup, now()), Decision::Approved { .. }));
    }

    #[test]
    fn test_circuit_breaker_event_published_once() {
        let topic: Topic<RiskEvent> = Topic::new(16);
        let mut rx = topic.subscribe();
        let rm = RiskManager::new(RiskLimits::default(), dec!(100000), topic);

        {
            let mut account = rm.account.write().unwrap();
            account.cash = dec!(79000);
            account.recompute_equity();
        }

        let setup = setup_for("AAPL", dec!(100), dec!(98), dec!(10));
        rm.authorize(&setup, now());
        rm.authorize(&setup, now());

        match rx.try_recv() {
            Ok(RiskEvent::CircuitBreakerTripped { drawdown_pct, .. }) => {
                assert!(drawdown_pct >= dec!(0.20));
            }
            other => panic!("expected breaker event, got {:?}", other),
        }
        // Only one trip event despite repeated authorizations
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scale_out_then_close_builds_one_ledger_entry() {
        let rm = manager(dec!(25000));
        let setup = setup_for("AAPL", dec!(10), dec!(9), dec!(100));
        rm.open_position(Position::from_setup(&setup, dec!(100), dec!(10), now())).unwrap();

        let scale = ExitStep::ScaleOut {
            fraction: dec!(0.5),
            price: dec!(11),
            reason: ExitReason::ScaleOut,
        };
        let applied = rm.apply_exit_step("AAPL", &scale, now()).unwrap();
        assert_eq!(applied.shares_closed, dec!(50));
        assert_eq!(applied.pnl, dec!(50));
        assert!(applied.trade.is_none());
        assert_eq!(rm.position("AAPL").unwrap().remaining_shares, dec!(50));

        let close = ExitStep::Close { price: dec!(10), reason: ExitReason::TrailingStop };
        let trade = rm.apply_exit_step("AAPL", &close, now()).unwrap().trade.unwrap();
        // $50 from the scale, breakeven on the rest
        assert_eq!(trade.pnl, dec!(50));
        assert_eq!(trade.shares, dec!(100));
        assert_eq!(rm.open_position_count(), 0);
    }

    #[test]
    fn test_kelly_stats_need_history_on_both_sides() {
        let rm = manager(dec!(25000));
        assert!(rm.kelly_stats(5).is_none());

        for pnl in [dec!(100), dec!(150), dec!(-80), dec!(120), dec!(-60)] {
            rm.record_outcome(pnl);
        }

        let stats = rm.kelly_stats(5).unwrap();
        assert!((stats.win_rate - 0.6).abs() < 1e-9);
        assert!(stats.win_loss_ratio > 1.0);
    }
}
