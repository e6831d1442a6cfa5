//! Open position and its milestone/dead-zone state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::rounding::{round_money, round_pct};

/// Lifecycle of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PositionStatus {
    Open,
    /// Exit order submitted but not yet confirmed; milestones frozen,
    /// no further exit evaluation until the broker answers.
    ExitPending,
    Closed,
}

/// Profit milestones and dead-zone timing for one open position.
///
/// Milestones are one-way: once reached they stay reached for the life of
/// the position. `level_anchor`/`level_since` drive the dead-zone timer:
/// the anchor is the price level of the current milestone tier and the
/// timer restarts whenever price leaves the band around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneState {
    pub reached_t1: bool,
    pub reached_cross: bool,
    pub reached_momentum: bool,

    pub t1_at: Option<DateTime<Utc>>,
    pub cross_at: Option<DateTime<Utc>>,
    pub momentum_at: Option<DateTime<Utc>>,

    /// Price level the dead-zone band is measured around
    pub level_anchor: Decimal,

    /// Start of the current in-band stretch
    pub level_since: DateTime<Utc>,
}

impl MilestoneState {
    pub fn new(entry_price: Decimal, entry_time: DateTime<Utc>) -> Self {
        Self {
            reached_t1: false,
            reached_cross: false,
            reached_momentum: false,
            t1_at: None,
            cross_at: None,
            momentum_at: None,
            level_anchor: entry_price,
            level_since: entry_time,
        }
    }

    /// Seconds the price has stayed within the dead-zone band.
    pub fn seconds_at_level(&self, now: DateTime<Utc>) -> i64 {
        (now - self.level_since).num_seconds().max(0)
    }
}

/// An open trade, owned exclusively by the position manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub quantity: Decimal,

    /// Commission paid on the entry leg, charged against the exit P&L
    pub entry_commission: Decimal,

    pub milestones: MilestoneState,

    /// Minimum exit price guaranteed so far; monotonically non-decreasing.
    pub locked_floor: Decimal,

    pub status: PositionStatus,

    /// Reason for an in-flight exit, kept across submission retries
    pub pending_exit: Option<super::ExitReason>,
}

impl Position {
    pub fn new(
        ticker: String,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
        quantity: Decimal,
        entry_commission: Decimal,
        stop_loss_pct: Decimal,
    ) -> Self {
        let floor = round_money(entry_price * (Decimal::ONE - stop_loss_pct));
        Self {
            ticker,
            entry_price,
            entry_time,
            quantity,
            entry_commission: round_money(entry_commission),
            milestones: MilestoneState::new(entry_price, entry_time),
            locked_floor: floor,
            status: PositionStatus::Open,
            pending_exit: None,
        }
    }

    /// Signed P&L ratio at `price`, rounded per the percentage rule.
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        round_pct((price - self.entry_price) / self.entry_price)
    }

    /// Mark-to-market P&L at `price`, gross of commission.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        round_money((price - self.entry_price) * self.quantity)
    }

    /// Notional value at entry.
    pub fn entry_value(&self) -> Decimal {
        round_money(self.entry_price * self.quantity)
    }

    /// Raise the locked floor. A lower value is ignored, keeping the floor
    /// monotone even against buggy callers.
    pub fn raise_floor(&mut self, floor: Decimal) {
        let floor = round_money(floor);
        if floor > self.locked_floor {
            self.locked_floor = floor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(entry: Decimal) -> Position {
        Position::new("ACME".to_string(), entry, Utc::now(), dec!(100), dec!(0.50), dec!(0.005))
    }

    #[test]
    fn test_initial_floor_is_stop_price() {
        let pos = position(dec!(100.00));
        assert_eq!(pos.locked_floor, dec!(99.50));
        assert_eq!(pos.status, PositionStatus::Open);
    }

    #[test]
    fn test_floor_never_decreases() {
        let mut pos = position(dec!(100.00));
        pos.raise_floor(dec!(100.75));
        assert_eq!(pos.locked_floor, dec!(100.75));
        pos.raise_floor(dec!(100.10));
        assert_eq!(pos.locked_floor, dec!(100.75));
        pos.raise_floor(dec!(101.00));
        assert_eq!(pos.locked_floor, dec!(101.00));
    }

    #[test]
    fn test_pnl_pct() {
        let pos = position(dec!(150.00));
        assert_eq!(pos.pnl_pct(dec!(151.13)), dec!(0.007533));
        assert_eq!(pos.pnl_pct(dec!(150.00)), Decimal::ZERO);
        assert!(pos.pnl_pct(dec!(149.00)) < Decimal::ZERO);
    }

    #[test]
    fn test_unrealized_pnl() {
        let pos = position(dec!(100.00));
        assert_eq!(pos.unrealized_pnl(dec!(101.50)), dec!(150.00));
        assert_eq!(pos.unrealized_pnl(dec!(99.00)), dec!(-100.00));
    }
}
