//! Session risk control: fill ledger, daily loss limit, halt, kill switch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{round_money, Fill};

/// Read-only snapshot of the session's risk state.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub is_halted: bool,
    pub halt_reason: Option<String>,
    pub halt_timestamp: Option<DateTime<Utc>>,
    pub daily_realized_pnl: Decimal,
    pub daily_loss_limit: Decimal,
    pub starting_capital: Decimal,
}

struct RiskState {
    is_halted: bool,
    halt_reason: Option<String>,
    halt_timestamp: Option<DateTime<Utc>>,
    fills: Vec<Fill>,
}

/// The single cross-ticker serialization point: owns the session fill
/// ledger and the halt flag. Ticker workers record fills here and consult
/// `can_trade` before every open; nothing else touches the ledger.
pub struct RiskManager {
    starting_capital: Decimal,
    loss_limit: Decimal,
    state: RwLock<RiskState>,
}

impl RiskManager {
    pub fn new(starting_capital: Decimal, loss_limit_pct: Decimal) -> Self {
        Self {
            starting_capital,
            loss_limit: round_money(starting_capital * loss_limit_pct),
            state: RwLock::new(RiskState {
                is_halted: false,
                halt_reason: None,
                halt_timestamp: None,
                fills: Vec::new(),
            }),
        }
    }

    /// Append a fill to the session ledger.
    pub async fn record_fill(&self, fill: &Fill) {
        self.state.write().await.fills.push(fill.clone());
    }

    /// Recompute realized P&L over the whole ledger and halt if the daily
    /// loss limit is breached. Returns true only on the call that performs
    /// the halt, so the caller runs the close-all sequence exactly once.
    pub async fn check_daily_loss_limit(&self) -> bool {
        let mut state = self.state.write().await;
        if state.is_halted {
            return false;
        }

        let realized = realized_pnl(&state.fills);
        if realized <= -self.loss_limit {
            warn!(
                realized = %realized,
                limit = %self.loss_limit,
                "daily loss limit breached, halting"
            );
            state.is_halted = true;
            state.halt_reason = Some(format!(
                "daily loss limit breached: {} <= -{}",
                realized, self.loss_limit
            ));
            state.halt_timestamp = Some(Utc::now());
            return true;
        }
        false
    }

    /// Manual halt, independent of the loss calculation. Same idempotence
    /// contract as `check_daily_loss_limit`.
    pub async fn activate_kill_switch(&self) -> bool {
        let mut state = self.state.write().await;
        if state.is_halted {
            return false;
        }
        warn!("kill switch activated");
        state.is_halted = true;
        state.halt_reason = Some("kill switch".to_string());
        state.halt_timestamp = Some(Utc::now());
        true
    }

    /// Consulted by the position manager before every open.
    pub async fn can_trade(&self) -> (bool, Option<String>) {
        let state = self.state.read().await;
        if state.is_halted {
            (false, state.halt_reason.clone())
        } else {
            (true, None)
        }
    }

    pub async fn is_halted(&self) -> bool {
        self.state.read().await.is_halted
    }

    /// Snapshot for the query surface. The realized figure is always a
    /// fresh sum over the ledger, never an incrementally-maintained number.
    pub async fn status(&self) -> RiskStatus {
        let state = self.state.read().await;
        RiskStatus {
            is_halted: state.is_halted,
            halt_reason: state.halt_reason.clone(),
            halt_timestamp: state.halt_timestamp,
            daily_realized_pnl: realized_pnl(&state.fills),
            daily_loss_limit: self.loss_limit,
            starting_capital: self.starting_capital,
        }
    }

    /// Copy of the session ledger, for metrics and persistence queries.
    pub async fn fills(&self) -> Vec<Fill> {
        self.state.read().await.fills.clone()
    }

    /// Explicit authorized reset at session start. Never called
    /// automatically; a halt outlives the halting condition.
    pub async fn reset_for_session(&self) {
        let mut state = self.state.write().await;
        info!("risk state reset for new session");
        state.is_halted = false;
        state.halt_reason = None;
        state.halt_timestamp = None;
        state.fills.clear();
    }
}

/// Commission-netted realized P&L: the deterministic sum over sell fills.
fn realized_pnl(fills: &[Fill]) -> Decimal {
    round_money(fills.iter().filter_map(|f| f.realized_pnl).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Fill};
    use rust_decimal_macros::dec;

    fn sell_fill(realized: Decimal) -> Fill {
        // entry 100, qty 1, zero commission: exit price = 100 + realized
        Fill::sell(
            "ACME".to_string(),
            dec!(100),
            dec!(100) + realized,
            Decimal::ONE,
            Decimal::ZERO,
            Decimal::ZERO,
            ExitReason::StopLoss,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_halt_at_exact_limit() {
        // Scenario: 50,000 capital, 1.5% limit (-750); fills summing to -750.
        let risk = RiskManager::new(dec!(50000), dec!(0.015));

        for pnl in [dec!(-200), dec!(150), dec!(-300), dec!(-400)] {
            risk.record_fill(&sell_fill(pnl)).await;
        }

        assert!(risk.check_daily_loss_limit().await);
        let status = risk.status().await;
        assert!(status.is_halted);
        assert_eq!(status.daily_realized_pnl, dec!(-750));

        let (allowed, reason) = risk.can_trade().await;
        assert!(!allowed);
        assert!(reason.unwrap().contains("loss limit"));
    }

    #[tokio::test]
    async fn test_no_halt_above_limit() {
        let risk = RiskManager::new(dec!(50000), dec!(0.015));
        risk.record_fill(&sell_fill(dec!(-749.99))).await;
        assert!(!risk.check_daily_loss_limit().await);
        assert!(risk.can_trade().await.0);
    }

    #[tokio::test]
    async fn test_halt_is_idempotent() {
        let risk = RiskManager::new(dec!(50000), dec!(0.015));
        risk.record_fill(&sell_fill(dec!(-800))).await;

        // First breach halts; the second check and the kill switch are no-ops.
        assert!(risk.check_daily_loss_limit().await);
        assert!(!risk.check_daily_loss_limit().await);
        assert!(!risk.activate_kill_switch().await);
    }

    #[tokio::test]
    async fn test_kill_switch_then_loss_check() {
        let risk = RiskManager::new(dec!(50000), dec!(0.015));
        assert!(risk.activate_kill_switch().await);

        risk.record_fill(&sell_fill(dec!(-900))).await;
        assert!(!risk.check_daily_loss_limit().await);

        let status = risk.status().await;
        assert_eq!(status.halt_reason.as_deref(), Some("kill switch"));
    }

    #[tokio::test]
    async fn test_reset_is_explicit_only() {
        let risk = RiskManager::new(dec!(50000), dec!(0.015));
        risk.record_fill(&sell_fill(dec!(-800))).await;
        risk.check_daily_loss_limit().await;
        assert!(risk.is_halted().await);

        // Winning fills afterwards never clear the halt
        risk.record_fill(&sell_fill(dec!(5000))).await;
        assert!(!risk.check_daily_loss_limit().await);
        assert!(risk.is_halted().await);

        risk.reset_for_session().await;
        assert!(!risk.is_halted().await);
        assert!(risk.fills().await.is_empty());
    }

    #[tokio::test]
    async fn test_realized_sum_ignores_buys() {
        let risk = RiskManager::new(dec!(50000), dec!(0.015));
        let buy = Fill::buy("ACME".to_string(), dec!(100), dec!(10), dec!(0.05), Utc::now());
        risk.record_fill(&buy).await;
        risk.record_fill(&sell_fill(dec!(25))).await;

        assert_eq!(risk.status().await.daily_realized_pnl, dec!(25));
    }
}
