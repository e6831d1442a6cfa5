//! Fill records: the permanent, append-only record of engine activity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::rounding::round_money;

/// Direction of an executed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillAction {
    Buy,
    Sell,
}

impl FillAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillAction::Buy => "BUY",
            FillAction::Sell => "SELL",
        }
    }
}

/// Why a position terminated. Floor returns carry the highest milestone
/// reached; dead-zone reasons carry the tier the timeout fired at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    StopLoss,
    Target,
    T1Return,
    CrossReturn,
    MomentumReturn,
    DeadZoneBelowT1,
    DeadZoneT1,
    DeadZoneCross,
    DeadZoneMomentum,
    DailyLossLimit,
    KillSwitch,
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::Target => "target",
            ExitReason::T1Return => "t1-return",
            ExitReason::CrossReturn => "cross-return",
            ExitReason::MomentumReturn => "momentum-return",
            ExitReason::DeadZoneBelowT1 => "dead-zone-below-t1",
            ExitReason::DeadZoneT1 => "dead-zone-t1",
            ExitReason::DeadZoneCross => "dead-zone-cross",
            ExitReason::DeadZoneMomentum => "dead-zone-momentum",
            ExitReason::DailyLossLimit => "daily-loss-limit",
            ExitReason::KillSwitch => "kill-switch",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed order. Immutable once recorded; sells carry the realized
/// P&L for the round trip, net of both commissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub ticker: String,
    pub action: FillAction,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,

    /// Commission-netted round-trip P&L; present on sells only
    pub realized_pnl: Option<Decimal>,

    pub timestamp: DateTime<Utc>,

    /// Present on sells only
    pub exit_reason: Option<ExitReason>,
}

impl Fill {
    pub fn buy(
        ticker: String,
        price: Decimal,
        quantity: Decimal,
        commission: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            ticker,
            action: FillAction::Buy,
            price,
            quantity,
            commission: round_money(commission),
            realized_pnl: None,
            timestamp,
            exit_reason: None,
        }
    }

    /// Build a sell fill, computing realized P&L from the entry leg.
    #[allow(clippy::too_many_arguments)]
    pub fn sell(
        ticker: String,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: Decimal,
        entry_commission: Decimal,
        exit_commission: Decimal,
        reason: ExitReason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let gross = (exit_price - entry_price) * quantity;
        let realized = round_money(gross - entry_commission - exit_commission);
        Self {
            ticker,
            action: FillAction::Sell,
            price: exit_price,
            quantity,
            commission: round_money(exit_commission),
            realized_pnl: Some(realized),
            timestamp,
            exit_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sell_fill_nets_round_trip_commission() {
        let fill = Fill::sell(
            "ACME".to_string(),
            dec!(100.00),
            dec!(101.00),
            dec!(50),
            dec!(0.25),
            dec!(0.25),
            ExitReason::CrossReturn,
            Utc::now(),
        );

        // (101 - 100) * 50 - 0.25 - 0.25 = 49.50
        assert_eq!(fill.realized_pnl, Some(dec!(49.50)));
        assert_eq!(fill.exit_reason, Some(ExitReason::CrossReturn));
        assert_eq!(fill.action, FillAction::Sell);
    }

    #[test]
    fn test_buy_fill_has_no_realized_pnl() {
        let fill = Fill::buy("ACME".to_string(), dec!(100.00), dec!(50), dec!(0.25), Utc::now());
        assert_eq!(fill.realized_pnl, None);
        assert_eq!(fill.exit_reason, None);
    }

    #[test]
    fn test_exit_reason_labels() {
        assert_eq!(ExitReason::DeadZoneBelowT1.as_str(), "dead-zone-below-t1");
        assert_eq!(ExitReason::StopLoss.to_string(), "stop-loss");
    }
}
