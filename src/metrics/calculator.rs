//! Calculator for session performance metrics: win rate, expectancy, Sharpe.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{round_money, Fill, FillAction};

/// Snapshot of session performance, computed from the fill ledger. All
/// per-trade figures come from sell fills, whose realized P&L already nets
/// both legs' commissions.
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,

    /// Fraction of completed trades with positive realized P&L
    pub win_rate: f64,

    /// Mean realized P&L of winners; zero when there are none
    pub avg_win: Decimal,

    /// Mean absolute realized P&L of losers; zero when there are none
    pub avg_loss: Decimal,

    /// win_rate * avg_win - loss_rate * avg_loss, per trade
    pub expected_value: Decimal,

    /// avg_win / avg_loss; zero when avg_loss is zero
    pub risk_reward: f64,

    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub combined_pnl: Decimal,
    pub total_commission: Decimal,

    /// Per-trade Sharpe over the session's realized P&L series, unannualized.
    /// Needs at least two trades and nonzero dispersion; zero otherwise.
    pub sharpe_ratio: f64,

    /// Completed trades by exit reason label
    pub exits_by_reason: HashMap<String, u32>,

    pub calculated_at: DateTime<Utc>,
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Compute session metrics from the fill ledger plus the current
    /// unrealized P&L of the open book. Safe on an empty ledger.
    pub fn calculate(fills: &[Fill], unrealized_pnl: Decimal) -> SessionMetrics {
        let mut metrics = SessionMetrics {
            unrealized_pnl: round_money(unrealized_pnl),
            calculated_at: Utc::now(),
            ..Default::default()
        };

        metrics.total_commission = round_money(fills.iter().map(|f| f.commission).sum());

        let sells: Vec<&Fill> = fills
            .iter()
            .filter(|f| f.action == FillAction::Sell)
            .collect();

        let pnls: Vec<Decimal> = sells
            .iter()
            .filter_map(|f| f.realized_pnl)
            .collect();

        metrics.total_trades = pnls.len() as u32;
        metrics.realized_pnl = round_money(pnls.iter().copied().sum());
        metrics.combined_pnl = round_money(metrics.realized_pnl + metrics.unrealized_pnl);

        for fill in &sells {
            if let Some(reason) = fill.exit_reason {
                *metrics
                    .exits_by_reason
                    .entry(reason.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        if pnls.is_empty() {
            return metrics;
        }

        Self::calculate_trade_stats(&mut metrics, &pnls);
        Self::calculate_sharpe(&mut metrics, &pnls);
        metrics
    }

    fn calculate_trade_stats(metrics: &mut SessionMetrics, pnls: &[Decimal]) {
        let (wins, losses): (Vec<_>, Vec<_>) = pnls.iter().partition(|&&p| p > Decimal::ZERO);

        metrics.winning_trades = wins.len() as u32;
        metrics.losing_trades = losses.len() as u32;
        metrics.win_rate = wins.len() as f64 / pnls.len() as f64;

        if !wins.is_empty() {
            metrics.avg_win =
                round_money(wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len() as u32));
        }
        if !losses.is_empty() {
            metrics.avg_loss = round_money(
                losses.iter().copied().map(|l: Decimal| l.abs()).sum::<Decimal>()
                    / Decimal::from(losses.len() as u32),
            );
        }

        let win_rate = Decimal::try_from(metrics.win_rate).unwrap_or(Decimal::ZERO);
        let loss_rate = Decimal::ONE - win_rate;
        metrics.expected_value =
            round_money(win_rate * metrics.avg_win - loss_rate * metrics.avg_loss);

        if metrics.avg_loss > Decimal::ZERO {
            metrics.risk_reward = metrics.avg_win.to_f64().unwrap_or(0.0)
                / metrics.avg_loss.to_f64().unwrap_or(1.0);
        }
    }

    fn calculate_sharpe(metrics: &mut SessionMetrics, pnls: &[Decimal]) {
        if pnls.len() < 2 {
            return;
        }

        let returns: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if returns.len() < 2 {
            return;
        }

        let mean = returns.clone().mean();
        let std_dev = returns.std_dev();
        if std_dev > 0.0 {
            metrics.sharpe_ratio = mean / std_dev;
        }
    }
}

impl fmt::Display for SessionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session Performance")?;
        writeln!(f, "-------------------")?;
        writeln!(
            f,
            "Trades:        {} ({} wins / {} losses)",
            self.total_trades, self.winning_trades, self.losing_trades
        )?;
        writeln!(f, "Win rate:      {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Avg win:       {}", self.avg_win)?;
        writeln!(f, "Avg loss:      {}", self.avg_loss)?;
        writeln!(f, "Expectancy:    {}", self.expected_value)?;
        writeln!(f, "Risk/reward:   {:.2}", self.risk_reward)?;
        writeln!(f, "Sharpe:        {:.2}", self.sharpe_ratio)?;
        writeln!(f, "Realized P&L:  {}", self.realized_pnl)?;
        writeln!(f, "Unrealized:    {}", self.unrealized_pnl)?;
        writeln!(f, "Combined:      {}", self.combined_pnl)?;
        writeln!(f, "Commissions:   {}", self.total_commission)?;

        if !self.exits_by_reason.is_empty() {
            writeln!(f, "Exits by reason:")?;
            let mut reasons: Vec<_> = self.exits_by_reason.iter().collect();
            reasons.sort_by(|a, b| a.0.cmp(b.0));
            for (reason, count) in reasons {
                writeln!(f, "  {reason:<20} {count}")?;
            }
        }
        Ok(())
    }
}
