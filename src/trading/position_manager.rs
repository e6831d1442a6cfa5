//! Position lifecycle: gated entry, sizing, monitored exits, forced flatten.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::broker::{BrokerFill, OrderRouter};
use crate::models::{EntrySignal, ExitReason, Fill, Position, PositionStatus};
use crate::trading::cooldown::CooldownManager;
use crate::trading::exit_engine::{Evaluation, ExitEngine};
use crate::trading::risk::RiskManager;
use crate::trading::SessionConfig;

/// Why an entry signal was not converted into a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRejection {
    Halted(String),
    Cooldown,
    AlreadyOpen,
    MaxPositions,
    ZeroQuantity,
}

impl OpenRejection {
    pub fn as_str(&self) -> &str {
        match self {
            OpenRejection::Halted(_) => "halted",
            OpenRejection::Cooldown => "cooldown",
            OpenRejection::AlreadyOpen => "already_open",
            OpenRejection::MaxPositions => "max_positions",
            OpenRejection::ZeroQuantity => "zero_quantity",
        }
    }
}

#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Opened {
        position: Position,
        fill: Fill,
    },
    /// The session halted while the entry order was in flight and the fill
    /// was sold straight back. `exit` is `None` when the counter order also
    /// failed; the position is then parked for the stuck-exit retry path.
    Unwound {
        entry: Fill,
        exit: Option<Fill>,
    },
    Rejected(OpenRejection),
}

/// Open positions plus the tickers with an entry order in flight. In-flight
/// entries hold a capacity slot and block duplicates until they settle.
#[derive(Default)]
struct PositionBook {
    open: HashMap<String, Position>,
    pending_entries: HashSet<String>,
}

/// Owns every open position and the only paths that open or close one.
/// All mutation goes through `&self` methods over an internal lock, so the
/// manager can be shared across ticker workers behind an `Arc`.
pub struct PositionManager {
    allocation: Decimal,
    max_concurrent: usize,
    stop_loss_pct: Decimal,
    positions: RwLock<PositionBook>,
    risk: Arc<RiskManager>,
    cooldowns: Arc<CooldownManager>,
    router: Arc<OrderRouter>,
    exit_engine: ExitEngine,
}

impl PositionManager {
    pub fn new(
        config: &SessionConfig,
        risk: Arc<RiskManager>,
        cooldowns: Arc<CooldownManager>,
        router: Arc<OrderRouter>,
    ) -> Self {
        Self {
            allocation: config.allocation_per_position(),
            max_concurrent: config.max_concurrent_positions,
            stop_loss_pct: config.exit.stop_loss_pct,
            positions: RwLock::new(PositionBook::default()),
            risk,
            cooldowns,
            router,
            exit_engine: ExitEngine::new(config.exit.clone()),
        }
    }

    /// Gate an entry signal and, if every check passes, submit the order and
    /// open the position. The gate and the slot reservation share one
    /// critical section, and the halt flag is re-checked under the same lock
    /// after the fill, so a halt landing while the order is in flight can
    /// never leave a fresh position on a flattened book.
    pub async fn open(
        &self,
        signal: &EntrySignal,
        size_override: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<OpenOutcome> {
        if !self.cooldowns.can_enter(&signal.ticker, now).await {
            return Ok(OpenOutcome::Rejected(OpenRejection::Cooldown));
        }

        let quantity = match size_override {
            Some(q) => q.floor(),
            None => (self.allocation / signal.signal_price).floor(),
        };
        if quantity <= Decimal::ZERO {
            return Ok(OpenOutcome::Rejected(OpenRejection::ZeroQuantity));
        }

        {
            let mut book = self.positions.write().await;
            let (can_trade, reason) = self.risk.can_trade().await;
            if !can_trade {
                let reason = reason.unwrap_or_else(|| "halted".to_string());
                return Ok(OpenOutcome::Rejected(OpenRejection::Halted(reason)));
            }
            if book.open.contains_key(&signal.ticker)
                || book.pending_entries.contains(&signal.ticker)
            {
                return Ok(OpenOutcome::Rejected(OpenRejection::AlreadyOpen));
            }
            if book.open.len() + book.pending_entries.len() >= self.max_concurrent {
                return Ok(OpenOutcome::Rejected(OpenRejection::MaxPositions));
            }
            book.pending_entries.insert(signal.ticker.clone());
        }

        let submitted = self
            .router
            .submit_entry(&signal.ticker, quantity, signal.signal_price)
            .await;
        let broker_fill = match submitted {
            Ok(fill) => fill,
            Err(e) => {
                self.positions
                    .write()
                    .await
                    .pending_entries
                    .remove(&signal.ticker);
                return Err(e).with_context(|| format!("failed to open {}", signal.ticker));
            }
        };

        let position = Position::new(
            signal.ticker.clone(),
            broker_fill.price,
            now,
            broker_fill.quantity,
            broker_fill.commission,
            self.stop_loss_pct,
        );
        let entry_fill = Fill::buy(
            signal.ticker.clone(),
            broker_fill.price,
            broker_fill.quantity,
            broker_fill.commission,
            now,
        );

        // Settle under the same lock the halt flatten reads. Either the
        // insert lands before the flatten snapshot and gets flattened with
        // the rest, or the halt flag is already visible here and the fill
        // is unwound instead of inserted.
        let halt_reason = {
            let mut book = self.positions.write().await;
            book.pending_entries.remove(&signal.ticker);
            let (can_trade, reason) = self.risk.can_trade().await;
            if can_trade {
                book.open.insert(signal.ticker.clone(), position.clone());
                None
            } else {
                Some(reason.unwrap_or_else(|| "halted".to_string()))
            }
        };
        self.risk.record_fill(&entry_fill).await;

        if let Some(halt_reason) = halt_reason {
            let exit = self
                .unwind_entry(signal, &broker_fill, &position, &halt_reason, now)
                .await;
            return Ok(OpenOutcome::Unwound {
                entry: entry_fill,
                exit,
            });
        }

        info!(
            ticker = %signal.ticker,
            price = %broker_fill.price,
            quantity = %broker_fill.quantity,
            pattern = signal.pattern_kind.as_str(),
            "position opened"
        );

        Ok(OpenOutcome::Opened {
            position,
            fill: entry_fill,
        })
    }

    /// A halt landed while the entry order was in flight, so the fill must
    /// not stand: sell it straight back at the fill price. If the counter
    /// order also fails, park the position as a pending exit so the next
    /// sample for the ticker retries it.
    async fn unwind_entry(
        &self,
        signal: &EntrySignal,
        broker_fill: &BrokerFill,
        position: &Position,
        halt_reason: &str,
        now: DateTime<Utc>,
    ) -> Option<Fill> {
        let reason = if halt_reason.starts_with("kill switch") {
            ExitReason::KillSwitch
        } else {
            ExitReason::DailyLossLimit
        };
        warn!(
            ticker = %signal.ticker,
            halt = %halt_reason,
            "session halted while entry was in flight, unwinding fill"
        );

        let counter = self
            .router
            .submit_exit(&signal.ticker, broker_fill.quantity, broker_fill.price)
            .await;
        match counter {
            Ok(exit_fill) => {
                let fill = Fill::sell(
                    signal.ticker.clone(),
                    broker_fill.price,
                    exit_fill.price,
                    broker_fill.quantity,
                    broker_fill.commission,
                    exit_fill.commission,
                    reason,
                    now,
                );
                self.risk.record_fill(&fill).await;
                self.cooldowns.start_cooldown(&signal.ticker, now).await;
                Some(fill)
            }
            Err(e) => {
                error!(
                    ticker = %signal.ticker,
                    error = %e,
                    "unwind exit failed, parking position for retry"
                );
                let mut parked = position.clone();
                parked.status = PositionStatus::ExitPending;
                parked.pending_exit = Some(reason);
                self.positions
                    .write()
                    .await
                    .open
                    .insert(signal.ticker.clone(), parked);
                None
            }
        }
    }

    /// Run a price sample through the exit ladder for that ticker's position.
    /// Positions with an exit already in flight are left untouched; returns
    /// `None` when there is nothing open to evaluate.
    pub async fn on_price(
        &self,
        ticker: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Evaluation> {
        let mut book = self.positions.write().await;
        let position = book.open.get_mut(ticker)?;
        if position.status != PositionStatus::Open {
            return None;
        }
        Some(self.exit_engine.evaluate(position, price, now))
    }

    /// Submit the exit leg and settle the position. On submission failure the
    /// position stays marked `ExitPending` with its reason recorded, so the
    /// next sample for that ticker retries instead of re-running the ladder.
    pub async fn close_position(
        &self,
        ticker: &str,
        exit_price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Fill> {
        let snapshot = {
            let mut book = self.positions.write().await;
            let position = book
                .open
                .get_mut(ticker)
                .ok_or_else(|| anyhow!("no open position for {ticker}"))?;
            position.status = PositionStatus::ExitPending;
            position.pending_exit = Some(reason);
            position.clone()
        };

        let broker_fill = self
            .router
            .submit_exit(ticker, snapshot.quantity, exit_price)
            .await?;

        let fill = Fill::sell(
            snapshot.ticker.clone(),
            snapshot.entry_price,
            broker_fill.price,
            snapshot.quantity,
            snapshot.entry_commission,
            broker_fill.commission,
            reason,
            now,
        );

        self.positions.write().await.open.remove(ticker);
        self.risk.record_fill(&fill).await;
        self.cooldowns.start_cooldown(ticker, now).await;

        info!(
            ticker = %ticker,
            exit_price = %broker_fill.price,
            reason = reason.as_str(),
            realized_pnl = %fill.realized_pnl.unwrap_or_default(),
            "position closed"
        );

        Ok(fill)
    }

    /// Retry a previously failed exit at the current price, never below the
    /// locked floor. No-op unless the position is actually `ExitPending`.
    pub async fn retry_pending_exit(
        &self,
        ticker: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Fill>> {
        let (reason, floor) = {
            let book = self.positions.read().await;
            match book.open.get(ticker) {
                Some(p) if p.status == PositionStatus::ExitPending => match p.pending_exit {
                    Some(reason) => (reason, p.locked_floor),
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        };

        warn!(ticker = %ticker, reason = reason.as_str(), "retrying stuck exit");
        let exit_price = price.max(floor);
        self.close_position(ticker, exit_price, reason, now)
            .await
            .map(Some)
    }

    /// Flatten everything, logging and continuing past per-ticker failures so
    /// one bad ticker cannot leave the rest of the book open. Tickers with no
    /// known last price fall back to their locked floor.
    pub async fn close_all(
        &self,
        reason: ExitReason,
        last_prices: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> Vec<Fill> {
        let tickers: Vec<(String, Decimal)> = {
            let book = self.positions.read().await;
            book.open
                .iter()
                .map(|(t, p)| {
                    let price = last_prices.get(t).copied().unwrap_or(p.locked_floor);
                    (t.clone(), price)
                })
                .collect()
        };

        let mut fills = Vec::with_capacity(tickers.len());
        for (ticker, price) in tickers {
            match self.close_position(&ticker, price, reason, now).await {
                Ok(fill) => fills.push(fill),
                Err(e) => {
                    error!(ticker = %ticker, error = %e, "close-all failed for ticker");
                }
            }
        }
        fills
    }

    pub async fn position(&self, ticker: &str) -> Option<Position> {
        self.positions.read().await.open.get(ticker).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions.read().await.open.values().cloned().collect()
    }

    pub async fn open_count(&self) -> usize {
        self.positions.read().await.open.len()
    }

    /// Unrealized P&L across the book at the supplied last prices. Tickers
    /// without a price contribute zero rather than a stale guess.
    pub async fn unrealized_pnl(&self, last_prices: &HashMap<String, Decimal>) -> Decimal {
        let book = self.positions.read().await;
        book.open
            .values()
            .filter_map(|p| last_prices.get(&p.ticker).map(|price| p.unrealized_pnl(*price)))
            .sum()
    }
}
