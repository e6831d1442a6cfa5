//! Engine runner: session orchestration over a price-sample feed.
//!
//! Handles:
//! - Fanning samples out to one worker per ticker
//! - Pattern detection, entry confirmation, and filter gating
//! - Exit-ladder monitoring for open positions
//! - Daily-loss halt and kill-switch flattening
//! - Persisting fills and events for the audit trail

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerGateway, OrderRouter};
use crate::db::Database;
use crate::detect::{EntryCheck, EntrySignalDetector, GeometricReversalDetector, VwapBreakoutDetector};
use crate::metrics::{MetricsCalculator, SessionMetrics};
use crate::models::{EntrySignal, ExitReason, Fill, PositionStatus, PriceSample, SystemEvent};
use crate::trading::{
    CooldownManager, FilterEngine, FilterPreset, MarketContext, OpenOutcome, PositionManager,
    RiskManager, SessionConfig,
};

/// Samples retained for the trailing volume and moving-average windows.
const CONTEXT_WINDOW: usize = 20;

/// State shared between the runner and every ticker worker.
struct EngineShared {
    config: SessionConfig,
    risk: Arc<RiskManager>,
    positions: Arc<PositionManager>,
    preset: RwLock<FilterPreset>,
    db: Option<Database>,

    /// Latest sample timestamp seen on any ticker; the staleness reference
    feed_clock: RwLock<Option<DateTime<Utc>>>,

    /// Last price per ticker, for unrealized P&L and forced flattening
    last_prices: RwLock<HashMap<String, Decimal>>,
}

impl EngineShared {
    /// Log an event and append it to the audit trail. Persistence failure is
    /// logged and swallowed; the trading path never stops for the database.
    async fn record_event(&self, event: SystemEvent) {
        if event.is_critical() {
            warn!(event = event.label(), "critical system event");
        } else {
            debug!(event = event.label(), "system event");
        }
        if let Some(db) = &self.db {
            if let Err(e) = db.save_event(&event).await {
                error!(error = %e, "failed to persist event");
            }
        }
    }

    async fn record_fill(&self, fill: &Fill) {
        if let Some(db) = &self.db {
            if let Err(e) = db.save_fill(fill).await {
                error!(error = %e, "failed to persist fill");
            }
        }
    }

    /// Settle a completed close: audit trail plus the daily-loss check. When
    /// this close is the one that breaches the limit, flatten everything else.
    async fn after_close(&self, fill: &Fill, now: DateTime<Utc>) {
        self.record_event(SystemEvent::PositionClosed {
            ticker: fill.ticker.clone(),
            price: fill.price,
            reason: fill.exit_reason.unwrap_or(ExitReason::Shutdown),
            realized_pnl: fill.realized_pnl.unwrap_or_default(),
            at: now,
        })
        .await;
        self.record_fill(fill).await;

        if self.risk.check_daily_loss_limit().await {
            let status = self.risk.status().await;
            self.record_event(SystemEvent::Halted {
                reason: status
                    .halt_reason
                    .unwrap_or_else(|| "daily loss limit".to_string()),
                daily_realized_pnl: status.daily_realized_pnl,
                at: now,
            })
            .await;
            self.flatten(ExitReason::DailyLossLimit, now).await;
        }
    }

    /// Close every open position at the last known prices.
    async fn flatten(&self, reason: ExitReason, now: DateTime<Utc>) {
        let last = self.last_prices.read().await.clone();
        let fills = self.positions.close_all(reason, &last, now).await;
        for fill in &fills {
            self.record_event(SystemEvent::PositionClosed {
                ticker: fill.ticker.clone(),
                price: fill.price,
                reason,
                realized_pnl: fill.realized_pnl.unwrap_or_default(),
                at: now,
            })
            .await;
            self.record_fill(fill).await;
        }
    }
}

/// Per-ticker detection and monitoring state. Each worker owns its ticker's
/// samples exclusively, so detector state needs no locking.
struct TickerWorker {
    ticker: String,
    shared: Arc<EngineShared>,
    reversal: GeometricReversalDetector,
    vwap: VwapBreakoutDetector,
    armed: Option<EntrySignalDetector>,
    volumes: Vec<Decimal>,
    prices: Vec<Decimal>,
    session_low: Option<Decimal>,
    last_seen: Option<DateTime<Utc>>,
}

impl TickerWorker {
    fn new(ticker: String, shared: Arc<EngineShared>) -> Self {
        let detector_config = shared.config.detector.clone();
        Self {
            reversal: GeometricReversalDetector::new(ticker.clone(), detector_config.clone()),
            vwap: VwapBreakoutDetector::new(ticker.clone(), detector_config),
            armed: None,
            volumes: Vec::new(),
            prices: Vec::new(),
            session_low: None,
            last_seen: None,
            ticker,
            shared,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PriceSample>) {
        while let Some(sample) = rx.recv().await {
            self.process(sample).await;
        }
        debug!(ticker = %self.ticker, "ticker worker stopped");
    }

    async fn process(&mut self, sample: PriceSample) {
        // Out-of-order samples are dropped rather than rewound through the
        // detector state machines.
        if let Some(last) = self.last_seen {
            if sample.timestamp < last {
                warn!(
                    ticker = %self.ticker,
                    at = %sample.timestamp,
                    last = %last,
                    "out-of-order sample dropped"
                );
                return;
            }
        }
        self.last_seen = Some(sample.timestamp);

        if let Some(position) = self.shared.positions.position(&self.ticker).await {
            if position.status == PositionStatus::ExitPending {
                self.retry_stuck_exit(&sample).await;
            } else {
                self.monitor_position(&sample).await;
            }
            return;
        }

        self.update_context(&sample);
        self.detect(&sample).await;
    }

    async fn retry_stuck_exit(&mut self, sample: &PriceSample) {
        let result = self
            .shared
            .positions
            .retry_pending_exit(&self.ticker, sample.price, sample.timestamp)
            .await;
        match result {
            Ok(Some(fill)) => self.shared.after_close(&fill, sample.timestamp).await,
            Ok(None) => {}
            Err(e) => {
                self.shared
                    .record_event(SystemEvent::ExitStuck {
                        ticker: self.ticker.clone(),
                        error: e.to_string(),
                        at: sample.timestamp,
                    })
                    .await;
            }
        }
    }

    async fn monitor_position(&mut self, sample: &PriceSample) {
        let Some(evaluation) = self
            .shared
            .positions
            .on_price(&self.ticker, sample.price, sample.timestamp)
            .await
        else {
            return;
        };

        if !evaluation.milestones.is_empty() {
            let floor = self
                .shared
                .positions
                .position(&self.ticker)
                .await
                .map(|p| p.locked_floor)
                .unwrap_or_default();
            for milestone in &evaluation.milestones {
                info!(
                    ticker = %self.ticker,
                    milestone = milestone.as_str(),
                    floor = %floor,
                    "milestone reached"
                );
                self.shared
                    .record_event(SystemEvent::MilestoneReached {
                        ticker: self.ticker.clone(),
                        milestone: milestone.as_str().to_string(),
                        locked_floor: floor,
                        at: sample.timestamp,
                    })
                    .await;
            }
        }

        if let Some(exit) = evaluation.exit {
            let result = self
                .shared
                .positions
                .close_position(&self.ticker, exit.price, exit.reason, sample.timestamp)
                .await;
            match result {
                Ok(fill) => self.shared.after_close(&fill, sample.timestamp).await,
                Err(e) => {
                    error!(ticker = %self.ticker, error = %e, "exit submission failed");
                    self.shared
                        .record_event(SystemEvent::ExitStuck {
                            ticker: self.ticker.clone(),
                            error: e.to_string(),
                            at: sample.timestamp,
                        })
                        .await;
                }
            }
        }
    }

    fn update_context(&mut self, sample: &PriceSample) {
        self.volumes.push(sample.volume);
        if self.volumes.len() > CONTEXT_WINDOW {
            self.volumes.remove(0);
        }
        self.prices.push(sample.price);
        if self.prices.len() > CONTEXT_WINDOW {
            self.prices.remove(0);
        }
        self.session_low = Some(match self.session_low {
            Some(low) => low.min(sample.price),
            None => sample.price,
        });
    }

    fn context(&self) -> MarketContext {
        let avg = |values: &[Decimal]| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u32))
            }
        };
        MarketContext {
            trailing_avg_volume: avg(&self.volumes),
            moving_average: avg(&self.prices),
            support_levels: self.session_low.into_iter().collect(),
        }
    }

    async fn detect(&mut self, sample: &PriceSample) {
        if let Some(armed) = &self.armed {
            match armed.on_sample(sample) {
                EntryCheck::Pending => return,
                EntryCheck::Expired => {
                    debug!(ticker = %self.ticker, "armed pattern expired");
                    self.armed = None;
                    return;
                }
                EntryCheck::Invalidated => {
                    debug!(ticker = %self.ticker, "armed pattern invalidated by new low");
                    self.armed = None;
                    return;
                }
                EntryCheck::Signal(signal) => {
                    self.armed = None;
                    self.handle_signal(signal, sample).await;
                    return;
                }
            }
        }

        let pattern = self
            .reversal
            .on_sample(sample)
            .or_else(|| self.vwap.on_sample(sample));
        if let Some(pattern) = pattern {
            info!(
                ticker = %self.ticker,
                kind = pattern.kind.as_str(),
                reference_low = %pattern.reference_low,
                "pattern detected"
            );
            self.shared
                .record_event(SystemEvent::PatternDetected {
                    ticker: self.ticker.clone(),
                    pattern: pattern.kind,
                    reference_low: pattern.reference_low,
                    at: pattern.detected_at,
                })
                .await;
            self.armed = Some(EntrySignalDetector::arm(
                pattern,
                self.shared.config.detector.confirmation_pct,
                self.shared.config.detector.entry_window_secs,
            ));
        }
    }

    async fn handle_signal(&mut self, signal: EntrySignal, sample: &PriceSample) {
        // A ticker lagging the rest of the feed trades on stale prices;
        // block the entry and flag the feed instead.
        if let Some(clock) = *self.shared.feed_clock.read().await {
            let lag = (clock - sample.timestamp).num_seconds();
            if lag > self.shared.config.staleness_secs {
                warn!(ticker = %self.ticker, lag_secs = lag, "stale ticker, entry blocked");
                self.shared
                    .record_event(SystemEvent::FeedDegraded {
                        ticker: self.ticker.clone(),
                        stale_for_secs: lag,
                        at: sample.timestamp,
                    })
                    .await;
                return;
            }
        }

        let preset = self.shared.preset.read().await.clone();
        let decision = FilterEngine::evaluate(&signal, &preset, &self.context());
        if !decision.passed {
            let reason = decision.reason;
            info!(ticker = %self.ticker, preset = %preset.name, reason = %reason, "entry filtered");
            self.shared
                .record_event(SystemEvent::FilterRejected {
                    ticker: self.ticker.clone(),
                    preset: preset.name,
                    reason,
                    at: sample.timestamp,
                })
                .await;
            return;
        }

        self.shared
            .record_event(SystemEvent::EntrySignal {
                ticker: self.ticker.clone(),
                pattern: signal.pattern_kind,
                signal_price: signal.signal_price,
                at: sample.timestamp,
            })
            .await;

        let outcome = self
            .shared
            .positions
            .open(&signal, None, sample.timestamp)
            .await;
        match outcome {
            Ok(OpenOutcome::Opened { position, fill }) => {
                self.shared
                    .record_event(SystemEvent::PositionOpened {
                        ticker: self.ticker.clone(),
                        price: position.entry_price,
                        quantity: position.quantity,
                        at: sample.timestamp,
                    })
                    .await;
                self.shared.record_fill(&fill).await;
            }
            Ok(OpenOutcome::Unwound { entry, exit }) => {
                warn!(ticker = %self.ticker, "entry unwound, session halted mid-flight");
                self.shared.record_fill(&entry).await;
                if let Some(exit) = exit {
                    self.shared.record_fill(&exit).await;
                }
            }
            Ok(OpenOutcome::Rejected(rejection)) => {
                debug!(ticker = %self.ticker, reason = rejection.as_str(), "entry rejected");
            }
            Err(e) => {
                warn!(ticker = %self.ticker, error = %e, "entry submission failed");
            }
        }
    }
}

/// Session engine: consumes a sample feed, drives the workers, and owns the
/// halt and shutdown paths.
pub struct Engine {
    shared: Arc<EngineShared>,
    kill: Arc<AtomicBool>,
    workers: HashMap<String, mpsc::Sender<PriceSample>>,
    handles: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        config: SessionConfig,
        gateway: Arc<dyn BrokerGateway>,
        db: Option<Database>,
    ) -> Result<Self> {
        let Some(preset) = FilterPreset::by_name(&config.preset) else {
            bail!("unknown filter preset '{}'", config.preset);
        };

        let risk = Arc::new(RiskManager::new(config.starting_capital, config.loss_limit_pct));
        let cooldowns = Arc::new(CooldownManager::new(config.cooldown_secs));
        let router = Arc::new(OrderRouter::new(gateway));
        let positions = Arc::new(PositionManager::new(
            &config,
            risk.clone(),
            cooldowns,
            router,
        ));

        let shared = Arc::new(EngineShared {
            config,
            risk,
            positions,
            preset: RwLock::new(preset),
            db,
            feed_clock: RwLock::new(None),
            last_prices: RwLock::new(HashMap::new()),
        });

        Ok(Self {
            shared,
            kill: Arc::new(AtomicBool::new(false)),
            workers: HashMap::new(),
            handles: Vec::new(),
        })
    }

    /// Kill-switch flag for external control (signal handlers, tests).
    pub fn kill_switch(&self) -> Arc<AtomicBool> {
        self.kill.clone()
    }

    /// Swap the active filter preset mid-session. Applies to the next entry
    /// decision; open positions are unaffected.
    pub async fn switch_preset(&self, name: &str) -> Result<()> {
        let Some(preset) = FilterPreset::by_name(name) else {
            bail!("unknown filter preset '{name}'");
        };
        info!(preset = %name, "filter preset switched");
        *self.shared.preset.write().await = preset;
        Ok(())
    }

    pub async fn risk_status(&self) -> crate::trading::RiskStatus {
        self.shared.risk.status().await
    }

    pub async fn open_positions(&self) -> Vec<crate::models::Position> {
        self.shared.positions.open_positions().await
    }

    /// Current session metrics from the fill ledger plus open-book P&L.
    pub async fn metrics(&self) -> SessionMetrics {
        let fills = self.shared.risk.fills().await;
        let last = self.shared.last_prices.read().await.clone();
        let unrealized = self.shared.positions.unrealized_pnl(&last).await;
        MetricsCalculator::calculate(&fills, unrealized)
    }

    /// Consume the feed until it ends or the kill switch fires, then flatten
    /// and return the final session metrics.
    pub async fn run(&mut self, mut feed: mpsc::Receiver<PriceSample>) -> Result<SessionMetrics> {
        info!(
            preset = %self.shared.config.preset,
            capital = %self.shared.config.starting_capital,
            tickers = self.shared.config.tickers.len(),
            "session started"
        );

        let kill = self.kill.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            kill.store(true, Ordering::SeqCst);
        });

        let mut poll = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                sample = feed.recv() => match sample {
                    Some(sample) => self.dispatch(sample).await,
                    None => {
                        info!("feed ended");
                        break;
                    }
                },
                _ = poll.tick() => {}
            }

            if self.kill.load(Ordering::SeqCst) {
                self.trigger_kill_switch().await;
                break;
            }
        }

        self.finish().await
    }

    /// Route one sample to its ticker worker, spawning the worker on first
    /// contact. Malformed samples never reach a worker.
    pub async fn dispatch(&mut self, sample: PriceSample) {
        if sample.is_malformed() {
            warn!(ticker = %sample.ticker, price = %sample.price, "malformed sample dropped");
            return;
        }

        // An empty universe accepts every ticker the feed carries.
        let universe = &self.shared.config.tickers;
        if !universe.is_empty() && !universe.contains(&sample.ticker) {
            debug!(ticker = %sample.ticker, "sample outside session universe ignored");
            return;
        }

        {
            let mut clock = self.shared.feed_clock.write().await;
            if clock.map_or(true, |c| sample.timestamp > c) {
                *clock = Some(sample.timestamp);
            }
        }
        self.shared
            .last_prices
            .write()
            .await
            .insert(sample.ticker.clone(), sample.price);

        let sender = match self.workers.get(&sample.ticker) {
            Some(tx) => tx.clone(),
            None => {
                let (tx, rx) = mpsc::channel(256);
                let worker = TickerWorker::new(sample.ticker.clone(), self.shared.clone());
                self.handles.push(tokio::spawn(worker.run(rx)));
                self.workers.insert(sample.ticker.clone(), tx.clone());
                tx
            }
        };

        if sender.send(sample).await.is_err() {
            error!("ticker worker channel closed unexpectedly");
        }
    }

    async fn trigger_kill_switch(&self) {
        if !self.shared.risk.activate_kill_switch().await {
            return;
        }
        let now = self.now().await;
        self.shared
            .record_event(SystemEvent::KillSwitch { at: now })
            .await;
        self.shared.flatten(ExitReason::KillSwitch, now).await;
    }

    /// Drain the workers, flatten whatever is still open, and produce the
    /// final metrics snapshot.
    pub async fn finish(&mut self) -> Result<SessionMetrics> {
        self.workers.clear();
        for handle in self.handles.drain(..) {
            handle.await.ok();
        }

        let now = self.now().await;
        self.shared.flatten(ExitReason::Shutdown, now).await;

        let metrics = self.metrics().await;
        let status = self.shared.risk.status().await;
        if let Some(db) = &self.shared.db {
            db.save_session_summary(&metrics, status.is_halted, status.halt_reason.as_deref())
                .await?;
        }

        info!(
            trades = metrics.total_trades,
            realized_pnl = %metrics.realized_pnl,
            halted = status.is_halted,
            "session finished"
        );
        Ok(metrics)
    }

    /// Feed time when samples have flowed, wall clock before the first one.
    async fn now(&self) -> DateTime<Utc> {
        self.shared.feed_clock.read().await.unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample(ticker: &str, price: Decimal, secs: i64) -> PriceSample {
        PriceSample {
            ticker: ticker.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
                + chrono::Duration::seconds(secs),
            price,
            volume: dec!(10000),
            vwap: None,
        }
    }

    fn engine() -> Engine {
        let config = SessionConfig::default();
        let gateway = Arc::new(PaperBroker::new(config.commission_per_share));
        Engine::new(config, gateway, None).unwrap()
    }

    async fn drive(engine: &mut Engine, samples: Vec<PriceSample>) {
        for s in samples {
            engine.dispatch(s).await;
        }
        // Close worker channels and let them drain
        engine.workers.clear();
        for handle in engine.handles.drain(..) {
            handle.await.ok();
        }
    }

    #[tokio::test]
    async fn test_unknown_preset_rejected() {
        let config = SessionConfig {
            preset: "no-such-preset".to_string(),
            ..SessionConfig::default()
        };
        let gateway = Arc::new(PaperBroker::new(dec!(0.005)));
        assert!(Engine::new(config, gateway, None).is_err());
    }

    #[tokio::test]
    async fn test_reversal_pattern_opens_position() {
        let mut engine = engine();

        // High 100, decline to 99 (-1%), recover to 99.50, retrace to 99.25,
        // then confirm +0.5% above the 99.25 reference: trigger 99.75.
        let samples = vec![
            sample("ACME", dec!(100), 0),
            sample("ACME", dec!(99), 10),
            sample("ACME", dec!(99.50), 20),
            sample("ACME", dec!(99.25), 30),
            sample("ACME", dec!(99.80), 40),
        ];
        drive(&mut engine, samples).await;

        let positions = engine.open_positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].ticker, "ACME");
        assert_eq!(positions[0].entry_price, dec!(99.80));
    }

    #[tokio::test]
    async fn test_malformed_sample_ignored() {
        let mut engine = engine();
        drive(&mut engine, vec![sample("ACME", dec!(-5), 0)]).await;
        assert!(engine.shared.last_prices.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_loss_round_trip() {
        let mut engine = engine();

        let mut samples = vec![
            sample("ACME", dec!(100), 0),
            sample("ACME", dec!(99), 10),
            sample("ACME", dec!(99.50), 20),
            sample("ACME", dec!(99.25), 30),
            sample("ACME", dec!(99.80), 40),
        ];
        // Entry at 99.80; stop at 99.80 * 0.995 = 99.301
        samples.push(sample("ACME", dec!(99.25), 50));
        drive(&mut engine, samples).await;

        assert!(engine.open_positions().await.is_empty());
        let metrics = engine.metrics().await;
        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(
            metrics.exits_by_reason.get("stop-loss"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_kill_switch_flattens_book() {
        let mut engine = engine();

        let samples = vec![
            sample("ACME", dec!(100), 0),
            sample("ACME", dec!(99), 10),
            sample("ACME", dec!(99.50), 20),
            sample("ACME", dec!(99.25), 30),
            sample("ACME", dec!(99.80), 40),
        ];
        drive(&mut engine, samples).await;
        assert_eq!(engine.open_positions().await.len(), 1);

        engine.trigger_kill_switch().await;
        assert!(engine.open_positions().await.is_empty());
        assert!(engine.risk_status().await.is_halted);

        let metrics = engine.metrics().await;
        assert_eq!(metrics.exits_by_reason.get("kill-switch"), Some(&1));
    }

    #[tokio::test]
    async fn test_preset_switch_validates_name() {
        let engine = engine();
        assert!(engine.switch_preset("conservative").await.is_ok());
        assert!(engine.switch_preset("bogus").await.is_err());
    }
}
