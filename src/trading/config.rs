//! Session, detector, and exit-ladder configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Thresholds for the pattern and entry detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Decline from the rolling high that completes reversal stage 1
    pub decline_pct: Decimal,

    /// Fraction of the decline price must recover for stage 2
    pub recovery_frac: Decimal,

    /// Fraction of the recovery price must retrace for stage 3
    pub retrace_frac: Decimal,

    /// Samples price must stabilize below VWAP before a breakout counts
    pub vwap_min_samples_below: usize,

    /// Maximum oscillation range (as a fraction of VWAP) during stabilization
    pub vwap_oscillation_pct: Decimal,

    /// Climb above the reference low that confirms an entry
    pub confirmation_pct: Decimal,

    /// Seconds a completed pattern stays armed before it is discarded
    pub entry_window_secs: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            decline_pct: dec!(0.01),          // 1.0% decline
            recovery_frac: dec!(0.5),
            retrace_frac: dec!(0.5),
            vwap_min_samples_below: 5,
            vwap_oscillation_pct: dec!(0.005), // 0.5% band
            confirmation_pct: dec!(0.005),     // 0.5% climb
            entry_window_secs: 600,
        }
    }
}

/// Thresholds for the milestone exit ladder and dead-zone timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    pub stop_loss_pct: Decimal,
    pub t1_pct: Decimal,
    pub cross_pct: Decimal,
    pub momentum_pct: Decimal,
    pub target_pct: Decimal,

    /// Half-width of the dead-zone band around the current level
    pub dead_zone_band_pct: Decimal,

    /// Dead-zone timeouts, escalating with progress
    pub dead_zone_below_t1_secs: i64,
    pub dead_zone_t1_secs: i64,
    pub dead_zone_cross_secs: i64,
    pub dead_zone_momentum_secs: i64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(0.005),   // -0.50%
            t1_pct: dec!(0.0075),         // +0.75%
            cross_pct: dec!(0.01),        // +1.00%
            momentum_pct: dec!(0.0125),   // +1.25%
            target_pct: dec!(0.0175),     // +1.75%
            dead_zone_band_pct: dec!(0.003),
            dead_zone_below_t1_secs: 180, // 3 minutes
            dead_zone_t1_secs: 240,       // 4 minutes
            dead_zone_cross_secs: 240,    // 4 minutes
            dead_zone_momentum_secs: 360, // 6 minutes
        }
    }
}

/// Per-session configuration, supplied once at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capital the loss limit is measured against
    pub starting_capital: Decimal,

    /// Fraction of starting capital deployed across positions
    pub deployed_capital_pct: Decimal,

    /// Equal-weight divisor for position sizing
    pub target_position_count: u32,

    /// Hard cap on simultaneously open positions
    pub max_concurrent_positions: usize,

    /// Daily loss limit as a fraction of starting capital
    pub loss_limit_pct: Decimal,

    /// Re-entry block after an exit, per ticker
    pub cooldown_secs: i64,

    /// A ticker with no sample for this long is excluded from new entries
    pub staleness_secs: i64,

    /// Commission charged per share by the (paper) gateway
    pub commission_per_share: Decimal,

    /// Name of the active filter preset
    pub preset: String,

    /// Ticker universe for the session (from the external ranking feed)
    pub tickers: Vec<String>,

    pub detector: DetectorConfig,
    pub exit: ExitConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            starting_capital: dec!(50000),
            deployed_capital_pct: dec!(1.0),
            target_position_count: 5,
            max_concurrent_positions: 5,
            loss_limit_pct: dec!(0.015), // halt at -1.5%
            cooldown_secs: 60,
            staleness_secs: 30,
            commission_per_share: dec!(0.005),
            preset: "baseline".to_string(),
            tickers: Vec::new(),
            detector: DetectorConfig::default(),
            exit: ExitConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Capital available for deployment across the session's positions.
    pub fn deployed_capital(&self) -> Decimal {
        self.starting_capital * self.deployed_capital_pct
    }

    /// Equal-weight allocation per position.
    pub fn allocation_per_position(&self) -> Decimal {
        if self.target_position_count == 0 {
            return Decimal::ZERO;
        }
        self.deployed_capital() / Decimal::from(self.target_position_count)
    }

    /// Absolute daily loss limit (positive number).
    pub fn daily_loss_limit(&self) -> Decimal {
        self.starting_capital * self.loss_limit_pct
    }

    /// Apply environment overrides (loaded via dotenvy in main).
    pub fn apply_env(&mut self) {
        if let Some(v) = env_decimal("ENGINE_STARTING_CAPITAL") {
            self.starting_capital = v;
        }
        if let Some(v) = env_decimal("ENGINE_LOSS_LIMIT_PCT") {
            self.loss_limit_pct = v;
        }
        if let Some(v) = env_decimal("ENGINE_COMMISSION_PER_SHARE") {
            self.commission_per_share = v;
        }
        if let Ok(v) = std::env::var("ENGINE_PRESET") {
            if !v.is_empty() {
                self.preset = v;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_COOLDOWN_SECS") {
            if let Ok(secs) = v.parse() {
                self.cooldown_secs = secs;
            }
        }
    }
}

fn env_decimal(key: &str) -> Option<Decimal> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_weight_allocation() {
        let config = SessionConfig::default();
        // 50,000 deployed across 5 slots
        assert_eq!(config.allocation_per_position(), dec!(10000));
        assert_eq!(config.daily_loss_limit(), dec!(750.000));
    }

    #[test]
    fn test_zero_target_count_is_safe() {
        let config = SessionConfig { target_position_count: 0, ..Default::default() };
        assert_eq!(config.allocation_per_position(), Decimal::ZERO);
    }
}
