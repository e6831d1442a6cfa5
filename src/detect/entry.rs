//! Entry confirmation: watch a completed pattern for the confirmation climb.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{round_money, EntrySignal, Pattern, PriceSample};

/// Outcome of checking one sample against an armed pattern.
#[derive(Debug, Clone)]
pub enum EntryCheck {
    /// Confirmation reached; the pattern is consumed
    Signal(EntrySignal),
    /// Price made a new low below the reference; pattern discarded
    Invalidated,
    /// Confirmation window elapsed; pattern discarded
    Expired,
    /// Keep watching
    Pending,
}

/// Watches one completed pattern and emits at most one entry signal.
pub struct EntrySignalDetector {
    pattern: Pattern,
    trigger_price: Decimal,
    expires_at: DateTime<Utc>,
}

impl EntrySignalDetector {
    pub fn arm(pattern: Pattern, confirmation_pct: Decimal, window_secs: i64) -> Self {
        let trigger_price =
            round_money(pattern.reference_low * (Decimal::ONE + confirmation_pct));
        let expires_at = pattern.detected_at + Duration::seconds(window_secs);
        debug!(
            ticker = %pattern.ticker,
            kind = pattern.kind.as_str(),
            trigger = %trigger_price,
            "entry confirmation armed"
        );
        Self { pattern, trigger_price, expires_at }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Check one sample. `Signal`, `Invalidated`, and `Expired` all consume
    /// the pattern; the caller drops the detector on anything but `Pending`.
    pub fn on_sample(&self, sample: &PriceSample) -> EntryCheck {
        if sample.timestamp > self.expires_at {
            return EntryCheck::Expired;
        }
        if sample.price < self.pattern.reference_low {
            return EntryCheck::Invalidated;
        }
        if sample.price >= self.trigger_price {
            return EntryCheck::Signal(EntrySignal {
                ticker: self.pattern.ticker.clone(),
                pattern_kind: self.pattern.kind,
                reference_price: self.pattern.reference_low,
                signal_price: sample.price,
                volume: sample.volume,
                vwap: sample.vwap,
                timestamp: sample.timestamp,
            });
        }
        EntryCheck::Pending
    }
}
