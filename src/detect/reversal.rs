//! Geometric reversal detector: decline, half recovery, half retrace.

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{round_pct, Pattern, PatternKind, PriceSample};
use crate::trading::DetectorConfig;

/// Stage tracking for one ticker. A new rolling high at any stage supersedes
/// the pattern and restarts tracking from that high.
#[derive(Debug, Clone)]
enum Stage {
    /// Stage 0: riding the rolling reference high
    TrackingHigh { high: Decimal },
    /// Stage 1 complete: declined the configured percentage; low still moving
    Declined { high: Decimal, low: Decimal },
    /// Stage 2 complete: recovered half the decline; tracking the recovery peak
    Recovered { high: Decimal, low: Decimal, peak: Decimal },
}

/// Per-ticker geometric reversal state machine.
///
/// Emits at most one completed [`Pattern`] per sample and never blocks.
pub struct GeometricReversalDetector {
    ticker: String,
    config: DetectorConfig,
    stage: Stage,
}

impl GeometricReversalDetector {
    pub fn new(ticker: String, config: DetectorConfig) -> Self {
        Self {
            ticker,
            config,
            stage: Stage::TrackingHigh { high: Decimal::ZERO },
        }
    }

    /// Advance the state machine with one sample.
    pub fn on_sample(&mut self, sample: &PriceSample) -> Option<Pattern> {
        let price = sample.price;

        match self.stage.clone() {
            Stage::TrackingHigh { high } => {
                let high = high.max(price);
                let decline = if high.is_zero() {
                    Decimal::ZERO
                } else {
                    round_pct((high - price) / high)
                };
                if decline >= self.config.decline_pct {
                    debug!(ticker = %self.ticker, high = %high, low = %price, "reversal stage 1");
                    self.stage = Stage::Declined { high, low: price };
                } else {
                    self.stage = Stage::TrackingHigh { high };
                }
                None
            }

            Stage::Declined { high, low } => {
                if price > high {
                    // New extreme supersedes the pattern
                    self.stage = Stage::TrackingHigh { high: price };
                    return None;
                }
                let low = low.min(price);
                let recovery_target = low + (high - low) * self.config.recovery_frac;
                if price >= recovery_target {
                    debug!(ticker = %self.ticker, peak = %price, "reversal stage 2");
                    self.stage = Stage::Recovered { high, low, peak: price };
                } else {
                    self.stage = Stage::Declined { high, low };
                }
                None
            }

            Stage::Recovered { high, low, peak } => {
                if price > high {
                    self.stage = Stage::TrackingHigh { high: price };
                    return None;
                }
                if price < low {
                    // Recovery failed; the lower low restarts stage 1 tracking
                    self.stage = Stage::Declined { high, low: price };
                    return None;
                }
                let peak = peak.max(price);
                let retrace_target = peak - (peak - low) * self.config.retrace_frac;
                if price <= retrace_target {
                    // Stage 3: retrace fixes the final reference low
                    debug!(
                        ticker = %self.ticker,
                        reference_low = %price,
                        "reversal pattern completed"
                    );
                    self.stage = Stage::TrackingHigh { high };
                    return Some(Pattern {
                        ticker: self.ticker.clone(),
                        kind: PatternKind::GeometricReversal,
                        reference_high: high,
                        reference_low: price,
                        detected_at: sample.timestamp,
                    });
                }
                self.stage = Stage::Recovered { high, low, peak };
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample(price: Decimal) -> PriceSample {
        PriceSample {
            ticker: "ACME".to_string(),
            timestamp: Utc::now(),
            price,
            volume: dec!(1000),
            vwap: None,
        }
    }

    fn detector() -> GeometricReversalDetector {
        GeometricReversalDetector::new("ACME".to_string(), DetectorConfig::default())
    }

    #[test]
    fn test_full_three_stage_completion() {
        let mut det = detector();

        // High at 100, decline 1% to 99 (stage 1), recover half to 99.50
        // (stage 2), retrace half of recovery to 99.25 (stage 3).
        assert!(det.on_sample(&sample(dec!(100.00))).is_none());
        assert!(det.on_sample(&sample(dec!(99.00))).is_none());
        assert!(det.on_sample(&sample(dec!(99.50))).is_none());
        let pattern = det.on_sample(&sample(dec!(99.25))).expect("pattern");

        assert_eq!(pattern.kind, PatternKind::GeometricReversal);
        assert_eq!(pattern.reference_high, dec!(100.00));
        assert_eq!(pattern.reference_low, dec!(99.25));
    }

    #[test]
    fn test_new_high_supersedes_pattern() {
        let mut det = detector();

        det.on_sample(&sample(dec!(100.00)));
        det.on_sample(&sample(dec!(99.00))); // stage 1
        // New extreme above the reference high restarts tracking
        assert!(det.on_sample(&sample(dec!(101.00))).is_none());
        // The old low no longer counts; a fresh 1% decline is needed
        assert!(det.on_sample(&sample(dec!(100.50))).is_none());
        assert!(det.on_sample(&sample(dec!(99.95))).is_none()); // stage 1 from 101
    }

    #[test]
    fn test_lower_low_restarts_recovery() {
        let mut det = detector();

        det.on_sample(&sample(dec!(100.00)));
        det.on_sample(&sample(dec!(99.00))); // stage 1, low 99
        det.on_sample(&sample(dec!(99.50))); // stage 2
        // Falling below the recorded low drops back to stage 1
        assert!(det.on_sample(&sample(dec!(98.80))).is_none());
        // Recovery must now clear half of (100 - 98.80)
        assert!(det.on_sample(&sample(dec!(99.30))).is_none());
        assert!(det.on_sample(&sample(dec!(99.40))).is_none()); // stage 2 at 99.40
        let pattern = det.on_sample(&sample(dec!(99.10))).expect("pattern");
        assert_eq!(pattern.reference_low, dec!(99.10));
    }

    #[test]
    fn test_no_pattern_without_decline() {
        let mut det = detector();
        for price in [dec!(100.00), dec!(100.10), dec!(99.80), dec!(100.20)] {
            assert!(det.on_sample(&sample(price)).is_none());
        }
    }
}
