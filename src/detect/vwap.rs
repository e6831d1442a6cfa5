//! VWAP breakout detector: stabilize below VWAP, then cross back above it.

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{round_pct, Pattern, PatternKind, PriceSample};
use crate::trading::DetectorConfig;

#[derive(Debug, Clone)]
enum VwapStage {
    /// At/above VWAP, or VWAP unavailable
    Idle,
    /// Below VWAP, counting stabilization samples and tracking the range
    Below {
        samples: usize,
        range_low: Decimal,
        range_high: Decimal,
    },
}

/// Per-ticker VWAP breakout state machine.
///
/// Requires the feed to supply the rolling VWAP; with no VWAP field the
/// detector stays idle. Oscillation below VWAP must stay inside the
/// configured band for the stabilization count to accumulate.
pub struct VwapBreakoutDetector {
    ticker: String,
    config: DetectorConfig,
    stage: VwapStage,
}

impl VwapBreakoutDetector {
    pub fn new(ticker: String, config: DetectorConfig) -> Self {
        Self {
            ticker,
            config,
            stage: VwapStage::Idle,
        }
    }

    /// Advance the state machine with one sample.
    pub fn on_sample(&mut self, sample: &PriceSample) -> Option<Pattern> {
        let Some(vwap) = sample.vwap else {
            self.stage = VwapStage::Idle;
            return None;
        };
        if vwap.is_zero() {
            self.stage = VwapStage::Idle;
            return None;
        }
        let price = sample.price;

        match self.stage.clone() {
            VwapStage::Idle => {
                if price < vwap {
                    self.stage = VwapStage::Below {
                        samples: 1,
                        range_low: price,
                        range_high: price,
                    };
                }
                None
            }

            VwapStage::Below { samples, range_low, range_high } => {
                if price >= vwap {
                    self.stage = VwapStage::Idle;
                    if samples >= self.config.vwap_min_samples_below {
                        // Cross point fixes the reference low
                        debug!(
                            ticker = %self.ticker,
                            vwap = %vwap,
                            cross = %price,
                            "vwap breakout completed"
                        );
                        return Some(Pattern {
                            ticker: self.ticker.clone(),
                            kind: PatternKind::VwapBreakout,
                            reference_high: vwap,
                            reference_low: price,
                            detected_at: sample.timestamp,
                        });
                    }
                    // Crossed before stabilizing; no pattern
                    return None;
                }

                let range_low = range_low.min(price);
                let range_high = range_high.max(price);
                let oscillation = round_pct((range_high - range_low) / vwap);

                if oscillation > self.config.vwap_oscillation_pct {
                    // Range too wide to call it stabilization; restart the
                    // count from the current sample
                    self.stage = VwapStage::Below {
                        samples: 1,
                        range_low: price,
                        range_high: price,
                    };
                } else {
                    self.stage = VwapStage::Below {
                        samples: samples + 1,
                        range_low,
                        range_high,
                    };
                }
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

    fn sample(price: Decimal, vwap: Decimal) -> PriceSample {
        PriceSample {
            ticker: "ACME".to_string(),
            timestamp: Utc::now(),
            price,
            volume: dec!(1000),
            vwap: Some(vwap),
        }
    }

    fn detector() -> VwapBreakoutDetector {
        VwapBreakoutDetector::new("ACME".to_string(), DetectorConfig::default())
    }

    #[test]
    fn test_breakout_after_stabilization() {
        let mut det = detector();
        let vwap = dec!(100.00);

        // Five tight samples below VWAP, then a cross back above.
        for price in [dec!(99.80), dec!(99.70), dec!(99.75), dec!(99.72), dec!(99.78)] {
            assert!(det.on_sample(&sample(price, vwap)).is_none());
        }
        let pattern = det.on_sample(&sample(dec!(100.05), vwap)).expect("pattern");

        assert_eq!(pattern.kind, PatternKind::VwapBreakout);
        assert_eq!(pattern.reference_low, dec!(100.05));
        assert_eq!(pattern.reference_high, vwap);
    }

    #[test]
    fn test_cross_without_stabilization_is_ignored() {
        let mut det = detector();
        let vwap = dec!(100.00);

        det.on_sample(&sample(dec!(99.80), vwap));
        det.on_sample(&sample(dec!(99.75), vwap));
        // Only two samples below; the cross yields nothing
        assert!(det.on_sample(&sample(dec!(100.10), vwap)).is_none());
    }

    #[test]
    fn test_wide_oscillation_restarts_count() {
        let mut det = detector();
        let vwap = dec!(100.00);

        det.on_sample(&sample(dec!(99.80), vwap));
        det.on_sample(&sample(dec!(99.70), vwap));
        // 99.80 -> 99.10 is a 0.7% range, beyond the 0.5% band
        det.on_sample(&sample(dec!(99.10), vwap));
        det.on_sample(&sample(dec!(99.15), vwap));
        // Count restarted at the wide sample; still too few on cross
        assert!(det.on_sample(&sample(dec!(100.02), vwap)).is_none());
    }

    #[test]
    fn test_idle_without_vwap() {
        let mut det = detector();
        let s = PriceSample {
            ticker: "ACME".to_string(),
            timestamp: Utc::now(),
            price: dec!(99.00),
            volume: dec!(1000),
            vwap: None,
        };
        assert!(det.on_sample(&s).is_none());
        assert!(det.on_sample(&s).is_none());
    }
}
