//! Filter presets and the single evaluation function that applies them.
//!
//! Presets are data, not code: each is a record of optional thresholds
//! consumed by [`FilterEngine::evaluate`]. Adding a strategy means adding a
//! record, never branching on a preset name inside the engine.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{round_pct, EntrySignal, PatternKind};

/// Inclusive time-of-day window during which entries are blocked (UTC).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Rolling per-ticker market state the filters evaluate against,
/// maintained by the engine and passed in by value per check.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    /// Trailing average sample volume
    pub trailing_avg_volume: Option<Decimal>,

    /// Simple moving average of recent prices
    pub moving_average: Option<Decimal>,

    /// Known support levels (session low, prior floors)
    pub support_levels: Vec<Decimal>,
}

/// A named, immutable bundle of gating thresholds. `None` disables a check;
/// a preset with every check disabled always passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterPreset {
    pub name: String,

    /// Require |price − VWAP| / VWAP within this band
    pub vwap_band_pct: Option<Decimal>,

    /// Require sample volume ≥ multiplier × trailing average volume
    pub volume_multiplier: Option<Decimal>,

    /// Entries blocked inside these windows
    pub excluded_windows: Vec<TimeWindow>,

    /// Require a support level within this fraction below the signal price
    pub support_tolerance_pct: Option<Decimal>,

    /// Require price at or above the moving average
    pub require_trend_alignment: bool,

    /// Restrict the preset to one pattern family
    pub pattern_kind: Option<PatternKind>,
}

impl FilterPreset {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vwap_band_pct: None,
            volume_multiplier: None,
            excluded_windows: Vec::new(),
            support_tolerance_pct: None,
            require_trend_alignment: false,
            pattern_kind: None,
        }
    }

    /// Unfiltered baseline: every signal passes.
    pub fn baseline() -> Self {
        Self::named("baseline")
    }

    /// Tightly filtered: every gate enabled, open/close auction hours blocked.
    pub fn conservative() -> Self {
        Self {
            vwap_band_pct: Some(dec!(0.002)),
            volume_multiplier: Some(dec!(1.5)),
            excluded_windows: vec![
                TimeWindow {
                    start: NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                },
                TimeWindow {
                    start: NaiveTime::from_hms_opt(19, 30, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                },
            ],
            support_tolerance_pct: Some(dec!(0.005)),
            require_trend_alignment: true,
            ..Self::named("conservative")
        }
    }

    /// Loosely filtered: only a mild volume confirmation.
    pub fn aggressive() -> Self {
        Self {
            volume_multiplier: Some(dec!(1.1)),
            ..Self::named("aggressive")
        }
    }

    /// Support/resistance weighted, for range-bound tape.
    pub fn range_bound() -> Self {
        Self {
            support_tolerance_pct: Some(dec!(0.003)),
            vwap_band_pct: Some(dec!(0.005)),
            ..Self::named("range-bound")
        }
    }

    /// Trend weighted, for directional tape.
    pub fn trend() -> Self {
        Self {
            require_trend_alignment: true,
            volume_multiplier: Some(dec!(1.2)),
            ..Self::named("trend")
        }
    }

    /// Experimental slot; thresholds are meant to be edited between sessions.
    pub fn experimental() -> Self {
        Self {
            volume_multiplier: Some(dec!(1.3)),
            require_trend_alignment: true,
            ..Self::named("experimental")
        }
    }

    /// Variant specific to the VWAP-breakout pattern family.
    pub fn vwap_breakout() -> Self {
        Self {
            pattern_kind: Some(PatternKind::VwapBreakout),
            vwap_band_pct: Some(dec!(0.003)),
            volume_multiplier: Some(dec!(1.2)),
            ..Self::named("vwap-breakout")
        }
    }

    /// All built-in presets.
    pub fn all() -> Vec<FilterPreset> {
        vec![
            Self::baseline(),
            Self::conservative(),
            Self::aggressive(),
            Self::range_bound(),
            Self::trend(),
            Self::experimental(),
            Self::vwap_breakout(),
        ]
    }

    pub fn by_name(name: &str) -> Option<FilterPreset> {
        Self::all().into_iter().find(|p| p.name == name)
    }
}

/// Verdict from the filter engine.
#[derive(Debug, Clone)]
pub struct FilterDecision {
    pub passed: bool,
    pub reason: String,
}

impl FilterDecision {
    fn pass() -> Self {
        Self { passed: true, reason: "all checks passed".to_string() }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self { passed: false, reason: reason.into() }
    }
}

/// Stateless evaluator: one function, any preset.
pub struct FilterEngine;

impl FilterEngine {
    pub fn evaluate(
        signal: &EntrySignal,
        preset: &FilterPreset,
        context: &MarketContext,
    ) -> FilterDecision {
        if let Some(kind) = preset.pattern_kind {
            if signal.pattern_kind != kind {
                return FilterDecision::reject(format!(
                    "preset applies to {} patterns only",
                    kind.as_str()
                ));
            }
        }

        let time_of_day = signal.timestamp.time();
        for window in &preset.excluded_windows {
            if window.contains(time_of_day) {
                return FilterDecision::reject(format!(
                    "inside excluded window {}-{}",
                    window.start, window.end
                ));
            }
        }

        if let Some(band) = preset.vwap_band_pct {
            let Some(vwap) = signal.vwap.filter(|v| !v.is_zero()) else {
                return FilterDecision::reject("vwap check enabled but feed supplied no vwap");
            };
            let distance = round_pct((signal.signal_price - vwap).abs() / vwap);
            if distance > band {
                return FilterDecision::reject(format!(
                    "price {} outside vwap band ({} > {})",
                    signal.signal_price, distance, band
                ));
            }
        }

        if let Some(multiplier) = preset.volume_multiplier {
            let Some(avg) = context.trailing_avg_volume.filter(|v| !v.is_zero()) else {
                return FilterDecision::reject("volume check enabled but no trailing average yet");
            };
            let required = avg * multiplier;
            if signal.volume < required {
                return FilterDecision::reject(format!(
                    "volume {} below {} x trailing average {}",
                    signal.volume, multiplier, avg
                ));
            }
        }

        if let Some(tolerance) = preset.support_tolerance_pct {
            let near_support = context.support_levels.iter().any(|level| {
                *level <= signal.signal_price
                    && !level.is_zero()
                    && round_pct((signal.signal_price - level) / level) <= tolerance
            });
            if !near_support {
                return FilterDecision::reject(format!(
                    "no support level within {} below price",
                    tolerance
                ));
            }
        }

        if preset.require_trend_alignment {
            let Some(ma) = context.moving_average else {
                return FilterDecision::reject("trend check enabled but no moving average yet");
            };
            if signal.signal_price < ma {
                return FilterDecision::reject(format!(
                    "price {} below moving average {}",
                    signal.signal_price, ma
                ));
            }
        }

        FilterDecision::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn signal(kind: PatternKind) -> EntrySignal {
        EntrySignal {
            ticker: "ACME".to_string(),
            pattern_kind: kind,
            reference_price: dec!(100.00),
            signal_price: dec!(100.50),
            volume: dec!(2000),
            vwap: Some(dec!(100.40)),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 15, 30, 0).unwrap(),
        }
    }

    fn context() -> MarketContext {
        MarketContext {
            trailing_avg_volume: Some(dec!(1000)),
            moving_average: Some(dec!(100.10)),
            support_levels: vec![dec!(100.30)],
        }
    }

    #[test]
    fn test_baseline_always_passes() {
        let decision = FilterEngine::evaluate(
            &signal(PatternKind::GeometricReversal),
            &FilterPreset::baseline(),
            &MarketContext::default(),
        );
        assert!(decision.passed);
    }

    #[test]
    fn test_conservative_passes_clean_signal() {
        let decision = FilterEngine::evaluate(
            &signal(PatternKind::GeometricReversal),
            &FilterPreset::conservative(),
            &context(),
        );
        assert!(decision.passed, "{}", decision.reason);
    }

    #[test]
    fn test_volume_gate() {
        let mut s = signal(PatternKind::GeometricReversal);
        s.volume = dec!(1200); // below 1.5x of 1000
        let decision = FilterEngine::evaluate(&s, &FilterPreset::conservative(), &context());
        assert!(!decision.passed);
        assert!(decision.reason.contains("volume"));
    }

    #[test]
    fn test_vwap_band_requires_vwap() {
        let mut s = signal(PatternKind::GeometricReversal);
        s.vwap = None;
        let decision = FilterEngine::evaluate(&s, &FilterPreset::range_bound(), &context());
        assert!(!decision.passed);
        assert!(decision.reason.contains("vwap"));
    }

    #[test]
    fn test_time_window_exclusion() {
        let mut s = signal(PatternKind::GeometricReversal);
        s.timestamp = Utc.with_ymd_and_hms(2026, 3, 2, 13, 45, 0).unwrap();
        let decision = FilterEngine::evaluate(&s, &FilterPreset::conservative(), &context());
        assert!(!decision.passed);
        assert!(decision.reason.contains("excluded window"));
    }

    #[test]
    fn test_trend_gate() {
        let mut ctx = context();
        ctx.moving_average = Some(dec!(101.00)); // price below MA
        let decision =
            FilterEngine::evaluate(&signal(PatternKind::GeometricReversal), &FilterPreset::trend(), &ctx);
        assert!(!decision.passed);
        assert!(decision.reason.contains("moving average"));
    }

    #[test]
    fn test_support_gate() {
        let mut ctx = context();
        ctx.support_levels = vec![dec!(95.00)]; // too far below
        let decision = FilterEngine::evaluate(
            &signal(PatternKind::GeometricReversal),
            &FilterPreset::range_bound(),
            &ctx,
        );
        assert!(!decision.passed);
        assert!(decision.reason.contains("support"));
    }

    #[test]
    fn test_pattern_kind_restriction() {
        let decision = FilterEngine::evaluate(
            &signal(PatternKind::GeometricReversal),
            &FilterPreset::vwap_breakout(),
            &context(),
        );
        assert!(!decision.passed);

        let decision = FilterEngine::evaluate(
            &signal(PatternKind::VwapBreakout),
            &FilterPreset::vwap_breakout(),
            &context(),
        );
        assert!(decision.passed, "{}", decision.reason);
    }

    #[test]
    fn test_seven_presets_exist_with_unique_names() {
        let presets = FilterPreset::all();
        assert_eq!(presets.len(), 7);
        let mut names: Vec<_> = presets.iter().map(|p| p.name.clone()).collect();
        names.dedup();
        assert_eq!(names.len(), 7);
        assert!(FilterPreset::by_name("vwap-breakout").is_some());
        assert!(FilterPreset::by_name("nonexistent").is_none());
    }
}
