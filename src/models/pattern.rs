//! Completed price patterns emitted by the detectors.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Family of pattern that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    /// Decline from a rolling high, 50% recovery, 50% retrace
    GeometricReversal,
    /// Stabilization below VWAP followed by a cross back above it
    VwapBreakout,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::GeometricReversal => "geometric-reversal",
            PatternKind::VwapBreakout => "vwap-breakout",
        }
    }
}

/// A completed pattern: the reference low is fixed and the candidate is
/// ready for entry confirmation. In-progress stage tracking lives inside
/// the detectors; only completed patterns escape them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub ticker: String,
    pub kind: PatternKind,

    /// Rolling high the pattern formed against
    pub reference_high: Decimal,

    /// Fixed low / cross point the entry confirmation measures from
    pub reference_low: Decimal,

    /// When stage tracking completed
    pub detected_at: DateTime<Utc>,
}
