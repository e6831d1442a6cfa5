//! Entry signal: a confirmed pattern ready to become a trade.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PatternKind;

/// Emitted once price climbs the confirmation percentage above a completed
/// pattern's reference low. Immutable; consumed by the filter engine and
/// position manager in the same processing step, or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySignal {
    pub ticker: String,

    /// Pattern family that produced the signal
    pub pattern_kind: PatternKind,

    /// The pattern's fixed reference low
    pub reference_price: Decimal,

    /// Price at the confirming sample
    pub signal_price: Decimal,

    /// Volume at the confirming sample (consumed by volume filters)
    pub volume: Decimal,

    /// VWAP at the confirming sample, when the feed supplied one
    pub vwap: Option<Decimal>,

    pub timestamp: DateTime<Utc>,
}
