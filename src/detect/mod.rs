//! Pattern detection: geometric reversal, VWAP breakout, entry confirmation.

mod entry;
mod reversal;
mod vwap;

pub use entry::{EntryCheck, EntrySignalDetector};
pub use reversal::GeometricReversalDetector;
pub use vwap::VwapBreakoutDetector;
