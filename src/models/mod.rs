//! Data models for samples, patterns, signals, positions, and fills.

mod event;
mod fill;
mod pattern;
mod position;
mod rounding;
mod sample;
mod signal;

pub use event::SystemEvent;
pub use fill::{ExitReason, Fill, FillAction};
pub use pattern::{Pattern, PatternKind};
pub use position::{MilestoneState, Position, PositionStatus};
pub use rounding::{round_money, round_pct};
pub use sample::PriceSample;
pub use signal::EntrySignal;
