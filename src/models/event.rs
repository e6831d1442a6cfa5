//! System events emitted to the observability/persistence sink.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExitReason, PatternKind};

/// Everything notable the engine does, as one serializable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SystemEvent {
    PatternDetected {
        ticker: String,
        pattern: PatternKind,
        reference_low: Decimal,
        at: DateTime<Utc>,
    },
    EntrySignal {
        ticker: String,
        pattern: PatternKind,
        signal_price: Decimal,
        at: DateTime<Utc>,
    },
    FilterRejected {
        ticker: String,
        preset: String,
        reason: String,
        at: DateTime<Utc>,
    },
    PositionOpened {
        ticker: String,
        price: Decimal,
        quantity: Decimal,
        at: DateTime<Utc>,
    },
    MilestoneReached {
        ticker: String,
        milestone: String,
        locked_floor: Decimal,
        at: DateTime<Utc>,
    },
    PositionClosed {
        ticker: String,
        price: Decimal,
        reason: ExitReason,
        realized_pnl: Decimal,
        at: DateTime<Utc>,
    },
    Halted {
        reason: String,
        daily_realized_pnl: Decimal,
        at: DateTime<Utc>,
    },
    KillSwitch {
        at: DateTime<Utc>,
    },
    FeedDegraded {
        ticker: String,
        stale_for_secs: i64,
        at: DateTime<Utc>,
    },
    ExitStuck {
        ticker: String,
        error: String,
        at: DateTime<Utc>,
    },
}

impl SystemEvent {
    /// Short label used as the event-table discriminator.
    pub fn label(&self) -> &'static str {
        match self {
            SystemEvent::PatternDetected { .. } => "pattern-detected",
            SystemEvent::EntrySignal { .. } => "entry-signal",
            SystemEvent::FilterRejected { .. } => "filter-rejected",
            SystemEvent::PositionOpened { .. } => "position-opened",
            SystemEvent::MilestoneReached { .. } => "milestone-reached",
            SystemEvent::PositionClosed { .. } => "position-closed",
            SystemEvent::Halted { .. } => "halted",
            SystemEvent::KillSwitch { .. } => "kill-switch",
            SystemEvent::FeedDegraded { .. } => "feed-degraded",
            SystemEvent::ExitStuck { .. } => "exit-stuck",
        }
    }

    /// True for events that signal a capital-risk condition.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            SystemEvent::Halted { .. } | SystemEvent::KillSwitch { .. } | SystemEvent::ExitStuck { .. }
        )
    }
}
