//! Trading core: configuration, entry filtering, risk, and position lifecycle.

pub mod config;
pub mod cooldown;
pub mod exit_engine;
pub mod filters;
pub mod position_manager;
pub mod risk;

pub use config::{DetectorConfig, ExitConfig, SessionConfig};
pub use cooldown::CooldownManager;
pub use exit_engine::{Evaluation, ExitDecision, ExitEngine, Milestone};
pub use filters::{FilterEngine, FilterPreset, MarketContext};
pub use position_manager::{OpenOutcome, PositionManager};
pub use risk::{RiskManager, RiskStatus};
