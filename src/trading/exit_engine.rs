//! Tiered milestone / dead-zone exit state machine.
//!
//! For each open position, every subsequent sample for its ticker is run
//! through a fixed evaluation order: stop loss, milestone advancement,
//! target, floor breach, dead-zone timeout. Milestones are one-way and the
//! locked floor never decreases; a position terminates through exactly one
//! of the four exit paths.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::ExitConfig;
use crate::models::{round_money, round_pct, ExitReason, Position};

/// Profit milestone tiers, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    T1,
    Cross,
    Momentum,
}

impl Milestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::T1 => "T1",
            Milestone::Cross => "CROSS",
            Milestone::Momentum => "momentum",
        }
    }
}

/// A decided exit: the price to sell at and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDecision {
    pub price: Decimal,
    pub reason: ExitReason,
}

/// Result of evaluating one sample against one position.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Milestones newly reached on this sample, in order
    pub milestones: Vec<Milestone>,

    /// Terminal exit, if any
    pub exit: Option<ExitDecision>,
}

pub struct ExitEngine {
    config: ExitConfig,
}

impl ExitEngine {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    /// Evaluate one price observation. Mutates the position's milestone
    /// state and floor; never closes anything itself, the caller acts on
    /// the decision.
    pub fn evaluate(&self, position: &mut Position, price: Decimal, now: DateTime<Utc>) -> Evaluation {
        let cfg = &self.config;
        let pct = position.pnl_pct(price);
        let mut result = Evaluation::default();

        // 1. Stop loss: immediate, at the stop price.
        if pct <= -cfg.stop_loss_pct {
            result.exit = Some(ExitDecision {
                price: round_money(position.entry_price * (Decimal::ONE - cfg.stop_loss_pct)),
                reason: ExitReason::StopLoss,
            });
            return result;
        }

        // 2. Milestone advancement: one-way, possibly several in one sample.
        if !position.milestones.reached_t1 && pct >= cfg.t1_pct {
            position.milestones.reached_t1 = true;
            position.milestones.t1_at = Some(now);
            position.raise_floor(position.entry_price * (Decimal::ONE + cfg.t1_pct));
            position.milestones.level_anchor = position.locked_floor;
            position.milestones.level_since = now;
            result.milestones.push(Milestone::T1);
        }
        if position.milestones.reached_t1 && !position.milestones.reached_cross && pct >= cfg.cross_pct {
            position.milestones.reached_cross = true;
            position.milestones.cross_at = Some(now);
            position.raise_floor(position.entry_price * (Decimal::ONE + cfg.cross_pct));
            position.milestones.level_anchor = position.locked_floor;
            position.milestones.level_since = now;
            result.milestones.push(Milestone::Cross);
        }
        if position.milestones.reached_cross
            && !position.milestones.reached_momentum
            && pct >= cfg.momentum_pct
        {
            // Momentum permits pursuit of the target; floor stays at CROSS.
            position.milestones.reached_momentum = true;
            position.milestones.momentum_at = Some(now);
            position.milestones.level_since = now;
            result.milestones.push(Milestone::Momentum);
        }
        let advanced = !result.milestones.is_empty();
        if advanced {
            debug!(
                ticker = %position.ticker,
                pct = %pct,
                floor = %position.locked_floor,
                "milestone advanced"
            );
        }

        // 3. Target: the designed win, only after momentum confirmation.
        if position.milestones.reached_momentum && pct >= cfg.target_pct {
            result.exit = Some(ExitDecision {
                price: round_money(position.entry_price * (Decimal::ONE + cfg.target_pct)),
                reason: ExitReason::Target,
            });
            return result;
        }

        // 4. Floor breach: lock in the best-reached milestone. Skipped on
        // the sample that advanced a milestone, which by construction sits
        // at or above the floor it just locked.
        if !advanced && price <= position.locked_floor {
            let reason = if position.milestones.reached_momentum {
                ExitReason::MomentumReturn
            } else if position.milestones.reached_cross {
                ExitReason::CrossReturn
            } else if position.milestones.reached_t1 {
                ExitReason::T1Return
            } else {
                // Floor below T1 is the stop price; step 1 already fired.
                ExitReason::StopLoss
            };
            result.exit = Some(ExitDecision { price: position.locked_floor, reason });
            return result;
        }

        // 5. Dead-zone timeout: time spent inside the band around the
        // current level, with tier-dependent thresholds.
        let anchor = position.milestones.level_anchor;
        let distance = if anchor.is_zero() {
            Decimal::ZERO
        } else {
            round_pct((price - anchor).abs() / anchor)
        };
        if distance > cfg.dead_zone_band_pct {
            // Price moved to a new level; anchor there and restart the
            // timer, otherwise a stall away from the old anchor would
            // reset forever and never time out.
            position.milestones.level_anchor = price;
            position.milestones.level_since = now;
            return result;
        }

        let (threshold, reason) = if position.milestones.reached_momentum {
            (cfg.dead_zone_momentum_secs, ExitReason::DeadZoneMomentum)
        } else if position.milestones.reached_cross {
            (cfg.dead_zone_cross_secs, ExitReason::DeadZoneCross)
        } else if position.milestones.reached_t1 {
            (cfg.dead_zone_t1_secs, ExitReason::DeadZoneT1)
        } else {
            (cfg.dead_zone_below_t1_secs, ExitReason::DeadZoneBelowT1)
        };

        if position.milestones.seconds_at_level(now) >= threshold {
            // At or above T1 the floor is profitable, so take the better of
            // floor and current price. Below T1 exit at the current price,
            // win or lose, rather than waiting indefinitely.
            let price = if position.milestones.reached_t1 {
                price.max(position.locked_floor)
            } else {
                price
            };
            result.exit = Some(ExitDecision { price, reason });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn engine() -> ExitEngine {
        ExitEngine::new(ExitConfig::default())
    }

    fn position(entry: Decimal, at: DateTime<Utc>) -> Position {
        Position::new("ACME".to_string(), entry, at, dec!(100), dec!(0.50), dec!(0.005))
    }

    #[test]
    fn test_scenario_a_full_success() {
        // entry 150.00 -> T1 -> CROSS -> momentum -> target at 152.63
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(150.00), t0);

        let eval = engine.evaluate(&mut pos, dec!(151.13), t0 + Duration::seconds(10));
        assert_eq!(eval.milestones, vec![Milestone::T1]);
        assert!(eval.exit.is_none());
        assert_eq!(pos.locked_floor, dec!(151.13));

        let eval = engine.evaluate(&mut pos, dec!(151.50), t0 + Duration::seconds(20));
        assert_eq!(eval.milestones, vec![Milestone::Cross]);
        assert_eq!(pos.locked_floor, dec!(151.50));

        let eval = engine.evaluate(&mut pos, dec!(151.88), t0 + Duration::seconds(30));
        assert_eq!(eval.milestones, vec![Milestone::Momentum]);
        assert_eq!(pos.locked_floor, dec!(151.50)); // momentum leaves the floor

        let eval = engine.evaluate(&mut pos, dec!(152.63), t0 + Duration::seconds(40));
        let exit = eval.exit.expect("target exit");
        assert_eq!(exit.reason, ExitReason::Target);
        assert_eq!(exit.price, dec!(152.63));
    }

    #[test]
    fn test_scenario_b_floor_return_at_cross() {
        // entry 100.00, CROSS locks 101.00, fall to 100.99 exits at 101.00
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        engine.evaluate(&mut pos, dec!(100.75), t0 + Duration::seconds(10));
        engine.evaluate(&mut pos, dec!(101.00), t0 + Duration::seconds(20));
        assert!(pos.milestones.reached_cross);
        assert_eq!(pos.locked_floor, dec!(101.00));

        let eval = engine.evaluate(&mut pos, dec!(100.99), t0 + Duration::seconds(30));
        let exit = eval.exit.expect("floor return");
        assert_eq!(exit.reason, ExitReason::CrossReturn);
        assert_eq!(exit.price, dec!(101.00));
    }

    #[test]
    fn test_scenario_c_dead_zone_below_t1() {
        // oscillates 99.9-100.3 around a 100.00 entry for 3 minutes
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        let prices = [dec!(100.10), dec!(99.90), dec!(100.30), dec!(100.00)];
        for (i, price) in prices.iter().enumerate() {
            let eval = engine.evaluate(&mut pos, *price, t0 + Duration::seconds(30 * (i as i64 + 1)));
            assert!(eval.exit.is_none(), "no exit before the timeout");
        }

        let eval = engine.evaluate(&mut pos, dec!(100.05), t0 + Duration::seconds(181));
        let exit = eval.exit.expect("dead-zone exit");
        assert_eq!(exit.reason, ExitReason::DeadZoneBelowT1);
        assert_eq!(exit.price, dec!(100.05)); // current price
    }

    #[test]
    fn test_scenario_d_stop_loss() {
        // entry 100.00, sample at 99.49 (-0.51%) exits at the 99.50 stop
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        let eval = engine.evaluate(&mut pos, dec!(99.49), t0 + Duration::seconds(10));
        let exit = eval.exit.expect("stop loss");
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.price, dec!(99.50));
    }

    #[test]
    fn test_milestone_ordering_is_enforced() {
        // A jump straight to +1.1% reaches T1 and CROSS together, but a
        // fresh position can never reach momentum without CROSS.
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        let eval = engine.evaluate(&mut pos, dec!(101.10), t0 + Duration::seconds(10));
        assert_eq!(eval.milestones, vec![Milestone::T1, Milestone::Cross]);
        assert!(pos.milestones.reached_t1);
        assert!(pos.milestones.reached_cross);
        assert!(!pos.milestones.reached_momentum);
        assert_eq!(pos.locked_floor, dec!(101.00));
    }

    #[test]
    fn test_no_target_without_momentum() {
        // +1.75% in one jump from entry: T1/CROSS/momentum all advance on
        // this sample, so the target fires too -- but momentum is required.
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        let eval = engine.evaluate(&mut pos, dec!(101.75), t0 + Duration::seconds(10));
        assert_eq!(
            eval.milestones,
            vec![Milestone::T1, Milestone::Cross, Milestone::Momentum]
        );
        let exit = eval.exit.expect("target");
        assert_eq!(exit.reason, ExitReason::Target);
        assert_eq!(exit.price, dec!(101.75));
    }

    #[test]
    fn test_floor_is_monotone_through_pullbacks() {
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        engine.evaluate(&mut pos, dec!(100.80), t0 + Duration::seconds(10));
        let floor_after_t1 = pos.locked_floor;
        assert_eq!(floor_after_t1, dec!(100.75));

        // A pullback that stays above the floor never lowers it
        engine.evaluate(&mut pos, dec!(100.76), t0 + Duration::seconds(20));
        assert_eq!(pos.locked_floor, floor_after_t1);
    }

    #[test]
    fn test_t1_dead_zone_exits_at_floor_when_better() {
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        engine.evaluate(&mut pos, dec!(100.80), t0 + Duration::seconds(10));
        assert!(pos.milestones.reached_t1);

        // Price drifts just above the floor for 4 minutes
        engine.evaluate(&mut pos, dec!(100.78), t0 + Duration::seconds(60));
        let eval = engine.evaluate(&mut pos, dec!(100.73), t0 + Duration::seconds(10 + 241));
        // 100.73 sits below the 100.75 floor; the breach path takes
        // precedence over the dead-zone check and exits at the floor
        if let Some(exit) = eval.exit {
            assert_eq!(exit.reason, ExitReason::T1Return);
            assert_eq!(exit.price, dec!(100.75));
        } else {
            panic!("expected an exit");
        }
    }

    #[test]
    fn test_dead_zone_timer_resets_when_price_moves() {
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        engine.evaluate(&mut pos, dec!(100.10), t0 + Duration::seconds(100));
        // Excursion beyond the band resets the timer
        engine.evaluate(&mut pos, dec!(100.50), t0 + Duration::seconds(170));
        let eval = engine.evaluate(&mut pos, dec!(100.10), t0 + Duration::seconds(200));
        assert!(eval.exit.is_none(), "timer restarted at the excursion");
    }

    #[test]
    fn test_dead_zone_re_anchors_at_the_new_level() {
        // Price steps to +0.5%, outside the band around the entry but
        // below T1, and stalls there. The stall must time out at the new
        // level instead of resetting the timer on every sample.
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        engine.evaluate(&mut pos, dec!(100.50), t0 + Duration::seconds(10));
        assert_eq!(pos.milestones.level_anchor, dec!(100.50));

        let eval = engine.evaluate(&mut pos, dec!(100.52), t0 + Duration::seconds(120));
        assert!(eval.exit.is_none(), "timer runs at the new level");

        let eval = engine.evaluate(&mut pos, dec!(100.48), t0 + Duration::seconds(191));
        let exit = eval.exit.expect("stall below t1 times out");
        assert_eq!(exit.reason, ExitReason::DeadZoneBelowT1);
        assert_eq!(exit.price, dec!(100.48));
    }

    #[test]
    fn test_exit_pct_boundary_is_inclusive() {
        // Exactly -0.50% hits the stop
        let engine = engine();
        let t0 = Utc::now();
        let mut pos = position(dec!(100.00), t0);

        let eval = engine.evaluate(&mut pos, dec!(99.50), t0 + Duration::seconds(5));
        assert_eq!(eval.exit.unwrap().reason, ExitReason::StopLoss);
    }
}
