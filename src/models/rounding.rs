//! Fixed rounding rules for money and percentage arithmetic.
//!
//! Every price and P&L figure is rounded to the cent before it is compared,
//! stored, or summed; percentage ratios are rounded to six decimal places
//! before threshold comparison. Applying one rule everywhere keeps the
//! milestone and floor thresholds from flapping on representation noise.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round a monetary amount to the cent.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a percentage ratio (e.g. 0.0075 for +0.75%) to six decimal places.
pub fn round_pct(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
}
