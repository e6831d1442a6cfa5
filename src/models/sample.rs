//! Price/volume sample as delivered by the market data feed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One time-stamped price/volume observation for a ticker.
///
/// Samples are immutable and must arrive in timestamp order per ticker;
/// an out-of-order sample is a feed protocol error and is dropped upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    /// Ticker symbol
    pub ticker: String,

    /// When the sample was taken
    pub timestamp: DateTime<Utc>,

    /// Last trade price
    pub price: Decimal,

    /// Volume for the sampling interval
    pub volume: Decimal,

    /// Rolling volume-weighted average price, when the feed supplies one
    #[serde(default)]
    pub vwap: Option<Decimal>,
}

impl PriceSample {
    /// True if the sample carries obviously unusable values.
    pub fn is_malformed(&self) -> bool {
        self.ticker.is_empty() || self.price <= Decimal::ZERO || self.volume < Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_malformed_detection() {
        let good = PriceSample {
            ticker: "ACME".to_string(),
            timestamp: Utc::now(),
            price: dec!(100.00),
            volume: dec!(500),
            vwap: None,
        };
        assert!(!good.is_malformed());

        let bad = PriceSample { price: Decimal::ZERO, ..good.clone() };
        assert!(bad.is_malformed());

        let bad = PriceSample { ticker: String::new(), ..good };
        assert!(bad.is_malformed());
    }
}
