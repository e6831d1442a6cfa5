//! Broker gateway seam: order submission, retry policy, paper simulation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::{round_money, FillAction};

/// Execution report from the gateway.
#[derive(Debug, Clone)]
pub struct BrokerFill {
    pub order_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// The one operation the engine needs from a broker. Implementations must
/// be safe to call from any ticker worker; submission latency is theirs to
/// bound (target < 100ms observed).
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn submit_order(
        &self,
        ticker: &str,
        side: FillAction,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Result<BrokerFill>;
}

/// Retry wrapper around a gateway. Entry orders get a short, bounded retry
/// budget (a missed entry is a lost opportunity); exit orders retry much
/// harder because an un-exitable position is a capital-risk condition.
pub struct OrderRouter {
    gateway: Arc<dyn BrokerGateway>,
    entry_budget: Duration,
    exit_budget: Duration,
}

impl OrderRouter {
    pub fn new(gateway: Arc<dyn BrokerGateway>) -> Self {
        Self {
            gateway,
            entry_budget: Duration::from_secs(2),
            exit_budget: Duration::from_secs(30),
        }
    }

    pub async fn submit_entry(
        &self,
        ticker: &str,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Result<BrokerFill> {
        self.submit_with_budget(ticker, FillAction::Buy, quantity, limit_price, self.entry_budget)
            .await
            .context("entry order submission failed")
    }

    pub async fn submit_exit(
        &self,
        ticker: &str,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Result<BrokerFill> {
        let result = self
            .submit_with_budget(ticker, FillAction::Sell, quantity, limit_price, self.exit_budget)
            .await;
        if let Err(ref e) = result {
            error!(ticker = %ticker, error = %e, "exit order exhausted its retry budget");
        }
        result.context("exit order submission failed")
    }

    async fn submit_with_budget(
        &self,
        ticker: &str,
        side: FillAction,
        quantity: Decimal,
        limit_price: Decimal,
        budget: Duration,
    ) -> Result<BrokerFill> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(500),
            max_elapsed_time: Some(budget),
            ..Default::default()
        };

        backoff::future::retry(policy, || async {
            self.gateway
                .submit_order(ticker, side, quantity, limit_price)
                .await
                .map_err(|e| {
                    warn!(ticker = %ticker, side = side.as_str(), error = %e, "order submission retry");
                    backoff::Error::transient(e)
                })
        })
        .await
    }
}

/// Deterministic simulated gateway: fills at the requested price with a
/// flat per-share commission. The in-repo default for replay and paper
/// sessions.
pub struct PaperBroker {
    commission_per_share: Decimal,
    submissions: AtomicU32,
    fail_next: AtomicBool,
}

impl PaperBroker {
    pub fn new(commission_per_share: Decimal) -> Self {
        Self {
            commission_per_share,
            submissions: AtomicU32::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Total orders accepted this session.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Test hook: make the next submission attempt fail once.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn submit_order(
        &self,
        ticker: &str,
        _side: FillAction,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Result<BrokerFill> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("simulated submission failure for {ticker}"));
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(BrokerFill {
            order_id: Uuid::new_v4().to_string(),
            price: limit_price,
            quantity,
            commission: round_money(self.commission_per_share * quantity),
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_broker_fills_at_limit() {
        let broker = PaperBroker::new(dec!(0.005));
        let fill = broker
            .submit_order("ACME", FillAction::Buy, dec!(100), dec!(50.25))
            .await
            .unwrap();

        assert_eq!(fill.price, dec!(50.25));
        assert_eq!(fill.quantity, dec!(100));
        assert_eq!(fill.commission, dec!(0.50));
        assert_eq!(broker.submissions(), 1);
    }

    #[tokio::test]
    async fn test_router_retries_transient_failure() {
        let broker = Arc::new(PaperBroker::new(dec!(0.005)));
        broker.fail_next();
        let router = OrderRouter::new(broker.clone());

        // First attempt fails, backoff retries, second succeeds
        let fill = router.submit_exit("ACME", dec!(10), dec!(99.50)).await.unwrap();
        assert_eq!(fill.price, dec!(99.50));
        assert_eq!(broker.submissions(), 1);
    }
}
