//! Per-ticker re-entry cooldowns.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Timer map keyed by ticker. Entries are created when a position exits and
/// lazily evicted on check, so the map never grows beyond the ticker
/// universe. Cooldowns gate entries only; exits are never blocked.
pub struct CooldownManager {
    duration: Duration,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownManager {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            duration: Duration::seconds(cooldown_secs),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record an exit; the ticker is blocked until `exit_time + duration`.
    pub async fn start_cooldown(&self, ticker: &str, exit_time: DateTime<Utc>) {
        let until = exit_time + self.duration;
        debug!(ticker = %ticker, until = %until, "cooldown started");
        self.entries.lock().await.insert(ticker.to_string(), until);
    }

    /// True when the ticker may open a new position at `now`.
    pub async fn can_enter(&self, ticker: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(ticker) {
            Some(until) if now < *until => false,
            Some(_) => {
                entries.remove(ticker);
                true
            }
            None => true,
        }
    }

    /// Tickers currently in cooldown (for the query surface).
    pub async fn active(&self, now: DateTime<Utc>) -> Vec<(String, DateTime<Utc>)> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(t, until)| (t.clone(), *until))
            .collect()
    }
}
