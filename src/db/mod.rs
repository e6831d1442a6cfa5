//! Database persistence for the session audit trail.
//!
//! Stores everything needed to reconstruct a session after the fact:
//! - Every fill (buys and sells, with realized P&L on sells)
//! - Every system event (patterns, signals, rejections, halts)
//! - End-of-session summary rows

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::metrics::SessionMetrics;
use crate::models::{Fill, SystemEvent};

/// Database connection pool for the audit trail.
pub struct Database {
    pool: SqlitePool,
}

/// Stored fill record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredFill {
    pub id: i64,
    pub ticker: String,
    pub action: String,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub realized_pnl: Option<f64>,
    pub exit_reason: Option<String>,
    pub executed_at: String,
}

/// Stored system event record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredEvent {
    pub id: i64,
    pub label: String,
    pub is_critical: bool,
    pub payload: String,
    pub recorded_at: String,
}

/// End-of-session summary row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSessionSummary {
    pub id: i64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_commission: f64,
    pub sharpe_ratio: f64,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub recorded_at: String,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                action TEXT NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL,
                commission REAL NOT NULL,
                realized_pnl REAL,
                exit_reason TEXT,
                executed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                is_critical INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                total_trades INTEGER NOT NULL,
                winning_trades INTEGER NOT NULL,
                losing_trades INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                unrealized_pnl REAL NOT NULL,
                total_commission REAL NOT NULL,
                sharpe_ratio REAL NOT NULL,
                halted INTEGER NOT NULL DEFAULT 0,
                halt_reason TEXT,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fills_ticker ON fills(ticker)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_label ON events(label)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Fills ====================

    /// Append a fill to the audit trail.
    pub async fn save_fill(&self, fill: &Fill) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fills (ticker, action, price, quantity, commission,
                               realized_pnl, exit_reason, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fill.ticker)
        .bind(fill.action.as_str())
        .bind(fill.price.to_f64().unwrap_or(0.0))
        .bind(fill.quantity.to_f64().unwrap_or(0.0))
        .bind(fill.commission.to_f64().unwrap_or(0.0))
        .bind(fill.realized_pnl.and_then(|p| p.to_f64()))
        .bind(fill.exit_reason.map(|r| r.as_str()))
        .bind(fill.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All fills in execution order.
    pub async fn get_fills(&self) -> Result<Vec<StoredFill>> {
        sqlx::query_as::<_, StoredFill>("SELECT * FROM fills ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load fills")
    }

    /// Fills for one ticker, in execution order.
    pub async fn get_fills_for_ticker(&self, ticker: &str) -> Result<Vec<StoredFill>> {
        sqlx::query_as::<_, StoredFill>("SELECT * FROM fills WHERE ticker = ? ORDER BY id ASC")
            .bind(ticker)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load fills for ticker")
    }

    // ==================== Events ====================

    /// Append a system event. The full event is stored as JSON so later
    /// variants need no schema change.
    pub async fn save_event(&self, event: &SystemEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("Failed to serialize event")?;
        sqlx::query(
            r#"
            INSERT INTO events (label, is_critical, payload, recorded_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(event.label())
        .bind(event.is_critical())
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent events, newest first.
    pub async fn get_recent_events(&self, limit: i64) -> Result<Vec<StoredEvent>> {
        sqlx::query_as::<_, StoredEvent>("SELECT * FROM events ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load events")
    }

    // ==================== Session summaries ====================

    /// Record the end-of-session metrics snapshot.
    pub async fn save_session_summary(
        &self,
        metrics: &SessionMetrics,
        halted: bool,
        halt_reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_summaries
                (total_trades, winning_trades, losing_trades, win_rate,
                 realized_pnl, unrealized_pnl, total_commission, sharpe_ratio,
                 halted, halt_reason, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metrics.total_trades as i64)
        .bind(metrics.winning_trades as i64)
        .bind(metrics.losing_trades as i64)
        .bind(metrics.win_rate)
        .bind(metrics.realized_pnl.to_f64().unwrap_or(0.0))
        .bind(metrics.unrealized_pnl.to_f64().unwrap_or(0.0))
        .bind(metrics.total_commission.to_f64().unwrap_or(0.0))
        .bind(metrics.sharpe_ratio)
        .bind(halted)
        .bind(halt_reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
