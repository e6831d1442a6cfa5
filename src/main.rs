//! Intraday Trading Decision Engine
//!
//! Consumes a per-ticker price feed, detects reversal and VWAP-breakout
//! patterns, gates entries through filter presets, and manages positions
//! through a milestone exit ladder with a hard daily loss limit.

mod broker;
mod db;
mod detect;
mod engine;
mod metrics;
mod models;
mod trading;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::broker::PaperBroker;
use crate::db::Database;
use crate::engine::Engine;
use crate::models::PriceSample;
use crate::trading::{FilterPreset, SessionConfig};

/// Intraday trading decision engine CLI.
#[derive(Parser)]
#[command(name = "intraday-engine")]
#[command(about = "Pattern-driven intraday trading session runner", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./intraday.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live session, reading JSONL price samples from stdin
    Run {
        /// Starting capital the loss limit is measured against
        #[arg(short, long)]
        capital: Option<Decimal>,

        /// Filter preset to start the session with
        #[arg(short, long)]
        preset: Option<String>,

        /// Ticker universe, comma separated; empty accepts every feed ticker
        #[arg(short, long)]
        tickers: Option<String>,

        /// Skip the audit-trail database
        #[arg(long)]
        no_db: bool,
    },

    /// Replay a recorded JSONL sample file through a full session
    Replay {
        /// Path to the recorded sample file
        file: String,

        /// Starting capital the loss limit is measured against
        #[arg(short, long)]
        capital: Option<Decimal>,

        /// Filter preset to start the session with
        #[arg(short, long)]
        preset: Option<String>,

        /// Skip the audit-trail database
        #[arg(long)]
        no_db: bool,
    },

    /// List the built-in filter presets
    Presets,

    /// Show the effective session configuration
    Config,

    /// Show stored fills from previous sessions
    Fills {
        /// Restrict to one ticker
        #[arg(short, long)]
        ticker: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            capital,
            preset,
            tickers,
            no_db,
        } => {
            let config = build_config(capital, preset, tickers);
            let db = open_db(&cli.database, no_db).await?;
            let (tx, rx) = mpsc::channel(1024);

            tokio::spawn(async move {
                let stdin = BufReader::new(tokio::io::stdin());
                feed_lines(stdin, tx).await;
            });

            run_session(config, db, rx).await?;
        }

        Commands::Replay {
            file,
            capital,
            preset,
            no_db,
        } => {
            let config = build_config(capital, preset, None);
            let db = open_db(&cli.database, no_db).await?;
            let (tx, rx) = mpsc::channel(1024);

            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("cannot open replay file {file}"))?;
            tokio::spawn(async move {
                feed_lines(BufReader::new(handle), tx).await;
            });

            run_session(config, db, rx).await?;
        }

        Commands::Presets => {
            println!("\n{:<14} {:<8} {:<8} {:<9} {:<7} {:<8} PATTERN", "NAME", "VWAP", "VOLUME", "SUPPORT", "TREND", "WINDOWS");
            println!("{}", "-".repeat(70));
            for p in FilterPreset::all() {
                println!(
                    "{:<14} {:<8} {:<8} {:<9} {:<7} {:<8} {}",
                    p.name,
                    p.vwap_band_pct.map_or("-".to_string(), |v| v.to_string()),
                    p.volume_multiplier.map_or("-".to_string(), |v| v.to_string()),
                    p.support_tolerance_pct.map_or("-".to_string(), |v| v.to_string()),
                    if p.require_trend_alignment { "yes" } else { "-" },
                    p.excluded_windows.len(),
                    p.pattern_kind.map_or("any", |k| k.as_str()),
                );
            }
        }

        Commands::Config => {
            let config = build_config(None, None, None);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Fills { ticker } => {
            let db = Database::new(&cli.database).await?;
            let fills = match ticker {
                Some(t) => db.get_fills_for_ticker(&t).await?,
                None => db.get_fills().await?,
            };

            if fills.is_empty() {
                println!("No fills recorded.");
                return Ok(());
            }

            println!(
                "\n{:<8} {:<5} {:>10} {:>8} {:>10} {:<20} {}",
                "TICKER", "SIDE", "PRICE", "QTY", "PNL", "REASON", "AT"
            );
            println!("{}", "-".repeat(90));
            for f in fills {
                println!(
                    "{:<8} {:<5} {:>10.2} {:>8.0} {:>10} {:<20} {}",
                    f.ticker,
                    f.action,
                    f.price,
                    f.quantity,
                    f.realized_pnl.map_or("-".to_string(), |p| format!("{p:.2}")),
                    f.exit_reason.as_deref().unwrap_or("-"),
                    f.executed_at,
                );
            }
        }
    }

    Ok(())
}

/// Environment first, then explicit CLI flags on top.
fn build_config(
    capital: Option<Decimal>,
    preset: Option<String>,
    tickers: Option<String>,
) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.apply_env();
    if let Some(capital) = capital {
        config.starting_capital = capital;
    }
    if let Some(preset) = preset {
        config.preset = preset;
    }
    if let Some(tickers) = tickers {
        config.tickers = tickers
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    config
}

async fn open_db(url: &str, no_db: bool) -> Result<Option<Database>> {
    if no_db {
        return Ok(None);
    }
    Ok(Some(Database::new(url).await?))
}

/// Parse JSONL price samples off a reader and push them into the feed
/// channel. Unparseable lines are logged and skipped.
async fn feed_lines<R>(reader: BufReader<R>, tx: mpsc::Sender<PriceSample>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<PriceSample>(line) {
                    Ok(sample) => {
                        if tx.send(sample).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "unparseable feed line skipped"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "feed read error");
                break;
            }
        }
    }
}

async fn run_session(
    config: SessionConfig,
    db: Option<Database>,
    feed: mpsc::Receiver<PriceSample>,
) -> Result<()> {
    info!(
        capital = %config.starting_capital,
        preset = %config.preset,
        "starting session"
    );

    let gateway = Arc::new(PaperBroker::new(config.commission_per_share));
    let mut engine = Engine::new(config, gateway, db)?;
    let metrics = engine.run(feed).await?;

    println!("\n{metrics}");
    Ok(())
}
