//! SHARPEDGE: sharp-consensus edge detection.
//!
//! Entry point. Loads configuration, validates it, initialises structured
//! logging and runs either one live scan or a historical backtest against
//! the file-backed adapters.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::*;
use tracing::{error, info, warn};

use sharpedge::backtest::Backtester;
use sharpedge::config::{self, RunMode};
use sharpedge::data::archive::{ResultsFile, SnapshotArchive};
use sharpedge::data::TtlPriceCache;
use sharpedge::engine::scanner::Scanner;
use sharpedge::storage::csv_store::CsvBetRepository;
use sharpedge::storage::{BetRepository, SuppressionSet};
use sharpedge::strategy::StrategyPipeline;
use sharpedge::types::{Bet, BetStatus, EdgeError};

const BANNER: &str = r#"
 ____  _   _    _    ____  ____  _____ ____   ____ _____
/ ___|| | | |  / \  |  _ \|  _ \| ____|  _ \ / ___| ____|
\___ \| |_| | / _ \ | |_) | |_) |  _| | | | | |  _|  _|
 ___) |  _  |/ ___ \|  _ <|  __/| |___| |_| | |_| | |___
|____/|_| |_/_/   \_\_| \_\_|   |_____|____/ \____|_____|

  Sharp-consensus edge detection and settlement backtesting
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let path = std::env::var("SHARPEDGE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&path)?;

    init_logging();

    if let Err(e) = cfg.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        mode = ?cfg.agent.mode,
        bankroll = cfg.agent.bankroll,
        currency = %cfg.agent.currency,
        sports = cfg.strategy.sports.len(),
        "SHARPEDGE starting up"
    );

    let pipeline = StrategyPipeline::from_config(&cfg.strategy)?;
    let feed = Arc::new(SnapshotArchive::new(&cfg.data.archive_dir));

    match cfg.agent.mode {
        RunMode::Scan => run_scan(&cfg, pipeline, feed).await,
        RunMode::Backtest => run_backtest(&cfg, pipeline, feed).await,
    }
}

/// One live scan; accepted opportunities are recorded as pending bets.
async fn run_scan(
    cfg: &config::AppConfig,
    pipeline: StrategyPipeline,
    feed: Arc<SnapshotArchive>,
) -> Result<()> {
    let mut repo = CsvBetRepository::open(&cfg.data.bet_history_path)?;
    let history = repo.summary();
    info!(
        bets = history.total,
        pending = history.pending,
        staked = %history.total_staked,
        profit = %history.actual_profit,
        win_rate = format!("{:.1}%", history.win_rate * 100.0),
        "Bet history"
    );

    let suppression = SuppressionSet::from_repository(&repo, cfg.strategy.max_bet_failures);
    let cache = Arc::new(TtlPriceCache::new(std::time::Duration::from_secs(
        cfg.scanner.cache_ttl_secs,
    )));
    let scanner = Scanner::new(
        feed,
        cache,
        pipeline,
        cfg.strategy.sports.clone(),
        cfg.scanner.max_concurrency,
    );

    let now = Utc::now();
    let max_days_ahead = Some(cfg.strategy.max_days_ahead).filter(|d| *d > 0);
    let summary = scanner
        .scan(cfg.agent.bankroll, &suppression, max_days_ahead, now)
        .await;

    let mut recorded = 0usize;
    for opp in &summary.opportunities {
        info!("{opp}");
        let bet = Bet::from_opportunity(uuid::Uuid::new_v4().to_string(), opp, BetStatus::Pending, now);
        match repo.record(bet) {
            Ok(()) => recorded += 1,
            Err(EdgeError::DuplicateBet(key)) => warn!(key = %key, "Already recorded, skipping"),
            Err(e) => return Err(e).context("Failed to record bet"),
        }
    }

    info!(
        opportunities = summary.opportunities.len(),
        recorded,
        failed_sports = summary.failed_sports.len(),
        path = %repo.path().display(),
        "Scan finished"
    );
    Ok(())
}

/// Replay the configured range and persist the report.
async fn run_backtest(
    cfg: &config::AppConfig,
    pipeline: StrategyPipeline,
    feed: Arc<SnapshotArchive>,
) -> Result<()> {
    let results = Arc::new(ResultsFile::load(&cfg.data.results_file)?);
    let bankroll = Decimal::from_f64(cfg.agent.bankroll)
        .context("Bankroll is not representable")?
        .round_dp(2);

    let backtester = Backtester::new(
        cfg.backtest.clone(),
        cfg.strategy.sports.clone(),
        pipeline,
        feed,
        results,
    );
    let report = backtester.run(bankroll).await?;
    report.save(&cfg.backtest.report_path)?;

    info!(
        settled = report.settled,
        pending = report.pending,
        final_bankroll = %report.final_bankroll,
        roi = format!("{:.2}%", report.roi_pct),
        max_drawdown = format!("{:.2}%", report.max_drawdown_pct),
        sharpe = format!("{:.3}", report.sharpe_ratio),
        brier = format!("{:.4}", report.calibration.brier_score),
        path = %cfg.backtest.report_path,
        "Backtest report saved"
    );
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sharpedge=info"));

    let json_logging = std::env::var("SHARPEDGE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
