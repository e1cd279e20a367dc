//! Historical backtesting engine.
//!
//! Replays archived snapshots through the strategy pipeline in strict
//! chronological order. Bets are settled only once their game's
//! completion time plus a safety buffer has passed on the replay clock, and
//! the bankroll only moves on settlement. After the range is replayed a
//! final pass settles whatever it can; bets that still cannot be resolved
//! are reported as pending and never counted as losses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::calibration::{CalibrationPoint, CalibrationReport, Calibrator};
use super::ledger::{BankrollLedger, BankrollPoint};
use super::settlement::settle;
use crate::config::BacktestConfig;
use crate::data::{OddsFeed, ResultLookup};
use crate::storage::{BetRepository, MemoryBetRepository, SuppressionSet};
use crate::strategy::{ScanContext, StrategyPipeline};
use crate::types::{to_money, Bet, BetStatus, GameResult};

// ---------------------------------------------------------------------------
// Backtest results
// ---------------------------------------------------------------------------

/// Complete backtest performance report.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sports: Vec<String>,
    pub initial_bankroll: Decimal,
    pub final_bankroll: Decimal,
    pub total_profit: Decimal,
    /// Stake on settled bets only.
    pub total_staked: Decimal,
    pub total_bets: usize,
    pub settled: usize,
    pub won: usize,
    pub lost: usize,
    pub void: usize,
    /// Bets whose result could not be resolved. Excluded from every
    /// bankroll figure.
    pub pending: usize,
    pub pending_stake: Decimal,
    pub win_rate: f64,
    pub roi_pct: f64,
    pub return_pct: f64,
    /// Averages over settled bets.
    pub avg_odds: f64,
    pub avg_consensus_probability: f64,
    pub avg_ev: f64,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub calibration: CalibrationReport,
    pub by_sport: BTreeMap<String, SportBreakdown>,
    pub bankroll_history: Vec<BankrollPoint>,
    pub bets: Vec<Bet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SportBreakdown {
    pub bets: usize,
    pub won: usize,
    pub lost: usize,
    pub void: usize,
    pub pending: usize,
    pub staked: Decimal,
    pub profit: Decimal,
    pub roi_pct: f64,
}

fn pct(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator > Decimal::ZERO {
        (numerator / denominator * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    } else {
        0.0
    }
}

impl BacktestReport {
    fn build(
        config: &BacktestConfig,
        sports: &[String],
        bets: Vec<Bet>,
        ledger: &BankrollLedger,
    ) -> Self {
        let mut by_sport: BTreeMap<String, SportBreakdown> = BTreeMap::new();
        let mut calibrator = Calibrator::new();
        let mut returns = Vec::new();
        let (mut won, mut lost, mut void, mut pending) = (0, 0, 0, 0);
        let mut total_staked = Decimal::ZERO;
        let mut pending_stake = Decimal::ZERO;

        for bet in &bets {
            let sport = by_sport.entry(bet.sport.clone()).or_default();
            sport.bets += 1;
            match bet.status {
                BetStatus::Won => {
                    won += 1;
                    sport.won += 1;
                }
                BetStatus::Lost => {
                    lost += 1;
                    sport.lost += 1;
                }
                BetStatus::Void => {
                    void += 1;
                    sport.void += 1;
                }
                BetStatus::Pending | BetStatus::NotPlaced => {
                    pending += 1;
                    sport.pending += 1;
                    pending_stake += bet.stake;
                    continue;
                }
            }

            let pl = bet.profit_loss.unwrap_or(Decimal::ZERO);
            total_staked += bet.stake;
            sport.staked += bet.stake;
            sport.profit += pl;

            if bet.stake > Decimal::ZERO {
                returns.push((pl / bet.stake).to_f64().unwrap_or(0.0));
            }
            if matches!(bet.status, BetStatus::Won | BetStatus::Lost) {
                calibrator.add_point(CalibrationPoint {
                    sport: bet.sport.clone(),
                    probability: bet.consensus_probability,
                    won: bet.status == BetStatus::Won,
                });
            }
        }
        for sport in by_sport.values_mut() {
            sport.roi_pct = pct(sport.profit, sport.staked);
        }

        // Averages cover settled bets only, like every other bankroll figure.
        let settled: Vec<&Bet> = bets.iter().filter(|b| b.status.is_settled()).collect();
        let mean = |f: fn(&Bet) -> f64| -> f64 {
            if settled.is_empty() {
                0.0
            } else {
                settled.iter().map(|b| f(b)).sum::<f64>() / settled.len() as f64
            }
        };

        let initial = ledger.initial();
        let total_profit = ledger.balance() - initial;
        let (max_drawdown, max_drawdown_pct) = ledger.max_drawdown();

        BacktestReport {
            start: config.start,
            end: config.end,
            sports: sports.to_vec(),
            initial_bankroll: initial,
            final_bankroll: ledger.balance(),
            total_profit,
            total_staked,
            total_bets: bets.len(),
            settled: won + lost + void,
            won,
            lost,
            void,
            pending,
            pending_stake,
            win_rate: if won + lost > 0 {
                won as f64 / (won + lost) as f64
            } else {
                0.0
            },
            roi_pct: pct(total_profit, total_staked),
            return_pct: pct(total_profit, initial),
            avg_odds: mean(|b| b.odds),
            avg_consensus_probability: mean(|b| b.consensus_probability),
            avg_ev: mean(|b| b.ev),
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: compute_sharpe(&returns),
            calibration: calibrator.report(),
            by_sport,
            bankroll_history: ledger.history(),
            bets,
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        crate::storage::save_json(self, path).context("Failed to save backtest report")
    }
}

/// Sharpe ratio of per-bet returns (profit / stake), not annualised.
fn compute_sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev < 1e-10 {
        return 0.0;
    }
    mean / std_dev
}

// ---------------------------------------------------------------------------
// Backtester
// ---------------------------------------------------------------------------

/// Mutable state of one replay.
struct Replay {
    repo: MemoryBetRepository,
    ledger: BankrollLedger,
    /// Result lookups by event id. `None` means the source had no result.
    results: HashMap<String, Option<GameResult>>,
    next_id: usize,
}

impl Replay {
    fn next_bet_id(&mut self) -> String {
        self.next_id += 1;
        format!("bt-{:06}", self.next_id)
    }
}

pub struct Backtester {
    config: BacktestConfig,
    sports: Vec<String>,
    pipeline: StrategyPipeline,
    feed: Arc<dyn OddsFeed>,
    results: Arc<dyn ResultLookup>,
}

impl Backtester {
    pub fn new(
        config: BacktestConfig,
        sports: Vec<String>,
        pipeline: StrategyPipeline,
        feed: Arc<dyn OddsFeed>,
        results: Arc<dyn ResultLookup>,
    ) -> Self {
        Self {
            config,
            sports,
            pipeline,
            feed,
            results,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn buffer(&self) -> Duration {
        Duration::hours(self.config.settlement_buffer_hours)
    }

    fn assumed_duration(&self) -> Duration {
        Duration::hours(self.config.assumed_event_duration_hours)
    }

    /// Replay the configured range and build the report.
    pub async fn run(&self, initial_bankroll: Decimal) -> Result<BacktestReport> {
        let step = Duration::hours(self.config.step_hours.max(1));
        let mut state = Replay {
            repo: MemoryBetRepository::new(),
            ledger: BankrollLedger::new(initial_bankroll, self.config.start),
            results: HashMap::new(),
            next_id: 0,
        };

        info!(
            start = %self.config.start,
            end = %self.config.end,
            step_hours = step.num_hours(),
            sports = self.sports.len(),
            bankroll = %initial_bankroll,
            "Backtest started"
        );

        let mut now = self.config.start;
        while now <= self.config.end {
            self.settle_due(&mut state, now).await;
            for sport in &self.sports {
                self.place_bets(&mut state, sport, now).await?;
            }
            now += step;
        }

        let final_time = self.config.end + Duration::days(self.config.final_settlement_days);
        self.final_settlement(&mut state, final_time).await;

        let report = BacktestReport::build(&self.config, &self.sports, state.repo.bets(), &state.ledger);
        info!(
            bets = report.total_bets,
            won = report.won,
            lost = report.lost,
            void = report.void,
            pending = report.pending,
            profit = %report.total_profit,
            roi = format!("{:.2}%", report.roi_pct),
            final_bankroll = %report.final_bankroll,
            "Backtest finished"
        );
        Ok(report)
    }

    /// Run one sport's snapshot through the pipeline and record new bets.
    async fn place_bets(&self, state: &mut Replay, sport: &str, now: DateTime<Utc>) -> Result<()> {
        let snapshot = match self
            .feed
            .fetch_odds(sport, self.pipeline.markets(), Some(now))
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(sport, at = %now, error = %e, "Snapshot unavailable, skipping step");
                return Ok(());
            }
        };

        let bankroll = state.ledger.balance().to_f64().unwrap_or(0.0);
        if bankroll <= 0.0 {
            warn!(at = %now, "Bankroll exhausted, no new bets");
            return Ok(());
        }

        let mut suppression = SuppressionSet::from_repository(&state.repo, 0);
        let ctx = ScanContext {
            reference_time: now,
            bankroll,
            suppression: &suppression,
            max_days_ahead: None,
        };
        let (opportunities, _) = self.pipeline.evaluate_snapshot(&snapshot, &ctx);

        for opp in opportunities {
            let key = opp.key();
            if suppression.is_wagered(&key) {
                continue;
            }
            if to_money(opp.stake) <= Decimal::ZERO {
                debug!(key = %key, "Stake rounds to zero, skipping");
                continue;
            }
            let bet = Bet::from_opportunity(state.next_bet_id(), &opp, BetStatus::Pending, now);

            state.ledger.record_pending(&bet, now);
            info!(
                bet_id = %bet.id,
                key = %key,
                bookmaker = %bet.bookmaker,
                odds = bet.odds,
                stake = %bet.stake,
                "Backtest bet placed"
            );
            state
                .repo
                .record(bet)
                .with_context(|| format!("Failed to record bet for {key}"))?;
            suppression.insert_wagered(key);
        }
        Ok(())
    }

    /// Settle pending bets whose results are already knowable at `now`.
    async fn settle_due(&self, state: &mut Replay, now: DateTime<Utc>) {
        let earliest_possible = self.assumed_duration() + self.buffer();
        for bet in state.repo.pending() {
            if bet.commence_time + earliest_possible > now {
                continue;
            }
            if !state.results.contains_key(&bet.event_id) {
                match self
                    .results
                    .lookup(&bet.sport, &bet.home_team, &bet.away_team, bet.commence_time)
                    .await
                {
                    Ok(found) => remember_result(state, &bet.event_id, found),
                    Err(e) => {
                        warn!(bet_id = %bet.id, error = %e, "Result lookup failed");
                        continue;
                    }
                }
            }
            if let Some(Some(result)) = state.results.get(&bet.event_id).cloned() {
                self.apply_result(state, &bet, &result, now);
            }
        }
    }

    /// Look up every outstanding game concurrently, then settle sequentially
    /// in a fixed order.
    async fn final_settlement(&self, state: &mut Replay, final_time: DateTime<Utc>) {
        let mut games: BTreeMap<String, Bet> = BTreeMap::new();
        for bet in state.repo.pending() {
            if !matches!(state.results.get(&bet.event_id), Some(Some(_))) {
                games.entry(bet.event_id.clone()).or_insert(bet);
            }
        }

        let results = self.results.as_ref();
        let fetched: Vec<_> = stream::iter(games.into_values())
            .map(|bet| async move {
                let found = results
                    .lookup(&bet.sport, &bet.home_team, &bet.away_team, bet.commence_time)
                    .await;
                (bet, found)
            })
            .buffer_unordered(self.config.result_concurrency.max(1))
            .collect()
            .await;

        for (bet, found) in fetched {
            match found {
                Ok(found) => remember_result(state, &bet.event_id, found),
                Err(e) => warn!(event_id = %bet.event_id, error = %e, "Final result lookup failed"),
            }
        }

        let mut pending = state.repo.pending();
        pending.sort_by(|a, b| (a.commence_time, &a.id).cmp(&(b.commence_time, &b.id)));
        for bet in pending {
            if let Some(Some(result)) = state.results.get(&bet.event_id).cloned() {
                self.apply_result(state, &bet, &result, final_time);
            }
        }

        let unresolved = state.repo.pending().len();
        if unresolved > 0 {
            warn!(unresolved, "Bets left unsettled after final pass");
        }
    }

    /// Settle one bet if its result was knowable at `now`.
    fn apply_result(&self, state: &mut Replay, bet: &Bet, result: &GameResult, now: DateTime<Utc>) {
        let completed_at = result
            .completed_at
            .unwrap_or(bet.commence_time + self.assumed_duration());
        if completed_at + self.buffer() > now {
            debug!(bet_id = %bet.id, completed_at = %completed_at, "Result not yet knowable");
            return;
        }

        let status = match settle(bet, result) {
            Ok(status) => status,
            Err(e) => {
                warn!(bet_id = %bet.id, error = %e, "Cannot settle, leaving pending");
                return;
            }
        };

        let profit = bet.settlement_profit(status);
        if let Err(e) = state.repo.update_status(&bet.id, status, profit, now) {
            warn!(bet_id = %bet.id, error = %e, "Failed to update bet status");
            return;
        }
        state.ledger.record_settlement(bet, status, now);
        info!(
            bet_id = %bet.id,
            status = %status,
            profit = %profit,
            balance = %state.ledger.balance(),
            "Bet settled"
        );
    }
}

/// Cache a lookup outcome. In-progress scores are not cached so the game is
/// looked up again on the next step and in the final pass.
fn remember_result(state: &mut Replay, event_id: &str, found: Option<GameResult>) {
    match found {
        Some(result) if !result.completed => {
            debug!(event_id, "Game still in progress, will look up again");
            state.results.remove(event_id);
        }
        found => {
            state.results.insert(event_id.to_string(), found);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
