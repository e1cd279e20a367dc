//! Persistence layer.
//!
//! Defines the bet repository contract, an in-memory implementation used
//! by backtests, the read-only suppression view handed to scan workers and
//! JSON persistence for reports. The flat-file repository lives in
//! [`csv_store`].

pub mod csv_store;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::types::{Bet, BetStatus, EdgeError, OpportunityKey};

// ---------------------------------------------------------------------------
// Repository contract
// ---------------------------------------------------------------------------

/// Append-and-update store of bets.
///
/// Implementations must keep at most one active (non `not_placed`) bet per
/// outcome and only ever move a bet from pending to a settled state.
pub trait BetRepository: Send {
    /// Append a new bet.
    fn record(&mut self, bet: Bet) -> Result<(), EdgeError>;

    /// Settle a pending bet. Returns the updated bet.
    fn update_status(
        &mut self,
        id: &str,
        status: BetStatus,
        profit_loss: Decimal,
        settled_at: DateTime<Utc>,
    ) -> Result<Bet, EdgeError>;

    /// Every bet, in record order.
    fn bets(&self) -> Vec<Bet>;

    fn get(&self, id: &str) -> Option<Bet> {
        self.bets().into_iter().find(|b| b.id == id)
    }

    fn pending(&self) -> Vec<Bet> {
        self.bets()
            .into_iter()
            .filter(|b| b.status == BetStatus::Pending)
            .collect()
    }

    /// Outcomes that already have a bet other than a `not_placed` attempt.
    fn already_wagered_outcomes(&self) -> HashSet<OpportunityKey> {
        self.bets()
            .iter()
            .filter(|b| b.status != BetStatus::NotPlaced)
            .map(Bet::opportunity_key)
            .collect()
    }

    /// Outcomes whose trailing run of `not_placed` attempts is at least
    /// `threshold`. A threshold of 0 disables blacklisting.
    fn blacklisted_outcomes(&self, threshold: u32) -> HashSet<OpportunityKey> {
        if threshold == 0 {
            return HashSet::new();
        }
        let mut runs: HashMap<OpportunityKey, u32> = HashMap::new();
        for bet in self.bets() {
            let run = runs.entry(bet.opportunity_key()).or_insert(0);
            if bet.status == BetStatus::NotPlaced {
                *run += 1;
            } else {
                *run = 0;
            }
        }
        runs.into_iter()
            .filter(|(_, run)| *run >= threshold)
            .map(|(key, _)| key)
            .collect()
    }

    fn summary(&self) -> HistorySummary {
        HistorySummary::from_bets(&self.bets())
    }
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

/// Vec-backed repository; also the working set of the CSV store.
#[derive(Debug, Default, Clone)]
pub struct MemoryBetRepository {
    bets: Vec<Bet>,
}

impl MemoryBetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bets(bets: Vec<Bet>) -> Self {
        Self { bets }
    }

    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }
}

impl BetRepository for MemoryBetRepository {
    fn record(&mut self, bet: Bet) -> Result<(), EdgeError> {
        if self.bets.iter().any(|b| b.id == bet.id) {
            return Err(EdgeError::DuplicateBet(bet.id));
        }
        if bet.status != BetStatus::NotPlaced {
            let key = bet.opportunity_key();
            if self
                .bets
                .iter()
                .any(|b| b.status != BetStatus::NotPlaced && b.opportunity_key() == key)
            {
                return Err(EdgeError::DuplicateBet(key.to_string()));
            }
        }
        debug!(id = %bet.id, outcome = %bet.opportunity_key(), status = %bet.status, "Bet recorded");
        self.bets.push(bet);
        Ok(())
    }

    fn update_status(
        &mut self,
        id: &str,
        status: BetStatus,
        profit_loss: Decimal,
        settled_at: DateTime<Utc>,
    ) -> Result<Bet, EdgeError> {
        let bet = self
            .bets
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| EdgeError::BetNotFound(id.to_string()))?;

        if !bet.status.can_transition_to(status) {
            return Err(EdgeError::InvalidTransition {
                from: bet.status,
                to: status,
            });
        }

        bet.status = status;
        bet.profit_loss = Some(profit_loss);
        bet.settled_at = Some(settled_at);
        Ok(bet.clone())
    }

    fn bets(&self) -> Vec<Bet> {
        self.bets.clone()
    }

    fn get(&self, id: &str) -> Option<Bet> {
        self.bets.iter().find(|b| b.id == id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Suppression view
// ---------------------------------------------------------------------------

/// Read-only snapshot of the dedup and blacklist state.
///
/// Scan workers only ever read this; writes go through the repository.
#[derive(Debug, Clone, Default)]
pub struct SuppressionSet {
    wagered: HashSet<OpportunityKey>,
    blacklisted: HashSet<OpportunityKey>,
}

impl SuppressionSet {
    pub fn new(wagered: HashSet<OpportunityKey>, blacklisted: HashSet<OpportunityKey>) -> Self {
        Self {
            wagered,
            blacklisted,
        }
    }

    /// Snapshot a repository's current state.
    pub fn from_repository(repo: &dyn BetRepository, max_failures: u32) -> Self {
        Self::new(
            repo.already_wagered_outcomes(),
            repo.blacklisted_outcomes(max_failures),
        )
    }

    pub fn is_wagered(&self, key: &OpportunityKey) -> bool {
        self.wagered.contains(key)
    }

    pub fn is_blacklisted(&self, key: &OpportunityKey) -> bool {
        self.blacklisted.contains(key)
    }

    /// Mark an outcome as wagered within this snapshot.
    pub fn insert_wagered(&mut self, key: OpportunityKey) {
        self.wagered.insert(key);
    }

    pub fn wagered_count(&self) -> usize {
        self.wagered.len()
    }

    pub fn blacklisted_count(&self) -> usize {
        self.blacklisted.len()
    }
}

// ---------------------------------------------------------------------------
// History summary
// ---------------------------------------------------------------------------

/// Aggregate statistics over a bet history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub pending: usize,
    pub won: usize,
    pub lost: usize,
    pub void: usize,
    pub not_placed: usize,
    pub total_staked: Decimal,
    pub expected_profit: Decimal,
    pub actual_profit: Decimal,
    /// Wins over decided (won + lost) bets.
    pub win_rate: f64,
}

impl HistorySummary {
    pub fn from_bets(bets: &[Bet]) -> Self {
        let mut s = HistorySummary {
            total: bets.len(),
            ..Default::default()
        };
        for bet in bets {
            match bet.status {
                BetStatus::Pending => s.pending += 1,
                BetStatus::Won => s.won += 1,
                BetStatus::Lost => s.lost += 1,
                BetStatus::Void => s.void += 1,
                BetStatus::NotPlaced => s.not_placed += 1,
            }
            if bet.status != BetStatus::NotPlaced {
                s.total_staked += bet.stake;
                s.expected_profit += bet.expected_profit;
            }
            if let Some(pl) = bet.profit_loss {
                s.actual_profit += pl;
            }
        }
        let decided = s.won + s.lost;
        s.win_rate = if decided > 0 {
            s.won as f64 / decided as f64
        } else {
            0.0
        };
        s
    }
}

// ---------------------------------------------------------------------------
// JSON persistence
// ---------------------------------------------------------------------------

/// Save any serialisable value as pretty JSON.
pub fn save_json<T: Serialize>(value: &T, path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {path}"))?;
        }
    }

    let json = serde_json::to_string_pretty(value).context("Failed to serialise value")?;
    std::fs::write(path, &json).with_context(|| format!("Failed to write {path}"))?;

    info!(path, bytes = json.len(), "Saved JSON");
    Ok(())
}

/// Load a JSON file. Returns `None` if the file doesn't exist.
pub fn load_json<T: DeserializeOwned>(path: &str) -> Result<Option<T>> {
    if !Path::new(path).exists() {
        debug!(path, "No JSON file found");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    let value = serde_json::from_str(&json).with_context(|| format!("Failed to parse {path}"))?;
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
