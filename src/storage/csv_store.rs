//! Flat-file bet repository.
//!
//! Keeps the full history in memory and rewrites the CSV file after every
//! mutation (write to a temp file, then rename). A mutation that fails to
//! persist is not applied in memory either.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BetRepository, MemoryBetRepository};
use crate::types::{Bet, BetStatus, EdgeError, MarketType, OutcomeKey};

/// One CSV row. Money is stored as decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BetRow {
    id: String,
    event_id: String,
    sport: String,
    home_team: String,
    away_team: String,
    commence_time: DateTime<Utc>,
    market: String,
    outcome: String,
    point: Option<f64>,
    bookmaker: String,
    odds: f64,
    cardinality: usize,
    consensus_probability: f64,
    ev: f64,
    stake: String,
    expected_profit: String,
    status: String,
    placed_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
    profit_loss: Option<String>,
}

impl From<&Bet> for BetRow {
    fn from(bet: &Bet) -> Self {
        Self {
            id: bet.id.clone(),
            event_id: bet.event_id.clone(),
            sport: bet.sport.clone(),
            home_team: bet.home_team.clone(),
            away_team: bet.away_team.clone(),
            commence_time: bet.commence_time,
            market: bet.market.key().to_string(),
            outcome: bet.outcome.name.clone(),
            point: bet.outcome.line(),
            bookmaker: bet.bookmaker.clone(),
            odds: bet.odds,
            cardinality: bet.cardinality,
            consensus_probability: bet.consensus_probability,
            ev: bet.ev,
            stake: bet.stake.to_string(),
            expected_profit: bet.expected_profit.to_string(),
            status: bet.status.as_str().to_string(),
            placed_at: bet.placed_at,
            settled_at: bet.settled_at,
            profit_loss: bet.profit_loss.map(|d| d.to_string()),
        }
    }
}

impl TryFrom<BetRow> for Bet {
    type Error = EdgeError;

    fn try_from(row: BetRow) -> Result<Self, Self::Error> {
        let market = MarketType::from_key(&row.market)
            .ok_or_else(|| EdgeError::Storage(format!("unknown market '{}' for bet {}", row.market, row.id)))?;
        let status = BetStatus::parse(&row.status)
            .ok_or_else(|| EdgeError::Storage(format!("unknown status '{}' for bet {}", row.status, row.id)))?;
        let profit_loss = row.profit_loss.as_deref().map(parse_money).transpose()?;

        Ok(Bet {
            stake: parse_money(&row.stake)?,
            expected_profit: parse_money(&row.expected_profit)?,
            outcome: OutcomeKey::new(row.outcome, row.point),
            id: row.id,
            event_id: row.event_id,
            sport: row.sport,
            home_team: row.home_team,
            away_team: row.away_team,
            commence_time: row.commence_time,
            market,
            bookmaker: row.bookmaker,
            odds: row.odds,
            cardinality: row.cardinality,
            consensus_probability: row.consensus_probability,
            ev: row.ev,
            status,
            placed_at: row.placed_at,
            settled_at: row.settled_at,
            profit_loss,
        })
    }
}

fn parse_money(s: &str) -> Result<Decimal, EdgeError> {
    Decimal::from_str(s).map_err(|e| EdgeError::Storage(format!("invalid amount '{s}': {e}")))
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

pub struct CsvBetRepository {
    path: PathBuf,
    inner: MemoryBetRepository,
}

impl CsvBetRepository {
    /// Open a bet history file, loading it if it exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EdgeError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            info!(path = %path.display(), "No bet history found, starting empty");
            return Ok(Self {
                path,
                inner: MemoryBetRepository::new(),
            });
        }

        let mut reader = ReaderBuilder::new().has_headers(true).from_path(&path)?;
        let mut bets = Vec::new();
        for row in reader.deserialize::<BetRow>() {
            bets.push(Bet::try_from(row?)?);
        }

        info!(path = %path.display(), bets = bets.len(), "Bet history loaded");
        Ok(Self {
            path,
            inner: MemoryBetRepository::from_bets(bets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, repo: &MemoryBetRepository) -> Result<(), EdgeError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = WriterBuilder::new().has_headers(true).from_path(&tmp)?;
            for bet in repo.bets() {
                writer.serialize(BetRow::from(&bet))?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `op` to a copy of the history and keep it only if it persists.
    fn commit<T>(
        &mut self,
        op: impl FnOnce(&mut MemoryBetRepository) -> Result<T, EdgeError>,
    ) -> Result<T, EdgeError> {
        let mut next = self.inner.clone();
        let out = op(&mut next)?;
        if let Err(e) = self.persist(&next) {
            warn!(path = %self.path.display(), error = %e, "Failed to persist bet history");
            return Err(e);
        }
        self.inner = next;
        Ok(out)
    }
}

impl BetRepository for CsvBetRepository {
    fn record(&mut self, bet: Bet) -> Result<(), EdgeError> {
        self.commit(|repo| repo.record(bet))
    }

    fn update_status(
        &mut self,
        id: &str,
        status: BetStatus,
        profit_loss: Decimal,
        settled_at: DateTime<Utc>,
    ) -> Result<Bet, EdgeError> {
        self.commit(|repo| repo.update_status(id, status, profit_loss, settled_at))
    }

    fn bets(&self) -> Vec<Bet> {
        self.inner.bets()
    }

    fn get(&self, id: &str) -> Option<Bet> {
        self.inner.get(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
