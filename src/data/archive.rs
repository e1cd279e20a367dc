//! File-backed adapters for the odds feed and the result source.
//!
//! Snapshots are stored one file per capture under
//! `{root}/{sport}/{YYYYMMDDTHHMMSSZ}.json`, each holding the provider's
//! event list. A historical request returns the latest capture at or before
//! the requested instant, so a replay can never read prices from its future.
//!
//! Results are one JSON array of final scores, matched to a fixture by
//! sport, date and team names.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{OddsFeed, ResultLookup};
use crate::backtest::settlement::fixture_matches;
use crate::types::{EdgeError, EventOdds, GameResult, MarketType, OddsSnapshot};

const FILE_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

// ---------------------------------------------------------------------------
// Snapshot archive
// ---------------------------------------------------------------------------

pub struct SnapshotArchive {
    root: PathBuf,
}

impl SnapshotArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capture times available for a sport, oldest first.
    pub fn captures(&self, sport: &str) -> Result<Vec<DateTime<Utc>>> {
        let dir = self.root.join(sport);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut times = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match NaiveDateTime::parse_from_str(stem, FILE_TIME_FORMAT) {
                Ok(t) => times.push(t.and_utc()),
                Err(_) => debug!(path = %path.display(), "Skipping unrecognised archive file"),
            }
        }
        times.sort();
        Ok(times)
    }

    /// Write a snapshot as a new capture.
    pub fn save(&self, snapshot: &OddsSnapshot) -> Result<PathBuf> {
        let dir = self.root.join(&snapshot.sport);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("{}.json", snapshot.timestamp.format(FILE_TIME_FORMAT)));
        let json = serde_json::to_string(&snapshot.events).context("Failed to serialise snapshot")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn load(&self, sport: &str, at: DateTime<Utc>) -> Result<Vec<EventOdds>> {
        let path = self
            .root
            .join(sport)
            .join(format!("{}.json", at.format(FILE_TIME_FORMAT)));
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Keep only the requested markets in every posting.
fn retain_markets(events: &mut Vec<EventOdds>, markets: &[MarketType]) {
    for event in events.iter_mut() {
        for book in event.bookmakers.iter_mut() {
            book.markets
                .retain(|m| m.market_type().is_some_and(|t| markets.contains(&t)));
        }
        event.bookmakers.retain(|b| !b.markets.is_empty());
    }
}

#[async_trait]
impl OddsFeed for SnapshotArchive {
    async fn fetch_odds(
        &self,
        sport: &str,
        markets: &[MarketType],
        at: Option<DateTime<Utc>>,
    ) -> Result<OddsSnapshot, EdgeError> {
        let feed_err = |e: anyhow::Error| EdgeError::Feed {
            sport: sport.to_string(),
            message: format!("{e:#}"),
        };

        let captures = self.captures(sport).map_err(feed_err)?;
        let chosen = match at {
            Some(t) => captures.iter().rev().find(|c| **c <= t).copied(),
            None => captures.last().copied(),
        };
        let Some(capture) = chosen else {
            debug!(sport, at = ?at, "No archived snapshot");
            return Ok(OddsSnapshot::empty(sport, at.unwrap_or_else(Utc::now)));
        };

        let mut events = self.load(sport, capture).map_err(feed_err)?;
        retain_markets(&mut events, markets);

        debug!(sport, capture = %capture, events = events.len(), "Archived snapshot loaded");
        Ok(OddsSnapshot {
            sport: sport.to_string(),
            timestamp: capture,
            events,
        })
    }
}

// ---------------------------------------------------------------------------
// Results file
// ---------------------------------------------------------------------------

/// One archived final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedResult {
    pub sport: String,
    pub commence_time: DateTime<Utc>,
    #[serde(flatten)]
    pub result: GameResult,
}

pub struct ResultsFile {
    results: Vec<ArchivedResult>,
}

impl ResultsFile {
    pub fn new(results: Vec<ArchivedResult>) -> Self {
        Self { results }
    }

    /// Load a results file. A missing file yields an empty source.
    pub fn load(path: &str) -> Result<Self> {
        match crate::storage::load_json::<Vec<ArchivedResult>>(path)? {
            Some(results) => {
                info!(path, results = results.len(), "Results loaded");
                Ok(Self::new(results))
            }
            None => {
                warn!(path, "Results file not found, nothing will settle");
                Ok(Self::new(Vec::new()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[async_trait]
impl ResultLookup for ResultsFile {
    async fn lookup(
        &self,
        sport: &str,
        team_a: &str,
        team_b: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<GameResult>, EdgeError> {
        let window = Duration::days(1);
        let candidates: Vec<&ArchivedResult> = self
            .results
            .iter()
            .filter(|r| r.sport == sport)
            .filter(|r| (r.commence_time - date).abs() <= window)
            .filter(|r| fixture_matches(sport, team_a, team_b, &r.result))
            .collect();

        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.result.clone())),
            many => {
                warn!(
                    sport,
                    team_a,
                    team_b,
                    matches = many.len(),
                    "Ambiguous result match, leaving unsettled"
                );
                Ok(None)
            }
        }
    }
}
